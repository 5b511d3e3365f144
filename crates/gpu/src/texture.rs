//! Texture handles and decoded image data.

use common::{CompositorError, CompositorResult, Size};

/// Identifier of a texture owned by a [`SceneGraph`](crate::SceneGraph).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// A texture uploaded to the scene graph.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureHandle {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

impl TextureHandle {
    pub fn size(&self) -> Size {
        Size::new(self.width as f32, self.height as f32)
    }

    /// Approximate GPU memory held by the texture, assuming RGBA8.
    pub fn memory_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }
}

/// Decoded RGBA image data.
#[derive(Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageData {
    /// Create from raw RGBA data.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// A solid-colour image, used for placeholders.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::from_rgba(width, height, data)
    }

    /// Decode PNG/JPEG/GIF/WebP bytes.
    pub fn decode(bytes: &[u8]) -> CompositorResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| CompositorError::parse(format!("image decode failed: {e}")))?;
        let rgba = img.to_rgba8();

        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            data: rgba.into_raw(),
        })
    }
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let img = image::RgbaImage::from_pixel(8, 4, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();

        let decoded = ImageData::decode(bytes.get_ref()).unwrap();
        assert_eq!((decoded.width, decoded.height), (8, 4));
        assert_eq!(&decoded.data[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_is_parse_error() {
        let err = ImageData::decode(b"not an image").unwrap_err();
        assert_eq!(err.kind(), common::ErrorKind::Parse);
    }

    #[test]
    fn test_solid() {
        let img = ImageData::solid(2, 2, [1, 2, 3, 4]);
        assert_eq!(img.data.len(), 16);
        assert_eq!(&img.data[12..], &[1, 2, 3, 4]);
    }
}
