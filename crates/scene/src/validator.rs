//! Structural and semantic validation of raw scene documents.
//!
//! Validation works on the untyped JSON so every problem can be reported as
//! a message, and never mutates its input.

use crate::model::{ImageRefKind, ValidationResult};
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

/// Validate a raw scene document.
pub fn validate(raw: &Value) -> ValidationResult {
    let mut report = Report::default();

    let Some(root) = raw.as_object() else {
        report.error("scene document must be an object");
        return report.finish();
    };

    let layers_id = match root.get("layersID") {
        Some(Value::Array(ids)) => Some(ids),
        _ => {
            report.error("layersID must be an array");
            None
        }
    };

    let registry = match root.get("imageRegistry") {
        Some(Value::Object(registry)) => {
            let non_strings: Vec<&String> = registry
                .iter()
                .filter(|(_, url)| !url.is_string())
                .map(|(key, _)| key)
                .collect();
            if non_strings.is_empty() {
                Some(registry)
            } else {
                for key in non_strings {
                    report.error(format!("imageRegistry.{key} must be a string URL"));
                }
                None
            }
        }
        _ => {
            report.error("imageRegistry must be an object");
            None
        }
    };

    let layers = match root.get("layers") {
        Some(Value::Array(layers)) => Some(layers),
        _ => {
            report.error("layers must be an array");
            None
        }
    };

    if let Some(registry) = registry {
        for (key, url) in registry {
            if let Some(url) = url.as_str() {
                if !is_url_like(url) {
                    report.warn(format!("imageRegistry.{key} is not a valid URL: {url}"));
                }
            }
        }
    }

    if let Some(layers) = layers {
        let mut seen = HashSet::new();
        for (index, layer) in layers.iter().enumerate() {
            validate_layer(index, layer, registry, &mut seen, &mut report);
        }
    }

    if let Some(ids) = layers_id {
        if ids.is_empty() {
            report.warn("layersID is empty");
        }
    }
    if let Some(layers) = layers {
        if layers.is_empty() {
            report.warn("layers is empty");
        }
    }

    if report.errors.is_empty() {
        if let (Some(ids), Some(layers), Some(registry)) = (layers_id, layers, registry) {
            cross_check(ids, layers, registry, &mut report);
        }
    }

    report.finish()
}

#[derive(Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Report {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

fn validate_layer<'a>(
    index: usize,
    layer: &'a Value,
    registry: Option<&Map<String, Value>>,
    seen: &mut HashSet<&'a str>,
    report: &mut Report,
) {
    let Some(layer) = layer.as_object() else {
        report.error(format!("layers[{index}] must be an object"));
        return;
    };

    match layer.get("id").and_then(Value::as_str) {
        Some(id) => {
            if !seen.insert(id) {
                report.error(format!("layers[{index}].id '{id}' is duplicated"));
            }
        }
        None => report.error(format!("layers[{index}].id must be a string")),
    }

    match layer.get("imageRef").and_then(Value::as_object) {
        Some(image_ref) => {
            if image_ref.get("kind").and_then(Value::as_str) != Some(ImageRefKind::TAG) {
                report.error(format!(
                    "layers[{index}].imageRef.kind must be \"{}\"",
                    ImageRefKind::TAG
                ));
            }
            match image_ref.get("id").and_then(Value::as_str) {
                Some(image_id) => {
                    if let Some(registry) = registry {
                        if !registry.contains_key(image_id) {
                            report.error(format!(
                                "layers[{index}].imageRef.id '{image_id}' is not in imageRegistry"
                            ));
                        }
                    }
                }
                None => report.error(format!("layers[{index}].imageRef.id must be a string")),
            }
        }
        None => report.error(format!("layers[{index}].imageRef must be an object")),
    }

    let position = layer.get("position");
    for axis in ["xPct", "yPct"] {
        match position.and_then(|p| p.get(axis)).and_then(Value::as_f64) {
            Some(pct) if (0.0..=100.0).contains(&pct) => {}
            Some(pct) => report.error(format!(
                "layers[{index}].position.{axis} must be between 0 and 100, got {pct}"
            )),
            None => report.error(format!("layers[{index}].position.{axis} must be a number")),
        }
    }

    match layer.get("scale").and_then(|s| s.get("pct")).and_then(Value::as_f64) {
        Some(pct) if pct > 0.0 => {}
        Some(pct) => report.error(format!("layers[{index}].scale.pct must be positive, got {pct}")),
        None => report.error(format!("layers[{index}].scale.pct must be a number")),
    }

    for field in ["angleDeg", "z"] {
        if layer.get(field).and_then(Value::as_f64).is_none() {
            report.error(format!("layers[{index}].{field} must be a number"));
        }
    }
}

/// Consistency checks between `layersID`, `layers` and the registry. Only
/// run on structurally valid documents, and only ever warn.
fn cross_check(ids: &[Value], layers: &[Value], registry: &Map<String, Value>, report: &mut Report) {
    let declared: HashSet<&str> = ids.iter().filter_map(Value::as_str).collect();
    let actual: HashSet<&str> = layers
        .iter()
        .filter_map(|layer| layer.get("id").and_then(Value::as_str))
        .collect();

    for id in ids.iter().filter_map(Value::as_str) {
        if !actual.contains(id) {
            report.warn(format!("layersID contains '{id}' with no matching layer"));
        }
    }
    for layer in layers {
        if let Some(id) = layer.get("id").and_then(Value::as_str) {
            if !declared.contains(id) {
                report.warn(format!("layer '{id}' is missing from layersID"));
            }
        }
    }

    let referenced: HashSet<&str> = layers
        .iter()
        .filter_map(|layer| layer.pointer("/imageRef/id").and_then(Value::as_str))
        .collect();
    for key in registry.keys() {
        if !referenced.contains(key.as_str()) {
            report.warn(format!("imageRegistry entry '{key}' is not used by any layer"));
        }
    }
}

/// Absolute URLs with a scheme, or paths relative to the document.
fn is_url_like(value: &str) -> bool {
    if value.starts_with('/') || value.starts_with("./") || value.starts_with("../") {
        return !value.contains(char::is_whitespace);
    }
    Url::parse(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "layersID": ["a", "b"],
            "imageRegistry": {
                "img1": "https://cdn.example.com/1.png",
                "img2": "./images/2.png"
            },
            "layers": [
                {"id": "a", "imageRef": {"kind": "urlId", "id": "img1"},
                 "position": {"xPct": 10, "yPct": 20}, "scale": {"pct": 100}, "angleDeg": 0, "z": 1},
                {"id": "b", "imageRef": {"kind": "urlId", "id": "img2"},
                 "position": {"xPct": 90, "yPct": 80}, "scale": {"pct": 50}, "angleDeg": 45, "z": 0}
            ]
        })
    }

    #[test]
    fn test_valid_document() {
        let result = validate(&document());
        assert!(result.is_valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_not_an_object() {
        let result = validate(&json!("scene"));
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_zero_scale_is_invalid() {
        let mut doc = document();
        doc["layers"][0]["scale"]["pct"] = json!(0);
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("scale.pct"));
    }

    #[test]
    fn test_position_out_of_range_is_invalid() {
        let mut doc = document();
        doc["layers"][1]["position"]["xPct"] = json!(150);
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("xPct"));
    }

    #[test]
    fn test_missing_image_reference_errors() {
        let mut doc = document();
        doc["layers"][0]["imageRef"]["id"] = json!("nope");
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("not in imageRegistry"));
    }

    #[test]
    fn test_unused_registry_entry_warns() {
        let mut doc = document();
        doc["imageRegistry"]["spare"] = json!("https://cdn.example.com/spare.png");
        let result = validate(&doc);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("spare")));
    }

    #[test]
    fn test_wrong_kind_and_non_numeric_fields() {
        let mut doc = document();
        doc["layers"][0]["imageRef"]["kind"] = json!("file");
        doc["layers"][0]["angleDeg"] = json!("45");
        doc["layers"][0]["z"] = Value::Null;
        let result = validate(&doc);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
    }

    #[test]
    fn test_registry_non_string_value() {
        let mut doc = document();
        doc["imageRegistry"]["img1"] = json!(42);
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("imageRegistry.img1"));
    }

    #[test]
    fn test_bad_url_warns() {
        let mut doc = document();
        doc["imageRegistry"]["img2"] = json!("not a url");
        let result = validate(&doc);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_layers_id_mismatch_warns_both_ways() {
        let mut doc = document();
        doc["layersID"] = json!(["a", "ghost"]);
        let result = validate(&doc);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("ghost")));
        assert!(result.warnings.iter().any(|w| w.contains("'b' is missing")));
    }

    #[test]
    fn test_cross_check_skipped_on_errors() {
        let mut doc = document();
        doc["layersID"] = json!(["ghost"]);
        doc["layers"][0]["z"] = json!("top");
        let result = validate(&doc);
        assert!(!result.is_valid);
        assert!(!result.warnings.iter().any(|w| w.contains("ghost")));
    }

    #[test]
    fn test_empty_lists_warn() {
        let result = validate(&json!({"layersID": [], "imageRegistry": {}, "layers": []}));
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_validation_does_not_mutate() {
        let doc = document();
        let before = doc.clone();
        validate(&doc);
        assert_eq!(doc, before);
    }
}
