//! scene-viewer - render a layered scene document headlessly.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use compositor::CompositorConfig;
use gpu::{HeadlessGraph, HeadlessSurface};
use networking::{AssetLoader, ConfigWatcher, DocumentSource, FileSource, HttpSource};
use scene::LoaderEvent;
use viewer::ViewerSession;

/// scene-viewer - render a layered scene document
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scene document: a file path or an http(s) URL
    document: String,

    /// Reload the document when it changes
    #[arg(long)]
    watch: bool,

    /// Change-marker endpoint for an http(s) document, returning
    /// {"lastModified": <number>}
    #[arg(long)]
    marker: Option<String>,

    /// Poll interval for --watch, in milliseconds
    #[arg(long, default_value = "2000", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Frames to render before exiting (default 120, or unlimited with --watch)
    #[arg(long)]
    frames: Option<u64>,

    /// Container width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Container height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Start in low-power mode
    #[arg(long)]
    low_power: bool,

    /// Print the diagnostic overlay on exit
    #[arg(long)]
    overlay: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn compositor_config(&self) -> CompositorConfig {
        CompositorConfig::default()
            .with_viewport(self.width, self.height)
            .with_low_power(self.low_power)
            .with_poll_interval(Duration::from_millis(self.interval))
    }

    fn frame_limit(&self) -> Option<u64> {
        match (self.frames, self.watch) {
            (Some(frames), _) => Some(frames),
            (None, true) => None,
            (None, false) => Some(120),
        }
    }
}

fn is_url(document: &str) -> bool {
    document.starts_with("http://") || document.starts_with("https://")
}

/// The document source and the directory relative asset paths resolve
/// against.
fn open_source(document: &str, marker: Option<&str>) -> Result<(Arc<dyn DocumentSource>, PathBuf)> {
    if is_url(document) {
        let mut source = HttpSource::new(document)?;
        if let Some(marker) = marker {
            source = source.with_marker_url(marker)?;
        }
        return Ok((Arc::new(source), std::env::current_dir()?));
    }
    let path = Path::new(document);
    let base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((Arc::new(FileSource::new(path)), base_dir))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("scene-viewer v{}", viewer::VERSION);

    let config = args.compositor_config();
    let poll_interval = config.poll_interval;
    let (source, base_dir) = open_source(&args.document, args.marker.as_deref())?;
    let fetcher = Arc::new(AssetLoader::new(base_dir)?);
    let graph = Arc::new(HeadlessGraph::new());

    let mut session =
        ViewerSession::open(source.clone(), fetcher, graph, HeadlessSurface::new(), config).await?;

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LoaderEvent::LayersUpdated(layers) => info!(layers = layers.len(), "layers updated"),
                LoaderEvent::Progress(progress) => info!(
                    loaded = progress.loaded,
                    total = progress.total,
                    "loading {:.0}%",
                    progress.percentage
                ),
                LoaderEvent::Error(error) => warn!(error = %error, "scene error"),
            }
        }
    });

    let frame_ms = 1000.0 / f64::from(session.compositor().device().settings().target_fps.max(1));
    let limit = args.frame_limit();

    if args.watch {
        let (changes_tx, mut changes) = mpsc::unbounded_channel();
        let mut watcher = ConfigWatcher::new(source)
            .with_interval(poll_interval)
            .on_change(move |_| {
                let _ = changes_tx.send(());
            })
            .on_error(|error| warn!(error = %error, "document poll failed"))
            .spawn();
        info!(interval_ms = poll_interval.as_millis() as u64, "watching for changes");

        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(frame_ms / 1000.0));
        let mut rendered = 0u64;
        loop {
            tokio::select! {
                Some(()) = changes.recv() => {
                    if session.reload().await {
                        info!("scene reloaded");
                    }
                }
                _ = ticker.tick() => {
                    session.render_frame(started.elapsed().as_secs_f64() * 1000.0).await;
                    rendered += 1;
                    if limit.is_some_and(|limit| rendered >= limit) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
            }
        }
        watcher.destroy();
    } else if let Some(frames) = limit {
        session.render_frames(frames, 0.0, frame_ms).await;
    }

    let stats = session.compositor().stats();
    info!(
        frames = stats.frame_counter,
        rendered = stats.last_pass.rendered,
        culled = stats.last_pass.culled,
        degradation = stats.degradation_level,
        "render finished"
    );
    if args.overlay {
        println!("{}", session.compositor().diagnostic_overlay());
    }
    for suggestion in session.compositor().optimization_suggestions() {
        info!("suggestion: {suggestion}");
    }

    // Cleanup
    session.destroy();
    info!("viewer shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::parse_from(["scene-viewer", "scene.json"]);
        assert_eq!(args.document, "scene.json");
        assert!(!args.watch);
        assert_eq!(args.interval, 2000);
        assert_eq!(args.frame_limit(), Some(120));
    }

    #[test]
    fn test_args_watch_runs_until_interrupted() {
        let args = Args::parse_from(["scene-viewer", "scene.json", "--watch", "--interval", "500"]);
        assert!(args.watch);
        assert_eq!(args.frame_limit(), None);
        assert_eq!(args.compositor_config().poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_args_config() {
        let args = Args::parse_from([
            "scene-viewer",
            "scene.json",
            "--width",
            "800",
            "--height",
            "600",
            "--low-power",
            "--frames",
            "10",
        ]);
        let config = args.compositor_config();
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.low_power);
        assert_eq!(args.frame_limit(), Some(10));
    }

    #[test]
    fn test_args_rejects_zero_interval() {
        assert!(Args::try_parse_from(["scene-viewer", "scene.json", "--watch", "--interval", "0"]).is_err());
    }

    #[test]
    fn test_args_requires_document() {
        assert!(Args::try_parse_from(["scene-viewer"]).is_err());
    }

    #[test]
    fn test_open_source() {
        assert!(is_url("https://example.com/scene.json"));
        assert!(!is_url("scenes/scene.json"));

        let (source, base_dir) = open_source("scenes/scene.json", None).unwrap();
        assert_eq!(base_dir, PathBuf::from("scenes"));
        assert!(source.describe().contains("scene.json"));

        let (_, base_dir) = open_source("scene.json", None).unwrap();
        assert_eq!(base_dir, PathBuf::from("."));

        let (source, _) =
            open_source("https://example.com/scene.json", Some("https://example.com/marker")).unwrap();
        assert_eq!(source.describe(), "https://example.com/scene.json");
        assert!(open_source("https://example.com/scene.json", Some("not a url")).is_err());
    }
}
