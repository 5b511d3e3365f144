//! Change polling for scene documents.

use crate::source::DocumentSource;
use common::CompositorError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default interval between change-marker polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub type ChangeCallback = Box<dyn FnMut(Value) + Send>;
pub type ErrorCallback = Box<dyn FnMut(CompositorError) + Send>;

/// Polls a [`DocumentSource`] and reports new versions of the document.
///
/// The first marker observed only establishes a baseline. A later marker
/// strictly greater than the baseline triggers a full fetch; the baseline
/// moves forward only once that fetch succeeds.
pub struct ConfigWatcher<S: ?Sized> {
    source: Arc<S>,
    interval: Duration,
    baseline: Option<u64>,
    on_change: Option<ChangeCallback>,
    on_error: Option<ErrorCallback>,
}

impl<S: DocumentSource + ?Sized + 'static> ConfigWatcher<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
            baseline: None,
            on_change: None,
            on_error: None,
        }
    }

    /// Poll period, at least 1ms.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn on_change(mut self, callback: impl FnMut(Value) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnMut(CompositorError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check the change marker once. Returns true if the change callback ran.
    pub async fn poll_once(&mut self) -> bool {
        let marker = match self.source.change_marker().await {
            Ok(Some(marker)) => marker,
            Ok(None) => return false,
            Err(err) => {
                self.report(err);
                return false;
            }
        };

        match self.baseline {
            None => {
                tracing::debug!(source = %self.source.describe(), marker, "watch baseline established");
                self.baseline = Some(marker);
                false
            }
            Some(baseline) if marker > baseline => {
                tracing::info!(source = %self.source.describe(), marker, "scene document changed");
                self.reload(Some(marker)).await
            }
            Some(_) => false,
        }
    }

    /// Fetch and report the document regardless of the change marker.
    pub async fn force_reload(&mut self) -> bool {
        let marker = self.source.change_marker().await.ok().flatten();
        self.reload(marker).await
    }

    async fn reload(&mut self, marker: Option<u64>) -> bool {
        match self.source.fetch().await {
            Ok(document) => {
                if let Some(callback) = self.on_change.as_mut() {
                    callback(document);
                }
                if marker.is_some() {
                    self.baseline = marker;
                }
                true
            }
            Err(err) => {
                self.report(err);
                false
            }
        }
    }

    fn report(&mut self, err: CompositorError) {
        tracing::warn!(source = %self.source.describe(), error = %err, "scene document watch failed");
        if let Some(callback) = self.on_error.as_mut() {
            callback(err);
        }
    }

    /// Drop the callbacks. Later polls still track the marker but report nothing.
    pub fn destroy(&mut self) {
        self.on_change = None;
        self.on_error = None;
    }

    /// Run the poll loop on the tokio runtime.
    pub fn spawn(mut self) -> WatcherHandle
    where
        S: Send + Sync,
    {
        let (force_tx, mut force_rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    request = force_rx.recv() => match request {
                        Some(()) => {
                            self.force_reload().await;
                        }
                        None => break,
                    },
                }
            }
        });

        WatcherHandle {
            task: Some(task),
            force: Some(force_tx),
        }
    }
}

/// Handle to a spawned [`ConfigWatcher`].
pub struct WatcherHandle {
    task: Option<JoinHandle<()>>,
    force: Option<mpsc::UnboundedSender<()>>,
}

impl WatcherHandle {
    /// Ask the running watcher to reload immediately.
    pub fn force_reload(&self) {
        if let Some(force) = &self.force {
            let _ = force.send(());
        }
    }

    /// Stop polling. The watcher, and with it its callbacks, is dropped.
    pub fn destroy(&mut self) {
        self.force = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_watcher(
        source: Arc<MemorySource>,
    ) -> (ConfigWatcher<MemorySource>, Arc<Mutex<Vec<Value>>>, Arc<AtomicUsize>) {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));
        let changes_cb = changes.clone();
        let errors_cb = errors.clone();
        let watcher = ConfigWatcher::new(source)
            .on_change(move |doc| changes_cb.lock().push(doc))
            .on_error(move |_| {
                errors_cb.fetch_add(1, Ordering::SeqCst);
            });
        (watcher, changes, errors)
    }

    #[test]
    fn test_zero_interval_is_floored() {
        let source = Arc::new(MemorySource::new(json!({})));
        let watcher = ConfigWatcher::new(source).with_interval(Duration::ZERO);
        assert_eq!(watcher.interval(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_first_poll_sets_baseline_only() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (mut watcher, changes, _) = counting_watcher(source.clone());

        assert!(!watcher.poll_once().await);
        assert_eq!(watcher.baseline(), Some(1));
        assert!(!watcher.poll_once().await);
        assert!(changes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_change_triggers_reload() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (mut watcher, changes, _) = counting_watcher(source.clone());
        watcher.poll_once().await;

        source.update(json!({"v": 2}));
        assert!(watcher.poll_once().await);
        assert_eq!(watcher.baseline(), Some(2));
        assert_eq!(changes.lock()[0]["v"], 2);

        assert!(!watcher.poll_once().await);
        assert_eq!(changes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_baseline() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (mut watcher, changes, errors) = counting_watcher(source.clone());
        watcher.poll_once().await;

        source.update(json!({"v": 2}));
        source.fail_next(1);
        assert!(!watcher.poll_once().await);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.baseline(), Some(1));

        assert!(watcher.poll_once().await);
        assert_eq!(changes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_force_reload_bypasses_marker() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (mut watcher, changes, _) = counting_watcher(source);

        assert!(watcher.force_reload().await);
        assert!(watcher.force_reload().await);
        assert_eq!(changes.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_destroy_drops_callbacks() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (mut watcher, changes, _) = counting_watcher(source.clone());
        watcher.poll_once().await;
        watcher.destroy();

        source.update(json!({"v": 2}));
        assert!(watcher.poll_once().await);
        assert!(changes.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_watcher_polls_on_interval() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (watcher, changes, _) = counting_watcher(source.clone());
        let mut handle = watcher.with_interval(Duration::from_millis(2000)).spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        source.update(json!({"v": 2}));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(changes.lock().len(), 1);

        handle.destroy();
        assert!(!handle.is_running());
        source.update(json!({"v": 3}));
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(changes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_force_reload() {
        let source = Arc::new(MemorySource::new(json!({"v": 1})));
        let (watcher, changes, _) = counting_watcher(source);
        let handle = watcher.spawn();

        handle.force_reload();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(changes.lock().len(), 1);
    }
}
