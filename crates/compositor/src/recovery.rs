//! Error classification and recovery.
//!
//! Every error reaching the compositor is classified by kind into one of
//! four strategies. Retries back off exponentially, degradation walks a
//! fixed ladder of cheaper rendering settings, and fallback hands the
//! caller a minimal built-in scene.

use common::{CompositorError, CompositorResult, ErrorKind};
use scene::SceneDocument;
use std::future::Future;
use std::time::Duration;

/// Quality reductions applied in order, one per degradation level.
pub const DEGRADATION_STEPS: [&str; 5] = [
    "reduce layer count",
    "disable antialiasing",
    "reduce texture resolution",
    "force low-power mode",
    "minimal rendering mode",
];

const ACTION_LOG_LIMIT: usize = 50;

type NoRetry = fn() -> std::future::Ready<CompositorResult<()>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Degrade,
    Abort,
}

/// Strategy for an error. Memory errors degrade two steps at a time.
pub fn classify(error: &CompositorError) -> RecoveryStrategy {
    match error.kind() {
        ErrorKind::Network | ErrorKind::Load | ErrorKind::Timeout | ErrorKind::Internal => {
            RecoveryStrategy::Retry
        }
        ErrorKind::Validation | ErrorKind::Parse => RecoveryStrategy::Fallback,
        ErrorKind::Render | ErrorKind::Surface | ErrorKind::Memory => RecoveryStrategy::Degrade,
        ErrorKind::Cancelled => RecoveryStrategy::Abort,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// One handled error.
#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryAction {
    pub context: String,
    pub strategy: RecoveryStrategy,
    pub action: String,
    pub success: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoveryState {
    pub is_recovering: bool,
    pub last_error: Option<CompositorError>,
    pub retry_count: u32,
    pub recovery_actions: Vec<RecoveryAction>,
    pub degradation_level: usize,
}

/// Result of handling one error.
#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub strategy: RecoveryStrategy,
    pub action: String,
    /// The built-in scene to switch to, for the fallback strategy.
    pub fallback: Option<SceneDocument>,
}

impl RecoveryOutcome {
    fn new(recovered: bool, strategy: RecoveryStrategy, action: impl Into<String>) -> Self {
        Self {
            recovered,
            strategy,
            action: action.into(),
            fallback: None,
        }
    }
}

/// Rendering limits for a degradation level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DegradationSettings {
    pub max_layers: usize,
    pub texture_scale: f32,
    pub enable_antialias: bool,
    pub enable_low_power_mode: bool,
}

impl DegradationSettings {
    pub fn for_level(level: usize) -> Self {
        let (max_layers, texture_scale, enable_antialias, enable_low_power_mode) = match level {
            0 => (100, 1.0, true, false),
            1 => (50, 1.0, true, false),
            2 => (50, 1.0, false, false),
            3 => (30, 0.5, false, false),
            4 => (20, 0.5, false, true),
            _ => (10, 0.25, false, true),
        };
        Self {
            max_layers,
            texture_scale,
            enable_antialias,
            enable_low_power_mode,
        }
    }
}

/// Snapshot for error reporting.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorReport {
    pub state: RecoveryState,
    pub degradation: DegradationSettings,
    pub suggestions: Vec<String>,
}

pub struct RecoveryController {
    config: RecoveryConfig,
    state: RecoveryState,
}

impl RecoveryController {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            state: RecoveryState::default(),
        }
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    pub fn degradation_level(&self) -> usize {
        self.state.degradation_level
    }

    pub fn degradation_settings(&self) -> DegradationSettings {
        DegradationSettings::for_level(self.state.degradation_level)
    }

    /// Handle an error with no way to retry the failed operation.
    pub async fn handle(&mut self, error: &CompositorError, context: &str) -> RecoveryOutcome {
        self.run(error, context, None::<NoRetry>).await
    }

    /// Handle an error, re-running `retry` where the strategy calls for it.
    ///
    /// Retry re-runs the operation after the backoff delay. Degrade re-runs
    /// it once at the new degradation level.
    pub async fn handle_with_retry<F, Fut>(
        &mut self,
        error: &CompositorError,
        context: &str,
        retry: F,
    ) -> RecoveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CompositorResult<()>>,
    {
        self.run(error, context, Some(retry)).await
    }

    async fn run<F, Fut>(&mut self, error: &CompositorError, context: &str, retry: Option<F>) -> RecoveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CompositorResult<()>>,
    {
        self.state.is_recovering = true;
        self.state.last_error = Some(error.clone());

        let strategy = classify(error);
        tracing::warn!(context, error = %error, ?strategy, "recovering from error");

        let outcome = match strategy {
            RecoveryStrategy::Retry => self.retry(retry).await,
            RecoveryStrategy::Fallback => {
                let mut outcome = RecoveryOutcome::new(true, strategy, "switched to fallback scene");
                outcome.fallback = Some(SceneDocument::fallback());
                outcome
            }
            RecoveryStrategy::Degrade => self.degrade(error, retry).await,
            RecoveryStrategy::Abort => RecoveryOutcome::new(false, strategy, "aborted"),
        };

        self.log(context, &outcome);
        self.state.is_recovering = false;

        if outcome.recovered {
            tracing::info!(context, action = %outcome.action, "recovered");
        } else {
            tracing::error!(context, action = %outcome.action, "recovery failed");
        }
        outcome
    }

    async fn retry<F, Fut>(&mut self, retry: Option<F>) -> RecoveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CompositorResult<()>>,
    {
        let strategy = RecoveryStrategy::Retry;
        let Some(mut retry) = retry else {
            return RecoveryOutcome::new(false, strategy, "no retry available");
        };
        if self.state.retry_count >= self.config.max_retries {
            return RecoveryOutcome::new(false, strategy, "max retries exceeded");
        }

        let delay = self.config.retry_delay * 2u32.saturating_pow(self.state.retry_count);
        tracing::debug!(attempt = self.state.retry_count + 1, delay_ms = delay.as_millis() as u64, "retrying");
        tokio::time::sleep(delay).await;

        match retry().await {
            Ok(()) => {
                self.state.retry_count = 0;
                RecoveryOutcome::new(true, strategy, "retry succeeded")
            }
            Err(err) => {
                self.state.retry_count += 1;
                RecoveryOutcome::new(false, strategy, format!("retry failed: {err}"))
            }
        }
    }

    async fn degrade<F, Fut>(&mut self, error: &CompositorError, retry: Option<F>) -> RecoveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CompositorResult<()>>,
    {
        let strategy = RecoveryStrategy::Degrade;
        let level = self.state.degradation_level;
        if level >= DEGRADATION_STEPS.len() {
            return RecoveryOutcome::new(false, strategy, "maximum degradation reached");
        }

        let step = if error.kind() == ErrorKind::Memory { 2 } else { 1 };
        self.state.degradation_level = (level + step).min(DEGRADATION_STEPS.len());
        let action = DEGRADATION_STEPS[self.state.degradation_level - 1];
        tracing::info!(level = self.state.degradation_level, action, "degrading");

        match retry {
            Some(mut retry) => match retry().await {
                Ok(()) => RecoveryOutcome::new(true, strategy, action),
                Err(err) => RecoveryOutcome::new(false, strategy, format!("{action}; still failing: {err}")),
            },
            None => RecoveryOutcome::new(true, strategy, action),
        }
    }

    fn log(&mut self, context: &str, outcome: &RecoveryOutcome) {
        let actions = &mut self.state.recovery_actions;
        if actions.len() == ACTION_LOG_LIMIT {
            actions.remove(0);
        }
        actions.push(RecoveryAction {
            context: context.to_string(),
            strategy: outcome.strategy,
            action: outcome.action.clone(),
            success: outcome.recovered,
        });
    }

    pub fn error_report(&self) -> ErrorReport {
        let mut suggestions = Vec::new();
        let failures = self.state.recovery_actions.iter().filter(|a| !a.success).count();

        if self.state.degradation_level > 0 {
            suggestions.push(format!(
                "Rendering is degraded to level {}; reduce scene complexity",
                self.state.degradation_level
            ));
        }
        if self.state.retry_count > 0 {
            suggestions.push("Assets are failing to load; check network connectivity".to_string());
        }
        if failures > 3 {
            suggestions.push(format!("{failures} recoveries failed; consider reloading the scene"));
        }

        ErrorReport {
            state: self.state.clone(),
            degradation: self.degradation_settings(),
            suggestions,
        }
    }

    /// Forget all errors and return to full quality.
    pub fn reset(&mut self) {
        self.state = RecoveryState::default();
    }
}

impl Default for RecoveryController {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn controller() -> RecoveryController {
        RecoveryController::new(RecoveryConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        })
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&CompositorError::network("down")), RecoveryStrategy::Retry);
        assert_eq!(classify(&CompositorError::timeout("slow")), RecoveryStrategy::Retry);
        assert_eq!(classify(&CompositorError::validation("bad")), RecoveryStrategy::Fallback);
        assert_eq!(classify(&CompositorError::parse("bad")), RecoveryStrategy::Fallback);
        assert_eq!(classify(&CompositorError::render("oops")), RecoveryStrategy::Degrade);
        assert_eq!(classify(&CompositorError::memory("full")), RecoveryStrategy::Degrade);
        assert_eq!(classify(&CompositorError::cancelled("stop")), RecoveryStrategy::Abort);
        assert_eq!(classify(&CompositorError::internal("?")), RecoveryStrategy::Retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backs_off_exponentially() {
        let mut recovery = controller();
        let error = CompositorError::network("down");

        let start = tokio::time::Instant::now();
        let outcome = recovery
            .handle_with_retry(&error, "load", || async { Err(CompositorError::network("down")) })
            .await;
        assert!(!outcome.recovered);
        assert_eq!(start.elapsed(), Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        recovery
            .handle_with_retry(&error, "load", || async { Err(CompositorError::network("down")) })
            .await;
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(recovery.state().retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_resets_count() {
        let mut recovery = controller();
        let error = CompositorError::load("missing");

        recovery
            .handle_with_retry(&error, "load", || async { Err(CompositorError::load("missing")) })
            .await;
        let outcome = recovery.handle_with_retry(&error, "load", || async { Ok(()) }).await;

        assert!(outcome.recovered);
        assert_eq!(outcome.action, "retry succeeded");
        assert_eq!(recovery.state().retry_count, 0);
        assert!(!recovery.state().is_recovering);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_limit() {
        let mut recovery = controller();
        let error = CompositorError::network("down");
        let calls = Cell::new(0);

        for _ in 0..5 {
            recovery
                .handle_with_retry(&error, "load", || {
                    calls.set(calls.get() + 1);
                    async { Err(CompositorError::network("down")) }
                })
                .await;
        }

        assert_eq!(calls.get(), 3);
        let last = recovery.state().recovery_actions.last().unwrap();
        assert_eq!(last.action, "max retries exceeded");
        assert!(!last.success);
    }

    #[tokio::test]
    async fn test_retry_without_closure_fails() {
        let mut recovery = controller();
        let outcome = recovery.handle(&CompositorError::network("down"), "load").await;
        assert!(!outcome.recovered);
        assert_eq!(outcome.strategy, RecoveryStrategy::Retry);
    }

    #[tokio::test]
    async fn test_fallback_provides_scene() {
        let mut recovery = controller();
        let outcome = recovery.handle(&CompositorError::validation("no layers"), "init").await;

        assert!(outcome.recovered);
        assert_eq!(outcome.strategy, RecoveryStrategy::Fallback);
        assert_eq!(outcome.fallback, Some(SceneDocument::fallback()));
    }

    #[tokio::test]
    async fn test_degradation_ladder() {
        let mut recovery = controller();
        let error = CompositorError::render("gpu lost");

        for (i, expected) in DEGRADATION_STEPS.iter().enumerate() {
            let outcome = recovery.handle(&error, "render").await;
            assert!(outcome.recovered);
            assert_eq!(outcome.action, *expected);
            assert_eq!(recovery.degradation_level(), i + 1);
        }

        let outcome = recovery.handle(&error, "render").await;
        assert!(!outcome.recovered);
        assert_eq!(outcome.action, "maximum degradation reached");
        assert_eq!(recovery.degradation_level(), DEGRADATION_STEPS.len());
        assert_eq!(recovery.degradation_settings().max_layers, 10);
    }

    #[tokio::test]
    async fn test_memory_degrades_faster() {
        let mut recovery = controller();
        let outcome = recovery.handle(&CompositorError::memory("heap"), "render").await;

        assert_eq!(recovery.degradation_level(), 2);
        assert_eq!(outcome.action, DEGRADATION_STEPS[1]);
    }

    #[tokio::test]
    async fn test_degrade_reruns_operation() {
        let mut recovery = controller();
        let outcome = recovery
            .handle_with_retry(&CompositorError::surface("no context"), "init", || async {
                Err(CompositorError::surface("still no context"))
            })
            .await;

        assert!(!outcome.recovered);
        assert_eq!(recovery.degradation_level(), 1);
    }

    #[tokio::test]
    async fn test_abort() {
        let mut recovery = controller();
        let outcome = recovery.handle(&CompositorError::cancelled("shutdown"), "load").await;
        assert!(!outcome.recovered);
        assert_eq!(outcome.strategy, RecoveryStrategy::Abort);
    }

    #[test]
    fn test_degradation_settings() {
        assert_eq!(DegradationSettings::for_level(0).max_layers, 100);
        assert!(!DegradationSettings::for_level(2).enable_antialias);
        assert_eq!(DegradationSettings::for_level(3).texture_scale, 0.5);
        assert!(DegradationSettings::for_level(4).enable_low_power_mode);
        assert_eq!(DegradationSettings::for_level(9).max_layers, 10);
    }

    #[tokio::test]
    async fn test_error_report_and_reset() {
        let mut recovery = controller();
        recovery.handle(&CompositorError::render("x"), "render").await;

        let report = recovery.error_report();
        assert_eq!(report.state.degradation_level, 1);
        assert_eq!(report.degradation.max_layers, 50);
        assert_eq!(report.suggestions.len(), 1);
        assert!(matches!(report.state.last_error, Some(CompositorError::Render(_))));

        recovery.reset();
        assert_eq!(recovery.state(), &RecoveryState::default());
    }
}
