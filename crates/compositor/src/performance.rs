//! Frame-rate and resource monitoring.

use crate::memory::{MemoryProbe, MemoryUsage, NoMemoryProbe};
use std::collections::VecDeque;

const SAMPLE_WINDOW: usize = 60;
const REPORT_INTERVAL_MS: f64 = 1000.0;

const MIN_FPS: f64 = 30.0;
const MAX_FRAME_TIME_MS: f64 = 33.0;
const MAX_RENDER_TIME_MS: f64 = 16.0;
const MAX_MEMORY_PERCENT: f64 = 80.0;
const MAX_SPRITES: usize = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerformanceMetrics {
    pub fps: f64,
    /// Mean frame interval in milliseconds.
    pub frame_time: f64,
    /// Duration of the most recent render pass in milliseconds.
    pub render_time: f64,
    pub memory_usage: MemoryUsage,
    pub sprite_count: usize,
    pub texture_count: usize,
    /// Timestamp of the report that produced these metrics.
    pub last_update: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DegradationReport {
    pub degraded: bool,
    pub reasons: Vec<String>,
}

impl DegradationReport {
    pub fn memory_bound(&self) -> bool {
        self.reasons.iter().any(|reason| reason.starts_with("memory"))
    }
}

/// Samples frame intervals over a sliding window and publishes aggregated
/// metrics once per second.
pub struct PerformanceMonitor {
    frame_times: VecDeque<f64>,
    last_frame: Option<f64>,
    last_report: Option<f64>,
    metrics: PerformanceMetrics,
    reported: bool,
    probe: Box<dyn MemoryProbe>,
    active: bool,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::with_probe(Box::new(NoMemoryProbe))
    }

    pub fn with_probe(probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(SAMPLE_WINDOW),
            last_frame: None,
            last_report: None,
            metrics: PerformanceMetrics::default(),
            reported: false,
            probe,
            active: true,
        }
    }

    /// Record a frame presented at `now_ms`.
    pub fn record_frame(&mut self, now_ms: f64) {
        if !self.active {
            return;
        }
        if let Some(last) = self.last_frame {
            if self.frame_times.len() == SAMPLE_WINDOW {
                self.frame_times.pop_front();
            }
            self.frame_times.push_back((now_ms - last).max(0.0));
        }
        self.last_frame = Some(now_ms);
    }

    pub fn record_render(&mut self, duration_ms: f64) {
        self.metrics.render_time = duration_ms;
    }

    pub fn set_counts(&mut self, sprites: usize, textures: usize) {
        self.metrics.sprite_count = sprites;
        self.metrics.texture_count = textures;
    }

    /// Publish fresh metrics if a report interval has elapsed since the last
    /// one. The first call only starts the clock.
    pub fn tick(&mut self, now_ms: f64) -> Option<PerformanceMetrics> {
        if !self.active {
            return None;
        }
        let Some(last) = self.last_report else {
            self.last_report = Some(now_ms);
            return None;
        };
        if now_ms - last < REPORT_INTERVAL_MS {
            return None;
        }
        self.last_report = Some(now_ms);

        if !self.frame_times.is_empty() {
            let mean = self.frame_times.iter().sum::<f64>() / self.frame_times.len() as f64;
            self.metrics.frame_time = mean.round();
            self.metrics.fps = if mean > 0.0 { (1000.0 / mean).round() } else { 0.0 };
        }
        if let Some(memory) = self.probe.sample() {
            self.metrics.memory_usage = memory;
        }
        self.metrics.last_update = now_ms;
        self.reported = true;

        tracing::trace!(
            fps = self.metrics.fps,
            frame_time = self.metrics.frame_time,
            render_time = self.metrics.render_time,
            "performance metrics"
        );
        Some(self.metrics)
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    /// Check the latest metrics against fixed thresholds. Nothing is
    /// degraded before the first report.
    pub fn is_degraded(&self) -> DegradationReport {
        if !self.reported {
            return DegradationReport::default();
        }
        let m = &self.metrics;
        let mut reasons = Vec::new();

        if m.fps < MIN_FPS {
            reasons.push(format!("low fps: {}", m.fps));
        }
        if m.frame_time > MAX_FRAME_TIME_MS {
            reasons.push(format!("high frame time: {}ms", m.frame_time));
        }
        if m.render_time > MAX_RENDER_TIME_MS {
            reasons.push(format!("slow render: {:.1}ms", m.render_time));
        }
        if m.memory_usage.percentage > MAX_MEMORY_PERCENT {
            reasons.push(format!("memory usage: {:.0}%", m.memory_usage.percentage));
        }

        DegradationReport {
            degraded: !reasons.is_empty(),
            reasons,
        }
    }

    /// Human-readable hints derived from the latest metrics. Empty unless
    /// the monitor reports degraded.
    pub fn suggestions(&self) -> Vec<String> {
        if !self.is_degraded().degraded {
            return Vec::new();
        }
        let m = &self.metrics;
        let mut suggestions = Vec::new();

        if m.fps < MIN_FPS {
            suggestions.push("Reduce the number of visible layers or lower texture resolution".to_string());
        }
        if m.render_time > MAX_RENDER_TIME_MS {
            suggestions.push("Render passes are slow; enable low-power mode or batch fewer layers".to_string());
        }
        if m.memory_usage.percentage > MAX_MEMORY_PERCENT {
            suggestions.push("Memory is high; unload unused textures".to_string());
        }
        if m.sprite_count > MAX_SPRITES {
            suggestions.push(format!(
                "{} sprites are active; cull more aggressively",
                m.sprite_count
            ));
        }
        suggestions
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop sampling. Further calls are ignored.
    pub fn destroy(&mut self) {
        self.active = false;
        self.frame_times.clear();
        self.last_frame = None;
        self.last_report = None;
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedMemoryProbe;

    fn run_frames(monitor: &mut PerformanceMonitor, interval_ms: f64, count: usize) -> f64 {
        let mut now = 0.0;
        monitor.tick(now);
        for _ in 0..count {
            now += interval_ms;
            monitor.record_frame(now);
        }
        now
    }

    #[test]
    fn test_first_tick_only_starts_clock() {
        let mut monitor = PerformanceMonitor::new();
        assert!(monitor.tick(0.0).is_none());
        assert!(monitor.tick(500.0).is_none());
        assert!(monitor.tick(1000.0).is_some());
    }

    #[test]
    fn test_fps_from_frame_intervals() {
        let mut monitor = PerformanceMonitor::new();
        let now = run_frames(&mut monitor, 16.0, 70);

        let metrics = monitor.tick(now).unwrap();
        assert_eq!(metrics.frame_time, 16.0);
        assert_eq!(metrics.fps, 63.0);
        assert!(!monitor.is_degraded().degraded);
    }

    #[test]
    fn test_window_keeps_recent_samples() {
        let mut monitor = PerformanceMonitor::new();
        let now = run_frames(&mut monitor, 100.0, 10);
        let mut now = now;
        for _ in 0..60 {
            now += 20.0;
            monitor.record_frame(now);
        }

        let metrics = monitor.tick(now).unwrap();
        assert_eq!(metrics.fps, 50.0);
    }

    #[test]
    fn test_slow_frames_are_degraded() {
        let mut monitor = PerformanceMonitor::new();
        let now = run_frames(&mut monitor, 50.0, 30);
        monitor.record_render(20.0);
        monitor.tick(now);

        let report = monitor.is_degraded();
        assert!(report.degraded);
        assert_eq!(report.reasons.len(), 3);
        assert!(!report.memory_bound());
        assert!(!monitor.suggestions().is_empty());
    }

    #[test]
    fn test_memory_pressure_is_degraded() {
        let probe = FixedMemoryProbe(MemoryUsage::new(90, 100));
        let mut monitor = PerformanceMonitor::with_probe(Box::new(probe));
        let now = run_frames(&mut monitor, 16.0, 70);
        monitor.tick(now);

        let report = monitor.is_degraded();
        assert!(report.degraded);
        assert!(report.memory_bound());
    }

    #[test]
    fn test_no_report_means_not_degraded() {
        let monitor = PerformanceMonitor::new();
        assert!(!monitor.is_degraded().degraded);
        assert!(monitor.suggestions().is_empty());
    }

    #[test]
    fn test_healthy_monitor_has_no_suggestions() {
        let mut monitor = PerformanceMonitor::new();
        let now = run_frames(&mut monitor, 16.0, 70);
        monitor.set_counts(150, 3);
        monitor.record_render(2.0);
        monitor.tick(now);

        assert!(!monitor.is_degraded().degraded);
        assert!(monitor.suggestions().is_empty());
    }

    #[test]
    fn test_sprite_count_suggestion_when_degraded() {
        let mut monitor = PerformanceMonitor::new();
        let now = run_frames(&mut monitor, 16.0, 70);
        monitor.set_counts(150, 10);
        monitor.record_render(20.0);
        monitor.tick(now);

        let suggestions = monitor.suggestions();
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[1].starts_with("150 sprites"));
    }

    #[test]
    fn test_destroy_stops_sampling() {
        let mut monitor = PerformanceMonitor::new();
        monitor.destroy();
        monitor.record_frame(0.0);
        monitor.record_frame(16.0);
        assert!(monitor.tick(0.0).is_none());
        assert!(monitor.tick(5000.0).is_none());
        assert!(!monitor.is_active());
    }
}
