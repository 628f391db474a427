//! # Application State
//!
//! Shared state handed to every request handler: the loaded
//! configuration, service metrics, and the process start time.
//! Everything here is behind `Arc<RwLock<...>>` so the HTTP handlers,
//! the WebSocket actors, and the middleware can read it concurrently.
//! Per-session interview state is *not* kept here: it lives in the
//! `SessionRegistry` and is owned by the connection that created it.

use crate::config::AppConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    config: Arc<RwLock<AppConfig>>,
    metrics: Arc<RwLock<AppMetrics>>,
    start_time: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: usize,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub assessments_generated: u64,
    pub provider_failures: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub error_count: u64,
    pub total_duration_ms: u64,
}

impl EndpointMetric {
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.request_count as f64
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.error_count += 1;
    }

    pub fn session_started(&self) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.sessions_started += 1;
        metrics.active_sessions += 1;
    }

    pub fn session_ended(&self, completed: bool) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        if completed {
            metrics.sessions_completed += 1;
        }
    }

    pub fn assessment_generated(&self) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.assessments_generated += 1;
    }

    pub fn provider_failure(&self) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        metrics.provider_failures += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().expect("metrics lock poisoned");
        let entry = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        entry.request_count += 1;
        entry.total_duration_ms += duration_ms;
        if is_error {
            entry.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());
        state.session_started();
        state.session_started();
        state.session_ended(true);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.sessions_started, 2);
        assert_eq!(snapshot.sessions_completed, 1);
        assert_eq!(snapshot.active_sessions, 1);
    }

    #[test]
    fn test_active_sessions_never_underflows() {
        let state = AppState::new(AppConfig::default());
        state.session_ended(false);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let m = snapshot.endpoint_metrics.get("GET /health").unwrap();
        assert_eq!(m.request_count, 2);
        assert_eq!(m.error_count, 1);
        assert_eq!(m.average_duration_ms(), 20.0);
        assert_eq!(m.error_rate(), 0.5);
    }
}
