//! Metrics definitions for the conference bridge.
//!
//! All metrics follow Prometheus naming conventions:
//! - `bridge_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code, never by room ids or channel names:
//! - `outcome`: admission outcomes (~8 values)
//! - `command`: admin command names (~12 values)
//! - `operation`: mixer operations (~6 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Calls last from seconds to hours
        .set_buckets_for_metric(
            Matcher::Full("bridge_session_duration_seconds".to_string()),
            &[
                5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Rooms & Participants (Gauges)
// ============================================================================

/// Set the number of active conferences.
///
/// Metric: `bridge_conferences_active`
/// Labels: none
pub fn set_conferences_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("bridge_conferences_active").set(count as f64);
}

/// A participant was admitted into a room.
///
/// Metric: `bridge_participants_active`
/// Labels: none
pub fn participant_joined() {
    gauge!("bridge_participants_active").increment(1.0);
}

/// A participant left; records how long it was in the room.
///
/// Metrics: `bridge_participants_active`, `bridge_session_duration_seconds`
pub fn participant_left(duration: Duration) {
    gauge!("bridge_participants_active").decrement(1.0);
    histogram!("bridge_session_duration_seconds").record(duration.as_secs_f64());
}

/// Metric: `bridge_recordings_active`
pub fn recording_started() {
    gauge!("bridge_recordings_active").increment(1.0);
}

/// Metric: `bridge_recordings_active`
pub fn recording_stopped() {
    gauge!("bridge_recordings_active").decrement(1.0);
}

// ============================================================================
// Counters
// ============================================================================

/// Record the outcome of an admission attempt.
///
/// Metric: `bridge_admissions_total`
/// Labels: `outcome` (admitted, locked, bad_pin, not_found, invalid_room, no_room)
pub fn record_admission(outcome: &'static str) {
    counter!("bridge_admissions_total", "outcome" => outcome).increment(1);
}

/// Record an admin command.
///
/// Metric: `bridge_control_commands_total`
/// Labels: `command`
pub fn record_control_command(command: &'static str) {
    counter!("bridge_control_commands_total", "command" => command).increment(1);
}

/// Record a mixing resource failure.
///
/// Metric: `bridge_mixer_errors_total`
/// Labels: `operation` (`create_room`, `open_port`, attach, query, write, read)
pub fn record_mixer_error(operation: &'static str) {
    counter!("bridge_mixer_errors_total", "operation" => operation).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder these calls go to the no-op recorder.
    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_conferences_active(3);
        participant_joined();
        participant_left(Duration::from_secs(90));
        recording_started();
        recording_stopped();
        record_admission("admitted");
        record_control_command("kick");
        record_mixer_error("attach");
    }

    #[test]
    fn test_metrics_reach_local_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_conferences_active(2);
            participant_joined();
            participant_joined();
            participant_left(Duration::from_secs(30));
            record_admission("locked");
            record_admission("locked");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let value_of = |name: &str| {
            snapshot
                .iter()
                .find(|(key, _, _, _)| key.key().name() == name)
                .map(|(_, _, _, value)| match value {
                    DebugValue::Counter(v) => DebugValue::Counter(*v),
                    DebugValue::Gauge(v) => DebugValue::Gauge(*v),
                    DebugValue::Histogram(v) => DebugValue::Histogram(v.clone()),
                })
        };

        assert_eq!(
            value_of("bridge_conferences_active"),
            Some(DebugValue::Gauge(2.0.into()))
        );
        assert_eq!(
            value_of("bridge_participants_active"),
            Some(DebugValue::Gauge(1.0.into()))
        );
        assert_eq!(
            value_of("bridge_admissions_total"),
            Some(DebugValue::Counter(2))
        );
        assert!(value_of("bridge_session_duration_seconds").is_some());
    }
}
