//! Observability for the conference bridge.
//!
//! Sessions, the registry and the control plane are instrumented with
//! `tracing` spans that only carry room ids, user numbers and channel
//! names. Metric labels are bounded by code.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `bridge_conferences_active` | Gauge | none | Live rooms |
//! | `bridge_participants_active` | Gauge | none | Live participants |
//! | `bridge_recordings_active` | Gauge | none | Running recording sidecars |
//! | `bridge_session_duration_seconds` | Histogram | none | Time in room per participant |
//! | `bridge_admissions_total` | Counter | `outcome` | Admission results |
//! | `bridge_control_commands_total` | Counter | `command` | Admin commands executed |
//! | `bridge_mixer_errors_total` | Counter | `operation` | Mixing resource failures |

pub mod health;
pub mod metrics;

pub use health::{health_router, Readiness};
pub use metrics::init_metrics_recorder;
