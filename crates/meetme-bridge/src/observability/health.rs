//! Health endpoints for the bridge daemon.
//!
//! - `GET /health` - liveness: the process answers HTTP
//! - `GET /ready` - readiness: the bridge still takes calls
//!
//! Readiness follows [`Bridge::is_accepting`], so it drops the moment
//! shutdown starts and stays down while sessions drain. The body reports
//! the load at the time of the probe.

use crate::actors::Bridge;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// Body of `/ready`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Readiness {
    pub accepting: bool,
    pub calls: usize,
    pub conferences: usize,
}

impl Readiness {
    fn of(bridge: &Bridge) -> Self {
        Self {
            accepting: bridge.is_accepting(),
            calls: bridge.active_calls(),
            conferences: bridge.registry().list().len(),
        }
    }
}

/// Router serving `/health` and `/ready` for `bridge`.
pub fn health_router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness_handler))
        .with_state(bridge)
}

async fn readiness_handler(State(bridge): State<Arc<Bridge>>) -> (StatusCode, Json<Readiness>) {
    let readiness = Readiness::of(&bridge);
    let status = if readiness.accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}
