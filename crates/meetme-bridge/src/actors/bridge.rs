//! `Bridge` - top-level supervisor for call sessions.
//!
//! The bridge owns the registry, the control plane and the admission front
//! end, and spawns one task per call leg. It holds the root
//! `CancellationToken`: every call runs under a child token, so shutdown
//! reaches all sessions at once.
//!
//! # Graceful Shutdown
//!
//! 1. Stop accepting new calls
//! 2. Cancel the root token; sessions leave their rooms cleanly
//! 3. Wait for call tasks up to the shutdown timeout, then abort the rest

use crate::admission::{Admission, AdmissionSettings};
use crate::channel::Channel;
use crate::config::{Config, RoomsFile};
use crate::control::ControlPlane;
use crate::errors::BridgeError;
use crate::events::EventBus;
use crate::mixer::MixingEngine;
use crate::registry::Registry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::session::SessionSettings;

/// Supervisor for all calls handled by this process.
#[derive(Debug)]
pub struct Bridge {
    registry: Arc<Registry>,
    control: ControlPlane,
    admission: Admission,
    cancel_token: CancellationToken,
    calls: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

impl Bridge {
    #[must_use]
    pub fn new(
        mixer: Arc<dyn MixingEngine>,
        rooms: Arc<RoomsFile>,
        settings: AdmissionSettings,
        room_id_space: usize,
    ) -> Self {
        let registry = Arc::new(Registry::new(mixer, EventBus::default(), room_id_space));
        Self {
            control: ControlPlane::new(Arc::clone(&registry)),
            admission: Admission::new(Arc::clone(&registry), rooms, settings),
            registry,
            cancel_token: CancellationToken::new(),
            calls: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// Build a bridge from process configuration and the rooms file.
    #[must_use]
    pub fn from_config(config: &Config, rooms: RoomsFile, mixer: Arc<dyn MixingEngine>) -> Self {
        let settings = AdmissionSettings {
            pin_attempts: config.pin_attempts,
            room_prompt_attempts: config.room_prompt_attempts,
            session: SessionSettings {
                poll_interval: config.poll_interval,
                audio_buffers: rooms.audio_buffers(),
                recording_dir: config.recording_dir.clone(),
                recording_format: config.recording_format,
                voice_detector: None,
            },
            ..AdmissionSettings::default()
        };
        Self::new(mixer, Arc::new(rooms), settings, config.room_id_space)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    #[must_use]
    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        self.registry.events()
    }

    /// Take a new call leg into the bridge. `args` is the
    /// `confno[,options[,pin]]` string.
    ///
    /// # Errors
    ///
    /// [`BridgeError::RoomUnavailable`] once shutdown has started.
    pub fn spawn_call(&self, channel: Box<dyn Channel>, args: String) -> Result<(), BridgeError> {
        if !self.is_accepting() {
            return Err(BridgeError::RoomUnavailable("bridge is shutting down".to_string()));
        }

        let admission = self.admission.clone();
        let cancel = self.cancel_token.child_token();
        let span = tracing::info_span!("bridge.call", channel = %channel.name());

        let mut calls = self.calls.lock();
        // Reap finished calls so the set only holds live ones
        while let Some(finished) = calls.try_join_next() {
            if let Err(e) = finished {
                warn!(target: "bridge.supervisor", error = ?e, "Call task panicked");
            }
        }
        calls.spawn(
            async move {
                let mut channel = channel;
                match admission.run(channel.as_mut(), &args, &cancel).await {
                    Ok(outcome) => info!(
                        target: "bridge.supervisor",
                        reason = outcome.reason.as_str(),
                        success = outcome.reason.is_success(),
                        duration_secs = outcome.duration.as_secs(),
                        "Call finished"
                    ),
                    Err(e) => match e {
                        BridgeError::Mixer(_) | BridgeError::Internal(_) | BridgeError::Recording(_) => {
                            warn!(target: "bridge.supervisor", error = %e, "Call failed");
                        }
                        _ => info!(
                            target: "bridge.supervisor",
                            outcome = e.outcome_label(),
                            error = %e,
                            "Call not admitted"
                        ),
                    },
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Whether new calls are taken. Cleared once shutdown starts.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Calls still running.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Token for work that must stop with the bridge.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stop taking calls, cancel every session and wait for them.
    ///
    /// Returns the number of calls aborted because they outlived `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        let mut calls = std::mem::take(&mut *self.calls.lock());
        info!(
            target: "bridge.supervisor",
            active_calls = calls.len(),
            conferences = self.registry.list().len(),
            "Initiating graceful shutdown"
        );

        self.cancel_token.cancel();

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = calls.join_next().await {
                match result {
                    Ok(()) => debug!(target: "bridge.supervisor", "Call task completed cleanly"),
                    Err(e) => warn!(target: "bridge.supervisor", error = ?e, "Call task panicked during shutdown"),
                }
            }
        })
        .await;

        let aborted = calls.len();
        if drained.is_err() {
            warn!(target: "bridge.supervisor", aborted, "Shutdown timed out, aborting remaining calls");
            calls.shutdown().await;
        }

        info!(target: "bridge.supervisor", "Graceful shutdown complete");
        aborted
    }
}
