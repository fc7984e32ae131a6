//! Admin control plane.
//!
//! Every operation resolves its target under the registry lock, changes
//! flags on the participant's [`ParticipantControl`] and returns. Nothing
//! here performs I/O: sessions pick up the change at their next poll tick.
//! Unknown rooms and unknown users are reported as distinct errors, and a
//! failed lookup leaves all state untouched.

use crate::conference::{AdminFlags, Conference, Participant, ParticipantControl, VolumeRequest};
use crate::errors::BridgeError;
use crate::events::BridgeEvent;
use crate::observability::metrics;
use crate::registry::Registry;
use crate::volume::VolumeDirection;
use common::types::{ConferenceId, UserNo};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of an eject-last request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EjectOutcome {
    /// The last joined participant was flagged for removal.
    Ejected(UserNo),
    /// The last joined participant holds the admin bit and stays.
    RefusedAdmin(UserNo),
    /// The room has nobody in it.
    Empty,
}

/// Admin operations on live rooms.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    registry: Arc<Registry>,
}

impl ControlPlane {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Lock a room. Returns whether the state changed; the lock event is
    /// only published on a change.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] for an unknown room.
    pub fn lock(&self, id: &ConferenceId) -> Result<bool, BridgeError> {
        self.set_locked(id, true)
    }

    /// Unlock a room. See [`ControlPlane::lock`].
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] for an unknown room.
    pub fn unlock(&self, id: &ConferenceId) -> Result<bool, BridgeError> {
        self.set_locked(id, false)
    }

    #[instrument(skip_all, name = "bridge.control.lock", fields(conference_id = %id, locked = locked))]
    fn set_locked(&self, id: &ConferenceId, locked: bool) -> Result<bool, BridgeError> {
        metrics::record_control_command(if locked { "lock" } else { "unlock" });
        let changed = self
            .registry
            .with_conference_id(id, |room| room.set_locked(locked))?;
        if changed {
            info!(target: "bridge.control", conference_id = %id, locked, "Lock state changed");
            self.registry.events().publish(BridgeEvent::Lock {
                conference_id: id.clone(),
                locked,
            });
        }
        Ok(changed)
    }

    /// Flag one participant for removal.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn kick_one(&self, id: &ConferenceId, user_no: UserNo) -> Result<(), BridgeError> {
        metrics::record_control_command("kick");
        let control = self.participant_control(id, user_no)?;
        control.insert(AdminFlags::KICK);
        info!(target: "bridge.control", conference_id = %id, %user_no, "Kick requested");
        Ok(())
    }

    /// Flag every participant for removal, returning how many were flagged.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] for an unknown room.
    pub fn kick_all(&self, id: &ConferenceId) -> Result<usize, BridgeError> {
        metrics::record_control_command("kick_all");
        let count = self.for_each(id, |_| true, |control| {
            control.insert(AdminFlags::KICK);
        })?;
        info!(target: "bridge.control", conference_id = %id, count, "Kick all requested");
        Ok(count)
    }

    /// Flag the most recently joined participant for removal unless it
    /// holds the admin bit.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] for an unknown room.
    pub fn eject_last(&self, id: &ConferenceId) -> Result<EjectOutcome, BridgeError> {
        metrics::record_control_command("eject_last");
        let outcome = self.registry.with_conference_id(id, |room| {
            match room.last_joined() {
                None => EjectOutcome::Empty,
                Some(last) if last.is_admin() => EjectOutcome::RefusedAdmin(last.user_no()),
                Some(last) => {
                    last.control().insert(AdminFlags::KICK);
                    EjectOutcome::Ejected(last.user_no())
                }
            }
        })?;

        match outcome {
            EjectOutcome::Ejected(user_no) => {
                info!(target: "bridge.control", conference_id = %id, %user_no, "Ejected last user");
            }
            EjectOutcome::RefusedAdmin(user_no) => {
                warn!(target: "bridge.control", conference_id = %id, %user_no, "Not ejecting last user, is an admin");
            }
            EjectOutcome::Empty => {}
        }
        Ok(outcome)
    }

    /// Admin-mute one participant.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn mute_one(&self, id: &ConferenceId, user_no: UserNo) -> Result<(), BridgeError> {
        metrics::record_control_command("mute");
        self.participant_control(id, user_no)?
            .insert(AdminFlags::MUTED);
        info!(target: "bridge.control", conference_id = %id, %user_no, "Mute requested");
        Ok(())
    }

    /// Admin-mute every participant without the admin bit.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] for an unknown room.
    pub fn mute_all(&self, id: &ConferenceId) -> Result<usize, BridgeError> {
        metrics::record_control_command("mute_all");
        let count = self.for_each(
            id,
            |p| !p.is_admin(),
            |control| {
                control.insert(AdminFlags::MUTED);
            },
        )?;
        info!(target: "bridge.control", conference_id = %id, count, "Mute all requested");
        Ok(count)
    }

    /// Clear the admin mute of one participant.
    ///
    /// Returns `false` when the participant was not admin-muted (a self
    /// mute is left alone).
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn unmute_one(&self, id: &ConferenceId, user_no: UserNo) -> Result<bool, BridgeError> {
        metrics::record_control_command("unmute");
        let control = self.participant_control(id, user_no)?;
        if !control.flags().contains(AdminFlags::MUTED) {
            info!(target: "bridge.control", conference_id = %id, %user_no, "User not admin-muted");
            return Ok(false);
        }
        control.remove(AdminFlags::MUTED);
        info!(target: "bridge.control", conference_id = %id, %user_no, "Unmute requested");
        Ok(true)
    }

    /// Clear the admin mute of every admin-muted participant without the
    /// admin bit. Admins muted one by one stay muted.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] for an unknown room.
    pub fn unmute_all(&self, id: &ConferenceId) -> Result<usize, BridgeError> {
        metrics::record_control_command("unmute_all");
        let count = self.for_each(
            id,
            |p| !p.is_admin() && p.control().flags().contains(AdminFlags::MUTED),
            |control| {
                control.remove(AdminFlags::MUTED);
            },
        )?;
        info!(target: "bridge.control", conference_id = %id, count, "Unmute all requested");
        Ok(count)
    }

    /// Set or clear the admin mute unconditionally (management actions).
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn set_muted(
        &self,
        id: &ConferenceId,
        user_no: UserNo,
        muted: bool,
    ) -> Result<(), BridgeError> {
        metrics::record_control_command(if muted { "mute" } else { "unmute" });
        let control = self.participant_control(id, user_no)?;
        if muted {
            control.insert(AdminFlags::MUTED);
        } else {
            control.remove(AdminFlags::MUTED);
        }
        info!(target: "bridge.control", conference_id = %id, %user_no, muted, "Mute state requested");
        Ok(())
    }

    /// Step one participant's talk volume.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn adjust_volume(
        &self,
        id: &ConferenceId,
        user_no: UserNo,
        direction: VolumeDirection,
    ) -> Result<(), BridgeError> {
        metrics::record_control_command("volume");
        self.participant_control(id, user_no)?
            .queue_volume(VolumeRequest::Talk(direction));
        info!(target: "bridge.control", conference_id = %id, %user_no, ?direction, "Volume change requested");
        Ok(())
    }

    /// Restore neutral gain for one participant or the whole room.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn reset_volumes(
        &self,
        id: &ConferenceId,
        user_no: Option<UserNo>,
    ) -> Result<usize, BridgeError> {
        metrics::record_control_command("reset_volumes");
        let count = match user_no {
            Some(user_no) => {
                self.participant_control(id, user_no)?
                    .queue_volume(VolumeRequest::Reset);
                1
            }
            None => self.for_each(id, |_| true, |control| {
                control.queue_volume(VolumeRequest::Reset);
            })?,
        };
        info!(target: "bridge.control", conference_id = %id, count, "Volume reset requested");
        Ok(count)
    }

    /// Stage a private prompt for one participant, replacing any staged one.
    ///
    /// # Errors
    ///
    /// [`BridgeError::MissingArgument`] for an empty payload,
    /// [`BridgeError::ConferenceNotFound`] or [`BridgeError::UserNotFound`].
    pub fn whisper(
        &self,
        id: &ConferenceId,
        user_no: UserNo,
        payload: &str,
    ) -> Result<(), BridgeError> {
        metrics::record_control_command("whisper");
        if payload.trim().is_empty() {
            return Err(BridgeError::MissingArgument("whisper message"));
        }
        self.participant_control(id, user_no)?
            .stage_whisper(payload.trim());
        info!(target: "bridge.control", conference_id = %id, %user_no, "Whisper requested");
        Ok(())
    }

    fn participant_control(
        &self,
        id: &ConferenceId,
        user_no: UserNo,
    ) -> Result<Arc<ParticipantControl>, BridgeError> {
        self.registry
            .with_conference_id(id, |room| {
                room.participant(user_no).map(|p| Arc::clone(p.control()))
            })?
            .ok_or_else(|| BridgeError::UserNotFound {
                conference_id: id.to_string(),
                user_no: user_no.to_string(),
            })
    }

    fn for_each(
        &self,
        id: &ConferenceId,
        filter: impl Fn(&Participant) -> bool,
        apply: impl Fn(&ParticipantControl),
    ) -> Result<usize, BridgeError> {
        self.registry.with_conference_id(id, |room: &mut Conference| {
            let mut count = 0;
            for participant in room.participants().iter().filter(|p| filter(p)) {
                apply(participant.control().as_ref());
                count += 1;
            }
            count
        })
    }
}
