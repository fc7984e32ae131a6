//! Conference rooms and their participant lists.
//!
//! A [`Conference`] lives inside the registry and is only touched while the
//! registry lock is held. The one exception is [`ParticipantControl`]: the
//! part of a participant that other tasks (the control plane, menus of
//! other participants) mutate. Its flags are atomics and its staged
//! payloads sit behind their own small lock, so a session can poll them
//! every tick without taking the registry lock.

use crate::actors::recorder::{RecordingHandle, RecordingState};
use crate::audio::TalkState;
use crate::channel::ChannelInfo;
use crate::mixer::MixRoomId;
use crate::policy::{Policy, SessionFlags};
use crate::volume::VolumeDirection;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{ConferenceId, UserNo};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI8, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

bitflags! {
    /// Flags other tasks set on a participant; the session reacts at its
    /// next poll.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AdminFlags: u32 {
        /// Muted by an admin.
        const MUTED = 1 << 0;
        /// Muted by the participant from the menu.
        const SELF_MUTED = 1 << 1;
        /// Leave at the next poll.
        const KICK = 1 << 2;
        /// A whisper payload is staged.
        const WHISPER = 1 << 3;
    }
}

/// Volume change staged for a participant's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRequest {
    Talk(VolumeDirection),
    Listen(VolumeDirection),
    Reset,
}

#[derive(Debug, Default)]
struct Staged {
    whisper: Option<String>,
    volume: VecDeque<VolumeRequest>,
}

/// Cross-task control surface of one participant.
#[derive(Debug)]
pub struct ParticipantControl {
    flags: AtomicU32,
    talking: AtomicI8,
    staged: Mutex<Staged>,
}

impl ParticipantControl {
    #[must_use]
    pub fn new(initial: AdminFlags) -> Self {
        Self {
            flags: AtomicU32::new(initial.bits()),
            talking: AtomicI8::new(TalkState::Unmonitored.as_i8()),
            staged: Mutex::new(Staged::default()),
        }
    }

    #[must_use]
    pub fn flags(&self) -> AdminFlags {
        AdminFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn insert(&self, flags: AdminFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn remove(&self, flags: AdminFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Toggle `flags`, returning the flags after the change.
    pub fn toggle(&self, flags: AdminFlags) -> AdminFlags {
        let before = self.flags.fetch_xor(flags.bits(), Ordering::AcqRel);
        AdminFlags::from_bits_truncate(before ^ flags.bits())
    }

    /// Admin-muted or self-muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.flags()
            .intersects(AdminFlags::MUTED | AdminFlags::SELF_MUTED)
    }

    /// Stage a whisper; a previously staged one is replaced.
    pub fn stage_whisper(&self, payload: impl Into<String>) {
        self.staged.lock().whisper = Some(payload.into());
        self.insert(AdminFlags::WHISPER);
    }

    /// Take the staged whisper and clear the pending flag.
    pub fn take_whisper(&self) -> Option<String> {
        let payload = self.staged.lock().whisper.take();
        self.remove(AdminFlags::WHISPER);
        payload
    }

    pub fn queue_volume(&self, request: VolumeRequest) {
        self.staged.lock().volume.push_back(request);
    }

    pub fn drain_volume(&self) -> Vec<VolumeRequest> {
        self.staged.lock().volume.drain(..).collect()
    }

    #[must_use]
    pub fn talk_state(&self) -> TalkState {
        TalkState::from_i8(self.talking.load(Ordering::Acquire))
    }

    pub fn set_talk_state(&self, state: TalkState) {
        self.talking.store(state.as_i8(), Ordering::Release);
    }
}

/// One participant of a conference.
#[derive(Debug)]
pub struct Participant {
    pub(crate) user_no: UserNo,
    pub(crate) channel: ChannelInfo,
    pub(crate) policy: Policy,
    pub(crate) joined_at: Instant,
    pub(crate) control: Arc<ParticipantControl>,
}

impl Participant {
    #[must_use]
    pub fn user_no(&self) -> UserNo {
        self.user_no
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    #[must_use]
    pub fn control(&self) -> &Arc<ParticipantControl> {
        &self.control
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.policy.is_admin()
    }

    #[must_use]
    pub fn summary(&self) -> ParticipantSummary {
        let flags = self.control.flags();
        ParticipantSummary {
            user_no: self.user_no,
            channel: self.channel.clone(),
            is_admin: self.policy.is_admin(),
            is_marked: self.policy.is_marked(),
            listen_only: self.policy.has(SessionFlags::MONITOR),
            admin_muted: flags.contains(AdminFlags::MUTED),
            self_muted: flags.contains(AdminFlags::SELF_MUTED),
            talking: self.control.talk_state(),
            duration: self.joined_at.elapsed(),
        }
    }
}

/// Listing view of a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub user_no: UserNo,
    pub channel: ChannelInfo,
    pub is_admin: bool,
    pub is_marked: bool,
    pub listen_only: bool,
    pub admin_muted: bool,
    pub self_muted: bool,
    pub talking: TalkState,
    pub duration: Duration,
}

/// Listing view of a conference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConferenceSummary {
    pub id: ConferenceId,
    pub participants: usize,
    pub marked: usize,
    pub locked: bool,
    pub is_dynamic: bool,
    pub has_pin: bool,
    pub created_at: DateTime<Utc>,
    pub uptime: Duration,
    pub recording: RecordingState,
}

/// Counters a session polls every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStatus {
    pub participants: usize,
    pub marked: usize,
    pub locked: bool,
}

/// One conference room.
#[derive(Debug)]
pub struct Conference {
    pub(crate) id: ConferenceId,
    pub(crate) instance: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started: Instant,
    pub(crate) is_dynamic: bool,
    pub(crate) pin: Option<SecretString>,
    pub(crate) admin_pin: Option<SecretString>,
    pub(crate) mix_room: MixRoomId,
    pub(crate) refcount: usize,
    pub(crate) locked: bool,
    pub(crate) marked: usize,
    pub(crate) participants: Vec<Participant>,
    pub(crate) recording: Option<RecordingHandle>,
    /// Set when the last reference is gone and teardown has started.
    pub(crate) closing: Option<watch::Sender<bool>>,
}

impl Conference {
    pub(crate) fn new(
        id: ConferenceId,
        instance: u64,
        mix_room: MixRoomId,
        pin: Option<SecretString>,
        admin_pin: Option<SecretString>,
        is_dynamic: bool,
    ) -> Self {
        Self {
            id,
            instance,
            created_at: Utc::now(),
            started: Instant::now(),
            is_dynamic,
            pin,
            admin_pin,
            mix_room,
            refcount: 0,
            locked: false,
            marked: 0,
            participants: Vec::new(),
            recording: None,
            closing: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConferenceId {
        &self.id
    }

    #[must_use]
    pub fn mix_room(&self) -> MixRoomId {
        self.mix_room
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Set the lock state, returning whether it changed.
    pub fn set_locked(&mut self, locked: bool) -> bool {
        let changed = self.locked != locked;
        self.locked = locked;
        changed
    }

    #[must_use]
    pub fn pin(&self) -> Option<&SecretString> {
        self.pin.as_ref()
    }

    #[must_use]
    pub fn admin_pin(&self) -> Option<&SecretString> {
        self.admin_pin.as_ref()
    }

    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    #[must_use]
    pub fn participant(&self, user_no: UserNo) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_no == user_no)
    }

    /// Most recently joined participant.
    #[must_use]
    pub fn last_joined(&self) -> Option<&Participant> {
        self.participants.last()
    }

    /// Number the next participant will get: one past the last joined, so
    /// numbers are never reused while the room has members.
    #[must_use]
    pub fn next_user_no(&self) -> UserNo {
        self.participants
            .last()
            .map_or(UserNo::FIRST, |p| p.user_no.next())
    }

    /// Append a participant in join order.
    pub(crate) fn add_participant(&mut self, participant: Participant) {
        if participant.policy.is_marked() {
            self.marked += 1;
        }
        self.participants.push(participant);
    }

    /// Remove a participant, keeping the marked counter in step.
    pub(crate) fn remove_participant(&mut self, user_no: UserNo) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.user_no == user_no)?;
        let participant = self.participants.remove(index);
        if participant.policy.is_marked() {
            self.marked = self.marked.saturating_sub(1);
        }
        Some(participant)
    }

    #[must_use]
    pub fn status(&self) -> RoomStatus {
        RoomStatus {
            participants: self.participants.len(),
            marked: self.marked,
            locked: self.locked,
        }
    }

    #[must_use]
    pub fn recording_state(&self) -> RecordingState {
        self.recording
            .as_ref()
            .map_or(RecordingState::Off, RecordingHandle::state)
    }

    #[must_use]
    pub fn summary(&self) -> ConferenceSummary {
        ConferenceSummary {
            id: self.id.clone(),
            participants: self.participants.len(),
            marked: self.marked,
            locked: self.locked,
            is_dynamic: self.is_dynamic,
            has_pin: self.pin.is_some(),
            created_at: self.created_at,
            uptime: self.started.elapsed(),
            recording: self.recording_state(),
        }
    }
}
