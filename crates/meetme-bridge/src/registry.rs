//! Conference registry - every live room, behind one lock.
//!
//! The registry owns all [`Conference`] objects. Membership, counters,
//! lock state and the in-use room map are only read or changed while
//! holding its single `parking_lot::Mutex`; critical sections never await.
//! Callers get a [`ConferenceRef`] per reference taken and must hand it
//! back through [`Registry::dispose`], which tears the room down when the
//! last reference goes.
//!
//! Teardown of a recorded room waits for the recording sidecar to close its
//! file. During that wait the room stays listed as closing and keeps its
//! number, so a caller asking for the same room waits for the teardown to
//! finish instead of creating a duplicate.

use crate::actors::recorder::{RecordingHandle, RecordingTarget};
use crate::channel::ChannelInfo;
use crate::conference::{
    AdminFlags, Conference, ConferenceSummary, Participant, ParticipantControl,
    ParticipantSummary, RoomStatus,
};
use crate::errors::BridgeError;
use crate::events::{BridgeEvent, EventBus, ParticipantTag};
use crate::mixer::{MixRoomId, MixingEngine};
use crate::observability::metrics;
use crate::policy::{Policy, SessionFlags};
use common::secret::SecretString;
use common::types::{ConferenceId, UserNo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default size of the numeric room-id space tracked by the in-use map.
pub const DEFAULT_ROOM_ID_SPACE: usize = 1024;

/// In-use map of numeric room ids.
#[derive(Debug, Clone)]
pub struct RoomNumberMap {
    words: Vec<u64>,
    space: usize,
}

impl RoomNumberMap {
    #[must_use]
    pub fn new(space: usize) -> Self {
        Self {
            words: vec![0; space.div_ceil(64)],
            space,
        }
    }

    #[must_use]
    pub fn space(&self) -> usize {
        self.space
    }

    #[must_use]
    pub fn is_set(&self, slot: usize) -> bool {
        slot < self.space
            && self
                .words
                .get(slot / 64)
                .is_some_and(|word| word & (1 << (slot % 64)) != 0)
    }

    pub fn set(&mut self, slot: usize) {
        if slot < self.space {
            if let Some(word) = self.words.get_mut(slot / 64) {
                *word |= 1 << (slot % 64);
            }
        }
    }

    pub fn clear(&mut self, slot: usize) {
        if let Some(word) = self.words.get_mut(slot / 64) {
            *word &= !(1 << (slot % 64));
        }
    }

    /// Lowest slot not in use.
    #[must_use]
    pub fn first_free(&self) -> Option<usize> {
        (0..self.space).find(|slot| !self.is_set(*slot))
    }
}

/// A counted reference to a live conference.
///
/// Not `Clone`: every reference is taken and returned exactly once.
#[derive(Debug)]
#[must_use = "conference references must be returned with Registry::dispose"]
pub struct ConferenceRef {
    id: ConferenceId,
    instance: u64,
}

impl ConferenceRef {
    #[must_use]
    pub fn id(&self) -> &ConferenceId {
        &self.id
    }
}

/// How to look up or create a room.
#[derive(Debug, Clone, Default)]
pub struct RoomRequest {
    pub pin: Option<SecretString>,
    pub admin_pin: Option<SecretString>,
    /// Create the room when it is not active.
    pub create: bool,
    /// Whether a created room is dynamic (not from the rooms file).
    pub dynamic: bool,
}

impl RoomRequest {
    /// Look up an active room only.
    #[must_use]
    pub fn existing() -> Self {
        Self::default()
    }

    /// Create a dynamic room if missing.
    #[must_use]
    pub fn dynamic(pin: Option<SecretString>) -> Self {
        Self {
            pin,
            admin_pin: None,
            create: true,
            dynamic: true,
        }
    }

    /// Create a static room from configuration if missing.
    #[must_use]
    pub fn configured(pin: Option<SecretString>, admin_pin: Option<SecretString>) -> Self {
        Self {
            pin,
            admin_pin,
            create: true,
            dynamic: false,
        }
    }
}

/// Result of admitting a participant into a room.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub user_no: UserNo,
    pub control: Arc<ParticipantControl>,
    pub mix_room: MixRoomId,
    /// Room counters right after the join.
    pub status: RoomStatus,
}

/// Result of removing a participant.
#[derive(Debug, Clone, Copy)]
pub struct Departed {
    /// Participants left in the room, not counting the one removed.
    pub remaining: usize,
    pub duration_secs: u64,
}

enum Lookup {
    Found(ConferenceRef),
    Missing,
    Closing(watch::Receiver<bool>),
}

struct RegistryInner {
    conferences: Vec<Conference>,
    in_use: RoomNumberMap,
}

/// Process-wide registry of conferences.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    mixer: Arc<dyn MixingEngine>,
    events: EventBus,
    next_instance: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("conferences", &self.inner.lock().conferences.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    #[must_use]
    pub fn new(mixer: Arc<dyn MixingEngine>, events: EventBus, room_id_space: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                conferences: Vec::new(),
                in_use: RoomNumberMap::new(room_id_space),
            }),
            mixer,
            events,
            next_instance: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn mixer(&self) -> &Arc<dyn MixingEngine> {
        &self.mixer
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Size of the numeric room-id space.
    #[must_use]
    pub fn room_id_space(&self) -> usize {
        self.inner.lock().in_use.space()
    }

    /// Take a reference to room `id`, creating it when `request.create`.
    ///
    /// Returns `Ok(None)` when the room is not active and creation was not
    /// requested. Waits while a room with the same id is being torn down.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Mixer`] when the mixing room cannot be created.
    pub async fn find_or_create(
        &self,
        id: &ConferenceId,
        request: &RoomRequest,
    ) -> Result<Option<ConferenceRef>, BridgeError> {
        loop {
            match self.try_find_or_create(id, request)? {
                Lookup::Found(conf) => return Ok(Some(conf)),
                Lookup::Missing => return Ok(None),
                Lookup::Closing(mut closed) => {
                    debug!(target: "bridge.registry", conference_id = %id, "Waiting for room teardown");
                    // A dropped sender also means the teardown is over
                    let _ = closed.wait_for(|done| *done).await;
                }
            }
        }
    }

    fn try_find_or_create(
        &self,
        id: &ConferenceId,
        request: &RoomRequest,
    ) -> Result<Lookup, BridgeError> {
        let mut inner = self.inner.lock();

        if let Some(conf) = inner.conferences.iter_mut().find(|c| &c.id == id) {
            if let Some(closing) = &conf.closing {
                return Ok(Lookup::Closing(closing.subscribe()));
            }
            conf.refcount += 1;
            return Ok(Lookup::Found(ConferenceRef {
                id: conf.id.clone(),
                instance: conf.instance,
            }));
        }

        if !request.create {
            return Ok(Lookup::Missing);
        }

        let mix_room = self.mixer.create_room().inspect_err(|_| {
            metrics::record_mixer_error("create_room");
        })?;
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let mut conf = Conference::new(
            id.clone(),
            instance,
            mix_room,
            request.pin.clone(),
            request.admin_pin.clone(),
            request.dynamic,
        );
        conf.refcount = 1;

        if let Some(slot) = id.slot(inner.in_use.space()) {
            inner.in_use.set(slot);
        }
        // Newest rooms first, like the listing shows them
        inner.conferences.insert(0, conf);
        metrics::set_conferences_active(inner.conferences.len());
        drop(inner);

        info!(
            target: "bridge.registry",
            conference_id = %id,
            %mix_room,
            dynamic = request.dynamic,
            "Created conference"
        );
        self.events.publish(BridgeEvent::Start {
            conference_id: id.clone(),
        });

        Ok(Lookup::Found(ConferenceRef {
            id: id.clone(),
            instance,
        }))
    }

    /// Take a reference to an active room.
    pub async fn acquire(&self, id: &ConferenceId) -> Option<ConferenceRef> {
        self.find_or_create(id, &RoomRequest::existing())
            .await
            .ok()
            .flatten()
    }

    /// Return a reference. The last one tears the room down, waiting for
    /// its recording sidecar to stop first.
    ///
    /// Returns `true` when this call destroyed the room.
    pub async fn dispose(&self, conf: ConferenceRef) -> bool {
        let recording = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner
                .conferences
                .iter_mut()
                .find(|c| c.instance == conf.instance)
            else {
                warn!(target: "bridge.registry", conference_id = %conf.id, "Dispose of unknown conference");
                return false;
            };

            if entry.refcount == 0 || entry.closing.is_some() {
                warn!(target: "bridge.registry", conference_id = %conf.id, "Dispose after last reference");
                return false;
            }
            entry.refcount -= 1;
            if entry.refcount > 0 {
                return false;
            }

            let (closing, _) = watch::channel(false);
            entry.closing = Some(closing);
            entry.recording.take()
        };

        let recording_file = recording.as_ref().map(|r| r.file().to_string());
        if let Some(recording) = recording {
            debug!(target: "bridge.registry", conference_id = %conf.id, "Waiting for recording to stop");
            recording.stop().await;
        }

        let removed = {
            let mut inner = self.inner.lock();
            let index = inner
                .conferences
                .iter()
                .position(|c| c.instance == conf.instance);
            let removed = index.map(|i| inner.conferences.remove(i));
            if let Some(slot) = conf.id.slot(inner.in_use.space()) {
                inner.in_use.clear(slot);
            }
            metrics::set_conferences_active(inner.conferences.len());
            removed
        };

        let Some(removed) = removed else {
            return false;
        };
        self.mixer.destroy_room(removed.mix_room);
        if let Some(closing) = &removed.closing {
            closing.send_replace(true);
        }

        let duration_secs = removed.started.elapsed().as_secs();
        info!(
            target: "bridge.registry",
            conference_id = %conf.id,
            duration_secs,
            "Conference ended"
        );
        self.events.publish(BridgeEvent::End {
            conference_id: conf.id.clone(),
            duration_secs,
            recording: recording_file,
        });
        true
    }

    /// Admit a participant: reject locked rooms for non-admins, assign the
    /// next user number and append in join order.
    ///
    /// # Errors
    ///
    /// [`BridgeError::RoomLocked`] when the room is locked and `policy`
    /// lacks the admin bit; [`BridgeError::ConferenceNotFound`] when the
    /// reference is stale.
    pub fn admit(
        &self,
        conf: &ConferenceRef,
        channel: ChannelInfo,
        policy: Policy,
    ) -> Result<Admitted, BridgeError> {
        let admitted = self.with_conference(conf, |room| {
            if room.locked && !policy.is_admin() {
                return Err(BridgeError::RoomLocked(room.id.to_string()));
            }

            let user_no = room.next_user_no();
            let initial = if policy.has(SessionFlags::START_MUTED) {
                AdminFlags::MUTED
            } else {
                AdminFlags::empty()
            };
            let control = Arc::new(ParticipantControl::new(initial));
            room.add_participant(Participant {
                user_no,
                channel: channel.clone(),
                policy,
                joined_at: Instant::now(),
                control: Arc::clone(&control),
            });

            Ok(Admitted {
                user_no,
                control,
                mix_room: room.mix_room,
                status: room.status(),
            })
        })??;

        metrics::participant_joined();
        self.events.publish(BridgeEvent::Join {
            participant: ParticipantTag::new(&conf.id, admitted.user_no, &channel),
        });
        Ok(admitted)
    }

    /// Remove a participant from its room.
    pub fn depart(&self, conf: &ConferenceRef, user_no: UserNo) -> Option<Departed> {
        let (participant, remaining) = self
            .with_conference(conf, |room| {
                room.remove_participant(user_no)
                    .map(|p| (p, room.participants.len()))
            })
            .ok()
            .flatten()?;

        let duration = participant.joined_at.elapsed();
        metrics::participant_left(duration);
        self.events.publish(BridgeEvent::Leave {
            participant: ParticipantTag::new(&conf.id, user_no, &participant.channel),
            duration_secs: duration.as_secs(),
        });
        Some(Departed {
            remaining,
            duration_secs: duration.as_secs(),
        })
    }

    /// Start recording the room unless a recording is already running.
    ///
    /// Returns `true` when a new sidecar was started.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Mixer`] when the announce stream cannot be opened.
    pub fn start_recording(
        &self,
        conf: &ConferenceRef,
        target: &RecordingTarget,
    ) -> Result<bool, BridgeError> {
        self.with_conference(conf, |room| {
            if room
                .recording
                .as_ref()
                .is_some_and(|r| r.state() != crate::actors::recorder::RecordingState::Off)
            {
                return Ok(false);
            }
            let stream = self.mixer.announce_stream(room.mix_room)?;
            room.recording = Some(RecordingHandle::spawn(room.id.clone(), stream, target));
            Ok(true)
        })?
    }

    /// Counters for a session's per-tick poll.
    #[must_use]
    pub fn status(&self, conf: &ConferenceRef) -> Option<RoomStatus> {
        self.with_conference(conf, |room| room.status()).ok()
    }

    /// Run `f` on the referenced room under the registry lock.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] when the room is gone.
    pub fn with_conference<R>(
        &self,
        conf: &ConferenceRef,
        f: impl FnOnce(&mut Conference) -> R,
    ) -> Result<R, BridgeError> {
        let mut inner = self.inner.lock();
        inner
            .conferences
            .iter_mut()
            .find(|c| c.instance == conf.instance)
            .map(f)
            .ok_or_else(|| BridgeError::ConferenceNotFound(conf.id.to_string()))
    }

    /// Run `f` on the active room `id` under the registry lock.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] when no such room is active.
    pub fn with_conference_id<R>(
        &self,
        id: &ConferenceId,
        f: impl FnOnce(&mut Conference) -> R,
    ) -> Result<R, BridgeError> {
        let mut inner = self.inner.lock();
        inner
            .conferences
            .iter_mut()
            .find(|c| &c.id == id && c.closing.is_none())
            .map(f)
            .ok_or_else(|| BridgeError::ConferenceNotFound(id.to_string()))
    }

    /// Summaries of all active rooms, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<ConferenceSummary> {
        let inner = self.inner.lock();
        inner
            .conferences
            .iter()
            .filter(|c| c.closing.is_none())
            .map(Conference::summary)
            .collect()
    }

    /// Participants of room `id` in join order.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ConferenceNotFound`] when no such room is active.
    pub fn participants(&self, id: &ConferenceId) -> Result<Vec<ParticipantSummary>, BridgeError> {
        self.with_conference_id(id, |room| {
            room.participants().iter().map(Participant::summary).collect()
        })
    }

    /// Participant count of room `id`, 0 when it is not active.
    #[must_use]
    pub fn count(&self, id: &ConferenceId) -> usize {
        self.with_conference_id(id, |room| room.participants.len())
            .unwrap_or(0)
    }

    /// Whether room `id` is active.
    #[must_use]
    pub fn is_active(&self, id: &ConferenceId) -> bool {
        self.inner.lock().conferences.iter().any(|c| &c.id == id)
    }

    /// Lowest numeric room id not in use.
    #[must_use]
    pub fn free_room_number(&self) -> Option<ConferenceId> {
        self.inner
            .lock()
            .in_use
            .first_free()
            .map(ConferenceId::from_slot)
    }
}
