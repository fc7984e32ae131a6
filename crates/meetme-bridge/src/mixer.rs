//! Interface to the external mixing resource.
//!
//! The bridge never sums samples itself. It creates one mixing room per
//! conference, opens one port per participant and configures the port's
//! attachment mode; the resource does the rest. Configuration calls are
//! synchronous and assumed atomic at the resource boundary. Port I/O is
//! async and must be cancel-safe, since the session loop races it against
//! the channel and its poll tick.

use crate::audio::{AudioFrame, FRAME_DURATION};
use crate::channel::TransportDescriptor;
use async_trait::async_trait;
use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

bitflags! {
    /// How a port takes part in its room.
    ///
    /// The empty set keeps the port in the room without sending or
    /// receiving audio (used while waiting for a marked participant).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MixMode: u8 {
        /// Port audio is summed into the room.
        const TALK = 1 << 0;
        /// Port receives the room mix.
        const LISTEN = 1 << 1;
    }
}

impl MixMode {
    /// Receive the room mix only.
    pub const LISTEN_ONLY: MixMode = MixMode::LISTEN;
    /// Send into the room only.
    pub const TALK_ONLY: MixMode = MixMode::TALK;
    /// Send and receive.
    pub const FULL_DUPLEX: MixMode = MixMode::TALK.union(MixMode::LISTEN);
}

/// Opaque handle to a room inside the mixing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MixRoomId(pub u32);

impl fmt::Display for MixRoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mix-{}", self.0)
    }
}

/// Sound played into a whole room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSound {
    /// Chime for a participant arriving.
    Enter,
    /// Chime for a participant leaving.
    Leave,
    /// A named prompt.
    Prompt(String),
}

/// Mixing resource failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixerError {
    #[error("failed to create room: {0}")]
    CreateRoom(String),

    #[error("failed to open port: {0}")]
    Open(String),

    #[error("failed to attach port: {0}")]
    Attach(String),

    #[error("failed to query port: {0}")]
    Query(String),

    #[error("port I/O failed: {0}")]
    Io(String),

    #[error("port closed")]
    Closed,
}

/// The shared mixing resource.
pub trait MixingEngine: Send + Sync {
    /// Allocate a new room.
    fn create_room(&self) -> Result<MixRoomId, MixerError>;

    /// Release a room once its conference is gone.
    fn destroy_room(&self, room: MixRoomId);

    /// Open a participant port.
    ///
    /// `transport` is the channel's native descriptor when the channel can
    /// be attached directly; `audio_buffers` sizes the port's buffering.
    fn open_port(
        &self,
        transport: TransportDescriptor,
        audio_buffers: u32,
    ) -> Result<Box<dyn MixerPort>, MixerError>;

    /// Stream of the room's mixed audio, used by the recorder.
    fn announce_stream(&self, room: MixRoomId) -> Result<Box<dyn AnnounceStream>, MixerError>;

    /// Play a sound to everyone in the room.
    fn play_to_room(&self, room: MixRoomId, sound: RoomSound);
}

/// One participant's attachment to the mixing resource.
#[async_trait]
pub trait MixerPort: Send {
    /// Join `room` in `mode`, replacing any previous attachment.
    fn attach(&mut self, room: MixRoomId, mode: MixMode) -> Result<(), MixerError>;

    /// Leave the current room.
    fn detach(&mut self) -> Result<(), MixerError>;

    /// Current attachment, `None` when detached.
    fn mode(&self) -> Result<Option<(MixRoomId, MixMode)>, MixerError>;

    /// Drop buffered audio in both directions.
    fn flush(&mut self) -> Result<(), MixerError>;

    /// Send one frame into the room.
    async fn write(&mut self, frame: &AudioFrame) -> Result<(), MixerError>;

    /// Next frame of the room mix for this participant.
    async fn read(&mut self) -> Result<AudioFrame, MixerError>;

    /// Release the port.
    fn close(&mut self);
}

/// The mixed output of a room, consumed by the recording sidecar.
#[async_trait]
pub trait AnnounceStream: Send {
    /// Next mixed frame, `None` once the room is gone.
    async fn next_frame(&mut self) -> Option<AudioFrame>;
}

/// Mixing engine that accepts every request and carries no audio.
///
/// Rooms and ports behave normally as far as the bridge can observe: ports
/// remember their attachment, writes are discarded and reads yield silence
/// at frame cadence. Used by the daemon when no mixing hardware is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct NullMixer {
    state: Arc<NullMixerState>,
}

#[derive(Debug, Default)]
struct NullMixerState {
    next_room: AtomicU32,
    live: Mutex<HashSet<u32>>,
}

impl NullMixer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MixingEngine for NullMixer {
    fn create_room(&self) -> Result<MixRoomId, MixerError> {
        let id = self.state.next_room.fetch_add(1, Ordering::Relaxed);
        self.state.live.lock().insert(id);
        Ok(MixRoomId(id))
    }

    fn destroy_room(&self, room: MixRoomId) {
        self.state.live.lock().remove(&room.0);
    }

    fn open_port(
        &self,
        _transport: TransportDescriptor,
        _audio_buffers: u32,
    ) -> Result<Box<dyn MixerPort>, MixerError> {
        Ok(Box::new(NullPort {
            attachment: None,
            cadence: frame_cadence(),
            closed: false,
        }))
    }

    fn announce_stream(&self, room: MixRoomId) -> Result<Box<dyn AnnounceStream>, MixerError> {
        if !self.state.live.lock().contains(&room.0) {
            return Err(MixerError::Open(format!("{room} does not exist")));
        }
        Ok(Box::new(NullAnnounce {
            state: Arc::clone(&self.state),
            room,
            cadence: frame_cadence(),
        }))
    }

    fn play_to_room(&self, room: MixRoomId, sound: RoomSound) {
        debug!(target: "bridge.mixer", %room, ?sound, "Discarding room sound");
    }
}

fn frame_cadence() -> Interval {
    let mut cadence = interval(FRAME_DURATION);
    cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);
    cadence
}

struct NullPort {
    attachment: Option<(MixRoomId, MixMode)>,
    cadence: Interval,
    closed: bool,
}

#[async_trait]
impl MixerPort for NullPort {
    fn attach(&mut self, room: MixRoomId, mode: MixMode) -> Result<(), MixerError> {
        if self.closed {
            return Err(MixerError::Closed);
        }
        self.attachment = Some((room, mode));
        Ok(())
    }

    fn detach(&mut self) -> Result<(), MixerError> {
        self.attachment = None;
        Ok(())
    }

    fn mode(&self) -> Result<Option<(MixRoomId, MixMode)>, MixerError> {
        Ok(self.attachment)
    }

    fn flush(&mut self) -> Result<(), MixerError> {
        Ok(())
    }

    async fn write(&mut self, _frame: &AudioFrame) -> Result<(), MixerError> {
        if self.closed {
            return Err(MixerError::Closed);
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<AudioFrame, MixerError> {
        if self.closed {
            return Err(MixerError::Closed);
        }
        self.cadence.tick().await;
        Ok(AudioFrame::silence())
    }

    fn close(&mut self) {
        self.attachment = None;
        self.closed = true;
    }
}

struct NullAnnounce {
    state: Arc<NullMixerState>,
    room: MixRoomId,
    cadence: Interval,
}

#[async_trait]
impl AnnounceStream for NullAnnounce {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.cadence.tick().await;
        self.state
            .live
            .lock()
            .contains(&self.room.0)
            .then(AudioFrame::silence)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_presets() {
        assert!(MixMode::FULL_DUPLEX.contains(MixMode::TALK));
        assert!(MixMode::FULL_DUPLEX.contains(MixMode::LISTEN));
        assert!(!MixMode::LISTEN_ONLY.contains(MixMode::TALK));
        assert!(!MixMode::TALK_ONLY.contains(MixMode::LISTEN));
        assert!(MixMode::default().is_empty());
    }

    #[test]
    fn test_mute_toggles_talk_bit_only() {
        let mut mode = MixMode::FULL_DUPLEX;
        mode.remove(MixMode::TALK);
        assert_eq!(mode, MixMode::LISTEN_ONLY);
        mode.insert(MixMode::TALK);
        assert_eq!(mode, MixMode::FULL_DUPLEX);
    }

    #[test]
    fn test_room_id_display() {
        assert_eq!(MixRoomId(7).to_string(), "mix-7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_mixer_ports_and_rooms() {
        let mixer = NullMixer::new();
        let room = mixer.create_room().unwrap();
        let mut port = mixer.open_port(TransportDescriptor(1), 32).unwrap();

        assert_eq!(port.mode().unwrap(), None);
        port.attach(room, MixMode::FULL_DUPLEX).unwrap();
        assert_eq!(port.mode().unwrap(), Some((room, MixMode::FULL_DUPLEX)));

        port.write(&AudioFrame::silence()).await.unwrap();
        let frame = port.read().await.unwrap();
        assert_eq!(frame, AudioFrame::silence());

        port.close();
        assert_eq!(port.read().await, Err(MixerError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_announce_ends_with_room() {
        let mixer = NullMixer::new();
        let room = mixer.create_room().unwrap();
        let mut stream = mixer.announce_stream(room).unwrap();
        assert!(stream.next_frame().await.is_some());

        mixer.destroy_room(room);
        assert!(stream.next_frame().await.is_none());
        assert!(mixer.announce_stream(room).is_err());
    }
}
