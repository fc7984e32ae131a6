//! Mock mixing engine for bridge tests.
//!
//! Records what the bridge asks of the mixing resource: rooms created and
//! destroyed, every port's attachment history, and sounds played into
//! rooms. Ports produce silence at frame cadence; announce streams do the
//! same while their room exists.
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_test_utils::MockMixer;
//!
//! let mixer = Arc::new(MockMixer::new());
//! // ... run a session against `mixer` ...
//! assert_eq!(mixer.rooms_created(), 1);
//! assert_eq!(mixer.port_mode(0), Some(MixMode::LISTEN));
//! ```

use async_trait::async_trait;
use meetme_bridge::audio::{AudioFrame, FRAME_DURATION};
use meetme_bridge::channel::TransportDescriptor;
use meetme_bridge::mixer::{
    AnnounceStream, MixMode, MixRoomId, MixerError, MixerPort, MixingEngine, RoomSound,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{interval, Interval, MissedTickBehavior};

#[derive(Debug, Default)]
struct MixerState {
    next_room: u32,
    rooms_created: usize,
    rooms_destroyed: usize,
    live: HashSet<u32>,
    fail_create: bool,
    fail_open: bool,
    /// Attachment history per port, in open order.
    ports: Vec<PortLog>,
    sounds: Vec<(MixRoomId, RoomSound)>,
}

#[derive(Debug, Default, Clone)]
struct PortLog {
    transport: u64,
    attachments: Vec<Option<MixMode>>,
    frames_written: usize,
    closed: bool,
}

/// Mixing engine that records every request.
#[derive(Debug, Clone, Default)]
pub struct MockMixer {
    state: Arc<Mutex<MixerState>>,
}

impl MockMixer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `create_room` call.
    #[must_use]
    pub fn failing_create(self) -> Self {
        self.state.lock().fail_create = true;
        self
    }

    /// Fail every `open_port` call.
    #[must_use]
    pub fn failing_open(self) -> Self {
        self.state.lock().fail_open = true;
        self
    }

    #[must_use]
    pub fn rooms_created(&self) -> usize {
        self.state.lock().rooms_created
    }

    #[must_use]
    pub fn rooms_destroyed(&self) -> usize {
        self.state.lock().rooms_destroyed
    }

    #[must_use]
    pub fn live_rooms(&self) -> usize {
        self.state.lock().live.len()
    }

    #[must_use]
    pub fn ports_opened(&self) -> usize {
        self.state.lock().ports.len()
    }

    /// Current mode of port `index`; `None` when detached or unknown.
    #[must_use]
    pub fn port_mode(&self, index: usize) -> Option<MixMode> {
        self.state
            .lock()
            .ports
            .get(index)
            .and_then(|port| port.attachments.last().copied().flatten())
    }

    /// Every attachment change of port `index`, `None` entries for detach.
    #[must_use]
    pub fn port_history(&self, index: usize) -> Vec<Option<MixMode>> {
        self.state
            .lock()
            .ports
            .get(index)
            .map(|port| port.attachments.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn port_transport(&self, index: usize) -> Option<u64> {
        self.state.lock().ports.get(index).map(|port| port.transport)
    }

    #[must_use]
    pub fn port_closed(&self, index: usize) -> bool {
        self.state
            .lock()
            .ports
            .get(index)
            .is_some_and(|port| port.closed)
    }

    /// Frames the session sent into the room through port `index`.
    #[must_use]
    pub fn frames_written(&self, index: usize) -> usize {
        self.state
            .lock()
            .ports
            .get(index)
            .map_or(0, |port| port.frames_written)
    }

    /// Sounds played into any room, in order.
    #[must_use]
    pub fn sounds(&self) -> Vec<RoomSound> {
        self.state
            .lock()
            .sounds
            .iter()
            .map(|(_, sound)| sound.clone())
            .collect()
    }
}

fn frame_cadence() -> Interval {
    let mut cadence = interval(FRAME_DURATION);
    cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);
    cadence
}

impl MixingEngine for MockMixer {
    fn create_room(&self) -> Result<MixRoomId, MixerError> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(MixerError::CreateRoom("mock failure".to_string()));
        }
        let id = state.next_room;
        state.next_room += 1;
        state.rooms_created += 1;
        state.live.insert(id);
        Ok(MixRoomId(id))
    }

    fn destroy_room(&self, room: MixRoomId) {
        let mut state = self.state.lock();
        if state.live.remove(&room.0) {
            state.rooms_destroyed += 1;
        }
    }

    fn open_port(
        &self,
        transport: TransportDescriptor,
        _audio_buffers: u32,
    ) -> Result<Box<dyn MixerPort>, MixerError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(MixerError::Open("mock failure".to_string()));
        }
        state.ports.push(PortLog {
            transport: transport.0,
            ..PortLog::default()
        });
        Ok(Box::new(MockPort {
            index: state.ports.len() - 1,
            state: Arc::clone(&self.state),
            attachment: None,
            cadence: frame_cadence(),
            closed: false,
        }))
    }

    fn announce_stream(&self, room: MixRoomId) -> Result<Box<dyn AnnounceStream>, MixerError> {
        if !self.state.lock().live.contains(&room.0) {
            return Err(MixerError::Open(format!("{room} does not exist")));
        }
        Ok(Box::new(MockAnnounce {
            state: Arc::clone(&self.state),
            room,
            cadence: frame_cadence(),
        }))
    }

    fn play_to_room(&self, room: MixRoomId, sound: RoomSound) {
        self.state.lock().sounds.push((room, sound));
    }
}

struct MockPort {
    index: usize,
    state: Arc<Mutex<MixerState>>,
    attachment: Option<(MixRoomId, MixMode)>,
    cadence: Interval,
    closed: bool,
}

impl MockPort {
    fn log(&self, f: impl FnOnce(&mut PortLog)) {
        if let Some(port) = self.state.lock().ports.get_mut(self.index) {
            f(port);
        }
    }
}

#[async_trait]
impl MixerPort for MockPort {
    fn attach(&mut self, room: MixRoomId, mode: MixMode) -> Result<(), MixerError> {
        if self.closed {
            return Err(MixerError::Closed);
        }
        self.attachment = Some((room, mode));
        self.log(|port| port.attachments.push(Some(mode)));
        Ok(())
    }

    fn detach(&mut self) -> Result<(), MixerError> {
        if self.attachment.take().is_some() {
            self.log(|port| port.attachments.push(None));
        }
        Ok(())
    }

    fn mode(&self) -> Result<Option<(MixRoomId, MixMode)>, MixerError> {
        if self.closed {
            return Err(MixerError::Closed);
        }
        Ok(self.attachment)
    }

    fn flush(&mut self) -> Result<(), MixerError> {
        Ok(())
    }

    async fn write(&mut self, _frame: &AudioFrame) -> Result<(), MixerError> {
        if self.closed {
            return Err(MixerError::Closed);
        }
        self.log(|port| port.frames_written += 1);
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
        self.closed = true;
        self.attachment = None;
        self.log(|port| port.closed = true);
    }
}

struct MockAnnounce {
    state: Arc<Mutex<MixerState>>,
    room: MixRoomId,
    cadence: Interval,
}

#[async_trait]
impl AnnounceStream for MockAnnounce {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.cadence.tick().await;
        if self.state.lock().live.contains(&self.room.0) {
            Some(AudioFrame::silence())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rooms_and_port_history() {
        let mixer = MockMixer::new();
        let room = mixer.create_room().unwrap();
        let mut port = mixer.open_port(TransportDescriptor(7), 32).unwrap();

        port.attach(room, MixMode::FULL_DUPLEX).unwrap();
        port.detach().unwrap();
        port.attach(room, MixMode::LISTEN_ONLY).unwrap();
        port.write(&AudioFrame::silence()).await.unwrap();
        assert_eq!(port.read().await.unwrap(), AudioFrame::silence());

        assert_eq!(mixer.port_mode(0), Some(MixMode::LISTEN_ONLY));
        assert_eq!(
            mixer.port_history(0),
            vec![Some(MixMode::FULL_DUPLEX), None, Some(MixMode::LISTEN_ONLY)]
        );
        assert_eq!(mixer.port_transport(0), Some(7));
        assert_eq!(mixer.frames_written(0), 1);

        port.close();
        assert!(mixer.port_closed(0));
        assert_eq!(port.attach(room, MixMode::TALK), Err(MixerError::Closed));

        mixer.destroy_room(room);
        mixer.destroy_room(room);
        assert_eq!(mixer.rooms_destroyed(), 1);
    }

    #[test]
    fn test_failure_switches() {
        let mixer = MockMixer::new().failing_create().failing_open();
        assert!(mixer.create_room().is_err());
        assert!(mixer.open_port(TransportDescriptor(1), 32).is_err());
    }
}
