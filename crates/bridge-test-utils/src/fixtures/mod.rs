//! Pre-configured bridges for tests.
//!
//! [`TestBridge`] wires an [`Admission`] front end to a [`MockMixer`] and
//! spawns calls as tasks, the way the daemon's supervisor does. Tests are
//! expected to run with paused time (`#[tokio::test(start_paused = true)]`)
//! so session poll ticks advance instantly.

use crate::mock_mixer::MockMixer;
use crate::test_channel::TestChannel;
use common::types::ConferenceId;
use meetme_bridge::actors::session::{DetectorFactory, SessionOutcome, SessionSettings};
use meetme_bridge::admission::{Admission, AdmissionSettings};
use meetme_bridge::channel::Channel;
use meetme_bridge::config::RoomsFile;
use meetme_bridge::control::ControlPlane;
use meetme_bridge::errors::BridgeError;
use meetme_bridge::events::{BridgeEvent, EventBus};
use meetme_bridge::registry::{Registry, DEFAULT_ROOM_ID_SPACE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builder for a [`BridgeFixture`].
#[derive(Default)]
pub struct TestBridge {
    rooms: Option<String>,
    mixer: Option<MockMixer>,
    pin_attempts: Option<u32>,
    room_id_space: Option<usize>,
    recording_dir: Option<PathBuf>,
    detector: Option<DetectorFactory>,
}

impl TestBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms file contents (TOML).
    #[must_use]
    pub fn with_rooms(mut self, toml: &str) -> Self {
        self.rooms = Some(toml.to_string());
        self
    }

    #[must_use]
    pub fn with_mixer(mut self, mixer: MockMixer) -> Self {
        self.mixer = Some(mixer);
        self
    }

    #[must_use]
    pub fn with_pin_attempts(mut self, attempts: u32) -> Self {
        self.pin_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_room_id_space(mut self, space: usize) -> Self {
        self.room_id_space = Some(space);
        self
    }

    #[must_use]
    pub fn with_recording_dir(mut self, dir: PathBuf) -> Self {
        self.recording_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn with_detector(mut self, factory: DetectorFactory) -> Self {
        self.detector = Some(factory);
        self
    }

    /// Build the bridge.
    ///
    /// # Panics
    ///
    /// Panics if the rooms file text does not parse.
    #[must_use]
    pub fn build(self) -> BridgeFixture {
        let rooms = match &self.rooms {
            Some(text) => RoomsFile::parse(text).expect("test rooms file should parse"),
            None => RoomsFile::default(),
        };
        let mixer = Arc::new(self.mixer.unwrap_or_default());
        let registry = Arc::new(Registry::new(
            mixer.clone(),
            EventBus::default(),
            self.room_id_space.unwrap_or(DEFAULT_ROOM_ID_SPACE),
        ));

        let mut settings = AdmissionSettings {
            session: SessionSettings {
                audio_buffers: rooms.audio_buffers(),
                voice_detector: self.detector,
                ..SessionSettings::default()
            },
            ..AdmissionSettings::default()
        };
        if let Some(attempts) = self.pin_attempts {
            settings.pin_attempts = attempts;
        }
        if let Some(dir) = self.recording_dir {
            settings.session.recording_dir = dir;
        }

        BridgeFixture {
            admission: Admission::new(Arc::clone(&registry), Arc::new(rooms), settings),
            control: ControlPlane::new(Arc::clone(&registry)),
            registry,
            mixer,
            cancel: CancellationToken::new(),
        }
    }
}

/// A bridge under test.
pub struct BridgeFixture {
    pub registry: Arc<Registry>,
    pub control: ControlPlane,
    pub admission: Admission,
    pub mixer: Arc<MockMixer>,
    pub cancel: CancellationToken,
}

impl BridgeFixture {
    /// Run a call through admission on its own task.
    pub fn call(
        &self,
        channel: TestChannel,
        args: &str,
    ) -> JoinHandle<Result<SessionOutcome, BridgeError>> {
        let admission = self.admission.clone();
        let cancel = self.cancel.child_token();
        let args = args.to_string();
        tokio::spawn(async move {
            let mut channel = channel;
            admission
                .run(&mut channel as &mut dyn Channel, &args, &cancel)
                .await
        })
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.registry.events().subscribe()
    }

    /// Wait (in paused time) until room `id` has `count` participants.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within ten simulated seconds.
    pub async fn wait_for_count(&self, id: &str, count: usize) {
        let id = ConferenceId::new(id).expect("valid room id");
        for _ in 0..500 {
            if self.registry.count(&id) == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "room {id} never reached {count} participants (has {})",
            self.registry.count(&id)
        );
    }
}

/// Let running sessions process a few poll ticks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Next event with the given name, skipping others.
///
/// # Panics
///
/// Panics if the bus closes or lags before one arrives.
pub async fn next_event(events: &mut broadcast::Receiver<BridgeEvent>, name: &str) -> BridgeEvent {
    loop {
        let event = events.recv().await.expect("event bus should stay open");
        if event.name() == name {
            return event;
        }
    }
}
