//! Voice detector that replays a fixed silence script.

use meetme_bridge::actors::session::DetectorFactory;
use meetme_bridge::audio::{AudioFrame, VoiceDetector};
use std::collections::VecDeque;
use std::sync::Arc;

/// Returns the scripted silence values in order, then `idle` forever.
#[derive(Debug, Clone)]
pub struct ScriptedDetector {
    script: VecDeque<u32>,
    idle: u32,
}

impl ScriptedDetector {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = u32>, idle: u32) -> Self {
        Self {
            script: script.into_iter().collect(),
            idle,
        }
    }

    /// A detector that hears speech on every frame.
    #[must_use]
    pub fn always_talking() -> Self {
        Self::new([], 0)
    }

    /// Factory handing each session its own copy of this script.
    #[must_use]
    pub fn factory(self) -> DetectorFactory {
        Arc::new(move || Box::new(self.clone()) as Box<dyn VoiceDetector>)
    }
}

impl VoiceDetector for ScriptedDetector {
    fn silence_ms(&mut self, _frame: &AudioFrame) -> u32 {
        self.script.pop_front().unwrap_or(self.idle)
    }
}
