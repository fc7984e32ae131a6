//! Audio frames and talker detection.
//!
//! Frames are 20 ms of signed-linear 16-bit little-endian mono at 8 kHz.
//! Silence measurement is delegated to a [`VoiceDetector`]; this module only
//! applies the talking/not-talking hysteresis on top of it.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Sample rate of every frame exchanged with channels and the mixer.
pub const SAMPLE_RATE: u32 = 8000;

/// Samples in one 20 ms frame.
pub const FRAME_SAMPLES: usize = 160;

/// Cadence of the audio path.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Accumulated silence below which a quiet participant becomes "talking".
pub const TALK_DETECT_MS: u32 = 300;

/// Accumulated silence above which a talking participant becomes quiet.
pub const TALK_END_DETECT_MS: u32 = 1000;

/// One frame of signed-linear audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Bytes,
}

impl AudioFrame {
    /// Wrap raw little-endian sample bytes. A trailing odd byte is dropped.
    #[must_use]
    pub fn from_bytes(data: Bytes) -> Self {
        let even = data.len() - data.len() % 2;
        Self {
            data: data.slice(..even),
        }
    }

    /// Build a frame from samples.
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for sample in samples {
            buf.put_i16_le(*sample);
        }
        Self { data: buf.freeze() }
    }

    /// A 20 ms frame of digital silence.
    #[must_use]
    pub fn silence() -> Self {
        Self::from_samples(&[0; FRAME_SAMPLES])
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Number of samples carried.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Iterate over the samples.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| match pair {
                [lo, hi] => i16::from_le_bytes([*lo, *hi]),
                _ => 0,
            })
    }

    /// Software gain: a positive step multiplies every sample, a negative
    /// step divides it, both saturating. Zero returns the frame unchanged.
    #[must_use]
    pub fn with_volume(&self, step: i8) -> Self {
        if step == 0 {
            return self.clone();
        }
        let factor = i16::from(step.unsigned_abs());
        let adjusted: Vec<i16> = if step > 0 {
            self.samples().map(|s| s.saturating_mul(factor)).collect()
        } else {
            self.samples().map(|s| s / factor).collect()
        };
        Self::from_samples(&adjusted)
    }
}

/// External silence detector fed with every inbound voice frame.
pub trait VoiceDetector: Send {
    /// Accumulated milliseconds of continuous silence after this frame.
    fn silence_ms(&mut self, frame: &AudioFrame) -> u32;
}

/// Talking tri-state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TalkState {
    /// Talker detection is not running for this participant.
    #[default]
    Unmonitored,
    Silent,
    Talking,
}

impl TalkState {
    /// Compact encoding used for lock-free sharing.
    #[must_use]
    pub fn as_i8(self) -> i8 {
        match self {
            TalkState::Unmonitored => -1,
            TalkState::Silent => 0,
            TalkState::Talking => 1,
        }
    }

    /// Inverse of [`TalkState::as_i8`]; unknown values read as unmonitored.
    #[must_use]
    pub fn from_i8(value: i8) -> Self {
        match value {
            0 => TalkState::Silent,
            1 => TalkState::Talking,
            _ => TalkState::Unmonitored,
        }
    }
}

/// Hysteresis over a [`VoiceDetector`]'s accumulated silence.
#[derive(Debug, Default)]
pub struct TalkDetector {
    state: TalkState,
}

impl TalkDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> TalkState {
        self.state
    }

    /// Feed the silence measured for one frame.
    ///
    /// Returns `Some(talking)` whenever the state changes, `None` otherwise.
    /// The first observation always reports, since it leaves the
    /// unmonitored state.
    pub fn observe(&mut self, silence_ms: u32) -> Option<bool> {
        let before = self.state;
        if self.state == TalkState::Unmonitored {
            self.state = TalkState::Silent;
        }
        if self.state == TalkState::Silent && silence_ms < TALK_DETECT_MS {
            self.state = TalkState::Talking;
        } else if self.state == TalkState::Talking && silence_ms > TALK_END_DETECT_MS {
            self.state = TalkState::Silent;
        }

        match (before, self.state) {
            (TalkState::Talking, TalkState::Silent) => Some(false),
            (TalkState::Silent | TalkState::Unmonitored, TalkState::Talking) => Some(true),
            (TalkState::Unmonitored, TalkState::Silent) => Some(false),
            _ => None,
        }
    }
}
