//! Discrete volume steps and their gain mapping.
//!
//! A participant has two volumes: talk (what the room hears from them,
//! applied as receive gain on their channel) and listen (what they hear
//! from the room, applied as transmit gain). Each is a step in `-5..=5`
//! mapped to a non-linear decibel table. The channel driver gets the
//! first chance to apply the gain; if it refuses, the step is applied in
//! software to every frame instead.

use serde::Serialize;

/// Decibel gain for each step, indexed by `step + 5`.
pub const GAIN_MAP: [i8; 11] = [-15, -13, -10, -6, 0, 0, 0, 6, 10, 13, 15];

const MIN_STEP: i8 = -5;
const MAX_STEP: i8 = 5;

/// Direction of a volume change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeDirection {
    Up,
    Down,
}

/// A volume step in `-5..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct VolumeStep(i8);

impl VolumeStep {
    /// Neutral step (0 dB).
    pub const NEUTRAL: VolumeStep = VolumeStep(0);

    /// Wrap a step, rejecting values outside `-5..=5`.
    #[must_use]
    pub fn new(step: i8) -> Option<Self> {
        (MIN_STEP..=MAX_STEP).contains(&step).then_some(Self(step))
    }

    #[must_use]
    pub fn value(self) -> i8 {
        self.0
    }

    /// Decibel gain for this step.
    #[must_use]
    pub fn gain_db(self) -> i8 {
        let index = usize::try_from(self.0 - MIN_STEP).unwrap_or(0);
        GAIN_MAP.get(index).copied().unwrap_or(0)
    }

    /// Next step in `direction`.
    ///
    /// Steps of one, except around zero where the table is flat: 0 jumps
    /// to ±2 and ±2 returns to 0. Saturates at ±5.
    #[must_use]
    pub fn stepped(self, direction: VolumeDirection) -> Self {
        let next = match (direction, self.0) {
            (VolumeDirection::Up, MAX_STEP) => MAX_STEP,
            (VolumeDirection::Up, 0) => 2,
            (VolumeDirection::Up, -2) => 0,
            (VolumeDirection::Up, n) => n + 1,
            (VolumeDirection::Down, MIN_STEP) => MIN_STEP,
            (VolumeDirection::Down, 2) => 0,
            (VolumeDirection::Down, 0) => -2,
            (VolumeDirection::Down, n) => n - 1,
        };
        Self(next)
    }
}

/// Desired step plus the step still to be applied in software.
///
/// `software` is zero whenever the channel driver accepted the gain, and
/// equal to `desired` when it did not; the two never both apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Volume {
    desired: VolumeStep,
    software: i8,
}

impl Volume {
    #[must_use]
    pub fn desired(&self) -> VolumeStep {
        self.desired
    }

    /// Step to apply per frame, 0 when the driver handles the gain.
    #[must_use]
    pub fn software_step(&self) -> i8 {
        self.software
    }

    /// Move one step in `direction` and apply it.
    ///
    /// `driver` receives the decibel gain and returns whether the channel
    /// accepted it.
    pub fn tweak(&mut self, direction: VolumeDirection, driver: impl FnOnce(i8) -> bool) {
        self.set(self.desired.stepped(direction), driver);
    }

    /// Apply `step` through the driver, falling back to software gain.
    pub fn set(&mut self, step: VolumeStep, driver: impl FnOnce(i8) -> bool) {
        self.desired = step;
        self.software = if driver(step.gain_db()) { 0 } else { step.value() };
    }

    /// Return to neutral without touching the driver.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
