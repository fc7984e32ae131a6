//! Interface to the call-handling layer.
//!
//! A [`Channel`] is one call leg. The session that runs a participant owns
//! its channel exclusively; everything else (listings, events) works from a
//! [`ChannelInfo`] snapshot taken at admission.
//!
//! `read_frame` must be cancel-safe: the session loop races it against the
//! mixer port and the poll tick, dropping the losing futures.

use crate::audio::AudioFrame;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Inbound frame from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFrame {
    /// Signed-linear voice.
    Voice(AudioFrame),
    /// A completed DTMF digit.
    Dtmf(char),
    /// Anything the bridge does not act on (control, text, video).
    Other,
}

/// Low-level identity of the transport carrying a channel.
///
/// Changes when the channel is moved to a different device mid-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransportDescriptor(pub u64);

/// Which side of the channel a gain applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainDirection {
    /// Audio received from the caller (talk volume).
    Receive,
    /// Audio sent to the caller (listen volume).
    Transmit,
}

/// Caller identification presented by a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallerId {
    pub number: Option<String>,
    pub name: Option<String>,
}

impl CallerId {
    #[must_use]
    pub fn new(number: Option<&str>, name: Option<&str>) -> Self {
        Self {
            number: number.map(str::to_string),
            name: name.map(str::to_string),
        }
    }
}

/// Snapshot of a channel's identity for listings and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub unique_id: String,
    pub caller_id: CallerId,
}

impl ChannelInfo {
    /// Capture the identity of `channel`.
    pub fn of(channel: &dyn Channel) -> Self {
        Self {
            name: channel.name().to_string(),
            unique_id: channel.unique_id().to_string(),
            caller_id: channel.caller_id(),
        }
    }
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel hung up")]
    HungUp,

    #[error("option not supported: {0}")]
    Unsupported(&'static str),

    #[error("prompt not available: {0}")]
    PromptMissing(String),

    #[error("channel I/O failed: {0}")]
    Io(String),
}

/// One call leg, as seen by the bridge.
#[async_trait]
pub trait Channel: Send {
    fn name(&self) -> &str;

    fn unique_id(&self) -> &str;

    fn caller_id(&self) -> CallerId;

    /// Whether the call has been answered.
    fn is_up(&self) -> bool;

    async fn answer(&mut self) -> Result<(), ChannelError>;

    /// Switch the channel to signed-linear read and write.
    fn set_linear_format(&mut self) -> Result<(), ChannelError>;

    /// Next inbound frame; `None` means the caller hung up.
    async fn read_frame(&mut self) -> Option<ChannelFrame>;

    async fn write_frame(&mut self, frame: &AudioFrame) -> Result<(), ChannelError>;

    /// Ask the driver to apply `db` of gain; an error means software gain
    /// is needed instead.
    fn set_gain(&mut self, direction: GainDirection, db: i8) -> Result<(), ChannelError>;

    fn tone_suppression(&self) -> bool;

    /// Keep DTMF tones out of the audio path (used while a menu is enabled).
    fn set_tone_suppression(&mut self, enabled: bool) -> Result<(), ChannelError>;

    fn transport_descriptor(&self) -> TransportDescriptor;

    /// Whether the call has been torn down by the far end or the system.
    fn is_hung_up(&self) -> bool;

    /// Play a prompt. With `interruptible`, a digit pressed during playback
    /// stops it and is returned.
    async fn play(&mut self, prompt: &str, interruptible: bool)
        -> Result<Option<char>, ChannelError>;

    async fn say_number(&mut self, number: usize) -> Result<(), ChannelError>;

    async fn say_digits(&mut self, digits: &str) -> Result<(), ChannelError>;

    /// Play `prompt` and collect up to `max` digits, ending on `#` or
    /// `timeout` of inactivity.
    async fn collect_digits(
        &mut self,
        prompt: &str,
        max: usize,
        timeout: Duration,
    ) -> Result<String, ChannelError>;

    /// Start music on hold.
    fn start_hold(&mut self) -> Result<(), ChannelError>;

    fn stop_hold(&mut self);

    /// Continue the dialplan at `exten` in `context` if it exists.
    fn goto_context(&mut self, context: &str, exten: &str) -> bool;

    fn variable(&self, name: &str) -> Option<String>;
}
