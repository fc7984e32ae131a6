//! Fire-and-forget bridge notifications.
//!
//! Events go out on a `tokio::sync::broadcast` channel. Publishing never
//! blocks and never fails: with no subscribers the event is dropped, and a
//! subscriber that falls behind loses the oldest events.

use crate::channel::ChannelInfo;
use common::types::{ConferenceId, UserNo};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Identity of the participant an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantTag {
    #[serde(rename = "Meetme")]
    pub conference_id: ConferenceId,
    #[serde(rename = "Usernum")]
    pub user_no: UserNo,
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Uniqueid")]
    pub unique_id: String,
}

impl ParticipantTag {
    #[must_use]
    pub fn new(conference_id: &ConferenceId, user_no: UserNo, channel: &ChannelInfo) -> Self {
        Self {
            conference_id: conference_id.clone(),
            user_no,
            channel: channel.name.clone(),
            unique_id: channel.unique_id.clone(),
        }
    }
}

/// A bridge notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "Event")]
pub enum BridgeEvent {
    #[serde(rename = "MeetmeStart")]
    Start {
        #[serde(rename = "Meetme")]
        conference_id: ConferenceId,
    },

    #[serde(rename = "MeetmeEnd")]
    End {
        #[serde(rename = "Meetme")]
        conference_id: ConferenceId,
        #[serde(rename = "Duration")]
        duration_secs: u64,
        /// Recording file, if the room was recorded.
        #[serde(rename = "Recording")]
        recording: Option<String>,
    },

    #[serde(rename = "MeetmeJoin")]
    Join {
        #[serde(flatten)]
        participant: ParticipantTag,
    },

    #[serde(rename = "MeetmeLeave")]
    Leave {
        #[serde(flatten)]
        participant: ParticipantTag,
        #[serde(rename = "Duration")]
        duration_secs: u64,
    },

    #[serde(rename = "MeetmeMute")]
    Mute {
        #[serde(flatten)]
        participant: ParticipantTag,
        #[serde(rename = "Status")]
        muted: bool,
    },

    #[serde(rename = "MeetmeTalking")]
    Talking {
        #[serde(flatten)]
        participant: ParticipantTag,
        #[serde(rename = "Status")]
        talking: bool,
    },

    #[serde(rename = "MeetmeLock")]
    Lock {
        #[serde(rename = "Meetme")]
        conference_id: ConferenceId,
        #[serde(rename = "Status")]
        locked: bool,
    },

    #[serde(rename = "MeetmeDTMF")]
    Dtmf {
        #[serde(flatten)]
        participant: ParticipantTag,
        #[serde(rename = "Digit")]
        digit: char,
    },

    #[serde(rename = "MeetmeAlert")]
    Alert {
        #[serde(flatten)]
        participant: ParticipantTag,
    },
}

impl BridgeEvent {
    /// Event name as used on the management protocol.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::Start { .. } => "MeetmeStart",
            BridgeEvent::End { .. } => "MeetmeEnd",
            BridgeEvent::Join { .. } => "MeetmeJoin",
            BridgeEvent::Leave { .. } => "MeetmeLeave",
            BridgeEvent::Mute { .. } => "MeetmeMute",
            BridgeEvent::Talking { .. } => "MeetmeTalking",
            BridgeEvent::Lock { .. } => "MeetmeLock",
            BridgeEvent::Dtmf { .. } => "MeetmeDTMF",
            BridgeEvent::Alert { .. } => "MeetmeAlert",
        }
    }
}

/// Publisher side of the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to current subscribers.
    pub fn publish(&self, event: BridgeEvent) {
        trace!(target: "bridge.events", event = event.name(), "Publishing event");
        // No receivers is not an error for fire-and-forget events
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }
}
