//! # Bridge Test Utilities
//!
//! Shared test utilities for the MeetMe conference bridge.
//!
//! This crate provides scripted stand-ins for the two external interfaces
//! of the bridge, so sessions and admission can be driven end to end
//! without telephony hardware.
//!
//! ## Modules
//!
//! - `test_channel` - Scripted call leg with an inspection handle
//! - `mock_mixer` - Mixing engine that records rooms, attachments and sounds
//! - `mock_detector` - Voice detector replaying a fixed silence script
//! - `fixtures` - Pre-configured bridges and rooms files
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let bridge = TestBridge::new().with_rooms("conf = [\"600\"]").build();
//!
//!     let channel = TestChannel::new("SIP/alice-0001");
//!     let handle = channel.handle();
//!     let call = bridge.call(channel, "600,q");
//!
//!     handle.send_dtmf('#');
//!     handle.hang_up();
//!     let outcome = call.await.unwrap().unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_detector;
pub mod mock_mixer;
pub mod test_channel;

pub use fixtures::*;
pub use mock_detector::ScriptedDetector;
pub use mock_mixer::MockMixer;
pub use test_channel::{ChannelHandle, TestChannel};
