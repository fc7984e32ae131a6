//! Long-running tasks of the bridge.
//!
//! - [`bridge::Bridge`] supervises every call leg.
//! - [`session::ParticipantSession`] runs one participant inside a room.
//! - [`menu`] handles in-call DTMF menus for a session.
//! - [`recorder`] writes the room mix to disk while a room is recorded.

pub mod bridge;
pub mod menu;
pub mod recorder;
pub mod session;

pub use bridge::Bridge;
pub use session::{LeaveReason, ParticipantSession, SessionOutcome, SessionSettings};
