//! MeetMe Conference Bridge Library
//!
//! Multi-party audio conferencing on top of a mixing engine and a set of
//! telephony channels:
//!
//! - Room registry with auto-numbered rooms and reference-counted disposal
//! - Admission: room number, option string and PIN handling
//! - Per-participant run loop with DTMF menus and talker detection
//! - Admin control plane (lock, mute, kick, volume, whisper)
//! - Recording sidecar writing the room mix to disk
//!
//! # Architecture
//!
//! ```text
//! Bridge (singleton per process)
//! ├── Registry (one lock over every live Conference)
//! │   └── Conference
//! │       ├── Participant list (ParticipantControl shared with sessions)
//! │       └── Recorder task (while recording)
//! ├── ControlPlane (admin commands and manager actions)
//! └── supervises N call tasks
//!     └── Admission → ParticipantSession (one per call leg)
//! ```
//!
//! Sessions never hold the registry lock across an await. Admin commands
//! only flip flags on a participant's control block; the session applies
//! them on its next poll tick.
//!
//! # Modules
//!
//! - [`actors`] - Supervisor, participant sessions, menus and the recorder
//! - [`admin`] - Operator console and management actions
//! - [`admission`] - Room selection and PIN checks for a new call
//! - [`config`] - Process configuration and the rooms file
//! - [`errors`] - Error types with stable codes
//! - [`registry`] - Live rooms and room-number allocation

pub mod actors;
pub mod admin;
pub mod admission;
pub mod audio;
pub mod channel;
pub mod conference;
pub mod config;
pub mod control;
pub mod errors;
pub mod events;
pub mod mixer;
pub mod observability;
pub mod policy;
pub mod registry;
pub mod volume;
