//! Common types shared across the MeetMe bridge crates.

#![warn(clippy::pedantic)]

/// Module for room and participant identifiers
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
