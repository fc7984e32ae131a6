//! Administrative surfaces over the control plane: the operator console
//! and management actions.

pub mod commands;
pub mod manager;

pub use commands::{run_line, AdminCommand, CommandError, Target};
pub use manager::{ManagerAction, ManagerResponse};
