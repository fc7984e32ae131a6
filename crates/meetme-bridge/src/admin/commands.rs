//! Operator command surface.
//!
//! Line-oriented commands in the `meetme` console style. Listings are
//! rendered either for people or in a `!`-separated concise form meant for
//! scripts.

use crate::audio::TalkState;
use crate::conference::{ConferenceSummary, ParticipantSummary};
use crate::control::{ControlPlane, EjectOutcome};
use crate::errors::BridgeError;
use crate::volume::VolumeDirection;
use common::types::{ConferenceId, UserNo};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

/// Usage text shown for malformed commands.
pub const USAGE: &str = "Usage: list [concise] | list <confno> [concise] | lock|unlock <confno> | \
mute|unmute <confno> <usernumber|all> | kick <confno> <usernumber|all> | eject <confno> | \
volume <confno> <usernumber> up|down | reset <confno>";

/// Who a mute or kick applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    User(UserNo),
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    ListRooms { concise: bool },
    ListParticipants { room: ConferenceId, concise: bool },
    Lock(ConferenceId),
    Unlock(ConferenceId),
    Mute { room: ConferenceId, target: Target },
    Unmute { room: ConferenceId, target: Target },
    Kick { room: ConferenceId, target: Target },
    Eject(ConferenceId),
    Volume {
        room: ConferenceId,
        user_no: UserNo,
        direction: VolumeDirection,
    },
    Reset(ConferenceId),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{USAGE}")]
    Usage,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl AdminCommand {
    /// Parse a command from its words, e.g. `["mute", "600", "all"]`.
    ///
    /// # Errors
    ///
    /// [`CommandError::Usage`] for unknown or incomplete commands, and
    /// [`BridgeError::InvalidUserNumber`] / [`BridgeError::InvalidRoomNumber`]
    /// for unusable arguments.
    pub fn parse<S: AsRef<str>>(words: &[S]) -> Result<Self, CommandError> {
        let words: Vec<&str> = words.iter().map(AsRef::as_ref).collect();
        let command = match words.as_slice() {
            ["list"] => AdminCommand::ListRooms { concise: false },
            ["list", c] if c.eq_ignore_ascii_case("concise") => {
                AdminCommand::ListRooms { concise: true }
            }
            ["list", room] => AdminCommand::ListParticipants {
                room: room_id(room)?,
                concise: false,
            },
            ["list", room, c] if c.eq_ignore_ascii_case("concise") => {
                AdminCommand::ListParticipants {
                    room: room_id(room)?,
                    concise: true,
                }
            }
            ["lock", room] => AdminCommand::Lock(room_id(room)?),
            ["unlock", room] => AdminCommand::Unlock(room_id(room)?),
            ["mute", room, target] => AdminCommand::Mute {
                room: room_id(room)?,
                target: target_of(target)?,
            },
            ["unmute", room, target] => AdminCommand::Unmute {
                room: room_id(room)?,
                target: target_of(target)?,
            },
            ["kick", room, target] => AdminCommand::Kick {
                room: room_id(room)?,
                target: target_of(target)?,
            },
            ["eject", room] => AdminCommand::Eject(room_id(room)?),
            ["volume", room, user, direction] => AdminCommand::Volume {
                room: room_id(room)?,
                user_no: user_no(user)?,
                direction: match direction.to_ascii_lowercase().as_str() {
                    "up" => VolumeDirection::Up,
                    "down" => VolumeDirection::Down,
                    _ => return Err(CommandError::Usage),
                },
            },
            ["reset", room] => AdminCommand::Reset(room_id(room)?),
            _ => return Err(CommandError::Usage),
        };
        Ok(command)
    }

    /// Parse a whole console line.
    ///
    /// # Errors
    ///
    /// As [`AdminCommand::parse`].
    pub fn parse_line(line: &str) -> Result<Self, CommandError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        Self::parse(&words)
    }

    /// Run the command and render its output.
    ///
    /// # Errors
    ///
    /// Lookup failures from the control plane. Listing an unknown room is
    /// not an error; it renders a notice instead.
    pub fn execute(&self, control: &ControlPlane) -> Result<String, CommandError> {
        let output = match self {
            AdminCommand::ListRooms { concise } => {
                let rooms = control.registry().list();
                if *concise {
                    render_rooms_concise(&rooms)
                } else {
                    render_rooms(&rooms)
                }
            }
            AdminCommand::ListParticipants { room, concise } => {
                match control.registry().participants(room) {
                    Ok(participants) if *concise => render_participants_concise(&participants),
                    Ok(participants) => render_participants(&participants),
                    Err(BridgeError::ConferenceNotFound(_)) if *concise => String::new(),
                    Err(BridgeError::ConferenceNotFound(_)) => {
                        format!("No such conference: {room}.\n")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            AdminCommand::Lock(room) => {
                control.lock(room)?;
                format!("Conference {room} locked.\n")
            }
            AdminCommand::Unlock(room) => {
                control.unlock(room)?;
                format!("Conference {room} unlocked.\n")
            }
            AdminCommand::Mute { room, target } => match target {
                Target::All => format!("{} users muted.\n", control.mute_all(room)?),
                Target::User(user_no) => {
                    control.mute_one(room, *user_no)?;
                    format!("User {user_no} muted.\n")
                }
            },
            AdminCommand::Unmute { room, target } => match target {
                Target::All => format!("{} users unmuted.\n", control.unmute_all(room)?),
                Target::User(user_no) => {
                    if control.unmute_one(room, *user_no)? {
                        format!("User {user_no} unmuted.\n")
                    } else {
                        format!("User {user_no} was not muted.\n")
                    }
                }
            },
            AdminCommand::Kick { room, target } => match target {
                Target::All => format!("{} users kicked.\n", control.kick_all(room)?),
                Target::User(user_no) => {
                    control.kick_one(room, *user_no)?;
                    format!("User {user_no} kicked.\n")
                }
            },
            AdminCommand::Eject(room) => match control.eject_last(room)? {
                EjectOutcome::Ejected(user_no) => format!("User {user_no} ejected.\n"),
                EjectOutcome::RefusedAdmin(user_no) => {
                    format!("Not ejecting user {user_no}, is an admin.\n")
                }
                EjectOutcome::Empty => format!("Conference {room} is empty.\n"),
            },
            AdminCommand::Volume {
                room,
                user_no,
                direction,
            } => {
                control.adjust_volume(room, *user_no, *direction)?;
                let direction = match direction {
                    VolumeDirection::Up => "raised",
                    VolumeDirection::Down => "lowered",
                };
                format!("User {user_no} talk volume {direction}.\n")
            }
            AdminCommand::Reset(room) => {
                let count = control.reset_volumes(room, None)?;
                format!("Volume reset for {count} users.\n")
            }
        };
        Ok(output)
    }
}

/// Parse and run one console line, rendering errors as text.
#[must_use]
pub fn run_line(control: &ControlPlane, line: &str) -> String {
    match AdminCommand::parse_line(line).and_then(|command| command.execute(control)) {
        Ok(output) => output,
        Err(CommandError::Usage) => format!("{USAGE}\n"),
        Err(CommandError::Bridge(e)) => format!("{}\n", e.client_message()),
    }
}

fn room_id(word: &str) -> Result<ConferenceId, BridgeError> {
    ConferenceId::new(word).map_err(|_| BridgeError::InvalidRoomNumber(word.to_string()))
}

fn user_no(word: &str) -> Result<UserNo, BridgeError> {
    word.parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .map(UserNo)
        .ok_or_else(|| BridgeError::InvalidUserNumber(word.to_string()))
}

fn target_of(word: &str) -> Result<Target, BridgeError> {
    if word.eq_ignore_ascii_case("all") {
        Ok(Target::All)
    } else {
        user_no(word).map(Target::User)
    }
}

/// `hh:mm:ss`, hours unbounded.
fn hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn render_rooms(rooms: &[ConferenceSummary]) -> String {
    if rooms.is_empty() {
        return "No active MeetMe conferences.\n".to_string();
    }
    let mut out = format!(
        "{:<14} {:<14} {:<10} {:<8}  {:<8}\n",
        "Conf Num", "Parties", "Marked", "Activity", "Creation"
    );
    let mut total = 0;
    for room in rooms {
        let marked = if room.marked == 0 {
            "N/A ".to_string()
        } else {
            format!("{:04}", room.marked)
        };
        let _ = writeln!(
            out,
            "{:<12.12}   {:04}\t      {:>4.4}       {}  {:<8}",
            room.id.as_str(),
            room.participants,
            marked,
            hms(room.uptime),
            if room.is_dynamic { "Dynamic" } else { "Static" },
        );
        total += room.participants;
    }
    let _ = writeln!(out, "* Total number of MeetMe users: {total}");
    out
}

fn render_rooms_concise(rooms: &[ConferenceSummary]) -> String {
    let mut out = String::new();
    for room in rooms {
        let _ = writeln!(
            out,
            "{}!{}!{}!{}!{}!{}",
            room.id,
            room.participants,
            room.marked,
            hms(room.uptime),
            u8::from(room.is_dynamic),
            u8::from(room.locked),
        );
    }
    out
}

fn talking_label(state: TalkState) -> &'static str {
    match state {
        TalkState::Talking => "(talking)",
        TalkState::Silent => "(not talking)",
        TalkState::Unmonitored => "(unmonitored)",
    }
}

fn render_participants(participants: &[ParticipantSummary]) -> String {
    let mut out = String::new();
    for p in participants {
        let caller = &p.channel.caller_id;
        let _ = writeln!(
            out,
            "User #: {:02} {:>12.12} {:<20.20} Channel: {} {} {} {} {} {}",
            p.user_no.0,
            caller.number.as_deref().unwrap_or("<unknown>"),
            caller.name.as_deref().unwrap_or("<no name>"),
            p.channel.name,
            if p.is_admin { "(Admin)" } else { "" },
            if p.listen_only { "(Listen only)" } else { "" },
            if p.admin_muted { "(Admin Muted)" } else { "" },
            talking_label(p.talking),
            hms(p.duration),
        );
    }
    let _ = writeln!(out, "{} users in that conference.", participants.len());
    out
}

fn render_participants_concise(participants: &[ParticipantSummary]) -> String {
    let flag = |set: bool| if set { "1" } else { "" };
    let mut out = String::new();
    for p in participants {
        let caller = &p.channel.caller_id;
        let _ = writeln!(
            out,
            "{}!{}!{}!{}!{}!{}!{}!{}!{}",
            p.user_no,
            caller.number.as_deref().unwrap_or_default(),
            caller.name.as_deref().unwrap_or_default(),
            p.channel.name,
            flag(p.is_admin),
            flag(p.listen_only),
            flag(p.admin_muted),
            p.talking.as_i8(),
            hms(p.duration),
        );
    }
    out
}
