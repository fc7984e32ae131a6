//! Per-join option parsing.
//!
//! A join request carries a string of single-letter options (`"aAcl"`,
//! `"Tw(30)s"`). Parsing produces an immutable [`Policy`]: the session
//! flag set captured on the participant, plus the admission-only settings
//! (dynamic creation, empty-room selection, PIN prompting) and the
//! wait-for-marked timeout.
//!
//! Parsing never fails. Unknown letters are ignored, and a malformed
//! option argument falls back to that option's no-argument behaviour.

use crate::mixer::MixMode;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

bitflags! {
    /// Session options captured on a participant at join.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SessionFlags: u32 {
        /// `a`: admin, bypasses lock, immune to mute-all and eject-last.
        const ADMIN = 1 << 0;
        /// `l`: listen only.
        const MONITOR = 1 << 1;
        /// `t`: talk only.
        const TALKER = 1 << 2;
        /// `q`: no prompts or chimes.
        const QUIET = 1 << 3;
        /// `c`: announce the participant count on join.
        const ANNOUNCE_COUNT = 1 << 4;
        /// `i`: announce join and leave to the room.
        const INTRO = 1 << 5;
        /// `r`: record the room.
        const RECORD = 1 << 6;
        /// `T`: talker detection with notifications.
        const MONITOR_TALKER = 1 << 7;
        /// `o`: only forward audio while talking.
        const OPTIMIZE_TALKER = 1 << 8;
        /// `A`: marked participant (leader).
        const MARKED = 1 << 9;
        /// `p`: leave on `#`.
        const POUND_EXIT = 1 << 10;
        /// `s`: `*` opens the menu.
        const STAR_MENU = 1 << 11;
        /// `M`: music on hold while alone.
        const MOH = 1 << 12;
        /// `w`: hold until a marked participant is present.
        const WAIT_MARKED = 1 << 13;
        /// `z`: report DTMF digits as events.
        const DTMF_EVENTS = 1 << 14;
        /// `X`: leave to the exit context on a matching digit.
        const EXIT_CONTEXT = 1 << 15;
        /// `m`: join admin-muted.
        const START_MUTED = 1 << 16;
        /// `x`: leave when the last marked participant leaves.
        const MARKED_EXIT = 1 << 17;
        /// `b`: background script requested (accepted, not run).
        const AGI = 1 << 18;
    }
}

/// Whether a missing room may be created on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicMode {
    #[default]
    Off,
    /// `d`: create with the PIN given in the arguments (if any).
    Create,
    /// `D`: create and prompt the caller for a PIN when none was given.
    CreateWithPin,
}

/// Automatic selection of an unused room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRoomMode {
    #[default]
    Off,
    /// `e`: any unused room.
    Any,
    /// `E`: an unused room without a PIN.
    NoPin,
}

/// Immutable per-join policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Policy {
    flags: SessionFlags,
    wait_marked_timeout: Option<Duration>,
    dynamic: DynamicMode,
    empty_room: EmptyRoomMode,
    always_prompt_pin: bool,
}

impl Policy {
    /// Parse an option string.
    #[must_use]
    pub fn parse(options: &str) -> Self {
        let mut policy = Policy::default();
        let mut chars = options.chars().peekable();

        while let Some(letter) = chars.next() {
            let argument = if chars.peek() == Some(&'(') {
                chars.next();
                let mut arg = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ')' {
                        closed = true;
                        break;
                    }
                    arg.push(c);
                }
                closed.then_some(arg)
            } else {
                None
            };

            let flag = match letter {
                'a' => SessionFlags::ADMIN,
                'A' => SessionFlags::MARKED,
                'b' => SessionFlags::AGI,
                'c' => SessionFlags::ANNOUNCE_COUNT,
                'i' => SessionFlags::INTRO,
                'l' => SessionFlags::MONITOR,
                'm' => SessionFlags::START_MUTED,
                'M' => SessionFlags::MOH,
                'o' => SessionFlags::OPTIMIZE_TALKER,
                'p' => SessionFlags::POUND_EXIT,
                'q' => SessionFlags::QUIET,
                'r' => SessionFlags::RECORD,
                's' => SessionFlags::STAR_MENU,
                't' => SessionFlags::TALKER,
                'T' => SessionFlags::MONITOR_TALKER,
                'x' => SessionFlags::MARKED_EXIT,
                'X' => SessionFlags::EXIT_CONTEXT,
                'z' => SessionFlags::DTMF_EVENTS,
                'w' => {
                    policy.wait_marked_timeout = argument.as_deref().and_then(parse_wait_seconds);
                    SessionFlags::WAIT_MARKED
                }
                'd' => {
                    policy.dynamic = DynamicMode::Create;
                    SessionFlags::empty()
                }
                'D' => {
                    policy.dynamic = DynamicMode::CreateWithPin;
                    SessionFlags::empty()
                }
                'e' => {
                    policy.empty_room = EmptyRoomMode::Any;
                    SessionFlags::empty()
                }
                'E' => {
                    policy.empty_room = EmptyRoomMode::NoPin;
                    SessionFlags::empty()
                }
                'P' => {
                    policy.always_prompt_pin = true;
                    SessionFlags::empty()
                }
                other => {
                    debug!(target: "bridge.admission", option = %other, "Ignoring unknown option");
                    SessionFlags::empty()
                }
            };
            policy.flags.insert(flag);
        }

        policy
    }

    /// Session flags captured on the participant.
    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    #[must_use]
    pub fn has(&self, flag: SessionFlags) -> bool {
        self.flags.contains(flag)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has(SessionFlags::ADMIN)
    }

    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.has(SessionFlags::MARKED)
    }

    /// Wait-for-marked deadline, `None` for no timeout.
    #[must_use]
    pub fn wait_marked_timeout(&self) -> Option<Duration> {
        self.wait_marked_timeout
    }

    #[must_use]
    pub fn dynamic(&self) -> DynamicMode {
        self.dynamic
    }

    #[must_use]
    pub fn empty_room(&self) -> EmptyRoomMode {
        self.empty_room
    }

    #[must_use]
    pub fn always_prompt_pin(&self) -> bool {
        self.always_prompt_pin
    }

    /// Grant or revoke the admin bit (admin PIN entered at admission).
    #[must_use]
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.flags.set(SessionFlags::ADMIN, admin);
        self
    }

    /// Attachment mode derived from the options.
    ///
    /// Listen-only wins over talk-only when both are given.
    #[must_use]
    pub fn mix_mode(&self) -> MixMode {
        if self.has(SessionFlags::MONITOR) {
            MixMode::LISTEN_ONLY
        } else if self.has(SessionFlags::TALKER) {
            MixMode::TALK_ONLY
        } else {
            MixMode::FULL_DUPLEX
        }
    }

    /// Whether inbound audio runs through talker detection.
    #[must_use]
    pub fn detects_talking(&self) -> bool {
        self.flags
            .intersects(SessionFlags::MONITOR_TALKER | SessionFlags::OPTIMIZE_TALKER)
    }

    /// Option letters for the session flags, in parse order.
    #[must_use]
    pub fn letters(&self) -> String {
        const LETTERS: [(SessionFlags, char); 19] = [
            (SessionFlags::ADMIN, 'a'),
            (SessionFlags::MARKED, 'A'),
            (SessionFlags::AGI, 'b'),
            (SessionFlags::ANNOUNCE_COUNT, 'c'),
            (SessionFlags::INTRO, 'i'),
            (SessionFlags::MONITOR, 'l'),
            (SessionFlags::START_MUTED, 'm'),
            (SessionFlags::MOH, 'M'),
            (SessionFlags::OPTIMIZE_TALKER, 'o'),
            (SessionFlags::POUND_EXIT, 'p'),
            (SessionFlags::QUIET, 'q'),
            (SessionFlags::RECORD, 'r'),
            (SessionFlags::STAR_MENU, 's'),
            (SessionFlags::TALKER, 't'),
            (SessionFlags::MONITOR_TALKER, 'T'),
            (SessionFlags::WAIT_MARKED, 'w'),
            (SessionFlags::MARKED_EXIT, 'x'),
            (SessionFlags::EXIT_CONTEXT, 'X'),
            (SessionFlags::DTMF_EVENTS, 'z'),
        ];
        LETTERS
            .iter()
            .filter(|(flag, _)| self.flags.contains(*flag))
            .map(|(_, letter)| *letter)
            .collect()
    }
}

/// Positive whole seconds, anything else means "no timeout".
fn parse_wait_seconds(arg: &str) -> Option<Duration> {
    arg.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_marked_count_listen() {
        let policy = Policy::parse("aAcl");
        assert_eq!(
            policy.flags(),
            SessionFlags::ADMIN
                | SessionFlags::MARKED
                | SessionFlags::ANNOUNCE_COUNT
                | SessionFlags::MONITOR
        );
        assert_eq!(policy.dynamic(), DynamicMode::Off);
        assert_eq!(policy.empty_room(), EmptyRoomMode::Off);
        assert!(!policy.always_prompt_pin());
        assert!(policy.wait_marked_timeout().is_none());
    }

    #[test]
    fn test_parse_wait_marked_with_timeout() {
        let policy = Policy::parse("w(10)q");
        assert!(policy.has(SessionFlags::WAIT_MARKED));
        assert!(policy.has(SessionFlags::QUIET));
        assert_eq!(policy.wait_marked_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_malformed_wait_argument_downgrades_to_no_timeout() {
        for options in ["w(abc)", "w(0)", "w(-5)", "w()", "w(12"] {
            let policy = Policy::parse(options);
            assert!(policy.has(SessionFlags::WAIT_MARKED), "{options}");
            assert!(policy.wait_marked_timeout().is_none(), "{options}");
        }
    }

    #[test]
    fn test_admission_only_options_stay_out_of_flags() {
        let policy = Policy::parse("dEP");
        assert!(policy.flags().is_empty());
        assert_eq!(policy.dynamic(), DynamicMode::Create);
        assert_eq!(policy.empty_room(), EmptyRoomMode::NoPin);
        assert!(policy.always_prompt_pin());

        assert_eq!(Policy::parse("D").dynamic(), DynamicMode::CreateWithPin);
        assert_eq!(Policy::parse("e").empty_room(), EmptyRoomMode::Any);
    }

    #[test]
    fn test_unknown_letters_ignored() {
        assert_eq!(Policy::parse("?!9").flags(), SessionFlags::empty());
        assert_eq!(Policy::parse("").flags(), SessionFlags::empty());
    }

    #[test]
    fn test_mix_mode_derivation() {
        assert_eq!(Policy::parse("").mix_mode(), MixMode::FULL_DUPLEX);
        assert_eq!(Policy::parse("l").mix_mode(), MixMode::LISTEN_ONLY);
        assert_eq!(Policy::parse("t").mix_mode(), MixMode::TALK_ONLY);
        // Contradictory combination: listen-only takes precedence
        assert_eq!(Policy::parse("tl").mix_mode(), MixMode::LISTEN_ONLY);
    }

    #[test]
    fn test_talker_detection_options() {
        assert!(Policy::parse("T").detects_talking());
        assert!(Policy::parse("o").detects_talking());
        assert!(!Policy::parse("a").detects_talking());
    }

    #[test]
    fn test_with_admin_sets_and_clears() {
        let policy = Policy::parse("q").with_admin(true);
        assert!(policy.is_admin());
        assert!(!policy.with_admin(false).is_admin());
    }

    #[test]
    fn test_letters_reflect_flags() {
        let policy = Policy::parse("lcAa");
        assert_eq!(policy.letters(), "aAcl");
        assert_eq!(Policy::parse(&policy.letters()).flags(), policy.flags());
    }
}
