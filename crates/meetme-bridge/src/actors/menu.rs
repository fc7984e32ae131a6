//! In-call DTMF menus.
//!
//! `*` opens the menu for participants with the `s` option. While it is
//! open the participant is detached from the room and every digit is a
//! menu command. Volume keys keep the menu open; every other key closes it.

use crate::actors::session::ParticipantSession;
use crate::channel::GainDirection;
use crate::conference::{AdminFlags, VolumeRequest};
use crate::errors::BridgeError;
use crate::events::BridgeEvent;
use crate::volume::VolumeDirection;
use tracing::{debug, info, trace};

/// Which menu a participant gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Admin,
    User,
}

impl MenuKind {
    /// Prompt played when the menu opens.
    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            MenuKind::Admin => "conf-adminmenu",
            MenuKind::User => "conf-usermenu",
        }
    }
}

/// A menu key press, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    /// 1: mute or unmute yourself (admins clear the admin mute too).
    ToggleMute,
    /// 2: lock or unlock the room (admin).
    ToggleLock,
    /// 3: eject the last joined participant (admin).
    EjectLast,
    /// 4
    ListenDown,
    /// 6
    ListenUp,
    /// 7
    TalkDown,
    /// 9
    TalkUp,
    /// 8: close the menu.
    Exit,
    /// `*` pressed inside the menu: ask for an operator.
    AlertOperator,
    Invalid,
}

impl MenuCommand {
    #[must_use]
    pub fn from_digit(kind: MenuKind, digit: char) -> Self {
        match (kind, digit) {
            (_, '1') => MenuCommand::ToggleMute,
            (MenuKind::Admin, '2') => MenuCommand::ToggleLock,
            (MenuKind::Admin, '3') => MenuCommand::EjectLast,
            (_, '4') => MenuCommand::ListenDown,
            (_, '6') => MenuCommand::ListenUp,
            (_, '7') => MenuCommand::TalkDown,
            (_, '9') => MenuCommand::TalkUp,
            (_, '8') => MenuCommand::Exit,
            (_, '*') => MenuCommand::AlertOperator,
            _ => MenuCommand::Invalid,
        }
    }

    #[must_use]
    pub fn keeps_menu_open(self) -> bool {
        matches!(
            self,
            MenuCommand::ListenDown
                | MenuCommand::ListenUp
                | MenuCommand::TalkDown
                | MenuCommand::TalkUp
        )
    }
}

impl ParticipantSession<'_> {
    fn menu_kind(&self) -> MenuKind {
        if self.policy.is_admin() {
            MenuKind::Admin
        } else {
            MenuKind::User
        }
    }

    /// Handle a digit that opens the menu or arrives while it is open.
    pub(super) async fn on_menu_digit(&mut self, digit: char) -> Result<(), BridgeError> {
        let saved_mode = self.current_mode()?;
        self.detach()?;

        let entering = !self.menu_active;
        // Hardware talk gain would otherwise keep shaping the menu prompts
        if entering && self.talk.desired().value() != 0 && self.talk.software_step() == 0 {
            if let Err(e) = self.channel.set_gain(GainDirection::Receive, 0) {
                trace!(target: "bridge.menu", error = %e, "Driver gain not adjustable");
            }
        }

        let was_on_hold = self.on_hold;
        if was_on_hold {
            self.stop_hold();
        }

        let kind = self.menu_kind();
        let pressed = if entering {
            self.menu_active = true;
            debug!(target: "bridge.menu", ?kind, "Menu opened");
            self.prompt(kind.prompt(), true).await?
        } else {
            Some(digit)
        };

        if let Some(pressed) = pressed {
            let command = MenuCommand::from_digit(kind, pressed);
            debug!(target: "bridge.menu", ?command, digit = %pressed, "Menu command");
            self.menu_command(command).await?;
            if !command.keeps_menu_open() {
                self.menu_active = false;
            }
        }

        if was_on_hold {
            self.start_hold();
        }
        self.set_mode(saved_mode)?;
        self.flush()?;

        if !self.menu_active {
            debug!(target: "bridge.menu", "Menu closed");
            let gain = self.talk.desired().gain_db();
            if self.talk.software_step() == 0 {
                if let Err(e) = self.channel.set_gain(GainDirection::Receive, gain) {
                    trace!(target: "bridge.menu", error = %e, "Driver gain not adjustable");
                }
            }
        }
        Ok(())
    }

    async fn menu_command(&mut self, command: MenuCommand) -> Result<(), BridgeError> {
        match command {
            MenuCommand::ToggleMute => self.menu_toggle_mute().await,
            MenuCommand::ToggleLock => self.menu_toggle_lock().await,
            MenuCommand::EjectLast => self.menu_eject_last().await,
            MenuCommand::ListenDown => {
                self.apply_volume(VolumeRequest::Listen(VolumeDirection::Down));
                Ok(())
            }
            MenuCommand::ListenUp => {
                self.apply_volume(VolumeRequest::Listen(VolumeDirection::Up));
                Ok(())
            }
            MenuCommand::TalkDown => {
                self.apply_volume(VolumeRequest::Talk(VolumeDirection::Down));
                Ok(())
            }
            MenuCommand::TalkUp => {
                self.apply_volume(VolumeRequest::Talk(VolumeDirection::Up));
                Ok(())
            }
            MenuCommand::Exit => Ok(()),
            MenuCommand::AlertOperator => {
                info!(target: "bridge.menu", "Operator requested");
                self.publish(|participant| BridgeEvent::Alert { participant });
                self.prompt("conf-sysopreq", false).await.map(|_| ())
            }
            MenuCommand::Invalid => self.prompt("conf-errormenu", false).await.map(|_| ()),
        }
    }

    async fn menu_toggle_mute(&mut self) -> Result<(), BridgeError> {
        let prompt = match self.menu_kind() {
            MenuKind::Admin => {
                let both = AdminFlags::MUTED | AdminFlags::SELF_MUTED;
                if self.control.flags().intersects(both) {
                    self.control.remove(both);
                    "conf-unmuted"
                } else {
                    self.control.insert(both);
                    "conf-muted"
                }
            }
            MenuKind::User => {
                let flags = self.control.toggle(AdminFlags::SELF_MUTED);
                if flags.intersects(AdminFlags::MUTED | AdminFlags::SELF_MUTED) {
                    "conf-muted"
                } else {
                    "conf-unmuted"
                }
            }
        };
        self.prompt(prompt, false).await.map(|_| ())
    }

    async fn menu_toggle_lock(&mut self) -> Result<(), BridgeError> {
        let conference_id = self.conf.id().clone();
        let locked = self.registry.with_conference(self.conf, |room| {
            let locked = !room.is_locked();
            room.set_locked(locked);
            locked
        })?;
        info!(target: "bridge.menu", %conference_id, locked, "Lock toggled from menu");
        self.registry
            .events()
            .publish(BridgeEvent::Lock { conference_id, locked });
        let prompt = if locked {
            "conf-lockednow"
        } else {
            "conf-unlockednow"
        };
        self.prompt(prompt, false).await.map(|_| ())
    }

    async fn menu_eject_last(&mut self) -> Result<(), BridgeError> {
        let own = self.user_no;
        let ejected = self.registry.with_conference(self.conf, |room| {
            match room.last_joined() {
                Some(last) if last.user_no() != own && !last.is_admin() => {
                    last.control().insert(AdminFlags::KICK);
                    Some(last.user_no())
                }
                _ => None,
            }
        })?;
        match ejected {
            Some(user_no) => {
                info!(target: "bridge.menu", %user_no, "Ejected last user from menu");
                Ok(())
            }
            None => self.prompt("conf-errormenu", false).await.map(|_| ()),
        }
    }
}
