//! Admission front end.
//!
//! Takes one call leg from arrival to the end of its session: parses the
//! call arguments, picks or prompts for a room, resolves it (active, then
//! static, then dynamic), checks PINs, runs the participant session and
//! releases the room reference exactly once.

use crate::actors::session::{ParticipantSession, SessionOutcome, SessionSettings};
use crate::channel::{Channel, ChannelError};
use crate::config::{RoomsFile, DEFAULT_PIN_ATTEMPTS, DEFAULT_ROOM_PROMPT_ATTEMPTS};
use crate::errors::BridgeError;
use crate::observability::metrics;
use crate::policy::{DynamicMode, EmptyRoomMode, Policy};
use crate::registry::{ConferenceRef, Registry, RoomRequest};
use common::secret::{pin_matches, SecretString};
use common::types::{ConferenceId, MAX_CONFERENCE_ID_LEN};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Inactivity timeout while the caller types digits.
pub const DEFAULT_DIGIT_TIMEOUT: Duration = Duration::from_secs(6);

/// Longest PIN collected from the keypad.
const MAX_PIN_DIGITS: usize = MAX_CONFERENCE_ID_LEN;

/// Arguments of a conference call: `confno[,options[,pin]]`.
///
/// `|` is accepted as a separator as well as `,`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    pub room: Option<String>,
    pub options: String,
    pub pin: Option<String>,
}

impl CallArgs {
    #[must_use]
    pub fn parse(args: &str) -> Self {
        let mut fields = args.splitn(3, [',', '|']).map(str::trim);
        let room = fields
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let options = fields.next().unwrap_or_default().to_string();
        let pin = fields.next().map(str::to_string);
        Self { room, options, pin }
    }
}

/// Retry budgets and timings for admission.
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub pin_attempts: u32,
    pub room_prompt_attempts: u32,
    pub digit_timeout: Duration,
    pub session: SessionSettings,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            pin_attempts: DEFAULT_PIN_ATTEMPTS,
            room_prompt_attempts: DEFAULT_ROOM_PROMPT_ATTEMPTS,
            digit_timeout: DEFAULT_DIGIT_TIMEOUT,
            session: SessionSettings::default(),
        }
    }
}

/// Where a room number came from.
enum RoomSource {
    Arguments,
    Picked,
    Prompted,
}

/// The admission front end shared by all calls.
#[derive(Debug, Clone)]
pub struct Admission {
    registry: Arc<Registry>,
    rooms: Arc<RoomsFile>,
    settings: AdmissionSettings,
}

impl Admission {
    #[must_use]
    pub fn new(registry: Arc<Registry>, rooms: Arc<RoomsFile>, settings: AdmissionSettings) -> Self {
        Self {
            registry,
            rooms,
            settings,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Drive one call into a conference and through its session.
    ///
    /// # Errors
    ///
    /// Admission failures the caller has already heard a prompt for
    /// ([`BridgeError::ConferenceNotFound`], [`BridgeError::PinRejected`],
    /// [`BridgeError::InvalidRoomNumber`], [`BridgeError::RoomUnavailable`]),
    /// a hangup during the prompts ([`BridgeError::Channel`]), or a session
    /// failure.
    #[instrument(skip_all, name = "bridge.admission", fields(channel = %channel.name()))]
    pub async fn run(
        &self,
        channel: &mut dyn Channel,
        args: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, BridgeError> {
        let args = CallArgs::parse(args);
        let policy = Policy::parse(&args.options);
        debug!(target: "bridge.admission", options = %policy.letters(), "Call arrived");

        if !channel.is_up() {
            channel.answer().await?;
        }

        let mut room_arg = args.room.clone();
        let mut pin_arg = args.pin.clone().filter(|p| !p.is_empty());
        let can_retry = room_arg.is_none();

        for _ in 0..self.settings.room_prompt_attempts {
            let (room, source) = match self.next_room(channel, &policy, &mut room_arg).await? {
                Some(found) => found,
                None => continue,
            };
            let id = match ConferenceId::new(&room) {
                Ok(id) => id,
                Err(_) => {
                    play_best_effort(channel, "conf-invalid").await?;
                    continue;
                }
            };

            let Some(conf) = self.lookup(channel, &id, &policy, &mut pin_arg).await? else {
                info!(target: "bridge.admission", conference_id = %id, "No such conference");
                metrics::record_admission("not_found");
                play_best_effort(channel, "conf-invalid").await?;
                if can_retry && !matches!(source, RoomSource::Arguments) {
                    continue;
                }
                return Err(BridgeError::ConferenceNotFound(id.to_string()));
            };

            let admitted_policy = match self.check_pin(channel, &conf, policy, pin_arg.as_deref()).await {
                Ok(policy) => policy,
                Err(e) => {
                    self.registry.dispose(conf).await;
                    if matches!(e, BridgeError::PinRejected(_)) {
                        metrics::record_admission("bad_pin");
                        if can_retry && !matches!(source, RoomSource::Arguments) {
                            continue;
                        }
                    }
                    return Err(e);
                }
            };

            let outcome = ParticipantSession::run(
                &self.registry,
                &conf,
                channel,
                admitted_policy,
                &self.settings.session,
                cancel,
            )
            .await;
            self.registry.dispose(conf).await;
            return outcome;
        }

        metrics::record_admission("invalid_room");
        Err(BridgeError::InvalidRoomNumber(
            args.room.unwrap_or_else(|| "<prompted>".to_string()),
        ))
    }

    /// Participant count of a room, 0 when it is not active.
    ///
    /// # Errors
    ///
    /// [`BridgeError::MissingArgument`] when no room number is given.
    pub fn count(&self, args: &str) -> Result<usize, BridgeError> {
        let args = CallArgs::parse(args);
        let room = args
            .room
            .ok_or(BridgeError::MissingArgument("conference number"))?;
        let id = ConferenceId::new(&room).map_err(|_| BridgeError::InvalidRoomNumber(room))?;
        Ok(self.registry.count(&id))
    }

    /// Room number for the next attempt: picked for `e`/`E`, taken from the
    /// arguments once, otherwise prompted. `None` means this attempt was
    /// spent on an unusable entry.
    async fn next_room(
        &self,
        channel: &mut dyn Channel,
        policy: &Policy,
        room_arg: &mut Option<String>,
    ) -> Result<Option<(String, RoomSource)>, BridgeError> {
        if policy.empty_room() != EmptyRoomMode::Off {
            return match self.pick_empty_room(policy) {
                Some(id) => {
                    play_best_effort(channel, "conf-enteringno").await?;
                    say_digits_best_effort(channel, id.as_str()).await?;
                    Ok(Some((id.to_string(), RoomSource::Picked)))
                }
                None => {
                    info!(target: "bridge.admission", "No empty conference available");
                    metrics::record_admission("no_room");
                    play_best_effort(channel, "conf-noempty").await?;
                    Err(BridgeError::RoomUnavailable("no empty conference".to_string()))
                }
            };
        }

        if let Some(room) = room_arg.take() {
            return Ok(Some((room, RoomSource::Arguments)));
        }

        let entered = match channel
            .collect_digits("conf-getconfno", MAX_CONFERENCE_ID_LEN, self.settings.digit_timeout)
            .await
        {
            Ok(entered) => entered,
            Err(ChannelError::HungUp) => return Err(ChannelError::HungUp.into()),
            Err(e) => {
                warn!(target: "bridge.admission", error = %e, "Could not collect room number");
                return Err(e.into());
            }
        };
        if entered.is_empty() || !entered.bytes().all(|b| b.is_ascii_digit()) {
            debug!(target: "bridge.admission", "Unusable room number entered");
            play_best_effort(channel, "conf-invalid").await?;
            return Ok(None);
        }
        Ok(Some((entered, RoomSource::Prompted)))
    }

    /// Lowest free auto-numbered slot when dynamic creation is on, else the
    /// first idle static room (PIN-less for `E`).
    fn pick_empty_room(&self, policy: &Policy) -> Option<ConferenceId> {
        let dynamic = policy.dynamic() != DynamicMode::Off;
        let no_pin = policy.empty_room() == EmptyRoomMode::NoPin;

        if dynamic {
            return self.registry.free_room_number();
        }
        self.rooms
            .rooms()
            .iter()
            .find(|room| !self.registry.is_active(&room.id) && (!no_pin || room.pin.is_none()))
            .map(|room| room.id.clone())
    }

    /// Resolve a room: active, then static, then dynamic creation.
    async fn lookup(
        &self,
        channel: &mut dyn Channel,
        id: &ConferenceId,
        policy: &Policy,
        pin_arg: &mut Option<String>,
    ) -> Result<Option<ConferenceRef>, BridgeError> {
        if let Some(conf) = self.registry.acquire(id).await {
            return Ok(Some(conf));
        }

        if let Some(room) = self.rooms.find(id) {
            let request = RoomRequest::configured(room.pin.clone(), room.admin_pin.clone());
            return self.registry.find_or_create(id, &request).await;
        }

        let pin = match policy.dynamic() {
            DynamicMode::Off => return Ok(None),
            DynamicMode::Create => pin_arg.clone(),
            DynamicMode::CreateWithPin => {
                if pin_arg.is_none() {
                    let entered = channel
                        .collect_digits("conf-getpin", MAX_PIN_DIGITS, self.settings.digit_timeout)
                        .await?;
                    // The creator has just chosen it and is not asked again
                    *pin_arg = Some(entered).filter(|p| !p.is_empty());
                }
                pin_arg.clone()
            }
        };
        let request = RoomRequest::dynamic(pin.map(SecretString::from));
        self.registry.find_or_create(id, &request).await
    }

    /// PIN gate. Returns the policy to run with: a match on the admin PIN
    /// grants the admin bit.
    async fn check_pin(
        &self,
        channel: &mut dyn Channel,
        conf: &ConferenceRef,
        policy: Policy,
        pin_arg: Option<&str>,
    ) -> Result<Policy, BridgeError> {
        let (pin, admin_pin) = self.registry.with_conference(conf, |room| {
            (room.pin().cloned(), room.admin_pin().cloned())
        })?;

        let required = (pin.is_some() && !policy.is_admin()) || (admin_pin.is_some() && policy.is_admin());
        if !required {
            return Ok(policy);
        }

        let preset = pin_arg.filter(|_| !policy.always_prompt_pin());
        let mut carried = String::new();
        for attempt in 1..=self.settings.pin_attempts {
            let entered = match preset {
                Some(preset) => preset.to_string(),
                None => {
                    let digits = channel
                        .collect_digits("conf-getpin", MAX_PIN_DIGITS, self.settings.digit_timeout)
                        .await?;
                    let mut entered = std::mem::take(&mut carried);
                    entered.push_str(&digits);
                    entered
                }
            };

            if admin_pin.as_ref().is_some_and(|admin| pin_matches(admin, &entered)) {
                debug!(target: "bridge.admission", conference_id = %conf.id(), "Admin PIN accepted");
                return Ok(policy.with_admin(true));
            }
            if pin.as_ref().is_some_and(|pin| pin_matches(pin, &entered)) {
                debug!(target: "bridge.admission", conference_id = %conf.id(), "PIN accepted");
                return Ok(policy);
            }

            info!(target: "bridge.admission", conference_id = %conf.id(), attempt, "Invalid PIN");
            match channel.play("conf-invalidpin", true).await {
                Ok(Some(digit)) => carried.push(digit),
                Ok(None) => {}
                Err(ChannelError::HungUp) => return Err(ChannelError::HungUp.into()),
                Err(e) => {
                    warn!(target: "bridge.admission", error = %e, "Could not play invalid PIN prompt");
                    break;
                }
            }
            if preset.is_some() {
                break;
            }
        }
        Err(BridgeError::PinRejected(conf.id().to_string()))
    }
}

/// Play a prompt; only a hangup is an error.
async fn play_best_effort(channel: &mut dyn Channel, prompt: &str) -> Result<(), BridgeError> {
    match channel.play(prompt, false).await {
        Ok(_) => Ok(()),
        Err(ChannelError::HungUp) => Err(ChannelError::HungUp.into()),
        Err(e) => {
            debug!(target: "bridge.admission", %prompt, error = %e, "Prompt skipped");
            Ok(())
        }
    }
}

async fn say_digits_best_effort(channel: &mut dyn Channel, digits: &str) -> Result<(), BridgeError> {
    match channel.say_digits(digits).await {
        Ok(()) => Ok(()),
        Err(ChannelError::HungUp) => Err(ChannelError::HungUp.into()),
        Err(e) => {
            debug!(target: "bridge.admission", error = %e, "Could not say room number");
            Ok(())
        }
    }
}
