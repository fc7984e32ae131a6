//! Participant session - the per-call run loop.
//!
//! One session runs per admitted call leg, on its own task. It owns the
//! channel and the mixer port exclusively. Shared room state is only read
//! through short registry calls, and cross-task requests (mute, kick,
//! whisper, volume) arrive through the participant's
//! [`ParticipantControl`], which the loop polls once per wake-up.
//!
//! Each wake-up is the first of: an inbound channel frame, a mixed frame
//! from the port, the poll tick, or shutdown. After every wake-up the loop
//! runs the poll steps in a fixed order:
//!
//! 1. wait-for-marked deadline
//! 2. marked present/absent transitions (hold, prompts, reattach)
//! 3. music on hold while alone
//! 4. leave when the last marked participant left
//! 5. mute reconciliation against the port's talk bit
//! 6. staged whisper
//! 7. kick
//! 8. hangup and transport swap
//!
//! and then handles the frame that woke it.

use crate::actors::recorder::{RecordingFormat, RecordingTarget};
use crate::audio::{AudioFrame, TalkDetector, TalkState, VoiceDetector};
use crate::channel::{Channel, ChannelError, ChannelFrame, ChannelInfo, GainDirection, TransportDescriptor};
use crate::conference::{AdminFlags, ParticipantControl, RoomStatus, VolumeRequest};
use crate::errors::BridgeError;
use crate::events::{BridgeEvent, ParticipantTag};
use crate::mixer::{MixMode, MixRoomId, MixerError, MixerPort, RoomSound};
use crate::observability::metrics;
use crate::policy::{Policy, SessionFlags};
use crate::registry::{ConferenceRef, Registry};
use crate::volume::{Volume, VolumeStep};
use common::types::UserNo;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Default poll tick: one audio frame.
pub const DEFAULT_POLL_INTERVAL: Duration = crate::audio::FRAME_DURATION;

/// Default mixer port buffering, in frames.
pub const DEFAULT_AUDIO_BUFFERS: u32 = 32;

/// Builds a fresh voice detector for a session that needs one.
pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn VoiceDetector> + Send + Sync>;

/// Settings shared by every session of a bridge.
#[derive(Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub audio_buffers: u32,
    pub recording_dir: PathBuf,
    pub recording_format: RecordingFormat,
    /// Detector used for talker detection (`T`, `o`); without one those
    /// options only log a warning.
    pub voice_detector: Option<DetectorFactory>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            audio_buffers: DEFAULT_AUDIO_BUFFERS,
            recording_dir: PathBuf::from("."),
            recording_format: RecordingFormat::default(),
            voice_detector: None,
        }
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("poll_interval", &self.poll_interval)
            .field("audio_buffers", &self.audio_buffers)
            .field("recording_dir", &self.recording_dir)
            .field("recording_format", &self.recording_format)
            .field("voice_detector", &self.voice_detector.is_some())
            .finish()
    }
}

/// Why a participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The channel hung up.
    Hangup,
    /// Removed by an admin.
    Kicked,
    /// Pressed `#` with `p`.
    PoundExit,
    /// Jumped to the exit context on this digit (`X`).
    ExitContext(char),
    /// The last marked participant left (`x`).
    MarkedLeft,
    /// No marked participant arrived before the `w` deadline.
    WaitMarkedTimeout,
    /// Rejected at the door: the room is locked.
    Locked,
    /// The bridge is shutting down.
    Shutdown,
}

impl LeaveReason {
    /// Whether the call continues normally after the conference.
    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, LeaveReason::WaitMarkedTimeout | LeaveReason::Locked)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LeaveReason::Hangup => "hangup",
            LeaveReason::Kicked => "kicked",
            LeaveReason::PoundExit => "pound_exit",
            LeaveReason::ExitContext(_) => "exit_context",
            LeaveReason::MarkedLeft => "marked_left",
            LeaveReason::WaitMarkedTimeout => "wait_marked_timeout",
            LeaveReason::Locked => "locked",
            LeaveReason::Shutdown => "shutdown",
        }
    }
}

/// What a finished session reports back to admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Number the participant had, `None` when never admitted.
    pub user_no: Option<UserNo>,
    pub reason: LeaveReason,
    /// Time spent in the room.
    pub duration: Duration,
}

impl SessionOutcome {
    fn rejected(reason: LeaveReason) -> Self {
        Self {
            user_no: None,
            reason,
            duration: Duration::ZERO,
        }
    }
}

/// What woke the loop.
enum Wake {
    Shutdown,
    Inbound(Option<ChannelFrame>),
    Mixed(Result<AudioFrame, MixerError>),
    Tick,
}

/// State of one admitted participant while in the room.
pub struct ParticipantSession<'a> {
    pub(super) registry: &'a Registry,
    pub(super) conf: &'a ConferenceRef,
    pub(super) channel: &'a mut dyn Channel,
    pub(super) policy: Policy,
    pub(super) user_no: UserNo,
    pub(super) tag: ParticipantTag,
    pub(super) control: Arc<ParticipantControl>,
    pub(super) mix_room: MixRoomId,
    pub(super) port: Box<dyn MixerPort>,
    pub(super) descriptor: TransportDescriptor,
    pub(super) audio_buffers: u32,
    pub(super) talk: Volume,
    pub(super) listen: Volume,
    pub(super) detector: Option<(Box<dyn VoiceDetector>, TalkDetector)>,
    pub(super) exit_context: Option<String>,
    pub(super) wait_deadline: Option<Instant>,
    pub(super) on_hold: bool,
    pub(super) menu_active: bool,
    pub(super) last_marked: usize,
    pub(super) saved_tone_suppression: Option<bool>,
}

impl<'a> ParticipantSession<'a> {
    /// Admit the caller into `conf` and run it until it leaves.
    ///
    /// A rejected admission (locked room) is a normal outcome. Mixer and
    /// channel setup failures end only this session: the participant is
    /// removed cleanly before the error is returned.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Mixer`] or [`BridgeError::Channel`] when the
    /// participant cannot be attached or its port fails.
    #[instrument(
        skip_all,
        name = "bridge.session",
        fields(conference_id = %conf.id(), channel = %channel.name(), user_no = tracing::field::Empty)
    )]
    pub async fn run(
        registry: &'a Registry,
        conf: &'a ConferenceRef,
        channel: &'a mut dyn Channel,
        policy: Policy,
        settings: &SessionSettings,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, BridgeError> {
        let started = Instant::now();
        let info = ChannelInfo::of(&*channel);

        let admitted = match registry.admit(conf, info.clone(), policy) {
            Ok(admitted) => admitted,
            Err(BridgeError::RoomLocked(room)) => {
                info!(target: "bridge.session", conference_id = %room, "Conference locked, rejecting caller");
                metrics::record_admission("locked");
                if let Err(e) = channel.play("conf-locked", false).await {
                    debug!(target: "bridge.session", error = %e, "Could not play locked prompt");
                }
                return Ok(SessionOutcome::rejected(LeaveReason::Locked));
            }
            Err(e) => return Err(e),
        };
        metrics::record_admission("admitted");
        tracing::Span::current().record("user_no", admitted.user_no.0);
        info!(target: "bridge.session", user_no = %admitted.user_no, "Participant joined");

        if policy.has(SessionFlags::RECORD) {
            start_recording(registry, conf, &*channel, settings);
        }

        let exit_context = policy
            .has(SessionFlags::EXIT_CONTEXT)
            .then(|| {
                channel
                    .variable("MEETME_EXIT_CONTEXT")
                    .or_else(|| channel.variable("CONTEXT"))
            })
            .flatten();

        let setup = prepare_channel(channel, &policy, admitted.status).await;
        let port = match setup {
            Ok(true) => registry
                .mixer()
                .open_port(channel.transport_descriptor(), settings.audio_buffers)
                .inspect_err(|_| metrics::record_mixer_error("open_port"))
                .map_err(BridgeError::from)
                .map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(BridgeError::from(e)),
        };
        let port = match port {
            Ok(Some(port)) => port,
            Ok(None) => {
                // Hung up during the join prompts
                registry.depart(conf, admitted.user_no);
                return Ok(SessionOutcome {
                    user_no: Some(admitted.user_no),
                    reason: LeaveReason::Hangup,
                    duration: started.elapsed(),
                });
            }
            Err(e) => {
                warn!(target: "bridge.session", error = %e, "Failed to set up participant");
                registry.depart(conf, admitted.user_no);
                return Err(e);
            }
        };

        let detector = if policy.detects_talking() {
            match &settings.voice_detector {
                Some(factory) => Some((factory(), TalkDetector::new())),
                None => {
                    warn!(target: "bridge.session", "Talker detection requested but no voice detector configured");
                    None
                }
            }
        } else {
            None
        };

        let mut session = ParticipantSession {
            registry,
            conf,
            descriptor: channel.transport_descriptor(),
            channel,
            policy,
            user_no: admitted.user_no,
            tag: ParticipantTag::new(conf.id(), admitted.user_no, &info),
            control: admitted.control,
            mix_room: admitted.mix_room,
            port,
            audio_buffers: settings.audio_buffers,
            talk: Volume::default(),
            listen: Volume::default(),
            detector,
            exit_context,
            wait_deadline: policy.wait_marked_timeout().map(|t| started + t),
            on_hold: false,
            menu_active: false,
            last_marked: 0,
            saved_tone_suppression: None,
        };

        let result = match session.enter(admitted.status) {
            Ok(()) => session.run_loop(settings.poll_interval, cancel).await,
            Err(e) => Err(e),
        };
        // A hangup while an in-call prompt plays is an ordinary exit
        let result = match result {
            Err(BridgeError::Channel(ChannelError::HungUp)) => Ok(LeaveReason::Hangup),
            other => other,
        };
        session.leave().await;

        let duration = started.elapsed();
        match result {
            Ok(reason) => {
                info!(
                    target: "bridge.session",
                    reason = reason.as_str(),
                    duration_secs = duration.as_secs(),
                    "Participant left"
                );
                Ok(SessionOutcome {
                    user_no: Some(session.user_no),
                    reason,
                    duration,
                })
            }
            Err(e) => {
                warn!(target: "bridge.session", error = %e, "Session ended on error");
                Err(e)
            }
        }
    }

    /// Attach to the room and announce the arrival.
    fn enter(&mut self, status: RoomStatus) -> Result<(), BridgeError> {
        let quiet = self.policy.has(SessionFlags::QUIET);

        if !quiet && self.policy.has(SessionFlags::INTRO) && status.participants > 1 {
            self.registry
                .mixer()
                .play_to_room(self.mix_room, RoomSound::Prompt("conf-hasjoin".to_string()));
        }

        self.set_mode(self.policy.mix_mode())?;

        let waiting = self.policy.has(SessionFlags::WAIT_MARKED);
        if !quiet
            && !self.policy.has(SessionFlags::MONITOR)
            && !self.policy.is_admin()
            && (!waiting || (self.policy.is_marked() && status.marked >= 1))
        {
            self.registry.mixer().play_to_room(self.mix_room, RoomSound::Enter);
        }

        self.flush()?;

        if self.policy.has(SessionFlags::STAR_MENU) {
            let previous = self.channel.tone_suppression();
            match self.channel.set_tone_suppression(true) {
                Ok(()) => self.saved_tone_suppression = Some(previous),
                Err(e) => debug!(target: "bridge.session", error = %e, "Tone suppression not available"),
            }
        }
        Ok(())
    }

    async fn run_loop(
        &mut self,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<LeaveReason, BridgeError> {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self
                .wait_deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
            {
                info!(target: "bridge.session", "No marked participant before the deadline");
                return Ok(LeaveReason::WaitMarkedTimeout);
            }

            let Some(status) = self.registry.status(self.conf) else {
                return Err(BridgeError::ConferenceNotFound(self.conf.id().to_string()));
            };
            self.announce_waiting_users(status).await?;

            let wake = tokio::select! {
                biased;

                () = cancel.cancelled() => Wake::Shutdown,
                frame = self.channel.read_frame() => Wake::Inbound(frame),
                mixed = self.port.read() => Wake::Mixed(mixed),
                _ = ticker.tick() => Wake::Tick,
            };

            if matches!(wake, Wake::Shutdown) {
                return Ok(LeaveReason::Shutdown);
            }

            let Some(status) = self.registry.status(self.conf) else {
                return Err(BridgeError::ConferenceNotFound(self.conf.id().to_string()));
            };
            if let Some(reason) = self.poll(status).await? {
                return Ok(reason);
            }

            let outcome = match wake {
                Wake::Inbound(None) => Some(LeaveReason::Hangup),
                Wake::Inbound(Some(frame)) => self.on_inbound(frame).await?,
                Wake::Mixed(mixed) => self.on_mixed(mixed).await?,
                Wake::Tick | Wake::Shutdown => None,
            };
            if let Some(reason) = outcome {
                return Ok(reason);
            }

            self.last_marked = status.marked;
        }
    }

    /// A marked participant who waited tells the room how many are waiting.
    async fn announce_waiting_users(&mut self, status: RoomStatus) -> Result<(), BridgeError> {
        if self.policy.has(SessionFlags::QUIET)
            || !self.policy.is_marked()
            || !self.policy.has(SessionFlags::WAIT_MARKED)
            || self.last_marked != 0
            || status.marked != 1
            || status.participants <= 1
        {
            return Ok(());
        }
        let waiting = status.participants - 1;
        if let Err(e) = self.channel.say_number(waiting).await {
            return self.prompt_failure(e);
        }
        let prompt = if waiting == 1 {
            "conf-userwilljoin"
        } else {
            "conf-userswilljoin"
        };
        self.prompt(prompt, false).await?;
        Ok(())
    }

    /// Poll steps run after every wake-up.
    async fn poll(&mut self, status: RoomStatus) -> Result<Option<LeaveReason>, BridgeError> {
        let quiet = self.policy.has(SessionFlags::QUIET);
        let current_marked = status.marked;

        if self.policy.has(SessionFlags::WAIT_MARKED) {
            if current_marked == 0 {
                if self.last_marked != 0 {
                    if !quiet {
                        self.prompt("conf-leaderhasleft", false).await?;
                    }
                    if self.policy.has(SessionFlags::MARKED_EXIT) {
                        return Ok(Some(LeaveReason::MarkedLeft));
                    }
                }
                if self.policy.has(SessionFlags::MOH) && !self.on_hold {
                    self.start_hold();
                }
                if self.current_mode()? != MixMode::empty() {
                    self.set_mode(MixMode::empty())?;
                }
            } else if self.last_marked == 0 {
                debug!(target: "bridge.session", "Marked participant present, joining conference");
                self.wait_deadline = None;
                self.set_mode(self.policy_mode())?;
                if self.on_hold {
                    self.stop_hold();
                }
                if !quiet && !self.policy.is_marked() {
                    self.prompt("conf-placeintoconf", false).await?;
                    self.registry.mixer().play_to_room(self.mix_room, RoomSound::Enter);
                }
            }
        }

        if self.policy.has(SessionFlags::MOH) && !self.policy.has(SessionFlags::WAIT_MARKED) {
            if status.participants == 1 {
                if !self.on_hold {
                    self.start_hold();
                }
            } else if self.on_hold {
                self.stop_hold();
            }
        }

        if self.policy.has(SessionFlags::MARKED_EXIT) && current_marked == 0 && self.last_marked != 0 {
            return Ok(Some(LeaveReason::MarkedLeft));
        }

        self.reconcile_mute(current_marked)?;

        if self.control.flags().contains(AdminFlags::WHISPER) {
            self.deliver_whisper(status).await?;
        }

        if self.control.flags().contains(AdminFlags::KICK) {
            info!(target: "bridge.session", "Kicked from conference");
            if !quiet {
                if let Err(e) = self.prompt("conf-kicked", false).await {
                    debug!(target: "bridge.session", error = %e, "Kick notice not delivered");
                }
            }
            return Ok(Some(LeaveReason::Kicked));
        }

        if self.channel.is_hung_up() {
            return Ok(Some(LeaveReason::Hangup));
        }

        let descriptor = self.channel.transport_descriptor();
        if descriptor != self.descriptor {
            self.swap_transport(descriptor)?;
        }

        for request in self.control.drain_volume() {
            self.apply_volume(request);
        }

        Ok(None)
    }

    /// Bring the port's talk bit in line with the mute flags.
    fn reconcile_mute(&mut self, current_marked: usize) -> Result<(), BridgeError> {
        let mode = self.current_mode()?;
        let muted = self.control.is_muted();

        if muted && mode.contains(MixMode::TALK) {
            self.set_mode(mode.difference(MixMode::TALK))?;
            info!(target: "bridge.session", "Muted");
            self.publish(|participant| BridgeEvent::Mute { participant, muted: true });
        } else if !muted
            && !mode.contains(MixMode::TALK)
            && !self.policy.has(SessionFlags::MONITOR)
            && !(self.policy.has(SessionFlags::WAIT_MARKED) && current_marked == 0)
        {
            self.set_mode(mode.union(MixMode::TALK))?;
            info!(target: "bridge.session", "Unmuted");
            self.publish(|participant| BridgeEvent::Mute { participant, muted: false });
        }
        Ok(())
    }

    /// Play the staged whisper privately: the room stops reaching this
    /// participant for the duration.
    async fn deliver_whisper(&mut self, status: RoomStatus) -> Result<(), BridgeError> {
        let payload = self.control.take_whisper();
        let saved = self.current_mode()?;
        self.set_mode(saved.difference(MixMode::LISTEN))?;

        let was_on_hold = self.on_hold;
        if was_on_hold {
            self.stop_hold();
        }
        if let Some(payload) = payload {
            debug!(target: "bridge.session", prompt = %payload, "Delivering whisper");
            self.prompt(&payload, true).await?;
        }

        self.set_mode(saved)?;

        let waiting_alone = self.policy.has(SessionFlags::WAIT_MARKED) && status.marked == 0;
        let solo = !self.policy.has(SessionFlags::WAIT_MARKED) && status.participants == 1;
        if was_on_hold && self.policy.has(SessionFlags::MOH) && (waiting_alone || solo) {
            self.start_hold();
        }
        Ok(())
    }

    /// The channel moved to another transport: reopen the port on it.
    fn swap_transport(&mut self, descriptor: TransportDescriptor) -> Result<(), BridgeError> {
        debug!(
            target: "bridge.session",
            old = self.descriptor.0,
            new = descriptor.0,
            "Transport changed under the channel, reattaching"
        );
        let mode = self.current_mode()?;
        if let Err(e) = self.port.detach() {
            debug!(target: "bridge.session", error = %e, "Detach of stale port failed");
        }
        self.port.close();

        self.port = self
            .registry
            .mixer()
            .open_port(descriptor, self.audio_buffers)
            .inspect_err(|_| metrics::record_mixer_error("open_port"))?;
        self.descriptor = descriptor;
        self.set_mode(mode)?;
        self.flush()
    }

    async fn on_inbound(&mut self, frame: ChannelFrame) -> Result<Option<LeaveReason>, BridgeError> {
        match frame {
            ChannelFrame::Voice(frame) => {
                self.on_voice(frame).await;
                Ok(None)
            }
            ChannelFrame::Dtmf(digit) => self.on_dtmf(digit).await,
            ChannelFrame::Other => {
                trace!(target: "bridge.session", "Ignoring non-audio frame");
                Ok(None)
            }
        }
    }

    async fn on_voice(&mut self, frame: AudioFrame) {
        let step = self.talk.software_step();
        let frame = if step == 0 { frame } else { frame.with_volume(step) };

        if let Some((detector, talk)) = &mut self.detector {
            let silence = detector.silence_ms(&frame);
            if let Some(talking) = talk.observe(silence) {
                self.control.set_talk_state(talk.state());
                debug!(target: "bridge.session", talking, "Talking state changed");
                self.registry.events().publish(BridgeEvent::Talking {
                    participant: self.tag.clone(),
                    talking,
                });
            }
        }

        // Without a detector nothing can be gated
        let gated = match &self.detector {
            Some((_, talk)) => {
                self.policy.has(SessionFlags::OPTIMIZE_TALKER) && talk.state() != TalkState::Talking
            }
            None => false,
        };
        if !gated {
            if let Err(e) = self.port.write(&frame).await {
                metrics::record_mixer_error("write");
                debug!(target: "bridge.session", error = %e, "Dropped frame to mixer");
            }
        }
    }

    async fn on_dtmf(&mut self, digit: char) -> Result<Option<LeaveReason>, BridgeError> {
        if self.policy.has(SessionFlags::DTMF_EVENTS) {
            self.registry.events().publish(BridgeEvent::Dtmf {
                participant: self.tag.clone(),
                digit,
            });
        }

        if let Some(context) = &self.exit_context {
            if self.channel.goto_context(context, &digit.to_string()) {
                info!(target: "bridge.session", %digit, "Leaving to exit context");
                return Ok(Some(LeaveReason::ExitContext(digit)));
            }
            debug!(target: "bridge.session", %digit, %context, "No exit extension for digit");
        }

        if digit == '#' && self.policy.has(SessionFlags::POUND_EXIT) {
            return Ok(Some(LeaveReason::PoundExit));
        }

        if (digit == '*' && self.policy.has(SessionFlags::STAR_MENU)) || self.menu_active {
            self.on_menu_digit(digit).await?;
        }
        Ok(None)
    }

    async fn on_mixed(
        &mut self,
        mixed: Result<AudioFrame, MixerError>,
    ) -> Result<Option<LeaveReason>, BridgeError> {
        let frame = mixed.inspect_err(|_| metrics::record_mixer_error("read"))?;
        if self.on_hold {
            return Ok(None);
        }
        let step = self.listen.software_step();
        let frame = if step == 0 { frame } else { frame.with_volume(step) };
        match self.channel.write_frame(&frame).await {
            Ok(()) => Ok(None),
            Err(ChannelError::HungUp) => Ok(Some(LeaveReason::Hangup)),
            Err(e) => {
                warn!(target: "bridge.session", error = %e, "Unable to write frame to channel");
                Ok(None)
            }
        }
    }

    pub(super) fn apply_volume(&mut self, request: VolumeRequest) {
        let channel = &mut *self.channel;
        match request {
            VolumeRequest::Talk(direction) => self.talk.tweak(direction, |db| {
                channel.set_gain(GainDirection::Receive, db).is_ok()
            }),
            VolumeRequest::Listen(direction) => self.listen.tweak(direction, |db| {
                channel.set_gain(GainDirection::Transmit, db).is_ok()
            }),
            VolumeRequest::Reset => {
                self.talk.set(VolumeStep::NEUTRAL, |db| {
                    channel.set_gain(GainDirection::Receive, db).is_ok()
                });
                self.listen.set(VolumeStep::NEUTRAL, |db| {
                    channel.set_gain(GainDirection::Transmit, db).is_ok()
                });
            }
        }
        debug!(
            target: "bridge.session",
            ?request,
            talk = self.talk.desired().value(),
            listen = self.listen.desired().value(),
            "Volume changed"
        );
    }

    /// Detach, restore neutral gain, announce the departure and leave the
    /// participant list.
    async fn leave(&mut self) {
        if self.on_hold {
            self.stop_hold();
        }
        if let Err(e) = self.port.detach() {
            debug!(target: "bridge.session", error = %e, "Detach on leave failed");
        }
        self.port.close();

        for direction in [GainDirection::Receive, GainDirection::Transmit] {
            if let Err(e) = self.channel.set_gain(direction, 0) {
                trace!(target: "bridge.session", error = %e, "Gain reset not supported");
            }
        }
        self.talk.clear();
        self.listen.clear();
        if let Some(previous) = self.saved_tone_suppression.take() {
            if let Err(e) = self.channel.set_tone_suppression(previous) {
                trace!(target: "bridge.session", error = %e, "Tone suppression restore failed");
            }
        }

        let quiet = self.policy.has(SessionFlags::QUIET);
        if !quiet && !self.policy.has(SessionFlags::MONITOR) && !self.policy.is_admin() {
            self.registry.mixer().play_to_room(self.mix_room, RoomSound::Leave);
        }
        let others = self
            .registry
            .status(self.conf)
            .map_or(0, |s| s.participants.saturating_sub(1));
        if !quiet && self.policy.has(SessionFlags::INTRO) && others > 0 {
            self.registry
                .mixer()
                .play_to_room(self.mix_room, RoomSound::Prompt("conf-hasleft".to_string()));
        }

        self.registry.depart(self.conf, self.user_no);
    }

    // ------------------------------------------------------------------
    // Helpers shared with the menu
    // ------------------------------------------------------------------

    /// Mode the policy asks for, with the current mute applied.
    pub(super) fn policy_mode(&self) -> MixMode {
        let mode = self.policy.mix_mode();
        if self.control.is_muted() {
            mode.difference(MixMode::TALK)
        } else {
            mode
        }
    }

    /// Current attachment mode; detached reads as empty.
    pub(super) fn current_mode(&self) -> Result<MixMode, BridgeError> {
        let mode = self
            .port
            .mode()
            .inspect_err(|_| metrics::record_mixer_error("query"))?;
        Ok(mode.map_or(MixMode::empty(), |(_, mode)| mode))
    }

    pub(super) fn set_mode(&mut self, mode: MixMode) -> Result<(), BridgeError> {
        trace!(target: "bridge.session", ?mode, "Attaching");
        self.port
            .attach(self.mix_room, mode)
            .inspect_err(|_| metrics::record_mixer_error("attach"))?;
        Ok(())
    }

    pub(super) fn detach(&mut self) -> Result<(), BridgeError> {
        self.port
            .detach()
            .inspect_err(|_| metrics::record_mixer_error("attach"))?;
        Ok(())
    }

    pub(super) fn flush(&mut self) -> Result<(), BridgeError> {
        self.port.flush()?;
        Ok(())
    }

    pub(super) fn start_hold(&mut self) {
        match self.channel.start_hold() {
            Ok(()) => self.on_hold = true,
            Err(e) => warn!(target: "bridge.session", error = %e, "Unable to start music on hold"),
        }
    }

    pub(super) fn stop_hold(&mut self) {
        self.channel.stop_hold();
        self.on_hold = false;
    }

    /// Play a prompt to this participant. Missing prompts are skipped; a
    /// hangup ends the session.
    pub(super) async fn prompt(
        &mut self,
        name: &str,
        interruptible: bool,
    ) -> Result<Option<char>, BridgeError> {
        match self.channel.play(name, interruptible).await {
            Ok(digit) => Ok(digit),
            Err(e) => self.prompt_failure(e).map(|()| None),
        }
    }

    fn prompt_failure(&self, e: ChannelError) -> Result<(), BridgeError> {
        match e {
            ChannelError::HungUp => Err(BridgeError::Channel(ChannelError::HungUp)),
            other => {
                debug!(target: "bridge.session", error = %other, "Prompt skipped");
                Ok(())
            }
        }
    }

    pub(super) fn publish(&self, event: impl FnOnce(ParticipantTag) -> BridgeEvent) {
        self.registry.events().publish(event(self.tag.clone()));
    }
}

/// Join prompts and channel preparation. Returns `Ok(false)` when the
/// caller hung up during the prompts.
async fn prepare_channel(
    channel: &mut dyn Channel,
    policy: &Policy,
    status: RoomStatus,
) -> Result<bool, ChannelError> {
    match join_prompts(channel, policy, status).await {
        Ok(()) => {}
        Err(ChannelError::HungUp) => return Ok(false),
        Err(e) => debug!(target: "bridge.session", error = %e, "Join prompt skipped"),
    }
    channel.set_linear_format()?;
    Ok(true)
}

async fn join_prompts(
    channel: &mut dyn Channel,
    policy: &Policy,
    status: RoomStatus,
) -> Result<(), ChannelError> {
    if policy.has(SessionFlags::QUIET) {
        return Ok(());
    }
    let waiting = policy.has(SessionFlags::WAIT_MARKED);
    if status.participants == 1 && !waiting {
        channel.play("conf-onlyperson", false).await?;
    }
    if waiting && status.marked == 0 {
        channel.play("conf-waitforleader", false).await?;
    }

    if policy.has(SessionFlags::ANNOUNCE_COUNT) && status.participants > 1 {
        if status.participants == 2 {
            channel.play("conf-onlyone", true).await?;
        } else {
            if channel.play("conf-thereare", true).await?.is_some() {
                return Ok(());
            }
            channel.say_number(status.participants - 1).await?;
            channel.play("conf-otherinparty", true).await?;
        }
    }
    Ok(())
}

/// Start the room's recording sidecar unless one is running.
fn start_recording(
    registry: &Registry,
    conf: &ConferenceRef,
    channel: &dyn Channel,
    settings: &SessionSettings,
) {
    let format = channel
        .variable("MEETME_RECORDINGFORMAT")
        .map_or(settings.recording_format, |name| RecordingFormat::from_name(&name));
    let target = match channel.variable("MEETME_RECORDINGFILE") {
        Some(file) => RecordingTarget {
            base: PathBuf::from(file),
            format,
        },
        None => RecordingTarget::default_for(
            &settings.recording_dir,
            conf.id(),
            channel.unique_id(),
            format,
        ),
    };

    match registry.start_recording(conf, &target) {
        Ok(true) => info!(
            target: "bridge.session",
            file = %target.path().display(),
            "Started recording conference"
        ),
        Ok(false) => debug!(target: "bridge.session", "Conference already recording"),
        Err(e) => warn!(target: "bridge.session", error = %e, "Unable to start recording"),
    }
}
