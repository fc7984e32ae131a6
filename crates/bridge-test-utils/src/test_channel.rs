//! Scripted call leg for bridge tests.
//!
//! A [`TestChannel`] is handed to the code under test; the matching
//! [`ChannelHandle`] stays with the test to feed frames in and inspect
//! what the bridge did to the call (prompts, gains, hold, dialplan jumps).
//!
//! Prompts play instantly. Digit collection answers from a queue of
//! scripted entries, and interruptible prompts return queued interrupt
//! digits.
//!
//! # Example
//!
//! ```rust,ignore
//! use bridge_test_utils::TestChannel;
//!
//! let channel = TestChannel::new("SIP/alice-0001")
//!     .with_digits(["600", "1234"])
//!     .with_variable("MEETME_EXIT_CONTEXT", "exit");
//! let handle = channel.handle();
//!
//! // Hand `channel` to the bridge, then:
//! handle.send_dtmf('1');
//! assert!(handle.prompts().contains(&"conf-getpin".to_string()));
//! ```

use async_trait::async_trait;
use meetme_bridge::audio::AudioFrame;
use meetme_bridge::channel::{
    CallerId, Channel, ChannelError, ChannelFrame, GainDirection, TransportDescriptor,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct ChannelState {
    answered: bool,
    hung_up: bool,
    linear: bool,
    prompts: Vec<String>,
    said: Vec<String>,
    digit_answers: VecDeque<String>,
    interrupts: VecDeque<char>,
    missing_prompts: HashSet<String>,
    hardware_gain: bool,
    gains: Vec<(GainDirection, i8)>,
    tone_suppression: bool,
    holds_started: usize,
    on_hold: bool,
    goto_targets: HashSet<(String, String)>,
    gotos: Vec<(String, String)>,
    variables: HashMap<String, String>,
    written: usize,
    transport: u64,
}

/// A call leg driven by a test.
#[derive(Debug)]
pub struct TestChannel {
    name: String,
    unique_id: String,
    caller_id: CallerId,
    frames: mpsc::UnboundedReceiver<ChannelFrame>,
    sender: mpsc::UnboundedSender<ChannelFrame>,
    state: Arc<Mutex<ChannelState>>,
}

/// Test-side view of a [`TestChannel`].
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    frames: mpsc::UnboundedSender<ChannelFrame>,
    state: Arc<Mutex<ChannelState>>,
}

impl TestChannel {
    /// Create an unanswered channel with no caller id.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let (sender, frames) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            unique_id: format!("{name}.uid"),
            caller_id: CallerId::default(),
            frames,
            sender,
            state: Arc::new(Mutex::new(ChannelState {
                transport: 1,
                ..ChannelState::default()
            })),
        }
    }

    #[must_use]
    pub fn with_caller_id(mut self, number: &str, name: &str) -> Self {
        self.caller_id = CallerId::new(Some(number), Some(name));
        self
    }

    /// Queue answers for `collect_digits`, one per call.
    #[must_use]
    pub fn with_digits<I, S>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .digit_answers
            .extend(answers.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_variable(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .variables
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Make `exten` in `context` a valid dialplan target.
    #[must_use]
    pub fn with_goto_target(self, context: &str, exten: &str) -> Self {
        self.state
            .lock()
            .goto_targets
            .insert((context.to_string(), exten.to_string()));
        self
    }

    /// Let the driver apply gain; by default software gain is needed.
    #[must_use]
    pub fn with_hardware_gain(self) -> Self {
        self.state.lock().hardware_gain = true;
        self
    }

    /// Make `prompt` fail to play as if the sound file were missing.
    #[must_use]
    pub fn with_missing_prompt(self, prompt: &str) -> Self {
        self.state.lock().missing_prompts.insert(prompt.to_string());
        self
    }

    /// Start out answered.
    #[must_use]
    pub fn answered(self) -> Self {
        self.state.lock().answered = true;
        self
    }

    /// Handle for the test to drive and inspect this channel.
    #[must_use]
    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            frames: self.sender.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl Channel for TestChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn caller_id(&self) -> CallerId {
        self.caller_id.clone()
    }

    fn is_up(&self) -> bool {
        self.state.lock().answered
    }

    async fn answer(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.hung_up {
            return Err(ChannelError::HungUp);
        }
        state.answered = true;
        Ok(())
    }

    fn set_linear_format(&mut self) -> Result<(), ChannelError> {
        self.state.lock().linear = true;
        Ok(())
    }

    async fn read_frame(&mut self) -> Option<ChannelFrame> {
        if self.state.lock().hung_up {
            return None;
        }
        self.frames.recv().await
    }

    async fn write_frame(&mut self, _frame: &AudioFrame) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.hung_up {
            return Err(ChannelError::HungUp);
        }
        state.written += 1;
        Ok(())
    }

    fn set_gain(&mut self, direction: GainDirection, db: i8) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if !state.hardware_gain {
            return Err(ChannelError::Unsupported("gain"));
        }
        state.gains.push((direction, db));
        Ok(())
    }

    fn tone_suppression(&self) -> bool {
        self.state.lock().tone_suppression
    }

    fn set_tone_suppression(&mut self, enabled: bool) -> Result<(), ChannelError> {
        self.state.lock().tone_suppression = enabled;
        Ok(())
    }

    fn transport_descriptor(&self) -> TransportDescriptor {
        TransportDescriptor(self.state.lock().transport)
    }

    fn is_hung_up(&self) -> bool {
        self.state.lock().hung_up
    }

    async fn play(&mut self, prompt: &str, interruptible: bool) -> Result<Option<char>, ChannelError> {
        let mut state = self.state.lock();
        if state.hung_up {
            return Err(ChannelError::HungUp);
        }
        if state.missing_prompts.contains(prompt) {
            return Err(ChannelError::PromptMissing(prompt.to_string()));
        }
        state.prompts.push(prompt.to_string());
        Ok(if interruptible {
            state.interrupts.pop_front()
        } else {
            None
        })
    }

    async fn say_number(&mut self, number: usize) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.hung_up {
            return Err(ChannelError::HungUp);
        }
        state.said.push(number.to_string());
        Ok(())
    }

    async fn say_digits(&mut self, digits: &str) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.hung_up {
            return Err(ChannelError::HungUp);
        }
        state.said.push(digits.to_string());
        Ok(())
    }

    async fn collect_digits(
        &mut self,
        prompt: &str,
        max: usize,
        _timeout: Duration,
    ) -> Result<String, ChannelError> {
        let mut state = self.state.lock();
        if state.hung_up {
            return Err(ChannelError::HungUp);
        }
        state.prompts.push(prompt.to_string());
        match state.digit_answers.pop_front() {
            Some(answer) => Ok(answer.chars().take(max).collect()),
            // Nothing scripted: the caller stopped typing
            None => Ok(String::new()),
        }
    }

    fn start_hold(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        state.holds_started += 1;
        state.on_hold = true;
        Ok(())
    }

    fn stop_hold(&mut self) {
        self.state.lock().on_hold = false;
    }

    fn goto_context(&mut self, context: &str, exten: &str) -> bool {
        let mut state = self.state.lock();
        let target = (context.to_string(), exten.to_string());
        let found = state.goto_targets.contains(&target);
        if found {
            state.gotos.push(target);
        }
        found
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.state.lock().variables.get(name).cloned()
    }
}

impl ChannelHandle {
    pub fn send_voice(&self, frame: AudioFrame) {
        let _ = self.frames.send(ChannelFrame::Voice(frame));
    }

    pub fn send_dtmf(&self, digit: char) {
        let _ = self.frames.send(ChannelFrame::Dtmf(digit));
    }

    /// Hang the call up; the bridge notices on its next poll.
    pub fn hang_up(&self) {
        self.state.lock().hung_up = true;
    }

    /// Queue a digit pressed during the next interruptible prompt.
    pub fn press_during_prompt(&self, digit: char) {
        self.state.lock().interrupts.push_back(digit);
    }

    /// Queue another `collect_digits` answer.
    pub fn push_digits(&self, answer: &str) {
        self.state.lock().digit_answers.push_back(answer.to_string());
    }

    /// Move the channel to a different transport.
    pub fn set_transport(&self, descriptor: u64) {
        self.state.lock().transport = descriptor;
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().prompts.clone()
    }

    /// Whether `prompt` has been played at least once.
    #[must_use]
    pub fn heard(&self, prompt: &str) -> bool {
        self.state.lock().prompts.iter().any(|p| p == prompt)
    }

    /// Numbers and digit strings spoken to the caller.
    #[must_use]
    pub fn said(&self) -> Vec<String> {
        self.state.lock().said.clone()
    }

    #[must_use]
    pub fn gains(&self) -> Vec<(GainDirection, i8)> {
        self.state.lock().gains.clone()
    }

    #[must_use]
    pub fn holds_started(&self) -> usize {
        self.state.lock().holds_started
    }

    #[must_use]
    pub fn is_on_hold(&self) -> bool {
        self.state.lock().on_hold
    }

    #[must_use]
    pub fn gotos(&self) -> Vec<(String, String)> {
        self.state.lock().gotos.clone()
    }

    #[must_use]
    pub fn frames_written(&self) -> usize {
        self.state.lock().written
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.state.lock().answered
    }

    #[must_use]
    pub fn is_linear(&self) -> bool {
        self.state.lock().linear
    }

    #[must_use]
    pub fn tone_suppression(&self) -> bool {
        self.state.lock().tone_suppression
    }
}
