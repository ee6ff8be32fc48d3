//! [`Normalizer`] – turns raw [`InputEvent`]s into [`AbstractSignal`]s.
//!
//! Two production styles coexist:
//!
//! * **Held-state modes** ([`InputMode::Keyboard`], [`InputMode::Pointer`])
//!   only record edges in [`Normalizer::apply`]; the signal is produced by
//!   [`Normalizer::sample`] once per sampling tick.
//! * **Discrete modes** ([`InputMode::Voice`], [`InputMode::Pose`]) produce a
//!   signal directly from the event that carried the utterance or inference.
//!
//! Focus loss is honoured in every mode and always yields a stop signal.

use std::fmt;
use std::str::FromStr;

use rcctl_types::AbstractSignal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::held::{Control, HeldControls};
use crate::speed::{DEFAULT_SPEED_STEP, SpeedControl};
use crate::vocabulary::{classify_pose, classify_utterance};

/// Default minimum classifier confidence for a pose/image inference.
pub const DEFAULT_POSE_MIN_CONFIDENCE: f32 = 0.5;

/// Which modality currently drives the vehicle.
///
/// A control session listens to exactly one modality at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Keyboard,
    Pointer,
    Voice,
    Pose,
}

impl InputMode {
    /// Modes whose state is sampled on every tick.
    pub fn is_held_state(self) -> bool {
        matches!(self, InputMode::Keyboard | InputMode::Pointer)
    }

    /// Modes that deliver a continuous frame stream and must heartbeat.
    pub fn is_streaming(self) -> bool {
        matches!(self, InputMode::Pose)
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Keyboard => f.write_str("keyboard"),
            InputMode::Pointer => f.write_str("pointer"),
            InputMode::Voice => f.write_str("voice"),
            InputMode::Pose => f.write_str("pose"),
        }
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyboard" | "keys" => Ok(InputMode::Keyboard),
            "pointer" | "buttons" => Ok(InputMode::Pointer),
            "voice" | "speech" => Ok(InputMode::Voice),
            "pose" | "image" => Ok(InputMode::Pose),
            other => Err(format!(
                "unknown input mode '{other}' (expected keyboard, pointer, voice or pose)"
            )),
        }
    }
}

/// A raw event from one of the external input collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// DOM-style `keydown` with the `KeyboardEvent.key` name.
    KeyDown(String),
    KeyUp(String),
    /// Mouse/touch down on an on-screen hold button.
    PointerDown(String),
    PointerUp(String),
    /// Window blur, device disconnect, or anything else that means the
    /// operator is no longer in control.
    FocusLost,
    /// A final speech-recognition transcript.
    Utterance(String),
    /// Top-1 result of a pose or image classifier for one frame.
    PoseFrame { label: String, confidence: f32 },
    /// Raw speed-slider reading.
    Speed(f64),
}

impl InputEvent {
    /// The mode this event belongs to, or `None` for mode-independent events.
    pub fn mode(&self) -> Option<InputMode> {
        match self {
            InputEvent::KeyDown(_) | InputEvent::KeyUp(_) => Some(InputMode::Keyboard),
            InputEvent::PointerDown(_) | InputEvent::PointerUp(_) => Some(InputMode::Pointer),
            InputEvent::Utterance(_) => Some(InputMode::Voice),
            InputEvent::PoseFrame { .. } => Some(InputMode::Pose),
            InputEvent::FocusLost | InputEvent::Speed(_) => None,
        }
    }
}

/// Tunables for [`Normalizer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerConfig {
    pub mode: InputMode,
    pub speed_step: u8,
    pub pose_min_confidence: f32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            mode: InputMode::default(),
            speed_step: DEFAULT_SPEED_STEP,
            pose_min_confidence: DEFAULT_POSE_MIN_CONFIDENCE,
        }
    }
}

/// Per-session input state.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mode: InputMode,
    held: HeldControls,
    speed_control: SpeedControl,
    speed: Option<u8>,
    pose_min_confidence: f32,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            mode: config.mode,
            held: HeldControls::new(),
            speed_control: SpeedControl::new(config.speed_step),
            speed: None,
            pose_min_confidence: config.pose_min_confidence,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Last normalised speed value, if the slider has been touched.
    pub fn speed(&self) -> Option<u8> {
        self.speed
    }

    pub fn held(&self) -> &HeldControls {
        &self.held
    }

    /// Switch modality.  Everything held is released and a focus-loss signal
    /// is returned so the vehicle stops before the new source takes over.
    pub fn set_mode(&mut self, mode: InputMode) -> AbstractSignal {
        debug!(from = %self.mode, to = %mode, "input mode switch");
        self.mode = mode;
        self.held.clear();
        AbstractSignal::focus_lost()
    }

    /// Apply one raw event.
    ///
    /// Returns a signal for discrete events and focus loss; held-state edges
    /// and speed changes return `None` and surface through [`sample`] and
    /// [`speed`].
    ///
    /// [`sample`]: Normalizer::sample
    /// [`speed`]: Normalizer::speed
    pub fn apply(&mut self, event: InputEvent) -> Option<AbstractSignal> {
        if let Some(mode) = event.mode()
            && mode != self.mode
        {
            trace!(event_mode = %mode, active = %self.mode, "ignoring input from inactive mode");
            return None;
        }

        match event {
            InputEvent::KeyDown(key) => {
                if let Some(control) = Control::from_key(&key) {
                    self.held.press(control);
                }
                None
            }
            InputEvent::KeyUp(key) => {
                if let Some(control) = Control::from_key(&key) {
                    self.held.release(control);
                }
                None
            }
            InputEvent::PointerDown(id) => {
                if let Some(control) = Control::from_button(&id) {
                    self.held.press(control);
                }
                None
            }
            InputEvent::PointerUp(id) => {
                if let Some(control) = Control::from_button(&id) {
                    self.held.release(control);
                }
                None
            }
            InputEvent::FocusLost => {
                self.held.clear();
                Some(AbstractSignal::focus_lost().with_speed(self.speed))
            }
            InputEvent::Utterance(text) => {
                classify_utterance(&text).map(|t| t.to_signal().with_speed(self.speed))
            }
            InputEvent::PoseFrame { label, confidence } => {
                classify_pose(&label, confidence, self.pose_min_confidence)
                    .map(|t| t.to_signal().with_speed(self.speed))
            }
            InputEvent::Speed(raw) => {
                if let Some(pct) = self.speed_control.normalize(raw) {
                    self.speed = Some(pct);
                }
                None
            }
        }
    }

    /// Per-tick sample.  Only held-state modes produce a signal here.
    pub fn sample(&self) -> Option<AbstractSignal> {
        self.mode
            .is_held_state()
            .then(|| self.held.sample(self.speed))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}
