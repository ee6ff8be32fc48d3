//! `rcctl-input` – The Input Normalizer
//!
//! Collapses heterogeneous, source-specific operator input into a uniform
//! [`AbstractSignal`][rcctl_types::AbstractSignal] that the command arbiter
//! can reason about without knowing which modality produced it.
//!
//! # Modules
//!
//! - [`held`] – [`HeldControls`][held::HeldControls]: press/release state for
//!   keyboard keys and on-screen hold buttons, sampled once per tick.
//! - [`vocabulary`] – fixed word lists mapping speech utterances and pose
//!   classifier labels to a single directional token or stop.
//! - [`speed`] – [`SpeedControl`][speed::SpeedControl]: clamps and quantises
//!   the speed slider to an integer percentage.
//! - [`normalizer`] – [`Normalizer`][normalizer::Normalizer]: owns the active
//!   [`InputMode`][normalizer::InputMode] and turns every
//!   [`InputEvent`][normalizer::InputEvent] into at most one signal.
//!
//! Nothing in this crate blocks or returns an error: malformed input simply
//! produces no signal.

pub mod held;
pub mod normalizer;
pub mod speed;
pub mod vocabulary;

pub use held::{Control, HeldControls};
pub use normalizer::{InputEvent, InputMode, Normalizer, NormalizerConfig};
pub use speed::SpeedControl;
pub use vocabulary::{classify_pose, classify_utterance, Token};
