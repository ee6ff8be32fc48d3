//! Fixed vocabularies for discrete input sources.
//!
//! Speech recognisers and pose/image classifiers hand us free text; each
//! recognised utterance or inference collapses to exactly one [`Token`].
//! Anything outside the vocabulary yields `None`, which is "no signal" and
//! not the same thing as an explicit stop.

use rcctl_types::{AbstractSignal, Direction};

/// The single outcome of a discrete input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Token {
    /// Declared first so that `Ord` matches arbitration priority.
    Stop,
    Move(Direction),
}

impl Token {
    /// Convert the token into the signal it stands for.
    pub fn to_signal(self) -> AbstractSignal {
        match self {
            Token::Stop => AbstractSignal::stop(),
            Token::Move(direction) => AbstractSignal::direction(direction),
        }
    }
}

fn speech_word(word: &str) -> Option<Token> {
    match word {
        "go" | "forward" | "start" => Some(Token::Move(Direction::Forward)),
        "back" | "backward" | "reverse" => Some(Token::Move(Direction::Backward)),
        "left" => Some(Token::Move(Direction::Left)),
        "right" => Some(Token::Move(Direction::Right)),
        "stop" | "halt" | "freeze" => Some(Token::Stop),
        _ => None,
    }
}

fn pose_label(label: &str) -> Option<Token> {
    match label {
        "F" | "FORWARD" | "GO" => Some(Token::Move(Direction::Forward)),
        "B" | "BACK" | "BACKWARD" | "REVERSE" => Some(Token::Move(Direction::Backward)),
        "L" | "LEFT" => Some(Token::Move(Direction::Left)),
        "R" | "RIGHT" => Some(Token::Move(Direction::Right)),
        "S" | "STOP" | "HALT" => Some(Token::Stop),
        _ => None,
    }
}

/// Map a final speech transcript to a token.
///
/// Matching is whole-word and case-insensitive ("turn left please" → Left,
/// "leftover" → nothing).  When an utterance names several commands the one
/// with the highest arbitration priority wins, so "go go stop" is a stop.
pub fn classify_utterance(utterance: &str) -> Option<Token> {
    utterance
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter_map(speech_word)
        .min()
}

/// Map a classifier inference `(label, confidence)` to a token.
///
/// Inferences below `min_confidence`, with a non-finite confidence, or with a
/// label outside the vocabulary yield `None`.
pub fn classify_pose(label: &str, confidence: f32, min_confidence: f32) -> Option<Token> {
    if !confidence.is_finite() || confidence < min_confidence {
        return None;
    }
    pose_label(label.trim().to_uppercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_vocabulary_maps_each_word() {
        assert_eq!(classify_utterance("go"), Some(Token::Move(Direction::Forward)));
        assert_eq!(classify_utterance("Forward"), Some(Token::Move(Direction::Forward)));
        assert_eq!(classify_utterance("reverse"), Some(Token::Move(Direction::Backward)));
        assert_eq!(classify_utterance("turn left"), Some(Token::Move(Direction::Left)));
        assert_eq!(classify_utterance("turn right"), Some(Token::Move(Direction::Right)));
        assert_eq!(classify_utterance("HALT!"), Some(Token::Stop));
        assert_eq!(classify_utterance("freeze"), Some(Token::Stop));
    }

    #[test]
    fn speech_requires_whole_words() {
        assert_eq!(classify_utterance("leftover pizza"), None);
        assert_eq!(classify_utterance("bright lights"), None);
        assert_eq!(classify_utterance("gopher"), None);
    }

    #[test]
    fn unrecognised_utterance_is_no_signal() {
        assert_eq!(classify_utterance(""), None);
        assert_eq!(classify_utterance("hello robot"), None);
    }

    #[test]
    fn stop_wins_inside_one_utterance() {
        assert_eq!(classify_utterance("go go stop"), Some(Token::Stop));
        assert_eq!(
            classify_utterance("right then back"),
            Some(Token::Move(Direction::Backward))
        );
    }

    #[test]
    fn pose_labels_are_trimmed_and_upper_cased() {
        assert_eq!(classify_pose(" f ", 0.9, 0.5), Some(Token::Move(Direction::Forward)));
        assert_eq!(classify_pose("Left", 0.9, 0.5), Some(Token::Move(Direction::Left)));
        assert_eq!(classify_pose("S", 0.9, 0.5), Some(Token::Stop));
    }

    #[test]
    fn pose_below_confidence_is_no_signal() {
        assert_eq!(classify_pose("F", 0.3, 0.5), None);
        assert_eq!(classify_pose("F", f32::NAN, 0.5), None);
        assert_eq!(classify_pose("F", 0.5, 0.5), Some(Token::Move(Direction::Forward)));
    }

    #[test]
    fn pose_unknown_label_is_no_signal() {
        assert_eq!(classify_pose("IDLE", 0.99, 0.5), None);
        assert_eq!(classify_pose("", 0.99, 0.5), None);
    }

    #[test]
    fn token_to_signal() {
        assert!(Token::Stop.to_signal().stop);
        let sig = Token::Move(Direction::Right).to_signal();
        assert!(sig.directions.contains(&Direction::Right));
        assert!(!sig.stop);
    }
}
