//! Press/release state for keyboard keys and on-screen hold buttons.
//!
//! Both sources behave the same way: a control is "held" between its down
//! and up edge, the whole set is sampled once per tick, and losing input
//! focus releases everything at once.

use std::collections::BTreeSet;

use rcctl_types::{AbstractSignal, Direction};

/// One holdable control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Control {
    Forward,
    Backward,
    Left,
    Right,
    /// The stop key (space bar) or the on-screen stop button.
    Stop,
}

impl Control {
    /// Resolve a DOM-style `KeyboardEvent.key` name.
    ///
    /// Arrow keys and the space bar are the canonical bindings; `w a s d`
    /// are accepted as aliases for terminals without arrow-key events.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowUp" => Some(Control::Forward),
            "ArrowDown" => Some(Control::Backward),
            "ArrowLeft" => Some(Control::Left),
            "ArrowRight" => Some(Control::Right),
            " " | "Space" | "Spacebar" => Some(Control::Stop),
            other if other.len() == 1 => match other.to_ascii_lowercase().as_str() {
                "w" => Some(Control::Forward),
                "s" => Some(Control::Backward),
                "a" => Some(Control::Left),
                "d" => Some(Control::Right),
                _ => None,
            },
            _ => None,
        }
    }

    /// Resolve an on-screen button identifier (`F`, `forward`, …).
    pub fn from_button(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "f" | "forward" | "up" => Some(Control::Forward),
            "b" | "backward" | "back" | "down" => Some(Control::Backward),
            "l" | "left" => Some(Control::Left),
            "r" | "right" => Some(Control::Right),
            "s" | "stop" => Some(Control::Stop),
            _ => None,
        }
    }

    fn direction(self) -> Option<Direction> {
        match self {
            Control::Forward => Some(Direction::Forward),
            Control::Backward => Some(Direction::Backward),
            Control::Left => Some(Direction::Left),
            Control::Right => Some(Direction::Right),
            Control::Stop => None,
        }
    }
}

/// Set of currently held controls.
#[derive(Debug, Clone, Default)]
pub struct HeldControls {
    held: BTreeSet<Control>,
}

impl HeldControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, control: Control) {
        self.held.insert(control);
    }

    /// Releasing a control that is not held is a no-op.
    pub fn release(&mut self, control: Control) {
        self.held.remove(&control);
    }

    /// Force-release every control (window blur, device unplugged).
    pub fn clear(&mut self) {
        self.held.clear();
    }

    pub fn is_held(&self, control: Control) -> bool {
        self.held.contains(&control)
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Snapshot the held set as a signal carrying `speed_percent`.
    pub fn sample(&self, speed_percent: Option<u8>) -> AbstractSignal {
        AbstractSignal {
            directions: self.held.iter().filter_map(|c| c.direction()).collect(),
            stop: self.is_held(Control::Stop),
            speed_percent,
        }
    }

    /// Names of the held controls, for the "Pressed:" HUD line.
    pub fn describe(&self) -> Vec<&'static str> {
        self.held
            .iter()
            .map(|c| match c {
                Control::Forward => "Up",
                Control::Backward => "Down",
                Control::Left => "Left",
                Control::Right => "Right",
                Control::Stop => "Space",
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_resolve() {
        assert_eq!(Control::from_key("ArrowUp"), Some(Control::Forward));
        assert_eq!(Control::from_key("ArrowRight"), Some(Control::Right));
        assert_eq!(Control::from_key(" "), Some(Control::Stop));
        assert_eq!(Control::from_key("W"), Some(Control::Forward));
        assert_eq!(Control::from_key("d"), Some(Control::Right));
        assert_eq!(Control::from_key("Enter"), None);
        assert_eq!(Control::from_key("x"), None);
    }

    #[test]
    fn button_ids_resolve_case_insensitively() {
        assert_eq!(Control::from_button("F"), Some(Control::Forward));
        assert_eq!(Control::from_button("Backward"), Some(Control::Backward));
        assert_eq!(Control::from_button(" stop "), Some(Control::Stop));
        assert_eq!(Control::from_button("jump"), None);
    }

    #[test]
    fn sample_reflects_held_set() {
        let mut held = HeldControls::new();
        held.press(Control::Forward);
        held.press(Control::Left);
        let sig = held.sample(Some(60));
        assert!(sig.directions.contains(&Direction::Forward));
        assert!(sig.directions.contains(&Direction::Left));
        assert!(!sig.stop);
        assert_eq!(sig.speed_percent, Some(60));

        held.release(Control::Forward);
        let sig = held.sample(None);
        assert_eq!(sig.directions.len(), 1);
        assert!(sig.directions.contains(&Direction::Left));
    }

    #[test]
    fn stop_control_sets_stop_flag_not_direction() {
        let mut held = HeldControls::new();
        held.press(Control::Stop);
        let sig = held.sample(None);
        assert!(sig.stop);
        assert!(sig.directions.is_empty());
    }

    #[test]
    fn clear_releases_everything() {
        let mut held = HeldControls::new();
        held.press(Control::Forward);
        held.press(Control::Stop);
        held.clear();
        assert!(held.is_empty());
        assert_eq!(held.sample(None), AbstractSignal::idle());
    }

    #[test]
    fn releasing_unheld_control_is_noop() {
        let mut held = HeldControls::new();
        held.release(Control::Right);
        assert!(held.is_empty());
    }

    #[test]
    fn describe_lists_hud_names() {
        let mut held = HeldControls::new();
        held.press(Control::Forward);
        held.press(Control::Stop);
        assert_eq!(held.describe(), vec!["Up", "Space"]);
    }
}
