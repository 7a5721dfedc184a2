//! Trigger binding strings.
//!
//! Bindings are stored the way users type them in settings, e.g.
//! `Control+Shift+Space`, `Command+Alt+K`, `Escape`, or for pointer gestures
//! `Alt+LeftClick`. Parsing is case-insensitive; `Display` writes the
//! canonical spelling back.

use std::fmt;
use std::str::FromStr;

use crate::shared::error::OverlayError;
use crate::shared::types::{InputEvent, KeyCode, Modifiers, PointerButton};

// macOS virtual key codes (ANSI layout)
const KEY_NAMES: &[(&str, u16)] = &[
    ("A", 0x00), ("S", 0x01), ("D", 0x02), ("F", 0x03), ("H", 0x04), ("G", 0x05),
    ("Z", 0x06), ("X", 0x07), ("C", 0x08), ("V", 0x09), ("B", 0x0B), ("Q", 0x0C),
    ("W", 0x0D), ("E", 0x0E), ("R", 0x0F), ("Y", 0x10), ("T", 0x11), ("1", 0x12),
    ("2", 0x13), ("3", 0x14), ("4", 0x15), ("6", 0x16), ("5", 0x17), ("Equal", 0x18),
    ("9", 0x19), ("7", 0x1A), ("Minus", 0x1B), ("8", 0x1C), ("0", 0x1D),
    ("RightBracket", 0x1E), ("O", 0x1F), ("U", 0x20), ("LeftBracket", 0x21),
    ("I", 0x22), ("P", 0x23), ("Return", 0x24), ("L", 0x25), ("J", 0x26),
    ("Quote", 0x27), ("K", 0x28), ("Semicolon", 0x29), ("Backslash", 0x2A),
    ("Comma", 0x2B), ("Slash", 0x2C), ("N", 0x2D), ("M", 0x2E), ("Period", 0x2F),
    ("Tab", 0x30), ("Space", 0x31), ("Grave", 0x32), ("Delete", 0x33),
    ("Escape", 0x35), ("F1", 0x7A), ("F2", 0x78), ("F3", 0x63), ("F4", 0x76),
    ("F5", 0x60), ("F6", 0x61), ("F7", 0x62), ("F8", 0x64), ("F9", 0x65),
    ("F10", 0x6D), ("F11", 0x67), ("F12", 0x6F), ("F13", 0x69), ("F14", 0x6B),
    ("F15", 0x71), ("Left", 0x7B), ("Right", 0x7C), ("Down", 0x7D), ("Up", 0x7E),
];

const KEY_ALIASES: &[(&str, &str)] = &[
    ("esc", "Escape"),
    ("enter", "Return"),
    ("backspace", "Delete"),
    ("backtick", "Grave"),
];

pub fn key_code_for(name: &str) -> Option<KeyCode> {
    let canonical = KEY_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, target)| *target)
        .unwrap_or(name);

    KEY_NAMES
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(canonical))
        .map(|(_, code)| KeyCode(*code))
}

pub fn key_name(code: KeyCode) -> Option<&'static str> {
    KEY_NAMES.iter().find(|(_, c)| *c == code.0).map(|(name, _)| *name)
}

fn apply_modifier(modifiers: &mut Modifiers, token: &str) -> bool {
    match token.to_ascii_lowercase().as_str() {
        "control" | "ctrl" => modifiers.control = true,
        "alt" | "option" | "opt" => modifiers.alt = true,
        "shift" => modifiers.shift = true,
        "command" | "cmd" | "super" | "meta" => modifiers.command = true,
        _ => return false,
    }
    true
}

/// Split `A+B+C` into its modifier set and the trailing token.
fn split_binding(input: &str) -> Result<(Modifiers, String), OverlayError> {
    let tokens: Vec<&str> = input.split('+').map(str::trim).collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(OverlayError::InvalidHotkey(format!("'{}' has an empty segment", input)));
    }

    let (last, leading) = tokens
        .split_last()
        .ok_or_else(|| OverlayError::InvalidHotkey("empty binding".to_string()))?;

    let mut modifiers = Modifiers::default();
    for token in leading {
        if !apply_modifier(&mut modifiers, token) {
            return Err(OverlayError::InvalidHotkey(format!("unknown modifier '{}' in '{}'", token, input)));
        }
    }
    Ok((modifiers, last.to_string()))
}

fn write_modifiers(f: &mut fmt::Formatter<'_>, modifiers: &Modifiers) -> fmt::Result {
    if modifiers.control {
        f.write_str("Control+")?;
    }
    if modifiers.alt {
        f.write_str("Alt+")?;
    }
    if modifiers.shift {
        f.write_str("Shift+")?;
    }
    if modifiers.command {
        f.write_str("Command+")?;
    }
    Ok(())
}

/// Modifier set plus one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: KeyCode,
}

impl Chord {
    pub fn matches(&self, event: &InputEvent) -> bool {
        match event {
            InputEvent::KeyDown { key, modifiers } => *key == self.key && *modifiers == self.modifiers,
            InputEvent::PointerDown { .. } => false,
        }
    }
}

impl FromStr for Chord {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (modifiers, key) = split_binding(s)?;
        let key = key_code_for(&key)
            .ok_or_else(|| OverlayError::InvalidHotkey(format!("unknown key '{}' in '{}'", key, s)))?;
        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_modifiers(f, &self.modifiers)?;
        match key_name(self.key) {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:02X}", self.key.0),
        }
    }
}

/// Modifier set plus a pointer button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerGesture {
    pub modifiers: Modifiers,
    pub button: PointerButton,
}

impl PointerGesture {
    pub fn matches(&self, event: &InputEvent) -> bool {
        match event {
            InputEvent::PointerDown { button, modifiers, .. } => {
                *button == self.button && *modifiers == self.modifiers
            }
            InputEvent::KeyDown { .. } => false,
        }
    }
}

impl FromStr for PointerGesture {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (modifiers, button) = split_binding(s)?;
        let button = match button.to_ascii_lowercase().as_str() {
            "leftclick" | "click" => PointerButton::Left,
            "rightclick" => PointerButton::Right,
            "middleclick" => PointerButton::Middle,
            other => {
                return Err(OverlayError::InvalidHotkey(format!("unknown pointer action '{}' in '{}'", other, s)))
            }
        };
        // A bare click would fire on every click in every app
        if modifiers.is_empty() {
            return Err(OverlayError::InvalidHotkey(format!("pointer gesture '{}' needs a modifier", s)));
        }
        Ok(Self { modifiers, button })
    }
}

impl fmt::Display for PointerGesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_modifiers(f, &self.modifiers)?;
        f.write_str(match self.button {
            PointerButton::Left => "LeftClick",
            PointerButton::Right => "RightClick",
            PointerButton::Middle => "MiddleClick",
        })
    }
}
