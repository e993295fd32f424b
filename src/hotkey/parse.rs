//! Hotkey string parsing.
//!
//! `[modifier+]*key`, case-insensitive. Every spec resolves to both a
//! `global_hotkey` chord (exclusive registration) and a Windows virtual-key
//! code (keyboard hook), so the two strategies agree on what a string means.

use crate::error::{Result, StpError};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use std::fmt;

/// A parsed chord: required modifiers plus one main key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeySpec {
    pub modifiers: Modifiers,
    pub code: Code,
    /// Windows virtual-key code of `code`.
    pub vk: u32,
}

impl HotkeySpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let binding = spec.to_lowercase();
        let parts: Vec<&str> = binding.split('+').map(|s| s.trim()).collect();

        if binding.trim().is_empty() {
            return Err(StpError::invalid_hotkey(spec, "empty hotkey string"));
        }

        let Some((key, modifier_tokens)) = parts.split_last() else {
            return Err(StpError::invalid_hotkey(spec, "empty hotkey string"));
        };

        let mut modifiers = Modifiers::empty();
        for part in modifier_tokens {
            modifiers |= match *part {
                "ctrl" | "control" => Modifiers::CONTROL,
                "alt" | "menu" => Modifiers::ALT,
                "shift" => Modifiers::SHIFT,
                "win" | "meta" | "super" => Modifiers::SUPER,
                "" => return Err(StpError::invalid_hotkey(spec, "empty token")),
                other => {
                    return Err(StpError::invalid_hotkey(
                        spec,
                        format!("unknown modifier '{other}'"),
                    ))
                }
            };
        }

        let (code, vk) = parse_key(key)
            .ok_or_else(|| StpError::invalid_hotkey(spec, format!("unsupported key '{key}'")))?;

        Ok(Self { modifiers, code, vk })
    }

    /// The chord in `global_hotkey` form.
    pub fn to_hotkey(&self) -> HotKey {
        let modifiers = (!self.modifiers.is_empty()).then_some(self.modifiers);
        HotKey::new(modifiers, self.code)
    }

    /// True when every required modifier is in `held`; extra held
    /// modifiers do not matter.
    pub fn modifiers_satisfied(&self, held: Modifiers) -> bool {
        held.contains(self.modifiers)
    }
}

impl fmt::Display for HotkeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Modifiers::CONTROL, "ctrl"),
            (Modifiers::ALT, "alt"),
            (Modifiers::SHIFT, "shift"),
            (Modifiers::SUPER, "win"),
        ] {
            if self.modifiers.contains(flag) {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "{:?}", self.code)
    }
}

const VK_F1: u32 = 0x70;
const VK_NUMPAD0: u32 = 0x60;

fn parse_key(key: &str) -> Option<(Code, u32)> {
    if let [ch] = key.as_bytes() {
        return match *ch {
            b'a'..=b'z' => letter(*ch).map(|code| (code, u32::from(ch.to_ascii_uppercase()))),
            b'0'..=b'9' => digit(*ch).map(|code| (code, u32::from(*ch))),
            _ => None,
        };
    }

    let named = match key {
        "esc" | "escape" => (Code::Escape, 0x1B),
        "space" => (Code::Space, 0x20),
        "enter" | "return" => (Code::Enter, 0x0D),
        "tab" => (Code::Tab, 0x09),
        "backspace" => (Code::Backspace, 0x08),
        "insert" => (Code::Insert, 0x2D),
        "delete" => (Code::Delete, 0x2E),
        "home" => (Code::Home, 0x24),
        "end" => (Code::End, 0x23),
        "pageup" => (Code::PageUp, 0x21),
        "pagedown" => (Code::PageDown, 0x22),
        "left" | "arrowleft" => (Code::ArrowLeft, 0x25),
        "up" | "arrowup" => (Code::ArrowUp, 0x26),
        "right" | "arrowright" => (Code::ArrowRight, 0x27),
        "down" | "arrowdown" => (Code::ArrowDown, 0x28),
        "add" | "plus" | "kpadd" => (Code::NumpadAdd, 0x6B),
        "subtract" | "minus" | "kpsubtract" => (Code::NumpadSubtract, 0x6D),
        _ => return function_key(key).or_else(|| numpad_key(key)),
    };
    Some(named)
}

fn function_key(key: &str) -> Option<(Code, u32)> {
    let n: u32 = key.strip_prefix('f')?.parse().ok()?;
    let code = match n {
        1 => Code::F1,
        2 => Code::F2,
        3 => Code::F3,
        4 => Code::F4,
        5 => Code::F5,
        6 => Code::F6,
        7 => Code::F7,
        8 => Code::F8,
        9 => Code::F9,
        10 => Code::F10,
        11 => Code::F11,
        12 => Code::F12,
        13 => Code::F13,
        14 => Code::F14,
        15 => Code::F15,
        16 => Code::F16,
        17 => Code::F17,
        18 => Code::F18,
        19 => Code::F19,
        20 => Code::F20,
        21 => Code::F21,
        22 => Code::F22,
        23 => Code::F23,
        24 => Code::F24,
        _ => return None,
    };
    Some((code, VK_F1 + n - 1))
}

fn numpad_key(key: &str) -> Option<(Code, u32)> {
    let digit = ["numpad", "num", "kp"]
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))?;
    let n: u32 = match digit.as_bytes() {
        [d @ b'0'..=b'9'] => u32::from(d - b'0'),
        _ => return None,
    };
    let code = match n {
        0 => Code::Numpad0,
        1 => Code::Numpad1,
        2 => Code::Numpad2,
        3 => Code::Numpad3,
        4 => Code::Numpad4,
        5 => Code::Numpad5,
        6 => Code::Numpad6,
        7 => Code::Numpad7,
        8 => Code::Numpad8,
        _ => Code::Numpad9,
    };
    Some((code, VK_NUMPAD0 + n))
}

fn letter(ch: u8) -> Option<Code> {
    let code = match ch {
        b'a' => Code::KeyA,
        b'b' => Code::KeyB,
        b'c' => Code::KeyC,
        b'd' => Code::KeyD,
        b'e' => Code::KeyE,
        b'f' => Code::KeyF,
        b'g' => Code::KeyG,
        b'h' => Code::KeyH,
        b'i' => Code::KeyI,
        b'j' => Code::KeyJ,
        b'k' => Code::KeyK,
        b'l' => Code::KeyL,
        b'm' => Code::KeyM,
        b'n' => Code::KeyN,
        b'o' => Code::KeyO,
        b'p' => Code::KeyP,
        b'q' => Code::KeyQ,
        b'r' => Code::KeyR,
        b's' => Code::KeyS,
        b't' => Code::KeyT,
        b'u' => Code::KeyU,
        b'v' => Code::KeyV,
        b'w' => Code::KeyW,
        b'x' => Code::KeyX,
        b'y' => Code::KeyY,
        b'z' => Code::KeyZ,
        _ => return None,
    };
    Some(code)
}

fn digit(ch: u8) -> Option<Code> {
    let code = match ch {
        b'0' => Code::Digit0,
        b'1' => Code::Digit1,
        b'2' => Code::Digit2,
        b'3' => Code::Digit3,
        b'4' => Code::Digit4,
        b'5' => Code::Digit5,
        b'6' => Code::Digit6,
        b'7' => Code::Digit7,
        b'8' => Code::Digit8,
        b'9' => Code::Digit9,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifiers_and_function_key() {
        let spec = HotkeySpec::parse("ctrl+f1").unwrap();
        assert_eq!(spec.modifiers, Modifiers::CONTROL);
        assert_eq!(spec.code, Code::F1);
        assert_eq!(spec.vk, 0x70);

        let spec = HotkeySpec::parse(" Control + Menu + SHIFT + Super + F24 ").unwrap();
        assert_eq!(
            spec.modifiers,
            Modifiers::CONTROL | Modifiers::ALT | Modifiers::SHIFT | Modifiers::SUPER
        );
        assert_eq!(spec.vk, 0x87);
    }

    #[test]
    fn test_letters_and_digits() {
        let spec = HotkeySpec::parse("alt+Q").unwrap();
        assert_eq!(spec.code, Code::KeyQ);
        assert_eq!(spec.vk, u32::from(b'Q'));

        let spec = HotkeySpec::parse("win+7").unwrap();
        assert_eq!(spec.modifiers, Modifiers::SUPER);
        assert_eq!(spec.code, Code::Digit7);
        assert_eq!(spec.vk, u32::from(b'7'));
    }

    #[test]
    fn test_bare_key() {
        assert!(HotkeySpec::parse("pause").is_err());

        let spec = HotkeySpec::parse("escape").unwrap();
        assert!(spec.modifiers.is_empty());
        assert_eq!(spec.vk, 0x1B);
    }

    #[test]
    fn test_named_keys() {
        for (name, vk) in [
            ("esc", 0x1B),
            ("space", 0x20),
            ("return", 0x0D),
            ("tab", 0x09),
            ("backspace", 0x08),
            ("insert", 0x2D),
            ("delete", 0x2E),
            ("home", 0x24),
            ("end", 0x23),
            ("pageup", 0x21),
            ("pagedown", 0x22),
            ("left", 0x25),
            ("arrowup", 0x26),
            ("right", 0x27),
            ("down", 0x28),
        ] {
            assert_eq!(HotkeySpec::parse(&format!("ctrl+{name}")).unwrap().vk, vk, "{name}");
        }
    }

    #[test]
    fn test_numpad_aliases() {
        for alias in ["numpad3", "num3", "kp3", "NumPad3"] {
            let spec = HotkeySpec::parse(&format!("ctrl+{alias}")).unwrap();
            assert_eq!(spec.code, Code::Numpad3);
            assert_eq!(spec.vk, 0x63);
        }
        for alias in ["add", "plus", "kpadd"] {
            assert_eq!(HotkeySpec::parse(&format!("ctrl+{alias}")).unwrap().vk, 0x6B);
        }
        for alias in ["subtract", "minus", "kpsubtract"] {
            assert_eq!(HotkeySpec::parse(&format!("alt+{alias}")).unwrap().vk, 0x6D);
        }
    }

    #[test]
    fn test_invalid_specs() {
        for bad in ["", "   ", "ctrl+", "ctrl", "ctrl+f0", "ctrl+f25", "hyper+a", "ctrl++a", "ctrl+numpad10", "ctrl+ab"] {
            assert!(
                matches!(HotkeySpec::parse(bad), Err(StpError::InvalidHotkey { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_modifiers_satisfied_ignores_extra() {
        let spec = HotkeySpec::parse("ctrl+f1").unwrap();
        assert!(spec.modifiers_satisfied(Modifiers::CONTROL));
        assert!(spec.modifiers_satisfied(Modifiers::CONTROL | Modifiers::SHIFT));
        assert!(!spec.modifiers_satisfied(Modifiers::SHIFT));
        assert!(!spec.modifiers_satisfied(Modifiers::empty()));
    }

    #[test]
    fn test_to_hotkey_matches_manual_construction() {
        let spec = HotkeySpec::parse("ctrl+shift+k").unwrap();
        let expected = HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::KeyK);
        assert_eq!(spec.to_hotkey().id(), expected.id());
    }
}
