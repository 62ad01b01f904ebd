//! Keyboard input encoding.
//!
//! Maps logical key events coming from the embedding application to the
//! byte sequences a terminal program expects. Events that carry committed
//! literal text (input-method composition, plain typing) bypass the symbolic
//! table and are written as raw UTF-8. Ctrl+Shift+V and Ctrl+Shift+C are
//! reserved: the encoder produces no bytes for them and instead asks the
//! host to paste or copy.

use bitflags::bitflags;

use crate::term::state::TermModes;

bitflags! {
    /// Modifier keys held during a key event.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

/// Symbolic key identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    /// Function keys F1..=F12.
    F(u8),
}

/// A logical key event from the host.
#[derive(Clone, Debug)]
pub struct KeyInput {
    pub key: Key,
    pub mods: Modifiers,
    /// Committed literal text, when the event carries any.
    pub text: Option<String>,
}

impl KeyInput {
    pub fn new(key: Key, mods: Modifiers) -> Self {
        Self {
            key,
            mods,
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let key = text.chars().next().map(Key::Char).unwrap_or(Key::Escape);
        Self {
            key,
            mods: Modifiers::empty(),
            text: Some(text),
        }
    }
}

/// What the host should do with a key event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Write these bytes to the child.
    Write(Vec<u8>),
    /// Reserved paste combination; the host supplies the clipboard text.
    Paste,
    /// Reserved copy combination; the host reads the screen itself.
    Copy,
    /// Nothing to send.
    Ignored,
}

/// Stateless key-to-bytes encoder.
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a logical key event against the current terminal modes.
    pub fn encode(input: &KeyInput, modes: &TermModes) -> KeyAction {
        const RESERVED: Modifiers = Modifiers::CTRL.union(Modifiers::SHIFT);
        if input.mods == RESERVED {
            match input.key {
                Key::Char('v') | Key::Char('V') => return KeyAction::Paste,
                Key::Char('c') | Key::Char('C') => return KeyAction::Copy,
                _ => {}
            }
        }

        // Committed text bypasses the symbolic table entirely.
        if let Some(text) = &input.text {
            if !text.is_empty() && !input.mods.intersects(Modifiers::CTRL | Modifiers::ALT) {
                return KeyAction::Write(text.as_bytes().to_vec());
            }
        }

        let mods = input.mods;
        let bytes = match input.key {
            Key::Char(ch) => Self::encode_char(ch, mods),
            Key::Enter => {
                if modes.linefeed_newline {
                    vec![0x0D, 0x0A]
                } else {
                    vec![0x0D]
                }
            }
            Key::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    vec![0x1B, 0x7F]
                } else {
                    vec![0x7F]
                }
            }
            Key::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    b"\x1b[Z".to_vec()
                } else {
                    vec![0x09]
                }
            }
            Key::Escape => vec![0x1B],
            Key::Up => Self::arrow(b'A', mods, modes),
            Key::Down => Self::arrow(b'B', mods, modes),
            Key::Right => Self::arrow(b'C', mods, modes),
            Key::Left => Self::arrow(b'D', mods, modes),
            Key::Home => Self::edit_key(b'H', mods),
            Key::End => Self::edit_key(b'F', mods),
            Key::PageUp => Self::tilde_key(5, mods),
            Key::PageDown => Self::tilde_key(6, mods),
            Key::Insert => Self::tilde_key(2, mods),
            Key::Delete => Self::tilde_key(3, mods),
            Key::F(n) => Self::function_key(n, mods),
        };

        if bytes.is_empty() {
            KeyAction::Ignored
        } else {
            KeyAction::Write(bytes)
        }
    }

    /// Text handed to the paste path is written verbatim, unescaped.
    pub fn encode_paste(text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    fn encode_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl turns letters into C0 control bytes.
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_lowercase() {
                return vec![(ch as u8) - b'a' + 1];
            } else if ch.is_ascii_uppercase() {
                return vec![(ch as u8) - b'A' + 1];
            }
            match ch {
                '@' | '`' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                ']' => return vec![0x1D],
                '^' | '~' => return vec![0x1E],
                '_' | '?' => return vec![0x1F],
                _ => {}
            }
        }

        if mods.contains(Modifiers::CTRL) && mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![0x1B, (ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
        }

        // Alt prefixes with ESC.
        if mods.contains(Modifiers::ALT) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }

    fn arrow(key: u8, mods: Modifiers, modes: &TermModes) -> Vec<u8> {
        if !mods.is_empty() {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        } else if modes.application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    fn edit_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
        }
    }

    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_code(mods)).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        let base: Vec<u8> = match n {
            1 => b"\x1bOP".to_vec(),
            2 => b"\x1bOQ".to_vec(),
            3 => b"\x1bOR".to_vec(),
            4 => b"\x1bOS".to_vec(),
            5 => b"\x1b[15~".to_vec(),
            6 => b"\x1b[17~".to_vec(),
            7 => b"\x1b[18~".to_vec(),
            8 => b"\x1b[19~".to_vec(),
            9 => b"\x1b[20~".to_vec(),
            10 => b"\x1b[21~".to_vec(),
            11 => b"\x1b[23~".to_vec(),
            12 => b"\x1b[24~".to_vec(),
            _ => return vec![],
        };

        if mods.is_empty() {
            return base;
        }

        let code = Self::modifier_code(mods);
        match n {
            1..=4 => {
                let key = base[2];
                format!("\x1b[1;{}{}", code, key as char).into_bytes()
            }
            _ => {
                let digits = String::from_utf8_lossy(&base[2..base.len() - 1]).into_owned();
                format!("\x1b[{};{}~", digits, code).into_bytes()
            }
        }
    }

    /// xterm modifier parameter: 1 + shift(1) + alt(2) + ctrl(4).
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modes() -> TermModes {
        TermModes::default()
    }

    fn write(action: KeyAction) -> Vec<u8> {
        match action {
            KeyAction::Write(bytes) => bytes,
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_and_control_chars() {
        let a = KeyInput::new(Key::Char('a'), Modifiers::empty());
        assert_eq!(write(KeyEncoder::encode(&a, &modes())), b"a".to_vec());

        let ctrl_c = KeyInput::new(Key::Char('c'), Modifiers::CTRL);
        assert_eq!(write(KeyEncoder::encode(&ctrl_c, &modes())), vec![0x03]);

        let alt_x = KeyInput::new(Key::Char('x'), Modifiers::ALT);
        assert_eq!(
            write(KeyEncoder::encode(&alt_x, &modes())),
            vec![0x1B, b'x']
        );
    }

    #[test]
    fn test_arrows_respect_application_mode() {
        let up = KeyInput::new(Key::Up, Modifiers::empty());
        assert_eq!(
            write(KeyEncoder::encode(&up, &modes())),
            b"\x1b[A".to_vec()
        );

        let mut app = modes();
        app.application_cursor = true;
        assert_eq!(write(KeyEncoder::encode(&up, &app)), b"\x1bOA".to_vec());

        let ctrl_up = KeyInput::new(Key::Up, Modifiers::CTRL);
        assert_eq!(
            write(KeyEncoder::encode(&ctrl_up, &modes())),
            b"\x1b[1;5A".to_vec()
        );
    }

    #[test]
    fn test_function_and_edit_keys() {
        let f1 = KeyInput::new(Key::F(1), Modifiers::empty());
        assert_eq!(write(KeyEncoder::encode(&f1, &modes())), b"\x1bOP".to_vec());

        let f5 = KeyInput::new(Key::F(5), Modifiers::empty());
        assert_eq!(
            write(KeyEncoder::encode(&f5, &modes())),
            b"\x1b[15~".to_vec()
        );

        let shift_f5 = KeyInput::new(Key::F(5), Modifiers::SHIFT);
        assert_eq!(
            write(KeyEncoder::encode(&shift_f5, &modes())),
            b"\x1b[15;2~".to_vec()
        );

        let del = KeyInput::new(Key::Delete, Modifiers::empty());
        assert_eq!(
            write(KeyEncoder::encode(&del, &modes())),
            b"\x1b[3~".to_vec()
        );
    }

    #[test]
    fn test_literal_text_bypasses_table() {
        let ime = KeyInput::text("日本語");
        assert_eq!(
            write(KeyEncoder::encode(&ime, &modes())),
            "日本語".as_bytes().to_vec()
        );
    }

    #[test]
    fn test_reserved_combinations() {
        let paste = KeyInput::new(Key::Char('v'), Modifiers::CTRL | Modifiers::SHIFT);
        assert_eq!(KeyEncoder::encode(&paste, &modes()), KeyAction::Paste);

        let copy = KeyInput::new(Key::Char('c'), Modifiers::CTRL | Modifiers::SHIFT);
        assert_eq!(KeyEncoder::encode(&copy, &modes()), KeyAction::Copy);
    }

    #[test]
    fn test_paste_is_verbatim() {
        let text = "line1\nline2\x1b[31m";
        assert_eq!(KeyEncoder::encode_paste(text), text.as_bytes().to_vec());
    }

    #[test]
    fn test_enter_linefeed_mode() {
        let enter = KeyInput::new(Key::Enter, Modifiers::empty());
        assert_eq!(write(KeyEncoder::encode(&enter, &modes())), vec![0x0D]);

        let mut nl = modes();
        nl.linefeed_newline = true;
        assert_eq!(
            write(KeyEncoder::encode(&enter, &nl)),
            vec![0x0D, 0x0A]
        );
    }
}
