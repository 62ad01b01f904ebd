//! VT sequence decoder.
//!
//! Consumes the child's raw output stream byte by byte and drives
//! [`TerminalState`]. The decoder understands the xterm-256/truecolor
//! vocabulary: cursor movement, SGR, erase and line operations, scroll
//! regions, window title, bell, and cursor visibility/blink toggles.
//! UTF-8 is assembled incrementally, so multi-byte characters split across
//! read chunks decode correctly.

use super::state::{index_to_rgb, AttrFlags, Color, TerminalState};

/// A reply that must be written back to the child's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Primary device attributes (VT220).
    DeviceAttributes,
    /// Secondary device attributes.
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

#[derive(Clone, Copy, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC seen inside an OSC string, waiting for the ST backslash.
    EscapeInOsc,
}

/// Escape-sequence state machine.
#[derive(Default)]
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc_bytes: Vec<u8>,
    /// Partial UTF-8 sequence carried across chunks.
    utf8: Vec<u8>,
    utf8_len: usize,
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            ..Self::default()
        }
    }

    /// Feed a chunk of raw output, collecting any replies for the child.
    pub fn advance(
        &mut self,
        term: &mut TerminalState,
        bytes: &[u8],
        responses: &mut Vec<Response>,
    ) {
        for &byte in bytes {
            if let Some(response) = self.feed(byte, term) {
                responses.push(response);
            }
        }
    }

    /// Feed a single byte.
    pub fn feed(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        // An interrupted multi-byte character is dropped, not misdecoded.
        if !self.utf8.is_empty() && (byte < 0x80 || byte >= 0xC0) {
            tracing::debug!("discarding incomplete UTF-8 sequence");
            self.utf8.clear();
        }

        // C0 controls act from any state except inside OSC strings.
        if byte < 0x20
            && self.state != ParserState::OscString
            && self.state != ParserState::EscapeInOsc
        {
            match byte {
                0x1B => self.enter_escape(),
                0x07 => term.bell(),
                0x08 => term.backspace(),
                0x09 => term.horizontal_tab(),
                0x0A | 0x0B | 0x0C => term.linefeed(),
                0x0D => term.carriage_return(),
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => self.ground(byte, term),
            ParserState::Escape => self.escape(byte, term),
            ParserState::EscapeIntermediate => self.escape_intermediate(byte),
            ParserState::CsiEntry => self.csi_entry(byte, term),
            ParserState::CsiParam => self.csi_param(byte, term),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, term),
            ParserState::OscString => self.osc(byte, term),
            ParserState::EscapeInOsc => self.escape_in_osc(byte, term),
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        if (0x20..0x7F).contains(&byte) {
            term.put_char(byte as char);
        } else if byte >= 0x80 {
            self.utf8_continue(byte, term);
        }
        // 0x7F (DEL) is ignored.
        None
    }

    fn utf8_continue(&mut self, byte: u8, term: &mut TerminalState) {
        if self.utf8.is_empty() {
            self.utf8_len = match byte {
                b if b & 0xE0 == 0xC0 => 2,
                b if b & 0xF0 == 0xE0 => 3,
                b if b & 0xF8 == 0xF0 => 4,
                _ => {
                    tracing::debug!(byte, "stray UTF-8 continuation byte");
                    return;
                }
            };
        }
        self.utf8.push(byte);
        if self.utf8.len() == self.utf8_len {
            if let Ok(s) = std::str::from_utf8(&self.utf8) {
                for ch in s.chars() {
                    term.put_char(ch);
                }
            } else {
                tracing::debug!("invalid UTF-8 sequence in output stream");
            }
            self.utf8.clear();
        }
    }

    fn escape(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc_bytes.clear();
            }
            b'7' => {
                term.save_cursor();
                self.state = ParserState::Ground;
            }
            b'8' => {
                term.restore_cursor();
                self.state = ParserState::Ground;
            }
            b'D' => {
                term.index();
                self.state = ParserState::Ground;
            }
            b'E' => {
                term.carriage_return();
                term.linefeed();
                self.state = ParserState::Ground;
            }
            b'M' => {
                term.reverse_index();
                self.state = ParserState::Ground;
            }
            b'c' => {
                term.reset();
                self.state = ParserState::Ground;
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn escape_intermediate(&mut self, byte: u8) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            _ => {
                // Final byte; charset designations are ignored.
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_entry(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = ParserState::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' => {
                self.intermediates.push(byte);
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => return self.execute_csi(byte, term),
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_param(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
            }
            // Subparameter colons are treated as regular separators.
            b';' | b':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                return self.execute_csi(byte, term);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_intermediate(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
                None
            }
            0x40..=0x7E => self.execute_csi(byte, term),
            _ => {
                self.state = ParserState::Ground;
                None
            }
        }
    }

    fn osc(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            0x07 => {
                self.execute_osc(term);
                self.state = ParserState::Ground;
            }
            0x1B => {
                self.state = ParserState::EscapeInOsc;
            }
            0x9C => {
                self.execute_osc(term);
                self.state = ParserState::Ground;
            }
            _ => {
                self.osc_bytes.push(byte);
            }
        }
        None
    }

    fn escape_in_osc(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        if byte == b'\\' {
            self.execute_osc(term);
            self.state = ParserState::Ground;
            None
        } else {
            // Not ST; terminate the OSC and treat this as a new sequence.
            self.execute_osc(term);
            self.enter_escape();
            self.escape(byte, term)
        }
    }

    fn execute_osc(&mut self, term: &mut TerminalState) {
        if let Some(pos) = self.osc_bytes.iter().position(|&b| b == b';') {
            let code = String::from_utf8_lossy(&self.osc_bytes[..pos]);
            // Payloads are UTF-8; decode after the raw bytes are complete.
            let text = String::from_utf8_lossy(&self.osc_bytes[pos + 1..]);
            match code.as_ref() {
                "0" | "1" | "2" => term.set_title(text.into_owned()),
                _ => tracing::debug!(code = %code, "ignored OSC"),
            }
        }
    }

    fn execute_csi(&mut self, final_byte: u8, term: &mut TerminalState) -> Option<Response> {
        let is_private = self.intermediates.contains(&b'?');
        let is_gt = self.intermediates.contains(&b'>');
        let params = std::mem::take(&mut self.params);
        let arg = |i: usize, default: u16| params.get(i).copied().unwrap_or(default);
        let count = arg(0, 1).max(1);

        let response = match (is_private, is_gt, final_byte) {
            (false, false, b'A') => {
                term.cursor_up(count);
                None
            }
            (false, false, b'B') => {
                term.cursor_down(count);
                None
            }
            (false, false, b'C') => {
                term.cursor_forward(count);
                None
            }
            (false, false, b'D') => {
                term.cursor_backward(count);
                None
            }
            (false, false, b'E') => {
                term.cursor_down(count);
                term.carriage_return();
                None
            }
            (false, false, b'F') => {
                term.cursor_up(count);
                term.carriage_return();
                None
            }
            (false, false, b'G') => {
                term.cursor_column(arg(0, 1));
                None
            }
            (false, false, b'H') | (false, false, b'f') => {
                term.cursor_position(arg(0, 1), arg(1, 1));
                None
            }
            (false, false, b'd') => {
                term.cursor_row(arg(0, 1));
                None
            }
            (false, false, b'J') => {
                term.erase_in_display(arg(0, 0));
                None
            }
            (false, false, b'K') => {
                term.erase_in_line(arg(0, 0));
                None
            }
            (false, false, b'L') => {
                term.insert_lines(count);
                None
            }
            (false, false, b'M') => {
                term.delete_lines(count);
                None
            }
            (false, false, b'@') => {
                term.insert_chars(count);
                None
            }
            (false, false, b'P') => {
                term.delete_chars(count);
                None
            }
            (false, false, b'X') => {
                term.erase_chars(count);
                None
            }
            (false, false, b'S') => {
                term.scroll_up(count);
                None
            }
            (false, false, b'T') => {
                term.scroll_down(count);
                None
            }
            (false, false, b'r') => {
                let bottom = arg(1, term.rows());
                term.set_scroll_region(arg(0, 1), bottom);
                term.cursor_position(1, 1);
                None
            }
            (false, false, b'm') => {
                self.execute_sgr(&params, term);
                None
            }
            (false, false, b's') => {
                term.save_cursor();
                None
            }
            (false, false, b'u') => {
                term.restore_cursor();
                None
            }
            (false, false, b'n') => match params.first() {
                Some(6) => {
                    let cursor = term.cursor();
                    Some(Response::CursorPosition(cursor.row + 1, cursor.col + 1))
                }
                _ => None,
            },
            (false, false, b'c') => Some(Response::DeviceAttributes),
            (false, true, b'c') => Some(Response::SecondaryDeviceAttributes),
            (true, false, b'h') => {
                for &p in &params {
                    self.set_private_mode(term, p, true);
                }
                None
            }
            (true, false, b'l') => {
                for &p in &params {
                    self.set_private_mode(term, p, false);
                }
                None
            }
            (false, false, b'h') => {
                for &p in &params {
                    match p {
                        4 => term.modes.insert_mode = true,
                        20 => term.modes.linefeed_newline = true,
                        _ => {}
                    }
                }
                None
            }
            (false, false, b'l') => {
                for &p in &params {
                    match p {
                        4 => term.modes.insert_mode = false,
                        20 => term.modes.linefeed_newline = false,
                        _ => {}
                    }
                }
                None
            }
            _ => {
                // DECSCUSR (CSI Ps SP q): odd styles blink, even are steady.
                if final_byte == b'q' && self.intermediates.contains(&b' ') {
                    let style = arg(0, 0);
                    term.set_cursor_blink(style == 0 || style % 2 == 1);
                } else {
                    tracing::debug!(
                        intermediates = ?self.intermediates,
                        ?params,
                        final_byte = %(final_byte as char),
                        "unknown CSI"
                    );
                }
                None
            }
        };

        self.state = ParserState::Ground;
        response
    }

    fn set_private_mode(&self, term: &mut TerminalState, mode: u16, enable: bool) {
        match mode {
            1 => term.modes.application_cursor = enable,
            7 => term.modes.auto_wrap = enable,
            12 => term.set_cursor_blink(enable),
            25 => term.set_cursor_visible(enable),
            1048 => {
                if enable {
                    term.save_cursor();
                } else {
                    term.restore_cursor();
                }
            }
            // Alternate screen and bracketed paste are out of scope here.
            47 | 1047 | 1049 | 2004 => {
                tracing::debug!(mode, enable, "unsupported private mode");
            }
            _ => tracing::debug!(mode, enable, "unknown private mode"),
        }
    }

    fn execute_sgr(&self, params: &[u16], term: &mut TerminalState) {
        if params.is_empty() {
            term.current_attrs.reset();
            return;
        }

        let rgb = |n: u16| {
            let (r, g, b) = index_to_rgb(n as u8);
            Color::Rgb(r, g, b)
        };

        let mut iter = params.iter();
        while let Some(&param) = iter.next() {
            match param {
                0 => term.current_attrs.reset(),
                1 => term.current_attrs.flags |= AttrFlags::BOLD,
                3 => term.current_attrs.flags |= AttrFlags::ITALIC,
                4 => term.current_attrs.flags |= AttrFlags::UNDERLINE,
                7 => term.current_attrs.flags |= AttrFlags::INVERSE,
                9 => term.current_attrs.flags |= AttrFlags::STRIKETHROUGH,

                22 => term.current_attrs.flags &= !AttrFlags::BOLD,
                23 => term.current_attrs.flags &= !AttrFlags::ITALIC,
                24 => term.current_attrs.flags &= !AttrFlags::UNDERLINE,
                27 => term.current_attrs.flags &= !AttrFlags::INVERSE,
                29 => term.current_attrs.flags &= !AttrFlags::STRIKETHROUGH,

                30..=37 => term.current_attrs.fg = rgb(param - 30),
                38 => {
                    if let Some(color) = Self::extended_color(&mut iter) {
                        term.current_attrs.fg = color;
                    }
                }
                39 => term.current_attrs.fg = Color::Default,

                40..=47 => term.current_attrs.bg = rgb(param - 40),
                48 => {
                    if let Some(color) = Self::extended_color(&mut iter) {
                        term.current_attrs.bg = color;
                    }
                }
                49 => term.current_attrs.bg = Color::Default,

                90..=97 => term.current_attrs.fg = rgb(param - 90 + 8),
                100..=107 => term.current_attrs.bg = rgb(param - 100 + 8),

                _ => {}
            }
        }
    }

    /// Parse the tail of SGR 38/48: `5;index` or `2;r;g;b`.
    fn extended_color<'a>(iter: &mut impl Iterator<Item = &'a u16>) -> Option<Color> {
        match iter.next() {
            Some(5) => {
                let index = *iter.next()?;
                let (r, g, b) = index_to_rgb(index as u8);
                Some(Color::Rgb(r, g, b))
            }
            Some(2) => {
                let r = *iter.next()? as u8;
                let g = *iter.next()? as u8;
                let b = *iter.next()? as u8;
                Some(Color::Rgb(r, g, b))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::event::{ChangeEvent, Property};
    use crate::term::state::Theme;

    fn term() -> TerminalState {
        TerminalState::new(24, 80, Theme::default(), 100)
    }

    fn feed(parser: &mut VtParser, term: &mut TerminalState, bytes: &[u8]) -> Vec<Response> {
        let mut responses = Vec::new();
        parser.advance(term, bytes, &mut responses);
        responses
    }

    #[test]
    fn test_cursor_position() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b[5;10H");
        assert_eq!(t.cursor().row, 4);
        assert_eq!(t.cursor().col, 9);
    }

    #[test]
    fn test_sgr_indexed_resolves_to_rgb() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b[31m");
        assert_eq!(t.current_attrs.fg, Color::Rgb(0xCD, 0x00, 0x00));

        feed(&mut p, &mut t, b"\x1b[38;5;196m");
        assert_eq!(t.current_attrs.fg, Color::Rgb(255, 0, 0));
    }

    #[test]
    fn test_sgr_truecolor() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b[48;2;10;20;30m");
        assert_eq!(t.current_attrs.bg, Color::Rgb(10, 20, 30));
        feed(&mut p, &mut t, b"\x1b[0m");
        assert_eq!(t.current_attrs.bg, Color::Default);
    }

    #[test]
    fn test_osc_title_emits_property() {
        let mut t = term();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = seen.clone();
        t.observe(move |ev| sink.borrow_mut().push(ev.clone()));

        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b]0;my title\x07");
        assert_eq!(t.title(), "my title");
        assert!(seen.borrow().iter().any(|ev| matches!(
            ev,
            ChangeEvent::PropertyChanged(Property::Title(t)) if t == "my title"
        )));
    }

    #[test]
    fn test_osc_title_decodes_utf8() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, "\x1b]2;端末 ✓\x07".as_bytes());
        assert_eq!(t.title(), "端末 ✓");
    }

    #[test]
    fn test_bell_event() {
        let mut t = term();
        let rang = std::rc::Rc::new(std::cell::Cell::new(false));
        let sink = rang.clone();
        t.observe(move |ev| {
            if matches!(ev, ChangeEvent::Bell) {
                sink.set(true);
            }
        });
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x07");
        assert!(rang.get());
    }

    #[test]
    fn test_cursor_visibility_toggle() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b[?25l");
        assert!(!t.cursor().visible);
        feed(&mut p, &mut t, b"\x1b[?25h");
        assert!(t.cursor().visible);
    }

    #[test]
    fn test_decscusr_blink() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b[2 q");
        assert!(!t.cursor().blink);
        feed(&mut p, &mut t, b"\x1b[1 q");
        assert!(t.cursor().blink);
    }

    #[test]
    fn test_dsr_reply() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"\x1b[3;7H");
        let responses = feed(&mut p, &mut t, b"\x1b[6n");
        assert_eq!(responses, vec![Response::CursorPosition(3, 7)]);
        assert_eq!(responses[0].to_bytes(), b"\x1b[3;7R");
    }

    #[test]
    fn test_utf8_across_chunks() {
        let mut t = term();
        let mut p = VtParser::new();
        let bytes = "日本".as_bytes();
        feed(&mut p, &mut t, &bytes[..2]);
        feed(&mut p, &mut t, &bytes[2..]);
        assert_eq!(t.row_text(0), "日本");
        assert_eq!(t.cursor().col, 4);
    }

    #[test]
    fn test_erase_and_scroll_region_sequences() {
        let mut t = term();
        let mut p = VtParser::new();
        feed(&mut p, &mut t, b"abcdef\x1b[1;3H\x1b[0K");
        assert_eq!(t.row_text(0), "ab");

        feed(&mut p, &mut t, b"\x1b[2;10r");
        // DECSTBM homes the cursor.
        assert_eq!(t.cursor().row, 0);
        assert_eq!(t.cursor().col, 0);
    }
}
