//! VT sequence parser
//!
//! Parses ANSI/VT escape sequences and UTF-8 text and updates terminal state.

use tracing::trace;

use super::state::TerminalState;
use crate::core::color::ColorId;
use crate::core::screen::{AttrFlags, ScreenCallbacks};

const OSC_MAX_LEN: usize = 1024;

/// Reply the remote side asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// ESC [ row ; col R
    CursorPosition(u16, u16),
    /// ESC [ 0 n
    StatusOk,
    DeviceAttributes,
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            // VT220
            Response::DeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc: Vec<u8>,
    utf8: [u8; 4],
    utf8_len: usize,
    utf8_need: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    /// ESC inside OSC, waiting for the backslash of ST
    EscapeInOsc,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc: Vec::new(),
            utf8: [0; 4],
            utf8_len: 0,
            utf8_need: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed a single byte to the parser
    pub fn feed(
        &mut self,
        byte: u8,
        state: &mut TerminalState,
        cb: &mut dyn ScreenCallbacks,
    ) -> Option<Response> {
        // an unfinished UTF-8 sequence interrupted by anything but a continuation byte
        if self.utf8_need > 0 && !(0x80..=0xBF).contains(&byte) {
            self.utf8_need = 0;
            self.utf8_len = 0;
            state.put_char(char::REPLACEMENT_CHARACTER, cb);
        }

        // C0 controls act anywhere outside OSC
        if byte < 0x20
            && self.state != ParserState::OscString
            && self.state != ParserState::EscapeInOsc
        {
            match byte {
                0x1B => self.enter_escape(),
                0x08 => state.backspace(),
                0x09 => state.horizontal_tab(),
                0x0A..=0x0C => {
                    if state.modes.linefeed_newline {
                        state.carriage_return();
                    }
                    state.linefeed(cb);
                }
                0x0D => state.carriage_return(),
                // CAN, SUB
                0x18 | 0x1A => self.state = ParserState::Ground,
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => {
                self.ground(byte, state, cb);
                None
            }
            ParserState::Escape => {
                self.escape(byte, state, cb);
                None
            }
            ParserState::EscapeIntermediate => {
                self.escape_intermediate(byte);
                None
            }
            ParserState::CsiEntry => self.csi_entry(byte, state, cb),
            ParserState::CsiParam => self.csi_param(byte, state, cb),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, state, cb),
            ParserState::OscString => {
                self.osc_string_state(byte, state);
                None
            }
            ParserState::EscapeInOsc => {
                self.escape_in_osc(byte, state, cb);
                None
            }
        }
    }

    fn escape_in_osc(&mut self, byte: u8, state: &mut TerminalState, cb: &mut dyn ScreenCallbacks) {
        self.execute_osc(state);
        if byte == b'\\' {
            self.state = ParserState::Ground;
        } else {
            // not ST: this byte starts a new escape sequence
            self.enter_escape();
            self.escape(byte, state, cb);
        }
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8, state: &mut TerminalState, cb: &mut dyn ScreenCallbacks) {
        match byte {
            0x20..=0x7E => state.put_char(byte as char, cb),
            0x7F => {}
            _ => self.utf8_byte(byte, state, cb),
        }
    }

    fn utf8_byte(&mut self, byte: u8, state: &mut TerminalState, cb: &mut dyn ScreenCallbacks) {
        if self.utf8_need > 0 {
            self.utf8[self.utf8_len] = byte;
            self.utf8_len += 1;
            if self.utf8_len == self.utf8_need {
                let ch = std::str::from_utf8(&self.utf8[..self.utf8_len])
                    .ok()
                    .and_then(|s| s.chars().next())
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                self.utf8_need = 0;
                self.utf8_len = 0;
                state.put_char(ch, cb);
            }
            return;
        }

        let need = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 0,
        };
        if need == 0 {
            state.put_char(char::REPLACEMENT_CHARACTER, cb);
            return;
        }
        self.utf8[0] = byte;
        self.utf8_len = 1;
        self.utf8_need = need;
    }

    fn escape(&mut self, byte: u8, state: &mut TerminalState, cb: &mut dyn ScreenCallbacks) {
        self.state = ParserState::Ground;
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc.clear();
            }
            // DECSC / DECRC
            b'7' => state.save_cursor(),
            b'8' => state.restore_cursor(),
            // IND
            b'D' => state.linefeed(cb),
            // NEL
            b'E' => {
                state.carriage_return();
                state.linefeed(cb);
            }
            // RI
            b'M' => state.reverse_index(),
            // RIS
            b'c' => state.full_reset(),
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {}
        }
    }

    fn escape_intermediate(&mut self, byte: u8) {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            // charset designations and the like are ignored
            _ => self.state = ParserState::Ground,
        }
    }

    fn csi_entry(
        &mut self,
        byte: u8,
        state: &mut TerminalState,
        cb: &mut dyn ScreenCallbacks,
    ) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = ParserState::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' => self.intermediates.push(byte),
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => return self.execute_csi(byte, state, cb),
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn csi_param(
        &mut self,
        byte: u8,
        state: &mut TerminalState,
        cb: &mut dyn ScreenCallbacks,
    ) -> Option<Response> {
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
            // ':' subparameters are flattened
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
                return self.execute_csi(byte, state, cb);
            }
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn csi_intermediate(
        &mut self,
        byte: u8,
        state: &mut TerminalState,
        cb: &mut dyn ScreenCallbacks,
    ) -> Option<Response> {
        match byte {
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => return self.execute_csi(byte, state, cb),
            _ => self.state = ParserState::Ground,
        }
        None
    }

    fn osc_string_state(&mut self, byte: u8, state: &mut TerminalState) {
        match byte {
            0x07 => {
                self.execute_osc(state);
                self.state = ParserState::Ground;
            }
            0x1B => self.state = ParserState::EscapeInOsc,
            _ => {
                if self.osc.len() < OSC_MAX_LEN {
                    self.osc.push(byte);
                }
            }
        }
    }

    fn execute_csi(
        &mut self,
        final_byte: u8,
        state: &mut TerminalState,
        cb: &mut dyn ScreenCallbacks,
    ) -> Option<Response> {
        self.state = ParserState::Ground;
        let is_private = self.intermediates.contains(&b'?');
        let is_gt = self.intermediates.contains(&b'>');
        let params = &self.params;
        let count = params.first().copied().unwrap_or(1).max(1);

        match (is_private, is_gt, final_byte) {
            (false, false, b'A') => state.cursor_up(count),
            (false, false, b'B') => state.cursor_down(count),
            (false, false, b'C') => state.cursor_forward(count),
            (false, false, b'D') => state.cursor_backward(count),
            // CNL / CPL
            (false, false, b'E') => {
                state.cursor_down(count);
                state.carriage_return();
            }
            (false, false, b'F') => {
                state.cursor_up(count);
                state.carriage_return();
            }
            // CHA
            (false, false, b'G') => state.set_column(count),
            // CUP
            (false, false, b'H') | (false, false, b'f') => {
                let row = params.first().copied().unwrap_or(1);
                let col = params.get(1).copied().unwrap_or(1);
                state.cursor_position(row, col);
            }
            // VPA
            (false, false, b'd') => state.set_row(count),

            (false, false, b'J') => state.erase_in_display(params.first().copied().unwrap_or(0)),
            (false, false, b'K') => state.erase_in_line(params.first().copied().unwrap_or(0)),

            (false, false, b'L') => state.insert_lines(count),
            (false, false, b'M') => state.delete_lines(count),
            (false, false, b'@') => state.insert_chars(count),
            (false, false, b'P') => state.delete_chars(count),
            (false, false, b'X') => state.erase_chars(count),

            (false, false, b'S') => state.scroll_up(count, cb),
            (false, false, b'T') => state.scroll_down(count),

            // DECSTBM
            (false, false, b'r') => {
                let top = params.first().copied().unwrap_or(1);
                let bottom = params
                    .get(1)
                    .copied()
                    .filter(|&b| b != 0)
                    .unwrap_or(state.rows);
                state.set_scroll_region(top, bottom);
                state.cursor_position(1, 1);
            }

            (false, false, b'm') => Self::execute_sgr(params, state),

            (false, false, b's') => state.save_cursor(),
            (false, false, b'u') => state.restore_cursor(),

            // DSR
            (false, false, b'n') => {
                return match params.first() {
                    Some(5) => Some(Response::StatusOk),
                    Some(6) => {
                        let pos = state.cursor_pos();
                        Some(Response::CursorPosition(pos.row + 1, pos.col + 1))
                    }
                    _ => None,
                };
            }

            (false, false, b'c') => return Some(Response::DeviceAttributes),
            (false, true, b'c') => return Some(Response::SecondaryDeviceAttributes),

            (true, false, b'h') => {
                for &p in params {
                    state.set_private_mode(p, true);
                }
            }
            (true, false, b'l') => {
                for &p in params {
                    state.set_private_mode(p, false);
                }
            }

            (false, false, b'h') | (false, false, b'l') => {
                let enable = final_byte == b'h';
                for &p in params {
                    match p {
                        4 => state.modes.insert_mode = enable,
                        20 => state.modes.linefeed_newline = enable,
                        _ => {}
                    }
                }
            }

            _ => trace!(
                "unhandled CSI: intermediates={:?}, params={:?}, final={:?}",
                self.intermediates,
                params,
                final_byte as char
            ),
        }
        None
    }

    fn execute_sgr(params: &[u16], state: &mut TerminalState) {
        if params.is_empty() {
            state.current_attrs.reset();
            return;
        }

        let attrs = &mut state.current_attrs;
        let mut iter = params.iter().copied();
        while let Some(param) = iter.next() {
            match param {
                0 => attrs.reset(),
                1 => attrs.flags |= AttrFlags::BOLD,
                2 => attrs.flags |= AttrFlags::DIM,
                3 => attrs.flags |= AttrFlags::ITALIC,
                4 => attrs.flags |= AttrFlags::UNDERLINE,
                5 => attrs.flags |= AttrFlags::BLINK,
                7 => attrs.flags |= AttrFlags::INVERSE,
                8 => attrs.flags |= AttrFlags::HIDDEN,
                9 => attrs.flags |= AttrFlags::STRIKETHROUGH,

                22 => attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => attrs.flags &= !AttrFlags::ITALIC,
                24 => attrs.flags &= !AttrFlags::UNDERLINE,
                25 => attrs.flags &= !AttrFlags::BLINK,
                27 => attrs.flags &= !AttrFlags::INVERSE,
                28 => attrs.flags &= !AttrFlags::HIDDEN,
                29 => attrs.flags &= !AttrFlags::STRIKETHROUGH,

                30..=37 => attrs.fg = ColorId::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = extended_color(&mut iter) {
                        attrs.fg = color;
                    }
                }
                39 => attrs.fg = ColorId::DefaultFg,

                40..=47 => attrs.bg = ColorId::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = extended_color(&mut iter) {
                        attrs.bg = color;
                    }
                }
                49 => attrs.bg = ColorId::DefaultBg,

                90..=97 => attrs.fg = ColorId::Indexed((param - 90 + 8) as u8),
                100..=107 => attrs.bg = ColorId::Indexed((param - 100 + 8) as u8),

                _ => {}
            }
        }
    }

    fn execute_osc(&mut self, state: &mut TerminalState) {
        let Some(pos) = self.osc.iter().position(|&b| b == b';') else {
            return;
        };
        let (code, text) = (&self.osc[..pos], &self.osc[pos + 1..]);
        if matches!(code, b"0" | b"1" | b"2") {
            state.title = String::from_utf8_lossy(text).into_owned();
        }
    }
}

/// `5;n` or `2;r;g;b` after SGR 38/48
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<ColorId> {
    match iter.next()? {
        5 => iter.next().map(|n| ColorId::Indexed(n.min(255) as u8)),
        2 => {
            let r = iter.next().unwrap_or(0).min(255) as u8;
            let g = iter.next().unwrap_or(0).min(255) as u8;
            let b = iter.next().unwrap_or(0).min(255) as u8;
            Some(ColorId::Truecolor(r, g, b))
        }
        _ => None,
    }
}
