//! Bundled VT100/xterm screen model

pub mod parser;
pub mod state;

use self::parser::VtParser;
use self::state::TerminalState;
use super::screen::{CursorPos, LiveCell, ScreenCallbacks, ScreenModel, ScreenModes};

pub use self::parser::Response;

/// [`ScreenModel`] over [`TerminalState`] and [`VtParser`]
pub struct VtScreen {
    state: TerminalState,
    parser: VtParser,
    responses: Vec<u8>,
}

impl VtScreen {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            state: TerminalState::new(cols, rows),
            parser: VtParser::new(),
            responses: Vec::new(),
        }
    }

    /// Report accumulated damage and cursor movement
    fn flush(&mut self, callbacks: &mut dyn ScreenCallbacks, before: CursorPos) {
        let damage = self.state.take_damage();
        if !damage.is_empty() {
            callbacks.on_damage(damage);
        }
        let after = self.state.cursor_pos();
        if after != before {
            callbacks.on_cursor_move(after);
        }
    }
}

impl ScreenModel for VtScreen {
    fn feed(&mut self, bytes: &[u8], callbacks: &mut dyn ScreenCallbacks) {
        let before = self.state.cursor_pos();
        for &byte in bytes {
            if let Some(response) = self.parser.feed(byte, &mut self.state, callbacks) {
                self.responses.extend(response.to_bytes());
            }
        }
        self.flush(callbacks, before);
    }

    fn resize(&mut self, cols: u16, rows: u16, callbacks: &mut dyn ScreenCallbacks) {
        let before = self.state.cursor_pos();
        self.state.resize(cols, rows, callbacks);
        self.flush(callbacks, before);
    }

    fn size(&self) -> (u16, u16) {
        (self.state.cols, self.state.rows)
    }

    fn cell(&self, row: u16, col: u16) -> Option<LiveCell> {
        self.state.cell(row, col)
    }

    fn cursor(&self) -> CursorPos {
        self.state.cursor_pos()
    }

    fn take_responses(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.responses)
    }

    fn reset(&mut self, callbacks: &mut dyn ScreenCallbacks) {
        let before = self.state.cursor_pos();
        self.parser.reset();
        self.state.full_reset();
        self.flush(callbacks, before);
    }

    fn title(&self) -> &str {
        &self.state.title
    }

    fn modes(&self) -> ScreenModes {
        self.state.screen_modes()
    }
}
