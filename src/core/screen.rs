//! Screen-model contract.
//!
//! A session feeds decoded bytes into a [`ScreenModel`] and receives four
//! callbacks through [`ScreenCallbacks`]. The model owns the live grid and
//! never stores history itself: rows that scroll off the top are handed to
//! the callbacks, and rows it wants back are requested from them.

use bitflags::bitflags;

use super::color::ColorId;

/// Damaged screen region (bottom and right are exclusive)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub top: u16,
    pub left: u16,
    pub bottom: u16,
    pub right: u16,
}

impl Rect {
    pub fn full(cols: u16, rows: u16) -> Self {
        Self {
            top: 0,
            left: 0,
            bottom: rows,
            right: cols,
        }
    }

    pub fn row(row: u16, cols: u16) -> Self {
        Self {
            top: row,
            left: 0,
            bottom: row.saturating_add(1),
            right: cols,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top >= self.bottom || self.left >= self.right
    }

    /// Smallest rect covering both
    pub fn union(self, other: Rect) -> Rect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        Rect {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }
}

/// Cursor position as reported by the screen model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorPos {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
}

impl Default for CursorPos {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// A cell of the live screen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveCell {
    pub ch: char,
    /// Display width; 0 marks the right half of a wide character
    pub width: u8,
    pub fg: ColorId,
    pub bg: ColorId,
    pub flags: AttrFlags,
}

impl LiveCell {
    pub const BLANK: LiveCell = LiveCell {
        ch: ' ',
        width: 1,
        fg: ColorId::DefaultFg,
        bg: ColorId::DefaultBg,
        flags: AttrFlags::empty(),
    };

    /// Blank cell carrying erase colors
    pub fn blank_with(fg: ColorId, bg: ColorId) -> Self {
        Self {
            fg,
            bg,
            ..Self::BLANK
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }
}

impl Default for LiveCell {
    fn default() -> Self {
        Self::BLANK
    }
}

/// Terminal modes an input layer needs to know about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenModes {
    pub application_cursor: bool,
    pub auto_wrap: bool,
    pub bracketed_paste: bool,
    pub alternate_screen: bool,
}

impl Default for ScreenModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            bracketed_paste: false,
            alternate_screen: false,
        }
    }
}

/// Callbacks a screen model invokes while processing input
pub trait ScreenCallbacks {
    /// Region needs redrawing
    fn on_damage(&mut self, region: Rect);
    /// A row left the top of the primary screen
    fn on_scrollback_push(&mut self, row: &[LiveCell]);
    /// The model wants the most recent history row back, `cols` wide
    fn on_scrollback_pop(&mut self, cols: u16) -> Option<Vec<LiveCell>>;
    fn on_cursor_move(&mut self, pos: CursorPos);
}

/// Callback set used while a session is detached
pub struct NullCallbacks;

impl ScreenCallbacks for NullCallbacks {
    fn on_damage(&mut self, _region: Rect) {}

    fn on_scrollback_push(&mut self, _row: &[LiveCell]) {}

    fn on_scrollback_pop(&mut self, _cols: u16) -> Option<Vec<LiveCell>> {
        None
    }

    fn on_cursor_move(&mut self, _pos: CursorPos) {}
}

/// VT-style interpreter turning bytes into a grid of styled cells
pub trait ScreenModel: Send {
    fn feed(&mut self, bytes: &[u8], callbacks: &mut dyn ScreenCallbacks);
    fn resize(&mut self, cols: u16, rows: u16, callbacks: &mut dyn ScreenCallbacks);
    /// (cols, rows)
    fn size(&self) -> (u16, u16);
    fn cell(&self, row: u16, col: u16) -> Option<LiveCell>;
    fn cursor(&self) -> CursorPos;
    /// Replies queued for the remote side (DSR, DA)
    fn take_responses(&mut self) -> Vec<u8>;
    /// Full reset (RIS)
    fn reset(&mut self, callbacks: &mut dyn ScreenCallbacks);
    fn title(&self) -> &str;
    fn modes(&self) -> ScreenModes;
}
