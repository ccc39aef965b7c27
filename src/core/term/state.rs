//! Terminal grid state
//!
//! Live rows, cursors and modes. History is not kept here: rows leaving the
//! top of the primary screen go to the [`ScreenCallbacks`] passed in, and
//! come back from them when the screen grows.

use unicode_width::UnicodeWidthChar;

use crate::core::color::ColorId;
use crate::core::screen::{AttrFlags, CursorPos, LiveCell, Rect, ScreenCallbacks, ScreenModes};

const TAB_WIDTH: u16 = 8;

/// Current drawing attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellAttrs {
    pub fg: ColorId,
    pub bg: ColorId,
    pub flags: AttrFlags,
}

impl Default for CellAttrs {
    fn default() -> Self {
        Self {
            fg: ColorId::DefaultFg,
            bg: ColorId::DefaultBg,
            flags: AttrFlags::empty(),
        }
    }
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Blank left behind by erase and scroll operations
    fn erased(&self) -> LiveCell {
        LiveCell::blank_with(ColorId::DefaultFg, self.bg)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<LiveCell>,
    /// Line continued onto the next row by auto-wrap
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self::filled(cols, LiveCell::BLANK)
    }

    fn filled(cols: u16, blank: LiveCell) -> Self {
        Self {
            cells: vec![blank; cols as usize],
            wrapped: false,
        }
    }

    /// Fit cells from history to `cols`
    pub fn from_cells(cells: Vec<LiveCell>, cols: u16) -> Self {
        let mut row = Self {
            cells,
            wrapped: false,
        };
        row.set_width(cols);
        row
    }

    pub fn set_width(&mut self, cols: u16) {
        self.cells.resize(cols as usize, LiveCell::BLANK);
        // left half of a wide character whose right half was cut off
        if let Some(last) = self.cells.last_mut() {
            if last.width == 2 {
                *last = LiveCell::BLANK;
            }
        }
    }

    pub fn clear(&mut self, blank: LiveCell) {
        self.cells.fill(blank);
        self.wrapped = false;
    }
}

pub struct ScreenBuffer {
    pub rows: Vec<Row>,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows: (0..rows).map(|_| Row::new(cols)).collect(),
        }
    }

    fn set_width(&mut self, cols: u16) {
        for row in &mut self.rows {
            row.set_width(cols);
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SavedCursor {
    pub row: u16,
    pub col: u16,
    pub attrs: CellAttrs,
}

#[derive(Clone, Debug)]
pub struct CursorState {
    pub row: u16,
    /// May equal the column count while a wrap is pending
    pub col: u16,
    pub visible: bool,
    pub saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
            saved: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub auto_wrap: bool,
    pub bracketed_paste: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            bracketed_paste: false,
            insert_mode: false,
            linefeed_newline: false,
        }
    }
}

/// Terminal state holding the live screens
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub primary_screen: ScreenBuffer,
    pub alternate_screen: ScreenBuffer,
    pub using_alternate: bool,
    pub primary_cursor: CursorState,
    pub alternate_cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    pub scroll_region: (u16, u16),
    damage: Rect,
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            primary_screen: ScreenBuffer::new(cols, rows),
            alternate_screen: ScreenBuffer::new(cols, rows),
            using_alternate: false,
            primary_cursor: CursorState::default(),
            alternate_cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
            damage: Rect::full(cols, rows),
        }
    }

    pub fn active_screen(&self) -> &ScreenBuffer {
        if self.using_alternate {
            &self.alternate_screen
        } else {
            &self.primary_screen
        }
    }

    pub fn active_screen_mut(&mut self) -> &mut ScreenBuffer {
        if self.using_alternate {
            &mut self.alternate_screen
        } else {
            &mut self.primary_screen
        }
    }

    pub fn active_cursor(&self) -> &CursorState {
        if self.using_alternate {
            &self.alternate_cursor
        } else {
            &self.primary_cursor
        }
    }

    pub fn active_cursor_mut(&mut self) -> &mut CursorState {
        if self.using_alternate {
            &mut self.alternate_cursor
        } else {
            &mut self.primary_cursor
        }
    }

    /// Cursor as shown, with a pending wrap folded onto the last column
    pub fn cursor_pos(&self) -> CursorPos {
        let cursor = self.active_cursor();
        CursorPos {
            row: cursor.row,
            col: cursor.col.min(self.cols - 1),
            visible: cursor.visible,
        }
    }

    pub fn screen_modes(&self) -> ScreenModes {
        ScreenModes {
            application_cursor: self.modes.application_cursor,
            auto_wrap: self.modes.auto_wrap,
            bracketed_paste: self.modes.bracketed_paste,
            alternate_screen: self.using_alternate,
        }
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<LiveCell> {
        self.active_screen()
            .rows
            .get(row as usize)
            .and_then(|r| r.cells.get(col as usize))
            .copied()
    }

    pub fn take_damage(&mut self) -> Rect {
        std::mem::take(&mut self.damage)
    }

    pub fn damage_all(&mut self) {
        self.damage = Rect::full(self.cols, self.rows);
    }

    fn damage_row(&mut self, row: usize) {
        self.damage = self.damage.union(Rect::row(row as u16, self.cols));
    }

    fn damage_rows(&mut self, top: u16, bottom: u16) {
        self.damage = self.damage.union(Rect {
            top,
            left: 0,
            bottom: bottom.saturating_add(1),
            right: self.cols,
        });
    }

    /// RIS
    pub fn full_reset(&mut self) {
        *self = Self::new(self.cols, self.rows);
    }

    /// Resize both screens. Rows above a cursor that would fall off the
    /// bottom go to history; growing pulls history back in on top.
    pub fn resize(&mut self, cols: u16, rows: u16, cb: &mut dyn ScreenCallbacks) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols != self.cols {
            self.primary_screen.set_width(cols);
            self.alternate_screen.set_width(cols);
        }

        let new_rows = rows as usize;
        let old_rows = self.primary_screen.rows.len();
        if new_rows < old_rows {
            let cursor_row = self.primary_cursor.row as usize;
            if cursor_row >= new_rows {
                let excess = cursor_row + 1 - new_rows;
                for row in self.primary_screen.rows.drain(..excess) {
                    cb.on_scrollback_push(&row.cells);
                }
                self.primary_cursor.row -= excess as u16;
            }
            self.primary_screen.rows.truncate(new_rows);
        } else if new_rows > old_rows {
            let mut pulled = 0u16;
            while self.primary_screen.rows.len() < new_rows {
                match cb.on_scrollback_pop(cols) {
                    Some(cells) => {
                        self.primary_screen.rows.insert(0, Row::from_cells(cells, cols));
                        pulled += 1;
                    }
                    None => break,
                }
            }
            self.primary_screen.rows.resize_with(new_rows, || Row::new(cols));
            self.primary_cursor.row += pulled;
        }
        self.alternate_screen.rows.truncate(new_rows);
        self.alternate_screen.rows.resize_with(new_rows, || Row::new(cols));

        self.cols = cols;
        self.rows = rows;
        self.scroll_region = (0, rows - 1);
        for cursor in [&mut self.primary_cursor, &mut self.alternate_cursor] {
            cursor.row = cursor.row.min(rows - 1);
            cursor.col = cursor.col.min(cols - 1);
        }
        self.damage_all();
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char, cb: &mut dyn ScreenCallbacks) {
        // combining marks and other zero-width characters are dropped
        let width = match ch.width() {
            Some(w @ 1..=2) => w as u16,
            _ => return,
        };

        if self.active_cursor().col + width > self.cols {
            if self.modes.auto_wrap {
                let row = self.active_cursor().row as usize;
                self.active_screen_mut().rows[row].wrapped = true;
                self.active_cursor_mut().col = 0;
                self.linefeed(cb);
            } else {
                let cols = self.cols;
                self.active_cursor_mut().col = cols.saturating_sub(width);
            }
        }

        if self.modes.insert_mode {
            self.insert_chars(width);
        }

        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        self.handle_wide_char_overwrite(row, col);

        let attrs = self.current_attrs;
        let cols = self.cols as usize;
        let cell = LiveCell {
            ch,
            width: width as u8,
            fg: attrs.fg,
            bg: attrs.bg,
            flags: attrs.flags,
        };
        let cells = &mut self.active_screen_mut().rows[row].cells;
        cells[col] = cell;
        if width == 2 && col + 1 < cols {
            if col + 2 < cols && cells[col + 1].width == 2 {
                cells[col + 2] = LiveCell::BLANK;
            }
            cells[col + 1] = LiveCell {
                ch: ' ',
                width: 0,
                ..cell
            };
        }

        self.damage_row(row);
        self.active_cursor_mut().col += width;
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let cols = self.cols as usize;
        let cells = &mut self.active_screen_mut().rows[row].cells;

        // overwriting the right half of a wide char
        if col > 0 && cells[col].is_continuation() {
            cells[col - 1] = LiveCell::BLANK;
        }
        // overwriting the left half
        if cells[col].width == 2 && col + 1 < cols {
            cells[col + 1] = LiveCell::BLANK;
        }
    }

    pub fn carriage_return(&mut self) {
        self.active_cursor_mut().col = 0;
    }

    /// Line feed - move cursor down, scroll at the bottom margin
    pub fn linefeed(&mut self, cb: &mut dyn ScreenCallbacks) {
        let cursor_row = self.active_cursor().row;
        if cursor_row == self.scroll_region.1 {
            self.scroll_up(1, cb);
        } else if cursor_row < self.rows - 1 {
            self.active_cursor_mut().row += 1;
        }
    }

    pub fn backspace(&mut self) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.min(cols - 1).saturating_sub(1);
    }

    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = ((cursor.col / TAB_WIDTH + 1) * TAB_WIDTH).min(cols - 1);
    }

    /// Scroll the region up by n lines
    pub fn scroll_up(&mut self, n: u16, cb: &mut dyn ScreenCallbacks) {
        let (top, bottom) = self.scroll_region;
        let n = n.min(bottom - top + 1);
        let to_history = !self.using_alternate && top == 0;
        let blank = Row::filled(self.cols, self.current_attrs.erased());

        let screen = self.active_screen_mut();
        for _ in 0..n {
            let removed = screen.rows.remove(top as usize);
            if to_history {
                cb.on_scrollback_push(&removed.cells);
            }
            screen.rows.insert(bottom as usize, blank.clone());
        }
        self.damage_rows(top, bottom);
    }

    /// Scroll the region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let n = n.min(bottom - top + 1);
        let blank = Row::filled(self.cols, self.current_attrs.erased());

        let screen = self.active_screen_mut();
        for _ in 0..n {
            screen.rows.remove(bottom as usize);
            screen.rows.insert(top as usize, blank.clone());
        }
        self.damage_rows(top, bottom);
    }

    pub fn cursor_up(&mut self, n: u16) {
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        let rows = self.rows;
        let cursor = self.active_cursor_mut();
        cursor.row = cursor.row.saturating_add(n).min(rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.saturating_add(n).min(cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.col = cursor.col.min(cols - 1).saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let rows = self.rows;
        let cols = self.cols;
        let cursor = self.active_cursor_mut();
        cursor.row = row.saturating_sub(1).min(rows - 1);
        cursor.col = col.saturating_sub(1).min(cols - 1);
    }

    pub fn set_column(&mut self, col: u16) {
        let cols = self.cols;
        self.active_cursor_mut().col = col.saturating_sub(1).min(cols - 1);
    }

    pub fn set_row(&mut self, row: u16) {
        let rows = self.rows;
        self.active_cursor_mut().row = row.saturating_sub(1).min(rows - 1);
    }

    pub fn erase_in_display(&mut self, mode: u16) {
        let cursor_row = self.active_cursor().row as usize;
        let rows = self.rows as usize;
        let blank = self.current_attrs.erased();
        match mode {
            0 => {
                self.erase_in_line(0);
                let screen = self.active_screen_mut();
                for row in &mut screen.rows[cursor_row + 1..rows] {
                    row.clear(blank);
                }
                self.damage_rows(cursor_row as u16, self.rows - 1);
            }
            1 => {
                let screen = self.active_screen_mut();
                for row in &mut screen.rows[..cursor_row] {
                    row.clear(blank);
                }
                self.erase_in_line(1);
                self.damage_rows(0, cursor_row as u16);
            }
            // 3 would also clear history, which lives outside the grid
            2 | 3 => {
                for row in &mut self.active_screen_mut().rows {
                    row.clear(blank);
                }
                self.damage_all();
            }
            _ => {}
        }
    }

    pub fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = {
            let cursor = self.active_cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let cols = self.cols as usize;
        let blank = self.current_attrs.erased();
        let line = &mut self.active_screen_mut().rows[row];

        match mode {
            0 => {
                if col < cols {
                    line.cells[col..].fill(blank);
                }
                line.wrapped = false;
            }
            1 => line.cells[..=col.min(cols - 1)].fill(blank),
            2 => line.clear(blank),
            _ => {}
        }
        self.damage_row(row);
    }

    /// IL - insert lines at the cursor, within the scroll region
    pub fn insert_lines(&mut self, n: u16) {
        let row = self.active_cursor().row;
        let (top, bottom) = self.scroll_region;
        if row < top || row > bottom {
            return;
        }
        let blank = Row::filled(self.cols, self.current_attrs.erased());
        let screen = self.active_screen_mut();
        for _ in 0..n.min(bottom - row + 1) {
            screen.rows.remove(bottom as usize);
            screen.rows.insert(row as usize, blank.clone());
        }
        self.active_cursor_mut().col = 0;
        self.damage_rows(row, bottom);
    }

    /// DL - delete lines at the cursor, within the scroll region
    pub fn delete_lines(&mut self, n: u16) {
        let row = self.active_cursor().row;
        let (top, bottom) = self.scroll_region;
        if row < top || row > bottom {
            return;
        }
        let blank = Row::filled(self.cols, self.current_attrs.erased());
        let screen = self.active_screen_mut();
        for _ in 0..n.min(bottom - row + 1) {
            screen.rows.remove(row as usize);
            screen.rows.insert(bottom as usize, blank.clone());
        }
        self.active_cursor_mut().col = 0;
        self.damage_rows(row, bottom);
    }

    /// ICH
    pub fn insert_chars(&mut self, n: u16) {
        let (row, col) = self.edit_position();
        let count = (n as usize).min(self.cols as usize - col);
        let blank = self.current_attrs.erased();
        let cells = &mut self.active_screen_mut().rows[row].cells;
        for _ in 0..count {
            cells.pop();
            cells.insert(col, blank);
        }
        self.damage_row(row);
    }

    /// DCH
    pub fn delete_chars(&mut self, n: u16) {
        let (row, col) = self.edit_position();
        let count = (n as usize).min(self.cols as usize - col);
        let blank = self.current_attrs.erased();
        let cells = &mut self.active_screen_mut().rows[row].cells;
        for _ in 0..count {
            cells.remove(col);
            cells.push(blank);
        }
        self.damage_row(row);
    }

    /// ECH
    pub fn erase_chars(&mut self, n: u16) {
        let (row, col) = self.edit_position();
        let end = (col + n as usize).min(self.cols as usize);
        let blank = self.current_attrs.erased();
        self.active_screen_mut().rows[row].cells[col..end].fill(blank);
        self.damage_row(row);
    }

    fn edit_position(&self) -> (usize, usize) {
        let cursor = self.active_cursor();
        (cursor.row as usize, cursor.col.min(self.cols - 1) as usize)
    }

    /// DECSTBM (1-indexed, inclusive); invalid regions are ignored
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let rows = self.rows;
        let top = top.saturating_sub(1).min(rows - 1);
        let bottom = bottom.saturating_sub(1).min(rows - 1);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn save_cursor(&mut self) {
        let (col, row) = {
            let cursor = self.active_cursor();
            (cursor.col, cursor.row)
        };
        let attrs = self.current_attrs;
        self.active_cursor_mut().saved = Some(SavedCursor { row, col, attrs });
    }

    pub fn restore_cursor(&mut self) {
        let Some(saved) = self.active_cursor().saved else {
            return;
        };
        let (cols, rows) = (self.cols, self.rows);
        let cursor = self.active_cursor_mut();
        cursor.col = saved.col.min(cols - 1);
        cursor.row = saved.row.min(rows - 1);
        self.current_attrs = saved.attrs;
    }

    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            25 => self.active_cursor_mut().visible = enable,
            47 | 1047 => {
                if enable && !self.using_alternate {
                    self.alternate_screen = ScreenBuffer::new(self.cols, self.rows);
                }
                self.using_alternate = enable;
                self.damage_all();
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.using_alternate = true;
                    self.alternate_screen = ScreenBuffer::new(self.cols, self.rows);
                    self.alternate_cursor = CursorState::default();
                } else {
                    self.using_alternate = false;
                    self.restore_cursor();
                }
                self.damage_all();
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => {}
        }
    }

    /// Reverse index - cursor up, scroll at the top margin
    pub fn reverse_index(&mut self) {
        if self.active_cursor().row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }
}
