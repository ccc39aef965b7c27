//! Scrollback ring buffer
//!
//! History rows are stored in a fixed-size circular buffer of compact
//! 4-byte cells. Rows wider than the stored width are truncated; the live
//! screen is unaffected.

use bitflags::bitflags;

use super::color::{compact_id, ColorId};
use super::screen::{AttrFlags, LiveCell};

/// Rows kept per session
pub const DEFAULT_CAPACITY: usize = 100;
/// Columns stored per row
pub const DEFAULT_WIDTH: usize = 80;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SbAttrs: u8 {
        const BOLD       = 1 << 0;
        const REVERSE    = 1 << 1;
        const UNDERLINE  = 1 << 2;
        const ITALIC     = 1 << 3;
        const STRIKE     = 1 << 4;
        const DEFAULT_FG = 1 << 5;
        const DEFAULT_BG = 1 << 6;
    }
}

/// One stored history cell
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollbackCell {
    pub ch: u8,
    pub fg: u8,
    pub bg: u8,
    pub attrs: SbAttrs,
}

impl ScrollbackCell {
    pub const BLANK: ScrollbackCell = ScrollbackCell {
        ch: b' ',
        fg: 0,
        bg: 0,
        attrs: SbAttrs::DEFAULT_FG.union(SbAttrs::DEFAULT_BG),
    };

    /// Compact a live cell for storage
    pub fn from_live(cell: &LiveCell) -> Self {
        let mut attrs = SbAttrs::empty();
        let mapping = [
            (AttrFlags::BOLD, SbAttrs::BOLD),
            (AttrFlags::INVERSE, SbAttrs::REVERSE),
            (AttrFlags::UNDERLINE, SbAttrs::UNDERLINE),
            (AttrFlags::ITALIC, SbAttrs::ITALIC),
            (AttrFlags::STRIKETHROUGH, SbAttrs::STRIKE),
        ];
        for (live, stored) in mapping {
            if cell.flags.contains(live) {
                attrs |= stored;
            }
        }

        let fg = compact_id(cell.fg).unwrap_or_else(|| {
            attrs |= SbAttrs::DEFAULT_FG;
            0
        });
        let bg = compact_id(cell.bg).unwrap_or_else(|| {
            attrs |= SbAttrs::DEFAULT_BG;
            0
        });

        let ch = if cell.is_continuation() {
            b' '
        } else {
            narrow_char(cell.ch)
        };

        Self { ch, fg, bg, attrs }
    }

    pub fn fg_id(&self) -> ColorId {
        if self.attrs.contains(SbAttrs::DEFAULT_FG) {
            ColorId::DefaultFg
        } else {
            ColorId::Indexed(self.fg)
        }
    }

    pub fn bg_id(&self) -> ColorId {
        if self.attrs.contains(SbAttrs::DEFAULT_BG) {
            ColorId::DefaultBg
        } else {
            ColorId::Indexed(self.bg)
        }
    }

    /// Expand back into a live cell (used when history is pulled back onto the screen)
    pub fn to_live(&self) -> LiveCell {
        let mut flags = AttrFlags::empty();
        let mapping = [
            (SbAttrs::BOLD, AttrFlags::BOLD),
            (SbAttrs::REVERSE, AttrFlags::INVERSE),
            (SbAttrs::UNDERLINE, AttrFlags::UNDERLINE),
            (SbAttrs::ITALIC, AttrFlags::ITALIC),
            (SbAttrs::STRIKE, AttrFlags::STRIKETHROUGH),
        ];
        for (stored, live) in mapping {
            if self.attrs.contains(stored) {
                flags |= live;
            }
        }
        LiveCell {
            ch: char::from(self.ch),
            width: 1,
            fg: self.fg_id(),
            bg: self.bg_id(),
            flags,
        }
    }
}

impl Default for ScrollbackCell {
    fn default() -> Self {
        Self::BLANK
    }
}

/// Narrow a character to the single byte kept in history
pub fn narrow_char(ch: char) -> u8 {
    match ch {
        '\u{0}'..='\u{1f}' | '\u{7f}'..='\u{9f}' => b' ',
        '\u{20}'..='\u{7e}' | '\u{a0}'..='\u{ff}' => ch as u8,
        // Light, heavy and dashed horizontals, plus the double horizontal
        '\u{2500}' | '\u{2501}' | '\u{2504}' | '\u{2505}' | '\u{2508}' | '\u{2509}'
        | '\u{254c}' | '\u{254d}' | '\u{2550}' => b'-',
        '\u{2502}' | '\u{2503}' | '\u{2506}' | '\u{2507}' | '\u{250a}' | '\u{250b}'
        | '\u{254e}' | '\u{254f}' | '\u{2551}' => b'|',
        '\u{2500}'..='\u{257f}' => b'+',
        '\u{2580}'..='\u{259f}' => b'#',
        _ => b'?',
    }
}

/// Where a display row comes from
#[derive(Debug, PartialEq, Eq)]
pub enum RowSource<'a> {
    History(&'a [ScrollbackCell]),
    /// Row index into the live screen
    Live(usize),
    Blank,
}

/// Where a display cell comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellSource {
    History(ScrollbackCell),
    Live { row: usize, col: usize },
    Blank,
}

/// Fixed-capacity circular history
pub struct ScrollbackRing {
    cells: Vec<ScrollbackCell>,
    capacity: usize,
    width: usize,
    /// Next write slot
    head: usize,
    count: usize,
    /// Rows scrolled back from the live view (0 = live)
    scroll_offset: usize,
}

impl Default for ScrollbackRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WIDTH)
    }
}

impl ScrollbackRing {
    pub fn new(capacity: usize, width: usize) -> Self {
        let capacity = capacity.max(1);
        let width = width.max(1);
        Self {
            cells: vec![ScrollbackCell::BLANK; capacity * width],
            capacity,
            width,
            head: 0,
            count: 0,
            scroll_offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn is_scrolled(&self) -> bool {
        self.scroll_offset > 0
    }

    fn slot(&self, index: usize) -> &[ScrollbackCell] {
        let start = index * self.width;
        &self.cells[start..start + self.width]
    }

    /// Store a row, truncated or padded to the stored width
    pub fn push_row(&mut self, row: &[ScrollbackCell]) {
        let start = self.head * self.width;
        let slot = &mut self.cells[start..start + self.width];
        let n = row.len().min(slot.len());
        slot[..n].copy_from_slice(&row[..n]);
        slot[n..].fill(ScrollbackCell::BLANK);

        self.head = (self.head + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
        // Keep a scrolled-back view on the same content
        if self.scroll_offset > 0 && self.scroll_offset < self.count {
            self.scroll_offset += 1;
        }
    }

    /// Compact and store a live screen row
    pub fn push_live_row(&mut self, row: &[LiveCell]) {
        let cells: Vec<ScrollbackCell> = row
            .iter()
            .take(self.width)
            .map(ScrollbackCell::from_live)
            .collect();
        self.push_row(&cells);
    }

    /// Remove and return the most recently pushed row
    pub fn pop_row(&mut self) -> Option<Vec<ScrollbackCell>> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        self.head = (self.head + self.capacity - 1) % self.capacity;
        if self.scroll_offset > 0 {
            self.scroll_offset -= 1;
        }
        Some(self.slot(self.head).to_vec())
    }

    /// Pop the newest row as live cells, `cols` wide
    pub fn pop_live_row(&mut self, cols: usize) -> Option<Vec<LiveCell>> {
        let row = self.pop_row()?;
        let mut live: Vec<LiveCell> = row.iter().take(cols).map(ScrollbackCell::to_live).collect();
        live.resize(cols, LiveCell::BLANK);
        Some(live)
    }

    /// Row by age (0 = newest)
    pub fn row(&self, age: usize) -> Option<&[ScrollbackCell]> {
        if age >= self.count {
            return None;
        }
        let index = (self.head + self.capacity - 1 - age) % self.capacity;
        Some(self.slot(index))
    }

    /// Resolve a display row against the current scroll offset
    pub fn row_at(&self, display_row: usize, live_rows: usize) -> RowSource<'_> {
        if display_row >= live_rows {
            return RowSource::Blank;
        }
        if display_row < self.scroll_offset {
            let age = self.scroll_offset - 1 - display_row;
            match self.row(age) {
                Some(cells) => RowSource::History(cells),
                None => RowSource::Blank,
            }
        } else {
            RowSource::Live(display_row - self.scroll_offset)
        }
    }

    pub fn cell_at(&self, display_row: usize, col: usize, live_rows: usize) -> CellSource {
        match self.row_at(display_row, live_rows) {
            RowSource::History(cells) => match cells.get(col) {
                Some(cell) => CellSource::History(*cell),
                None => CellSource::Blank,
            },
            RowSource::Live(row) => CellSource::Live { row, col },
            RowSource::Blank => CellSource::Blank,
        }
    }

    pub fn set_scroll_offset(&mut self, offset: usize) {
        self.scroll_offset = offset.min(self.count);
    }

    /// Scroll back by half a page
    pub fn scroll_up(&mut self, page_rows: usize) {
        let step = (page_rows / 2).max(1);
        self.set_scroll_offset(self.scroll_offset + step);
    }

    /// Scroll forward by half a page
    pub fn scroll_down(&mut self, page_rows: usize) {
        let step = (page_rows / 2).max(1);
        self.set_scroll_offset(self.scroll_offset.saturating_sub(step));
    }

    pub fn scroll_up_line(&mut self) {
        self.set_scroll_offset(self.scroll_offset + 1);
    }

    pub fn scroll_down_line(&mut self) {
        self.set_scroll_offset(self.scroll_offset.saturating_sub(1));
    }

    pub fn scroll_reset(&mut self) {
        self.scroll_offset = 0;
    }

    /// Drop all history (full session reset only)
    pub fn clear(&mut self) {
        self.cells.fill(ScrollbackCell::BLANK);
        self.head = 0;
        self.count = 0;
        self.scroll_offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row_of(ch: u8, width: usize) -> Vec<ScrollbackCell> {
        vec![
            ScrollbackCell {
                ch,
                ..ScrollbackCell::BLANK
            };
            width
        ]
    }

    fn first_char(source: RowSource<'_>) -> Option<u8> {
        match source {
            RowSource::History(cells) => Some(cells[0].ch),
            _ => None,
        }
    }

    #[test]
    fn test_cell_is_four_bytes() {
        assert_eq!(std::mem::size_of::<ScrollbackCell>(), 4);
    }

    #[test]
    fn test_blank_uses_default_flags() {
        let blank = ScrollbackCell::default();
        assert_eq!(blank.ch, b' ');
        assert_eq!(blank.fg, 0);
        assert_eq!(blank.attrs.bits(), 32 | 64);
        assert_eq!(blank.fg_id(), ColorId::DefaultFg);
        assert_eq!(blank.bg_id(), ColorId::DefaultBg);
    }

    #[test]
    fn test_narrow_char() {
        assert_eq!(narrow_char('A'), b'A');
        assert_eq!(narrow_char('\t'), b' ');
        assert_eq!(narrow_char('\u{e9}'), 0xe9);
        assert_eq!(narrow_char('\u{2500}'), b'-');
        assert_eq!(narrow_char('\u{2551}'), b'|');
        assert_eq!(narrow_char('\u{250c}'), b'+');
        assert_eq!(narrow_char('\u{2588}'), b'#');
        assert_eq!(narrow_char('\u{4e2d}'), b'?');
    }

    #[test]
    fn test_from_live_compacts_colors() {
        let live = LiveCell {
            ch: 'x',
            width: 1,
            fg: ColorId::Truecolor(255, 0, 0),
            bg: ColorId::DefaultBg,
            flags: AttrFlags::BOLD | AttrFlags::INVERSE,
        };
        let stored = ScrollbackCell::from_live(&live);
        assert_eq!(stored.ch, b'x');
        assert_eq!(stored.fg, 196);
        assert!(stored.attrs.contains(SbAttrs::BOLD | SbAttrs::REVERSE | SbAttrs::DEFAULT_BG));
        assert!(!stored.attrs.contains(SbAttrs::DEFAULT_FG));

        let back = stored.to_live();
        assert_eq!(back.fg, ColorId::Indexed(196));
        assert_eq!(back.bg, ColorId::DefaultBg);
        assert!(back.flags.contains(AttrFlags::BOLD | AttrFlags::INVERSE));
    }

    #[test]
    fn test_push_truncates_and_pads() {
        let mut ring = ScrollbackRing::new(4, 8);
        ring.push_row(&row_of(b'w', 20));
        assert_eq!(ring.row(0).map(|r| r.len()), Some(8));

        ring.push_row(&row_of(b's', 3));
        let row = ring.row(0).map(|r| r.to_vec()).unwrap_or_default();
        assert_eq!(row[2].ch, b's');
        assert_eq!(row[3], ScrollbackCell::BLANK);
    }

    #[test]
    fn test_pop_on_empty_ring() {
        let mut ring = ScrollbackRing::new(4, 8);
        assert_eq!(ring.pop_row(), None);
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn test_wraparound_keeps_newest() {
        let mut ring = ScrollbackRing::new(3, 4);
        for ch in b'a'..=b'e' {
            ring.push_row(&row_of(ch, 4));
        }
        assert_eq!(ring.count(), 3);
        assert_eq!(ring.row(0).map(|r| r[0].ch), Some(b'e'));
        assert_eq!(ring.row(2).map(|r| r[0].ch), Some(b'c'));
        assert_eq!(ring.row(3), None);

        assert_eq!(ring.pop_row().map(|r| r[0].ch), Some(b'e'));
        assert_eq!(ring.pop_row().map(|r| r[0].ch), Some(b'd'));
        assert_eq!(ring.pop_row().map(|r| r[0].ch), Some(b'c'));
        assert_eq!(ring.pop_row(), None);
    }

    #[test]
    fn test_row_at_sources() {
        let mut ring = ScrollbackRing::new(10, 4);
        for ch in b'a'..=b'e' {
            ring.push_row(&row_of(ch, 4));
        }

        assert_eq!(ring.row_at(0, 24), RowSource::Live(0));
        assert_eq!(ring.row_at(24, 24), RowSource::Blank);

        ring.set_scroll_offset(2);
        assert_eq!(first_char(ring.row_at(0, 24)), Some(b'd'));
        assert_eq!(first_char(ring.row_at(1, 24)), Some(b'e'));
        assert_eq!(ring.row_at(2, 24), RowSource::Live(0));

        assert_eq!(ring.cell_at(0, 4, 24), CellSource::Blank);
        assert_eq!(ring.cell_at(5, 3, 24), CellSource::Live { row: 3, col: 3 });
    }

    #[test]
    fn test_offset_pinned_at_top() {
        let mut ring = ScrollbackRing::new(10, 4);
        for ch in b'a'..=b'c' {
            ring.push_row(&row_of(ch, 4));
        }
        ring.set_scroll_offset(3);
        ring.push_row(&row_of(b'd', 4));
        assert_eq!(ring.scroll_offset(), 4);

        let mut full = ScrollbackRing::new(3, 4);
        for ch in b'a'..=b'c' {
            full.push_row(&row_of(ch, 4));
        }
        full.set_scroll_offset(3);
        full.push_row(&row_of(b'd', 4));
        assert_eq!(full.scroll_offset(), 3);
    }

    #[test]
    fn test_scroll_navigation() {
        let mut ring = ScrollbackRing::new(50, 4);
        for _ in 0..30 {
            ring.push_row(&row_of(b'x', 4));
        }
        ring.scroll_up(24);
        assert_eq!(ring.scroll_offset(), 12);
        ring.scroll_up(24);
        ring.scroll_up(24);
        assert_eq!(ring.scroll_offset(), 30);
        ring.scroll_down_line();
        assert_eq!(ring.scroll_offset(), 29);
        ring.scroll_down(1);
        assert_eq!(ring.scroll_offset(), 28);
        assert!(ring.is_scrolled());
        ring.scroll_reset();
        assert!(!ring.is_scrolled());
        ring.scroll_down_line();
        assert_eq!(ring.scroll_offset(), 0);
    }

    #[test]
    fn test_pop_live_row_pads_to_width() {
        let mut ring = ScrollbackRing::new(4, 4);
        ring.push_row(&row_of(b'q', 4));
        let row = ring.pop_live_row(6).unwrap_or_default();
        assert_eq!(row.len(), 6);
        assert_eq!(row[0].ch, 'q');
        assert_eq!(row[5], LiveCell::BLANK);
    }

    #[test]
    fn test_clear() {
        let mut ring = ScrollbackRing::new(4, 4);
        ring.push_row(&row_of(b'q', 4));
        ring.set_scroll_offset(1);
        ring.clear();
        assert_eq!(ring.count(), 0);
        assert_eq!(ring.scroll_offset(), 0);
        assert_eq!(ring.row(0), None);
    }

    proptest! {
        #[test]
        fn prop_count_bounded_and_pop_inverts_push(ops in prop::collection::vec(any::<Option<u8>>(), 0..300)) {
            let mut ring = ScrollbackRing::new(16, 8);
            for op in ops {
                match op {
                    Some(b) => {
                        let row = row_of(b'a' + b % 26, 8);
                        ring.push_row(&row);
                        let popped = ring.pop_row();
                        prop_assert_eq!(popped.as_deref(), Some(row.as_slice()));
                        ring.push_row(&row);
                    }
                    None => {
                        ring.pop_row();
                    }
                }
                prop_assert!(ring.count() <= ring.capacity());
                prop_assert!(ring.scroll_offset() <= ring.count());
            }
        }

        #[test]
        fn prop_scrolled_view_is_stable(pushes in 1usize..80, k in 1usize..40) {
            let mut ring = ScrollbackRing::new(32, 4);
            for i in 0..pushes {
                let row = vec![ScrollbackCell { fg: i as u8, ..ScrollbackCell::BLANK }; 4];
                ring.push_row(&row);
            }
            ring.set_scroll_offset(k);
            let k = ring.scroll_offset();
            prop_assume!(k > 0 && k < ring.count());

            let before = match ring.row_at(0, 24) {
                RowSource::History(cells) => cells[0].fg,
                _ => return Err(TestCaseError::fail("expected history")),
            };
            ring.push_row(&row_of(b'n', 4));
            let after = match ring.row_at(0, 24) {
                RowSource::History(cells) => cells[0].fg,
                _ => return Err(TestCaseError::fail("expected history")),
            };
            prop_assert_eq!(before, after);
        }
    }
}
