//! Terminal renderer using crossterm
//!
//! Draws the active session of the active window below a one-row tab bar.
//! Cells are read through the session's scroll view, so scrolled-back history
//! and the live screen go through the same path.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{DisableBracketedPaste, EnableBracketedPaste},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};

use crate::core::color::{cell_rgb, Palette, Rgb};
use crate::core::lifecycle::LifecycleState;
use crate::core::screen::{AttrFlags, LiveCell};
use crate::core::session::CellView;
use crate::wm::{SessionId, SessionInfo, WindowInfo, WindowManager};

/// Rows taken by the tab bar above the session grid
pub const TAB_BAR_ROWS: u16 = 1;

/// One tab bar entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabSegment {
    pub text: String,
    pub active: bool,
}

/// Tab bar entries for the active window, followed by the window position
pub fn tab_segments(windows: &[WindowInfo], sessions: &[SessionInfo]) -> Vec<TabSegment> {
    let Some((pos, window)) = windows.iter().enumerate().find(|(_, w)| w.active) else {
        return Vec::new();
    };

    let mut segments: Vec<TabSegment> = window
        .sessions
        .iter()
        .enumerate()
        .filter_map(|(i, sid)| {
            let info = sessions.iter().find(|s| s.id == *sid)?;
            let name = if info.title.is_empty() {
                &info.label
            } else {
                &info.title
            };
            let mark = match info.state {
                LifecycleState::Waiting => "…",
                _ => "",
            };
            Some(TabSegment {
                text: format!(" {}:{}{} ", i + 1, name, mark),
                active: i == window.active_idx,
            })
        })
        .collect();

    segments.push(TabSegment {
        text: format!(" [{}/{}] ", pos + 1, windows.len()),
        active: false,
    });
    segments
}

/// Drawing attributes of one glyph
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Style {
    fg: Rgb,
    bg: Rgb,
    flags: AttrFlags,
}

/// Resolve a display cell to a glyph and its style. Right halves of wide
/// characters yield `None`.
fn glyph(
    view: CellView,
    selected: bool,
    palette: &Palette,
    bold_is_bright: bool,
) -> Option<(char, Style)> {
    let cell = match view {
        CellView::History(cell) => cell.to_live(),
        CellView::Live(cell) if cell.is_continuation() => return None,
        CellView::Live(cell) => cell,
        CellView::Blank => LiveCell::BLANK,
    };

    let reverse = cell.flags.contains(AttrFlags::INVERSE) != selected;
    let (fg, bg) = cell_rgb(
        cell.fg,
        cell.bg,
        cell.flags.contains(AttrFlags::BOLD),
        reverse,
        palette,
        bold_is_bright,
    );
    let ch = if cell.flags.contains(AttrFlags::HIDDEN) || cell.ch < ' ' {
        ' '
    } else {
        cell.ch
    };
    let flags = cell.flags
        & (AttrFlags::BOLD | AttrFlags::ITALIC | AttrFlags::UNDERLINE | AttrFlags::STRIKETHROUGH);
    Some((ch, Style { fg, bg, flags }))
}

pub struct Renderer {
    initialized: bool,
    /// Session drawn last frame; a change forces a full redraw
    last_session: Option<SessionId>,
    /// Tab bar and scroll offset drawn last frame
    last_bar: (Vec<TabSegment>, usize),
    force_full: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            initialized: false,
            last_session: None,
            last_bar: (Vec::new(), 0),
            force_full: true,
        }
    }

    /// Enter raw mode and the alternate screen
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableBracketedPaste,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;
        Ok(())
    }

    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            DisableBracketedPaste,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();
        terminal::disable_raw_mode()
    }

    /// Redraw everything on the next frame
    pub fn invalidate(&mut self) {
        self.force_full = true;
    }

    /// Host terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Session grid size for a host terminal of `cols` x `rows`
    pub fn grid_for(cols: u16, rows: u16) -> (u16, u16) {
        (cols.max(1), rows.saturating_sub(TAB_BAR_ROWS).max(1))
    }

    pub fn render(&mut self, wm: &mut WindowManager) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());
        self.draw(&mut out, wm)?;
        out.flush()
    }

    /// Draw one frame into `out`
    pub fn draw<W: Write>(&mut self, out: &mut W, wm: &mut WindowManager) -> io::Result<()> {
        let Some(sid) = wm.active_session() else {
            if self.last_session.take().is_some() {
                queue!(out, ResetColor, Clear(ClearType::All))?;
            }
            return Ok(());
        };

        let full = self.force_full || self.last_session != Some(sid);
        let segments = tab_segments(&wm.windows(), &wm.sessions());

        let Some(session) = wm.session_mut(sid) else {
            return Ok(());
        };
        let damage = session.take_damage();
        let (cols, rows) = session.size();
        let bar = (segments, session.view().ring.scroll_offset());
        let (top, bottom) = if full {
            (0, rows)
        } else {
            (damage.top.min(rows), damage.bottom.min(rows))
        };
        if !full && top >= bottom && bar == self.last_bar {
            return Ok(());
        }

        queue!(out, Hide)?;
        if full {
            queue!(out, ResetColor, Clear(ClearType::All))?;
        }

        let palette = session.palette().clone();
        if full || bar != self.last_bar {
            self.draw_tab_bar(out, &bar.0, cols, &palette, bar.1)?;
            self.last_bar = bar;
        }

        let bold_is_bright = session.bold_is_bright();
        for row in top..bottom {
            queue!(out, MoveTo(0, row + TAB_BAR_ROWS))?;
            let mut current: Option<Style> = None;
            let mut run = String::with_capacity(cols as usize);
            for col in 0..cols {
                let view = session.read_cell(row, col);
                let Some((ch, style)) =
                    glyph(view, session.is_selected(row, col), &palette, bold_is_bright)
                else {
                    continue;
                };
                if current != Some(style) {
                    if let Some(prev) = current {
                        Self::flush_run(out, &prev, &run)?;
                        run.clear();
                    }
                    current = Some(style);
                }
                run.push(ch);
            }
            if let Some(style) = current {
                Self::flush_run(out, &style, &run)?;
            }
        }

        queue!(out, ResetColor, SetAttribute(Attribute::Reset))?;
        let cursor = session.cursor();
        if cursor.visible {
            queue!(out, MoveTo(cursor.col, cursor.row + TAB_BAR_ROWS), Show)?;
        }

        self.last_session = Some(sid);
        self.force_full = false;
        Ok(())
    }

    fn draw_tab_bar<W: Write>(
        &self,
        out: &mut W,
        segments: &[TabSegment],
        cols: u16,
        palette: &Palette,
        scroll_offset: usize,
    ) -> io::Result<()> {
        queue!(out, MoveTo(0, 0), SetAttribute(Attribute::Reset))?;
        let idle = Style {
            fg: palette.bg,
            bg: palette.ansi[7],
            flags: AttrFlags::empty(),
        };
        let active = Style {
            fg: palette.ansi[15],
            bg: palette.ansi[4],
            flags: AttrFlags::BOLD,
        };

        let mut used = 0usize;
        let width = cols as usize;
        for segment in segments {
            let text: String = segment.text.chars().take(width - used.min(width)).collect();
            used += text.chars().count();
            Self::flush_run(out, if segment.active { &active } else { &idle }, &text)?;
        }
        if scroll_offset > 0 && used < width {
            let text: String = format!(" [+{}] ", scroll_offset)
                .chars()
                .take(width - used)
                .collect();
            used += text.chars().count();
            Self::flush_run(out, &active, &text)?;
        }
        if used < width {
            Self::flush_run(out, &idle, &" ".repeat(width - used))?;
        }
        Ok(())
    }

    fn flush_run<W: Write>(out: &mut W, style: &Style, text: &str) -> io::Result<()> {
        queue!(out, SetAttribute(Attribute::Reset))?;
        if style.flags.contains(AttrFlags::BOLD) {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if style.flags.contains(AttrFlags::ITALIC) {
            queue!(out, SetAttribute(Attribute::Italic))?;
        }
        if style.flags.contains(AttrFlags::UNDERLINE) {
            queue!(out, SetAttribute(Attribute::Underlined))?;
        }
        if style.flags.contains(AttrFlags::STRIKETHROUGH) {
            queue!(out, SetAttribute(Attribute::CrossedOut))?;
        }
        queue!(
            out,
            SetForegroundColor(style.fg.to_crossterm()),
            SetBackgroundColor(style.bg.to_crossterm()),
            Print(text)
        )
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scrollback::ScrollbackCell;
    use crate::core::session::SessionOptions;
    use crate::core::color::{resolve, ColorId};
    use crate::wm::GridSize;

    fn default_style(palette: &Palette) -> Style {
        Style {
            fg: resolve(ColorId::DefaultFg, palette),
            bg: resolve(ColorId::DefaultBg, palette),
            flags: AttrFlags::empty(),
        }
    }

    fn manager() -> WindowManager {
        let mut wm = WindowManager::new(SessionOptions::default(), GridSize::new(40, 6));
        wm.new_window().unwrap();
        wm
    }

    #[test]
    fn test_tab_segments_for_active_window() {
        let mut wm = manager();
        let wid = wm.active_window().unwrap();
        wm.new_session(wid).unwrap();

        let segments = tab_segments(&wm.windows(), &wm.sessions());
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, " 1:shell ");
        assert!(!segments[0].active);
        assert!(segments[1].active);
        assert_eq!(segments[2].text, " [1/1] ");
    }

    #[test]
    fn test_glyph_colors_and_selection() {
        let palette = Palette::dark();
        let (ch, style) = glyph(CellView::Blank, false, &palette, true).unwrap();
        assert_eq!(ch, ' ');
        assert_eq!(style, default_style(&palette));

        let (_, selected) = glyph(CellView::Blank, true, &palette, true).unwrap();
        assert_eq!(selected.fg, palette.bg);
        assert_eq!(selected.bg, palette.fg);

        let wide_tail = LiveCell {
            width: 0,
            ..LiveCell::BLANK
        };
        assert!(glyph(CellView::Live(wide_tail), false, &palette, true).is_none());

        let mut stored = ScrollbackCell::BLANK;
        stored.ch = b'x';
        let (ch, _) = glyph(CellView::History(stored), false, &palette, true).unwrap();
        assert_eq!(ch, 'x');
    }

    #[test]
    fn test_draw_shows_banner_then_only_damage() {
        let mut wm = manager();
        let mut renderer = Renderer::new();

        let mut frame = Vec::new();
        renderer.draw(&mut frame, &mut wm).unwrap();
        let text = String::from_utf8_lossy(&frame);
        assert!(text.contains("SevenTTY local shell"));
        assert!(text.contains("1:shell"));

        // nothing changed
        let mut frame = Vec::new();
        renderer.draw(&mut frame, &mut wm).unwrap();
        assert!(frame.is_empty());

        let sid = wm.active_session().unwrap();
        wm.write_input(sid, b"hel").unwrap();
        let mut frame = Vec::new();
        renderer.draw(&mut frame, &mut wm).unwrap();
        let text = String::from_utf8_lossy(&frame);
        assert!(text.contains("hel"));
        assert!(!text.contains("SevenTTY local shell"));
    }

    #[test]
    fn test_grid_reserves_tab_bar() {
        assert_eq!(Renderer::grid_for(80, 25), (80, 24));
        assert_eq!(Renderer::grid_for(0, 0), (1, 1));
    }
}
