//! Windows and the window table

use std::collections::HashMap;

use super::table::{SessionId, MAX_SESSIONS};

pub const MAX_WINDOWS: usize = 8;

/// Window ID type
pub type WindowId = usize;

/// Character grid of a window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    pub cols: u16,
    pub rows: u16,
}

impl GridSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// A terminal surface holding an ordered set of session tabs
#[derive(Debug)]
pub struct Window {
    pub id: WindowId,
    session_ids: Vec<SessionId>,
    active_idx: usize,
    pub grid: GridSize,
}

impl Window {
    pub fn new(id: WindowId, grid: GridSize) -> Self {
        Self {
            id,
            session_ids: Vec::new(),
            active_idx: 0,
            grid,
        }
    }

    pub fn sessions(&self) -> &[SessionId] {
        &self.session_ids
    }

    pub fn is_empty(&self) -> bool {
        self.session_ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.session_ids.len() >= MAX_SESSIONS
    }

    pub fn active_idx(&self) -> usize {
        self.active_idx
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session_ids.get(self.active_idx).copied()
    }

    pub fn contains(&self, sid: SessionId) -> bool {
        self.session_ids.contains(&sid)
    }

    /// Append a tab and make it active
    pub fn add_session(&mut self, sid: SessionId) -> bool {
        if self.is_full() || self.contains(sid) {
            return false;
        }
        self.session_ids.push(sid);
        self.active_idx = self.session_ids.len() - 1;
        true
    }

    /// Remove a tab, keeping the active index valid
    pub fn remove_session(&mut self, sid: SessionId) -> bool {
        let Some(pos) = self.session_ids.iter().position(|&s| s == sid) else {
            return false;
        };
        self.session_ids.remove(pos);
        if pos < self.active_idx {
            self.active_idx -= 1;
        }
        if self.active_idx >= self.session_ids.len() {
            self.active_idx = self.session_ids.len().saturating_sub(1);
        }
        true
    }

    pub fn switch_to(&mut self, idx: usize) -> bool {
        if idx < self.session_ids.len() {
            self.active_idx = idx;
            true
        } else {
            false
        }
    }

    pub fn next(&mut self) {
        if !self.session_ids.is_empty() {
            self.active_idx = (self.active_idx + 1) % self.session_ids.len();
        }
    }

    pub fn prev(&mut self) {
        if !self.session_ids.is_empty() {
            self.active_idx = if self.active_idx == 0 {
                self.session_ids.len() - 1
            } else {
                self.active_idx - 1
            };
        }
    }
}

/// All windows in creation order
#[derive(Debug, Default)]
pub struct WindowTable {
    windows: HashMap<WindowId, Window>,
    order: Vec<WindowId>,
    active: Option<WindowId>,
    next_id: WindowId,
}

impl WindowTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Create an empty window and make it active
    pub fn create(&mut self, grid: GridSize) -> Option<WindowId> {
        if self.windows.len() >= MAX_WINDOWS {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.windows.insert(id, Window::new(id, grid));
        self.order.push(id);
        self.active = Some(id);
        Some(id)
    }

    pub fn remove(&mut self, id: WindowId) -> Option<Window> {
        let window = self.windows.remove(&id)?;
        let pos = self.order.iter().position(|&w| w == id);
        self.order.retain(|&w| w != id);
        if self.active == Some(id) {
            // neighbour to the left, like closing a tab
            self.active = pos
                .and_then(|p| self.order.get(p.saturating_sub(1)).copied())
                .or_else(|| self.order.first().copied());
        }
        Some(window)
    }

    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    pub fn active(&self) -> Option<WindowId> {
        self.active
    }

    pub fn set_active(&mut self, id: WindowId) -> bool {
        if self.windows.contains_key(&id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    pub fn next(&mut self) {
        if let Some(pos) = self.order.iter().position(|&w| Some(w) == self.active) {
            self.active = Some(self.order[(pos + 1) % self.order.len()]);
        }
    }

    /// Window holding `sid`
    pub fn find(&self, sid: SessionId) -> Option<WindowId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.windows.get(id).map_or(false, |w| w.contains(sid)))
    }

    pub fn order(&self) -> &[WindowId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.order.iter().filter_map(|id| self.windows.get(id))
    }
}
