//! Session table: a fixed set of slots addressed by generation-checked ids

use std::time::Instant;

use tracing::{debug, info};

use crate::core::lifecycle::WorkerLink;
use crate::core::session::Session;

pub const MAX_SESSIONS: usize = 8;

/// Stable session handle; stale once its slot is freed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub index: usize,
    pub generation: u32,
}

enum Slot {
    Free,
    Live(Session),
    /// Worker that would not stop in time; the slot waits for it
    Draining(WorkerLink),
}

struct Entry {
    generation: u32,
    slot: Slot,
}

pub struct SessionTable {
    entries: Vec<Entry>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        let entries = (0..MAX_SESSIONS)
            .map(|_| Entry {
                generation: 0,
                slot: Slot::Free,
            })
            .collect();
        Self { entries }
    }

    /// Store a session in a free slot, reaping finished drains first
    pub fn alloc(&mut self, session: Session) -> Option<SessionId> {
        self.reap();
        let index = self
            .entries
            .iter()
            .position(|e| matches!(e.slot, Slot::Free))?;
        let entry = &mut self.entries[index];
        entry.slot = Slot::Live(session);
        Some(SessionId {
            index,
            generation: entry.generation,
        })
    }

    fn entry(&self, id: SessionId) -> Option<&Entry> {
        self.entries
            .get(id.index)
            .filter(|e| e.generation == id.generation)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        match &self.entry(id)?.slot {
            Slot::Live(session) => Some(session),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        let entry = self
            .entries
            .get_mut(id.index)
            .filter(|e| e.generation == id.generation)?;
        match &mut entry.slot {
            Slot::Live(session) => Some(session),
            _ => None,
        }
    }

    /// Tear a session down. Its slot is free again unless the worker had to
    /// be abandoned, in which case it drains until the worker finishes.
    pub fn close(&mut self, id: SessionId) -> bool {
        self.close_all(&[id]) == 1
    }

    /// Close several sessions. Every worker is signalled before any is
    /// waited on, and all of them share one stop deadline.
    pub fn close_all(&mut self, ids: &[SessionId]) -> usize {
        let mut closing = Vec::with_capacity(ids.len());
        for &id in ids {
            let Some(entry) = self
                .entries
                .get_mut(id.index)
                .filter(|e| e.generation == id.generation)
            else {
                continue;
            };
            if !matches!(entry.slot, Slot::Live(_)) {
                continue;
            }
            let Slot::Live(mut session) = std::mem::replace(&mut entry.slot, Slot::Free) else {
                continue;
            };
            entry.generation = entry.generation.wrapping_add(1);
            session.begin_close();
            closing.push((id.index, session));
        }

        let timeout = closing
            .iter()
            .map(|(_, session)| session.stop_timeout())
            .max()
            .unwrap_or_default();
        let deadline = Instant::now() + timeout;

        let closed = closing.len();
        for (index, session) in closing {
            if let Some(link) = session.finish_close(deadline) {
                info!("slot {}: draining {}", index, link.label());
                self.entries[index].slot = Slot::Draining(link);
            }
        }
        closed
    }

    /// Free draining slots whose worker has finished
    pub fn reap(&mut self) -> usize {
        let mut freed = 0;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let Slot::Draining(link) = &mut entry.slot {
                if link.reap() {
                    debug!("slot {}: drained", index);
                    entry.slot = Slot::Free;
                    freed += 1;
                }
            }
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.slot, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn draining(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.slot, Slot::Draining(_)))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &Session)> {
        self.entries.iter().enumerate().filter_map(|(index, e)| match &e.slot {
            Slot::Live(session) => Some((
                SessionId {
                    index,
                    generation: e.generation,
                },
                session,
            )),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SessionId, &mut Session)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, e)| {
                let generation = e.generation;
                match &mut e.slot {
                    Slot::Live(session) => Some((SessionId { index, generation }, session)),
                    _ => None,
                }
            })
    }

    #[cfg(test)]
    fn park(&mut self, index: usize, link: WorkerLink) {
        self.entries[index].generation = self.entries[index].generation.wrapping_add(1);
        self.entries[index].slot = Slot::Draining(link);
    }
}
