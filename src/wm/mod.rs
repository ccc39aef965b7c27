//! Window Manager - windows holding session tabs.
//!
//! This module provides the session and window registries:
//!
//! - **table**: `SessionTable`, fixed slots with generation-checked ids
//! - **window**: `Window` and `WindowTable`
//! - **manager**: Top-level `WindowManager`, the input and render entry points
//!
//! # Module Hierarchy
//!
//! ```text
//! wm/
//! ├── mod.rs      - Module exports
//! ├── manager.rs  - WindowManager (top-level coordinator)
//! ├── window.rs   - Window (ordered session tabs)
//! └── table.rs    - SessionTable (session slots)
//! ```

pub mod table;
pub mod window;
pub mod manager;

pub use table::{SessionId, SessionTable, MAX_SESSIONS};
pub use window::{GridSize, Window, WindowId, WindowTable, MAX_WINDOWS};
pub use manager::{SessionInfo, WindowInfo, WindowManager, WmError};
