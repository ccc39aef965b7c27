//! Session engine.
//!
//! This module contains the connection and screen plumbing:
//!
//! - **color**: color ids, palettes and 8-bit compaction
//! - **scrollback**: compact history ring
//! - **telnet**: option negotiation and line-ending rules
//! - **transport**: cancellable TCP transport
//! - **ssh**: SSH backend seam and known hosts
//! - **screen**: screen-model contract
//! - **term**: bundled VT100/xterm screen model
//! - **lifecycle**: worker state machine and buffer handoff
//! - **worker**: Telnet, raw TCP and SSH drivers
//! - **shell**: local shell line editor
//! - **session**: one tab's screen, view and connection
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── ScreenModel (VtScreen)
//! ├── SessionView (ScrollbackRing, cursor, selection)
//! ├── LocalShell
//! └── SessionLifecycle
//!     └── WorkerLink ── worker thread
//!         └── SessionDriver (Telnet / raw / SSH)
//!             └── Transport
//! ```

pub mod color;
pub mod scrollback;
pub mod telnet;
pub mod transport;
pub mod ssh;
pub mod screen;
pub mod term;
pub mod lifecycle;
pub mod worker;
pub mod shell;
pub mod session;
