//! SevenTTY terminal client core
//!
//! Sessions (SSH, Telnet, raw TCP and a local shell) grouped into windows,
//! each backed by a screen model with scrollback.

pub mod config;
pub mod core;
pub mod ui;
pub mod wm;
