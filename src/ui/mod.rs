//! Terminal front-end
//!
//! - **keymapper**: crossterm key events to session input bytes
//! - **renderer**: draws the active tab and the tab bar

pub mod keymapper;
pub mod renderer;

pub use keymapper::*;
pub use renderer::*;
