//! Session control
//!
//! The controller owns the recorder's public API; shortcuts map key presses
//! onto it.

pub mod session;
pub mod shortcuts;

pub use session::SessionController;
pub use shortcuts::{KeyPress, ShortcutAction, ShortcutMap};
