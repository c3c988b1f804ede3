//! Preparation engine: recipe state, undo/redo history, preview coordination.

pub mod filters;
pub mod history;
pub mod preview;
pub mod recipe;
pub mod retry;
pub mod session;
pub mod types;
