//! Async undo/redo stack.
//!
//! Each entry pairs an undo and a redo closure, both producing an async
//! result (typically a gateway mutation followed by a recipe refresh). The
//! stack guarantees at most one undo or redo in flight at any time, and a
//! failed action returns to its originating stack unchanged so the operation
//! is retryable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::PrepError;

/// Future produced by an undo or redo closure.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), PrepError>> + Send>>;

/// An undo or redo closure. `Fn` rather than `FnOnce`: the same entry can be
/// undone and redone any number of times.
pub type ActionFn = Box<dyn Fn() -> ActionFuture + Send + Sync>;

/// Wrap an async closure into an [`ActionFn`].
pub fn action<F, Fut>(f: F) -> ActionFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PrepError>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// One undoable operation.
pub struct HistoryEntry {
    undo: ActionFn,
    redo: ActionFn,
}

struct StackState {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    /// Re-entrancy guards: undo and redo are mutually exclusive with
    /// themselves and with each other. A second call while one is in flight
    /// is dropped, not queued.
    undoing: bool,
    redoing: bool,
}

/// Bounded-depth undo/redo stack of paired async actions.
///
/// Methods take `&self`; the state lives behind a mutex so the stack can be
/// shared (`Arc<ActionStack>`) between the session facade and UI handlers.
/// The lock is never held across an await point.
pub struct ActionStack {
    state: Mutex<StackState>,
    max_depth: usize,
}

impl ActionStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            state: Mutex::new(StackState {
                undo_stack: Vec::new(),
                redo_stack: Vec::new(),
                undoing: false,
                redoing: false,
            }),
            max_depth,
        }
    }

    /// Push a new entry. Does not execute either closure.
    ///
    /// Adding a new action after undos clears the redo stack (standard
    /// history law), and the oldest entry is evicted past `max_depth`.
    pub fn add_action(&self, undo: ActionFn, redo: ActionFn) {
        let mut state = self.state.lock().unwrap();
        state.undo_stack.push(HistoryEntry { undo, redo });
        state.redo_stack.clear();

        if state.undo_stack.len() > self.max_depth {
            state.undo_stack.remove(0);
        }
    }

    /// Run the most recent entry's undo closure.
    ///
    /// Returns `Ok(false)` without touching anything when the stack is empty
    /// or another undo/redo is in flight. On success the entry moves to the
    /// redo stack. On failure the entry is pushed back onto the undo stack
    /// (depth unchanged) and the error is surfaced.
    pub async fn undo(&self) -> Result<bool, PrepError> {
        let entry = {
            let mut state = self.state.lock().unwrap();
            if state.undoing || state.redoing {
                tracing::debug!("undo dropped: history operation already in flight");
                return Ok(false);
            }
            let Some(entry) = state.undo_stack.pop() else {
                return Ok(false);
            };
            state.undoing = true;
            entry
        };

        let result = (entry.undo)().await;

        let mut state = self.state.lock().unwrap();
        state.undoing = false;
        match result {
            Ok(()) => {
                state.redo_stack.push(entry);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "undo failed, entry restored");
                state.undo_stack.push(entry);
                Err(e)
            }
        }
    }

    /// Run the most recently undone entry's redo closure. Symmetric with
    /// [`ActionStack::undo`]: failure pushes the entry back onto the redo
    /// stack so an immediate retry is possible.
    pub async fn redo(&self) -> Result<bool, PrepError> {
        let entry = {
            let mut state = self.state.lock().unwrap();
            if state.undoing || state.redoing {
                tracing::debug!("redo dropped: history operation already in flight");
                return Ok(false);
            }
            let Some(entry) = state.redo_stack.pop() else {
                return Ok(false);
            };
            state.redoing = true;
            entry
        };

        let result = (entry.redo)().await;

        let mut state = self.state.lock().unwrap();
        state.redoing = false;
        match result {
            Ok(()) => {
                state.undo_stack.push(entry);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "redo failed, entry restored");
                state.redo_stack.push(entry);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.state.lock().unwrap().undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.lock().unwrap().redo_stack.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.undo_stack.clear();
        state.redo_stack.clear();
    }
}
