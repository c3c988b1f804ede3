//! Debounced diff/update previews.
//!
//! Translates hover and parameter-edit intents into backend preview queries.
//! Two mechanisms keep rapid interaction from flooding the backend or racing
//! itself:
//!
//! - debounce timers (a `tokio::time::sleep` raced against a
//!   `CancellationToken`; re-scheduling cancels the previous timer outright),
//! - a generation counter so only the most recently started network call's
//!   result is honored; superseded responses are discarded, never surfaced.
//!
//! Methods spawn onto the ambient tokio runtime and must be called from
//! within one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::types::Step;
use crate::gateway::BackendGateway;

/// UI-layer hook the coordinator drives. The grid itself is out of scope;
/// implementations apply preview records to it and restore the original
/// content on cancel.
pub trait PreviewSink: Send + Sync {
    fn apply_records(&self, records: Value);
    fn restore_original(&self);
}

struct PreviewState {
    /// Debounce timer for the next scheduled preview action.
    pending: Option<CancellationToken>,
    /// Identifies the live network call; bumped when a new call starts or
    /// the preview is cancelled, orphaning older in-flight responses.
    generation: u64,
    /// Whether preview records are currently applied to the grid.
    previewing: bool,
}

pub struct PreviewCoordinator {
    gateway: Arc<dyn BackendGateway>,
    sink: Arc<dyn PreviewSink>,
    hover_delay: Duration,
    cancel_delay: Duration,
    update_delay: Duration,
    state: Mutex<PreviewState>,
}

impl PreviewCoordinator {
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        sink: Arc<dyn PreviewSink>,
        config: &EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            sink,
            hover_delay: Duration::from_millis(config.hover_preview_delay_ms),
            cancel_delay: Duration::from_millis(config.cancel_preview_delay_ms),
            update_delay: Duration::from_millis(config.update_preview_delay_ms),
            state: Mutex::new(PreviewState {
                pending: None,
                generation: 0,
                previewing: false,
            }),
        })
    }

    /// Cancel any pending debounce timer and install a fresh one.
    fn arm_debounce(&self) -> CancellationToken {
        let mut state = self.state.lock().unwrap();
        if let Some(old) = state.pending.take() {
            old.cancel();
        }
        let token = CancellationToken::new();
        state.pending = Some(token.clone());
        token
    }

    /// Promote an expired debounce into the live network call. Returns `None`
    /// when the timer was cancelled between expiry and this call.
    fn begin_request(&self, token: &CancellationToken) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        if token.is_cancelled() {
            return None;
        }
        state.pending = None;
        state.generation += 1;
        Some(state.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().unwrap().generation == generation
    }

    fn apply_if_current(&self, generation: u64, request_id: Uuid, records: Value) {
        // The lock stays held across the sink call: a concurrent
        // `cancel_preview` must not restore the grid between the generation
        // check and the apply, or the cancelled records would land on top of
        // the restored content.
        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            tracing::debug!(%request_id, "stale preview response discarded");
            return;
        }
        state.previewing = true;
        self.sink.apply_records(records);
        tracing::debug!(%request_id, "preview records applied");
    }

    /// Schedule a diff preview comparing the recipe state at `from_step`
    /// against the state at `to_step`, scoped to `column_id`. Debounced;
    /// superseded by any later schedule or cancel.
    pub fn on_step_hover_start(
        self: &Arc<Self>,
        preparation_id: String,
        from_step: String,
        to_step: String,
        column_id: Option<String>,
    ) {
        let token = self.arm_debounce();
        let this = Arc::clone(self);
        let request_id = Uuid::new_v4();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(this.hover_delay) => {}
            }
            let Some(generation) = this.begin_request(&token) else {
                return;
            };

            match this
                .gateway
                .request_diff_preview(&preparation_id, &from_step, &to_step, column_id.as_deref())
                .await
            {
                Ok(records) => this.apply_if_current(generation, request_id, records),
                Err(e) => {
                    tracing::warn!(%request_id, from = %from_step, to = %to_step, error = %e,
                        "diff preview request failed");
                }
            }
        });
    }

    /// Schedule a preview discard. The shorter delay keeps a hover that
    /// merely crosses a step from flickering the grid.
    pub fn on_step_hover_end(self: &Arc<Self>) {
        let token = self.arm_debounce();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(this.cancel_delay) => {}
            }
            if token.is_cancelled() {
                return;
            }
            this.cancel_preview();
        });
    }

    /// Schedule an update preview showing `step` with `new_params` in place
    /// of its current parameters.
    ///
    /// No-ops, by design rather than as failures: an inactive step cannot be
    /// previewed, and unchanged parameters must not trigger a backend call
    /// or visible flicker.
    pub fn on_params_changed_preview(
        self: &Arc<Self>,
        preparation_id: String,
        last_active_step: String,
        step: &Step,
        new_params: Map<String, Value>,
    ) {
        if step.inactive {
            tracing::debug!(step_id = %step.step_id, "update preview skipped: step inactive");
            return;
        }
        let Some(action_params) = step.action_parameters.as_ref() else {
            return;
        };
        let mut merged = action_params.parameters.clone();
        merged.extend(new_params);
        if merged == action_params.parameters {
            tracing::debug!(step_id = %step.step_id, "update preview skipped: parameters unchanged");
            return;
        }

        let step_id = step.step_id.clone();
        let token = self.arm_debounce();
        let this = Arc::clone(self);
        let request_id = Uuid::new_v4();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(this.update_delay) => {}
            }
            let Some(generation) = this.begin_request(&token) else {
                return;
            };

            match this
                .gateway
                .request_update_preview(&preparation_id, &last_active_step, &step_id, &merged)
                .await
            {
                Ok(records) => this.apply_if_current(generation, request_id, records),
                Err(e) => {
                    tracing::warn!(%request_id, step_id = %step_id, error = %e,
                        "update preview request failed");
                }
            }
        });
    }

    /// Synchronously discard any scheduled or in-flight preview and restore
    /// the original grid content. Safe to call when no preview is active.
    pub fn cancel_preview(&self) {
        let was_previewing = {
            let mut state = self.state.lock().unwrap();
            if let Some(pending) = state.pending.take() {
                pending.cancel();
            }
            // Orphan any in-flight response.
            state.generation += 1;
            std::mem::replace(&mut state.previewing, false)
        };
        if was_previewing {
            self.sink.restore_original();
        }
    }
}
