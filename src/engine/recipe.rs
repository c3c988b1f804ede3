//! Recipe state: the ordered list of transformation steps for the loaded
//! preparation, the active-threshold pointer, and the early-preview staging
//! area.
//!
//! The list is replaced wholesale on [`StepRecipe::refresh`] — it is never
//! patched in place except for the early-preview push/pop. A failed refresh
//! leaves the previous list untouched so the UI never renders a half-built
//! recipe.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::engine::filters::flatten_filter_tree;
use crate::engine::retry::RetryPolicy;
use crate::engine::types::{
    ActionParameters, Step, StepColumn, Transformation, EARLY_PREVIEW_STEP_ID,
};
use crate::error::PrepError;
use crate::gateway::{BackendGateway, DynamicParamsScope};

/// Pristine pre-preview state, captured once per early-preview session so
/// that cancel always restores the true original recipe, not an
/// intermediate preview state.
#[derive(Debug, Clone)]
struct RecipeSnapshot {
    recipe: Vec<Step>,
    active_threshold: Option<String>,
}

pub struct StepRecipe {
    gateway: Arc<dyn BackendGateway>,
    retry: RetryPolicy,
    preparation_id: Option<String>,
    /// Sentinel initial step; `None` until the first successful refresh.
    initial_step: Option<Step>,
    recipe: Vec<Step>,
    /// Step id of the last enabled step. `None` means all steps active.
    active_threshold: Option<String>,
    preview_snapshot: Option<RecipeSnapshot>,
}

impl StepRecipe {
    pub fn new(gateway: Arc<dyn BackendGateway>, config: &EngineConfig) -> Self {
        Self {
            gateway,
            retry: RetryPolicy::from_config(&config.retry),
            preparation_id: None,
            initial_step: None,
            recipe: Vec::new(),
            active_threshold: None,
            preview_snapshot: None,
        }
    }

    pub fn preparation_id(&self) -> Option<&str> {
        self.preparation_id.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.recipe
    }

    pub fn initial_step(&self) -> Option<&Step> {
        self.initial_step.as_ref()
    }

    pub fn is_previewing(&self) -> bool {
        self.preview_snapshot.is_some()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Step at `index`. Negative indices resolve to the sentinel; an index
    /// past the end resolves to the last step when `default_last` is set.
    pub fn step_at(&self, index: isize, default_last: bool) -> Option<&Step> {
        if index < 0 {
            return self.initial_step.as_ref();
        }
        let index = index as usize;
        if index >= self.recipe.len() {
            if default_last {
                self.recipe.last().or(self.initial_step.as_ref())
            } else {
                None
            }
        } else {
            Some(&self.recipe[index])
        }
    }

    /// Step preceding `index`, clamped to sentinel below and last step above.
    pub fn step_before(&self, index: isize) -> Option<&Step> {
        self.step_at(index - 1, true)
    }

    /// The step before the given one; the sentinel for the first step (and
    /// for the sentinel itself).
    pub fn previous_step(&self, step_id: &str) -> Option<&Step> {
        if self.is_sentinel_id(step_id) {
            return self.initial_step.as_ref();
        }
        let position = self.recipe.iter().position(|s| s.step_id == step_id)?;
        if position == 0 {
            self.initial_step.as_ref()
        } else {
            Some(&self.recipe[position - 1])
        }
    }

    /// The action payloads of the given step and every step after it, in
    /// order. Used to replay a suffix of the recipe.
    pub fn actions_from(&self, step_id: &str) -> Vec<ActionParameters> {
        let Some(position) = self.recipe.iter().position(|s| s.step_id == step_id) else {
            return Vec::new();
        };
        self.recipe[position..]
            .iter()
            .filter_map(|s| s.action_parameters.clone())
            .collect()
    }

    /// Last enabled step: the threshold step if one is set, otherwise the
    /// last recipe step (or the sentinel on an empty recipe).
    pub fn last_active_step(&self) -> Option<&Step> {
        match &self.active_threshold {
            Some(_) => self.active_threshold_step(),
            None => self.recipe.last().or(self.initial_step.as_ref()),
        }
    }

    pub fn active_threshold_step(&self) -> Option<&Step> {
        let step_id = self.active_threshold.as_deref()?;
        if self.is_sentinel_id(step_id) {
            self.initial_step.as_ref()
        } else {
            self.recipe.iter().find(|s| s.step_id == step_id)
        }
    }

    fn is_sentinel_id(&self, step_id: &str) -> bool {
        self.initial_step
            .as_ref()
            .is_some_and(|s| s.step_id == step_id)
    }

    // =========================================================================
    // Activation threshold
    // =========================================================================

    /// Mark every step up to and including `step_id` active and every step
    /// after it inactive. Passing the sentinel id disables the whole recipe.
    pub fn disable_steps_after(&mut self, step_id: &str) {
        let is_sentinel = self.is_sentinel_id(step_id);
        if !is_sentinel && !self.recipe.iter().any(|s| s.step_id == step_id) {
            tracing::warn!(step_id, "disable_steps_after: unknown step id, ignored");
            return;
        }

        let mut after = is_sentinel;
        for step in &mut self.recipe {
            step.inactive = after;
            if !after && step.step_id == step_id {
                after = true;
            }
        }
        self.active_threshold = Some(step_id.to_string());
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Fetch the preparation details and rebuild the step list from scratch.
    ///
    /// Dynamic transformations reuse the previous step's resolved payloads on
    /// a step-id match (same id implies same parent chain and action);
    /// otherwise a fresh dynamic-parameter fetch is issued. Any failure —
    /// details fetch after retries, or a single dynamic resolution — aborts
    /// the whole refresh and leaves the current state untouched.
    pub async fn refresh(&mut self, preparation_id: &str) -> Result<(), PrepError> {
        let gateway = Arc::clone(&self.gateway);
        let pid = preparation_id.to_string();
        let details = self
            .retry
            .run(|| gateway.get_preparation_details(&pid))
            .await?;

        if details.steps.len() != details.actions.len() + 1 {
            return Err(PrepError::Validation(format!(
                "step/action arrays out of sync: {} steps, {} actions",
                details.steps.len(),
                details.actions.len(),
            )));
        }
        if details.metadata.len() != details.actions.len() {
            return Err(PrepError::Validation(format!(
                "metadata array out of sync: {} metadata, {} actions",
                details.metadata.len(),
                details.actions.len(),
            )));
        }
        if !details.diff.is_empty() && details.diff.len() != details.actions.len() {
            return Err(PrepError::Validation(format!(
                "diff array out of sync: {} diffs, {} actions",
                details.diff.len(),
                details.actions.len(),
            )));
        }

        let sentinel = Step::sentinel(details.steps[0].clone());
        let mut rebuilt = Vec::with_capacity(details.actions.len());

        for (i, (action, meta)) in details.actions.iter().zip(&details.metadata).enumerate() {
            let step_id = details.steps[i + 1].clone();

            let column = action
                .parameters
                .get("column_id")
                .and_then(Value::as_str)
                .map(|id| StepColumn {
                    id: id.to_string(),
                    name: action
                        .parameters
                        .get("column_name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });

            let filters = action
                .parameters
                .get("filter")
                .map(flatten_filter_tree)
                .unwrap_or_default();

            let mut transformation = Transformation {
                name: meta.name.clone(),
                label: meta.label.clone(),
                description: meta.description.clone(),
                dynamic: meta.dynamic,
                parameters: meta.parameters.clone().map(Arc::new),
                cluster: None,
            };

            if meta.dynamic {
                let prior = self
                    .recipe
                    .iter()
                    .find(|s| s.step_id == step_id)
                    .and_then(|s| s.transformation.as_ref())
                    .filter(|t| t.dynamic && t.parameters.is_some());

                match prior {
                    Some(previous) => {
                        tracing::debug!(step_id = %step_id, "reusing resolved dynamic parameters");
                        transformation.parameters = previous.parameters.clone();
                        transformation.cluster = previous.cluster.clone();
                    }
                    None => {
                        let resolved = self
                            .gateway
                            .init_dynamic_parameters(
                                &meta.name,
                                DynamicParamsScope {
                                    preparation_id,
                                    step_id: &step_id,
                                    column_id: column.as_ref().map(|c| c.id.as_str()),
                                },
                            )
                            .await?;
                        transformation.parameters = Some(Arc::new(resolved.parameters));
                        transformation.cluster = resolved.cluster.map(Arc::new);
                    }
                }
            }

            rebuilt.push(Step {
                step_id,
                column,
                transformation: Some(transformation),
                action_parameters: Some(ActionParameters {
                    action: action.action.clone(),
                    parameters: action.parameters.clone(),
                }),
                filters,
                diff: details.diff.get(i).cloned(),
                inactive: false,
                preview: false,
            });
        }

        tracing::info!(
            preparation_id,
            steps = rebuilt.len(),
            "recipe refreshed",
        );
        self.preparation_id = Some(preparation_id.to_string());
        self.initial_step = Some(sentinel);
        self.recipe = rebuilt;
        self.active_threshold = None;
        self.preview_snapshot = None;
        Ok(())
    }

    // =========================================================================
    // Early preview
    // =========================================================================

    /// Stage a speculative step showing `transformation`'s effect before it
    /// is committed. The pre-preview state is snapshotted once per preview
    /// session; repeated calls replace the speculative step without
    /// re-snapshotting.
    pub fn early_preview(
        &mut self,
        column: Option<StepColumn>,
        transformation: Transformation,
        params: Map<String, Value>,
    ) {
        let base = self
            .preview_snapshot
            .get_or_insert_with(|| RecipeSnapshot {
                recipe: self.recipe.clone(),
                active_threshold: self.active_threshold.clone(),
            })
            .recipe
            .clone();

        let mut parameters = params;
        if let Some(col) = &column {
            parameters.insert("column_id".into(), Value::String(col.id.clone()));
            parameters.insert("column_name".into(), Value::String(col.name.clone()));
        }
        let filters = parameters
            .get("filter")
            .map(flatten_filter_tree)
            .unwrap_or_default();

        let preview_step = Step {
            step_id: EARLY_PREVIEW_STEP_ID.to_string(),
            column,
            action_parameters: Some(ActionParameters {
                action: transformation.name.clone(),
                parameters,
            }),
            transformation: Some(transformation),
            filters,
            diff: None,
            inactive: false,
            preview: true,
        };

        let mut staged = base;
        staged.push(preview_step);
        self.recipe = staged;
        // The whole recipe, speculative step included, becomes active.
        self.disable_steps_after(EARLY_PREVIEW_STEP_ID);
    }

    /// Restore the pre-preview recipe and threshold. No-op when no early
    /// preview is staged.
    pub fn cancel_early_preview(&mut self) {
        if let Some(snapshot) = self.preview_snapshot.take() {
            self.recipe = snapshot.recipe;
            self.active_threshold = snapshot.active_threshold;
        }
    }
}
