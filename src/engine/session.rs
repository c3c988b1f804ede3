//! Session facade: one loaded preparation, its recipe, its undo/redo stack
//! and its preview coordinator.
//!
//! This is the surface the UI layer talks to. Step mutations go through the
//! gateway, refresh the recipe, and record a paired undo/redo entry; the
//! closures operate on the session's shared state so an entry stays valid no
//! matter how many times it is replayed.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::engine::history::{action, ActionStack};
use crate::engine::preview::{PreviewCoordinator, PreviewSink};
use crate::engine::recipe::StepRecipe;
use crate::engine::types::Step;
use crate::error::PrepError;
use crate::gateway::BackendGateway;

pub struct PrepSession {
    preparation_id: String,
    gateway: Arc<dyn BackendGateway>,
    recipe: Arc<Mutex<StepRecipe>>,
    history: Arc<ActionStack>,
    preview: Arc<PreviewCoordinator>,
}

impl PrepSession {
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        sink: Arc<dyn PreviewSink>,
        config: &EngineConfig,
        preparation_id: impl Into<String>,
    ) -> Self {
        let recipe = Arc::new(Mutex::new(StepRecipe::new(Arc::clone(&gateway), config)));
        let history = Arc::new(ActionStack::new(config.max_history_depth));
        let preview = PreviewCoordinator::new(Arc::clone(&gateway), sink, config);
        Self {
            preparation_id: preparation_id.into(),
            gateway,
            recipe,
            history,
            preview,
        }
    }

    /// Fetch the preparation and build the initial recipe.
    pub async fn load(&self) -> Result<(), PrepError> {
        self.recipe.lock().await.refresh(&self.preparation_id).await
    }

    pub fn preparation_id(&self) -> &str {
        &self.preparation_id
    }

    pub fn recipe(&self) -> Arc<Mutex<StepRecipe>> {
        Arc::clone(&self.recipe)
    }

    pub fn preview(&self) -> Arc<PreviewCoordinator> {
        Arc::clone(&self.preview)
    }

    /// Read-only copy of the current step list for rendering.
    pub async fn steps(&self) -> Vec<Step> {
        self.recipe.lock().await.steps().to_vec()
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub async fn undo(&self) -> Result<bool, PrepError> {
        self.history.undo().await
    }

    pub async fn redo(&self) -> Result<bool, PrepError> {
        self.history.redo().await
    }

    // =========================================================================
    // Step mutations
    // =========================================================================

    /// Append a new step, then record its removal/replay as a history entry.
    pub async fn apply_step(
        &self,
        action_name: &str,
        parameters: Map<String, Value>,
    ) -> Result<(), PrepError> {
        self.gateway
            .apply_step(&self.preparation_id, action_name, &parameters)
            .await?;
        self.recipe.lock().await.refresh(&self.preparation_id).await?;
        tracing::info!(action = action_name, "step applied");

        let undo = {
            let gateway = Arc::clone(&self.gateway);
            let recipe = Arc::clone(&self.recipe);
            let pid = self.preparation_id.clone();
            action(move || {
                let gateway = Arc::clone(&gateway);
                let recipe = Arc::clone(&recipe);
                let pid = pid.clone();
                async move { remove_tail_step(&gateway, &recipe, &pid).await }
            })
        };
        let redo = {
            let gateway = Arc::clone(&self.gateway);
            let recipe = Arc::clone(&self.recipe);
            let pid = self.preparation_id.clone();
            let action_name = action_name.to_string();
            let parameters = parameters.clone();
            action(move || {
                let gateway = Arc::clone(&gateway);
                let recipe = Arc::clone(&recipe);
                let pid = pid.clone();
                let action_name = action_name.clone();
                let parameters = parameters.clone();
                async move {
                    gateway.apply_step(&pid, &action_name, &parameters).await?;
                    recipe.lock().await.refresh(&pid).await
                }
            })
        };
        self.history.add_action(undo, redo);
        Ok(())
    }

    /// Replace a step's parameters; undo restores the previous ones.
    pub async fn update_step(
        &self,
        step_id: &str,
        parameters: Map<String, Value>,
    ) -> Result<(), PrepError> {
        let previous = {
            let recipe = self.recipe.lock().await;
            recipe
                .steps()
                .iter()
                .find(|s| s.step_id == step_id)
                .and_then(|s| s.action_parameters.as_ref())
                .map(|a| a.parameters.clone())
                .ok_or_else(|| PrepError::NotFound(format!("step {step_id}")))?
        };

        self.gateway
            .update_step(&self.preparation_id, step_id, &parameters)
            .await?;
        self.recipe.lock().await.refresh(&self.preparation_id).await?;
        tracing::info!(step_id, "step updated");

        let undo = self.update_action(step_id.to_string(), previous);
        let redo = self.update_action(step_id.to_string(), parameters);
        self.history.add_action(undo, redo);
        Ok(())
    }

    /// Delete a step; undo re-applies its action (at the end of the recipe).
    pub async fn remove_step(&self, step_id: &str) -> Result<(), PrepError> {
        let removed = {
            let recipe = self.recipe.lock().await;
            recipe
                .steps()
                .iter()
                .find(|s| s.step_id == step_id)
                .and_then(|s| s.action_parameters.clone())
                .ok_or_else(|| PrepError::NotFound(format!("step {step_id}")))?
        };

        self.gateway.remove_step(&self.preparation_id, step_id).await?;
        self.recipe.lock().await.refresh(&self.preparation_id).await?;
        tracing::info!(step_id, "step removed");

        let undo = {
            let gateway = Arc::clone(&self.gateway);
            let recipe = Arc::clone(&self.recipe);
            let pid = self.preparation_id.clone();
            let removed = removed.clone();
            action(move || {
                let gateway = Arc::clone(&gateway);
                let recipe = Arc::clone(&recipe);
                let pid = pid.clone();
                let removed = removed.clone();
                async move {
                    gateway.apply_step(&pid, &removed.action, &removed.parameters).await?;
                    recipe.lock().await.refresh(&pid).await
                }
            })
        };
        // After an undo the step sits at the tail, so redo removes the tail.
        let redo = {
            let gateway = Arc::clone(&self.gateway);
            let recipe = Arc::clone(&self.recipe);
            let pid = self.preparation_id.clone();
            action(move || {
                let gateway = Arc::clone(&gateway);
                let recipe = Arc::clone(&recipe);
                let pid = pid.clone();
                async move { remove_tail_step(&gateway, &recipe, &pid).await }
            })
        };
        self.history.add_action(undo, redo);
        Ok(())
    }

    fn update_action(
        &self,
        step_id: String,
        parameters: Map<String, Value>,
    ) -> crate::engine::history::ActionFn {
        let gateway = Arc::clone(&self.gateway);
        let recipe = Arc::clone(&self.recipe);
        let pid = self.preparation_id.clone();
        action(move || {
            let gateway = Arc::clone(&gateway);
            let recipe = Arc::clone(&recipe);
            let pid = pid.clone();
            let step_id = step_id.clone();
            let parameters = parameters.clone();
            async move {
                gateway.update_step(&pid, &step_id, &parameters).await?;
                recipe.lock().await.refresh(&pid).await
            }
        })
    }

    // =========================================================================
    // Preview wiring
    // =========================================================================

    /// Hover entered a step: schedule a diff preview from the last active
    /// step to the hovered one, scoped to the step's column.
    pub async fn hover_step_start(&self, step_id: &str) {
        let (preparation_id, from_step, column_id) = {
            let recipe = self.recipe.lock().await;
            let Some(step) = recipe.steps().iter().find(|s| s.step_id == step_id) else {
                tracing::warn!(step_id, "hover on unknown step, ignored");
                return;
            };
            let Some(from) = recipe.last_active_step().map(|s| s.step_id.clone()) else {
                return;
            };
            (
                recipe
                    .preparation_id()
                    .unwrap_or(&self.preparation_id)
                    .to_string(),
                from,
                step.column.as_ref().map(|c| c.id.clone()),
            )
        };
        self.preview
            .on_step_hover_start(preparation_id, from_step, step_id.to_string(), column_id);
    }

    /// Hover left the recipe panel: schedule the preview discard.
    pub fn hover_step_end(&self) {
        self.preview.on_step_hover_end();
    }

    /// A parameter edit in the panel: schedule an update preview.
    pub async fn params_changed(&self, step_id: &str, parameters: Map<String, Value>) {
        let (preparation_id, last_active, step) = {
            let recipe = self.recipe.lock().await;
            let Some(step) = recipe.steps().iter().find(|s| s.step_id == step_id).cloned() else {
                return;
            };
            let Some(last) = recipe.last_active_step().map(|s| s.step_id.clone()) else {
                return;
            };
            (
                recipe
                    .preparation_id()
                    .unwrap_or(&self.preparation_id)
                    .to_string(),
                last,
                step,
            )
        };
        self.preview
            .on_params_changed_preview(preparation_id, last_active, &step, parameters);
    }
}

/// Remove the most recent step of the preparation and refresh.
async fn remove_tail_step(
    gateway: &Arc<dyn BackendGateway>,
    recipe: &Arc<Mutex<StepRecipe>>,
    preparation_id: &str,
) -> Result<(), PrepError> {
    let tail = recipe
        .lock()
        .await
        .steps()
        .last()
        .map(|s| s.step_id.clone())
        .ok_or_else(|| PrepError::NotFound("recipe has no steps to remove".into()))?;
    gateway.remove_step(preparation_id, &tail).await?;
    recipe.lock().await.refresh(preparation_id).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::RetryConfig;
    use crate::engine::preview::testing::RecordingSink;
    use crate::gateway::mock::MockGateway;

    fn test_config() -> EngineConfig {
        EngineConfig {
            retry: RetryConfig { max_attempts: 1, initial_backoff_ms: 0 },
            ..EngineConfig::default()
        }
    }

    fn make_session(gateway: &Arc<MockGateway>) -> PrepSession {
        PrepSession::new(
            gateway.clone(),
            Arc::new(RecordingSink::default()),
            &test_config(),
            "prep-1",
        )
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_apply_undo_redo_round_trip() {
        let gateway = MockGateway::new();
        let session = make_session(&gateway);
        session.load().await.unwrap();
        assert!(session.steps().await.is_empty());

        session
            .apply_step("uppercase", params(&[("column_id", json!("0001"))]))
            .await
            .unwrap();
        assert_eq!(session.steps().await.len(), 1);
        assert!(session.can_undo());
        assert!(!session.can_redo());

        assert!(session.undo().await.unwrap());
        assert!(session.steps().await.is_empty());
        assert!(session.can_redo());

        assert!(session.redo().await.unwrap());
        let steps = session.steps().await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action_parameters.as_ref().unwrap().action, "uppercase");
    }

    #[tokio::test]
    async fn test_failed_undo_is_retryable() {
        let gateway = MockGateway::new();
        let session = make_session(&gateway);
        session.load().await.unwrap();
        session.apply_step("trim", Map::new()).await.unwrap();

        gateway.fail_on("remove_step");
        let err = session.undo().await.unwrap_err();
        assert!(matches!(err, PrepError::Gateway(_)));
        // The entry went back onto the undo stack, and the recipe still
        // holds the applied step.
        assert!(session.can_undo());
        assert_eq!(session.steps().await.len(), 1);

        gateway.clear_failures();
        assert!(session.undo().await.unwrap());
        assert!(session.steps().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_step_undo_restores_parameters() {
        let gateway = MockGateway::new();
        let step_id = gateway.seed_step("replace", params(&[("pattern", json!("."))]));
        let session = make_session(&gateway);
        session.load().await.unwrap();

        session
            .update_step(&step_id, params(&[("pattern", json!("-"))]))
            .await
            .unwrap();
        let current = session.steps().await[0]
            .action_parameters
            .as_ref()
            .unwrap()
            .parameters
            .clone();
        assert_eq!(current["pattern"], json!("-"));

        assert!(session.undo().await.unwrap());
        let restored = session.steps().await[0]
            .action_parameters
            .as_ref()
            .unwrap()
            .parameters
            .clone();
        assert_eq!(restored["pattern"], json!("."));

        assert!(session.redo().await.unwrap());
        let redone = session.steps().await[0]
            .action_parameters
            .as_ref()
            .unwrap()
            .parameters
            .clone();
        assert_eq!(redone["pattern"], json!("-"));
    }

    #[tokio::test]
    async fn test_remove_step_undo_reapplies_action() {
        let gateway = MockGateway::new();
        let first = gateway.seed_step("uppercase", params(&[("column_id", json!("0001"))]));
        gateway.seed_step("trim", Map::new());
        let session = make_session(&gateway);
        session.load().await.unwrap();
        assert_eq!(session.steps().await.len(), 2);

        session.remove_step(&first).await.unwrap();
        assert_eq!(session.steps().await.len(), 1);

        // Undo re-applies the removed action at the tail.
        assert!(session.undo().await.unwrap());
        let steps = session.steps().await;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].action_parameters.as_ref().unwrap().action, "uppercase");

        assert!(session.redo().await.unwrap());
        assert_eq!(session.steps().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mutation_clears_redo_history() {
        let gateway = MockGateway::new();
        let session = make_session(&gateway);
        session.load().await.unwrap();

        session.apply_step("uppercase", Map::new()).await.unwrap();
        assert!(session.undo().await.unwrap());
        assert!(session.can_redo());

        session.apply_step("lowercase", Map::new()).await.unwrap();
        assert!(!session.can_redo());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_previews_against_last_active_step() {
        let gateway = MockGateway::new();
        gateway.seed_step("uppercase", params(&[("column_id", json!("0001"))]));
        let hovered = gateway.seed_step("trim", params(&[("column_id", json!("0002"))]));
        let session = make_session(&gateway);
        session.load().await.unwrap();

        session.hover_step_start(&hovered).await;
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;

        let calls = gateway.calls();
        let diff_call = calls
            .iter()
            .find(|c| c.starts_with("request_diff_preview"))
            .unwrap();
        // From the last active step (the recipe tail) to the hovered one.
        assert_eq!(diff_call, &format!("request_diff_preview:{hovered}->{hovered}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_respects_threshold() {
        let gateway = MockGateway::new();
        let first = gateway.seed_step("uppercase", params(&[("column_id", json!("0001"))]));
        let second = gateway.seed_step("trim", params(&[("column_id", json!("0002"))]));
        let session = make_session(&gateway);
        session.load().await.unwrap();

        session.recipe().lock().await.disable_steps_after(&first);
        session.hover_step_start(&second).await;
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;

        let calls = gateway.calls();
        let diff_call = calls
            .iter()
            .find(|c| c.starts_with("request_diff_preview"))
            .unwrap();
        assert_eq!(diff_call, &format!("request_diff_preview:{first}->{second}"));
    }
}
