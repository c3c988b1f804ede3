//! Backend gateway contract.
//!
//! The REST backend (preparation details, previews, step mutations) is out of
//! scope for this crate; the engine consumes it through this async trait so
//! the transport can be HTTP, IPC or an in-memory fake interchangeably.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::PrepError;

/// One applied action as stored by the backend: the literal payload that
/// reproduces the step.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepAction {
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Static transformation metadata for one applied action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformationMeta {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// True when valid parameter values depend on a backend computation
    /// (e.g. clustering suggestions) and must be resolved per step.
    #[serde(default)]
    pub dynamic: bool,
    /// Static parameter descriptors; absent for dynamic transformations.
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// Preparation detail arrays, positionally zipped.
///
/// `steps` carries one extra leading entry, the no-op root step id, so
/// `steps[i + 1]` pairs with `actions[i]`, `metadata[i]` and `diff[i]`.
#[derive(Debug, Clone, Deserialize)]
pub struct PreparationDetails {
    pub id: String,
    pub steps: Vec<String>,
    pub actions: Vec<StepAction>,
    pub metadata: Vec<TransformationMeta>,
    /// Server-side change annotations (created/updated/deleted columns),
    /// display-only. Empty when the backend omits them.
    #[serde(default)]
    pub diff: Vec<Value>,
}

/// Scope of a dynamic-parameter resolution.
#[derive(Debug, Clone, Copy)]
pub struct DynamicParamsScope<'a> {
    pub preparation_id: &'a str,
    pub step_id: &'a str,
    pub column_id: Option<&'a str>,
}

/// Backend-resolved parameters for a dynamic transformation.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedParams {
    pub parameters: Value,
    #[serde(default)]
    pub cluster: Option<Value>,
}

/// Async capability consumed by the engine. Implementations must be cheap to
/// clone behind an `Arc` and safe to call concurrently.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Fetch the full step/action/metadata/diff arrays for a preparation.
    async fn get_preparation_details(
        &self,
        preparation_id: &str,
    ) -> Result<PreparationDetails, PrepError>;

    /// Compute a diff between the grid states at `from_step` and `to_step`,
    /// optionally scoped to one column.
    async fn request_diff_preview(
        &self,
        preparation_id: &str,
        from_step: &str,
        to_step: &str,
        column_id: Option<&str>,
    ) -> Result<Value, PrepError>;

    /// Compute the grid records as if `step_id` had `parameters` instead of
    /// its current parameters, with `last_active_step` as the visible head.
    async fn request_update_preview(
        &self,
        preparation_id: &str,
        last_active_step: &str,
        step_id: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, PrepError>;

    /// Append a new step to the preparation.
    async fn apply_step(
        &self,
        preparation_id: &str,
        action: &str,
        parameters: &Map<String, Value>,
    ) -> Result<(), PrepError>;

    /// Replace the parameters of an existing step.
    async fn update_step(
        &self,
        preparation_id: &str,
        step_id: &str,
        parameters: &Map<String, Value>,
    ) -> Result<(), PrepError>;

    /// Delete a step from the preparation.
    async fn remove_step(&self, preparation_id: &str, step_id: &str) -> Result<(), PrepError>;

    /// Resolve the parameters of a dynamic transformation for one step.
    async fn init_dynamic_parameters(
        &self,
        transformation: &str,
        scope: DynamicParamsScope<'_>,
    ) -> Result<ResolvedParams, PrepError>;
}

// =============================================================================
// Test double
// =============================================================================

/// In-memory gateway fake shared by the engine module tests: records every
/// call, keeps an actual step list so refresh-after-mutation flows behave
/// like the real backend, and can be told to fail or delay specific methods.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct MockStep {
        pub id: String,
        pub action: String,
        pub parameters: Map<String, Value>,
    }

    pub struct MockGateway {
        calls: Mutex<Vec<String>>,
        steps: Mutex<Vec<MockStep>>,
        next_id: AtomicU64,
        dynamic_actions: Mutex<HashSet<String>>,
        failing: Mutex<HashSet<&'static str>>,
        diff_delay: Mutex<Option<Duration>>,
    }

    impl MockGateway {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                steps: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dynamic_actions: Mutex::new(HashSet::new()),
                failing: Mutex::new(HashSet::new()),
                diff_delay: Mutex::new(None),
            })
        }

        /// Seed an already-applied step without going through `apply_step`.
        pub fn seed_step(&self, action: &str, parameters: Map<String, Value>) -> String {
            let id = format!("step-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            self.steps.lock().unwrap().push(MockStep {
                id: id.clone(),
                action: action.to_string(),
                parameters,
            });
            id
        }

        /// Mark an action name as requiring dynamic-parameter resolution.
        pub fn mark_dynamic(&self, action: &str) {
            self.dynamic_actions.lock().unwrap().insert(action.to_string());
        }

        /// Make every future call to `method` fail with a gateway error.
        pub fn fail_on(&self, method: &'static str) {
            self.failing.lock().unwrap().insert(method);
        }

        pub fn clear_failures(&self) {
            self.failing.lock().unwrap().clear();
        }

        /// Delay preview responses, to simulate a slow network.
        pub fn set_preview_delay(&self, delay: Duration) {
            *self.diff_delay.lock().unwrap() = Some(delay);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, method: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(method))
                .count()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn check(&self, method: &'static str) -> Result<(), PrepError> {
            if self.failing.lock().unwrap().contains(method) {
                return Err(PrepError::Gateway(format!("{method} failed (mock)")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BackendGateway for MockGateway {
        async fn get_preparation_details(
            &self,
            preparation_id: &str,
        ) -> Result<PreparationDetails, PrepError> {
            self.record(format!("get_preparation_details:{preparation_id}"));
            self.check("get_preparation_details")?;

            let steps = self.steps.lock().unwrap();
            let dynamic = self.dynamic_actions.lock().unwrap();

            let mut ids = vec!["root".to_string()];
            ids.extend(steps.iter().map(|s| s.id.clone()));

            let actions = steps
                .iter()
                .map(|s| StepAction {
                    action: s.action.clone(),
                    parameters: s.parameters.clone(),
                })
                .collect();

            let metadata = steps
                .iter()
                .map(|s| {
                    let is_dynamic = dynamic.contains(&s.action);
                    TransformationMeta {
                        name: s.action.clone(),
                        label: s.action.replace('_', " "),
                        description: format!("Apply {}", s.action),
                        dynamic: is_dynamic,
                        parameters: if is_dynamic {
                            None
                        } else {
                            Some(json!([{ "name": "pattern", "type": "string" }]))
                        },
                    }
                })
                .collect();

            Ok(PreparationDetails {
                id: preparation_id.to_string(),
                steps: ids,
                actions,
                metadata,
                diff: Vec::new(),
            })
        }

        async fn request_diff_preview(
            &self,
            preparation_id: &str,
            from_step: &str,
            to_step: &str,
            column_id: Option<&str>,
        ) -> Result<Value, PrepError> {
            self.record(format!("request_diff_preview:{from_step}->{to_step}"));
            // Copy the delay out: the guard must not live across the await.
            let delay = *self.diff_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check("request_diff_preview")?;
            Ok(json!({
                "preparation": preparation_id,
                "from": from_step,
                "to": to_step,
                "column": column_id,
                "records": [],
            }))
        }

        async fn request_update_preview(
            &self,
            preparation_id: &str,
            last_active_step: &str,
            step_id: &str,
            parameters: &Map<String, Value>,
        ) -> Result<Value, PrepError> {
            self.record(format!("request_update_preview:{step_id}"));
            let delay = *self.diff_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check("request_update_preview")?;
            Ok(json!({
                "preparation": preparation_id,
                "head": last_active_step,
                "step": step_id,
                "parameters": Value::Object(parameters.clone()),
                "records": [],
            }))
        }

        async fn apply_step(
            &self,
            preparation_id: &str,
            action: &str,
            parameters: &Map<String, Value>,
        ) -> Result<(), PrepError> {
            self.record(format!("apply_step:{action}"));
            self.check("apply_step")?;
            let _ = preparation_id;
            self.seed_step(action, parameters.clone());
            Ok(())
        }

        async fn update_step(
            &self,
            _preparation_id: &str,
            step_id: &str,
            parameters: &Map<String, Value>,
        ) -> Result<(), PrepError> {
            self.record(format!("update_step:{step_id}"));
            self.check("update_step")?;
            let mut steps = self.steps.lock().unwrap();
            let step = steps
                .iter_mut()
                .find(|s| s.id == step_id)
                .ok_or_else(|| PrepError::NotFound(format!("step {step_id}")))?;
            step.parameters = parameters.clone();
            Ok(())
        }

        async fn remove_step(&self, _preparation_id: &str, step_id: &str) -> Result<(), PrepError> {
            self.record(format!("remove_step:{step_id}"));
            self.check("remove_step")?;
            let mut steps = self.steps.lock().unwrap();
            let before = steps.len();
            steps.retain(|s| s.id != step_id);
            if steps.len() == before {
                return Err(PrepError::NotFound(format!("step {step_id}")));
            }
            Ok(())
        }

        async fn init_dynamic_parameters(
            &self,
            transformation: &str,
            scope: DynamicParamsScope<'_>,
        ) -> Result<ResolvedParams, PrepError> {
            self.record(format!("init_dynamic_parameters:{transformation}:{}", scope.step_id));
            self.check("init_dynamic_parameters")?;
            Ok(ResolvedParams {
                parameters: json!([{ "name": "clusters", "type": "cluster" }]),
                cluster: Some(json!({ "titles": ["similar values"], "clusters": [] })),
            })
        }
    }
}
