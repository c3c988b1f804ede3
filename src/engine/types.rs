//! Recipe data model: steps, transformations, action parameters.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::engine::filters::FilterLeaf;

/// Step id of the speculative step injected during early preview.
/// Never persisted; at most one such step exists and it is always last.
pub const EARLY_PREVIEW_STEP_ID: &str = "early preview";

/// The column a step targets. `None` on the step itself means a
/// whole-dataset action.
#[derive(Debug, Clone, PartialEq)]
pub struct StepColumn {
    pub id: String,
    pub name: String,
}

/// Display metadata merged with the action that produced a step.
///
/// For dynamic transformations, `parameters` and `cluster` hold the
/// backend-resolved payloads behind an `Arc`: a refresh that finds the same
/// step id in the previous recipe reuses the same allocation instead of
/// re-querying the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub name: String,
    pub label: String,
    pub description: String,
    pub dynamic: bool,
    pub parameters: Option<Arc<Value>>,
    pub cluster: Option<Arc<Value>>,
}

/// The literal payload sent to the backend to reproduce a step.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionParameters {
    pub action: String,
    pub parameters: Map<String, Value>,
}

/// One recipe entry.
///
/// The sentinel initial step has no transformation and no action parameters;
/// its id is the backend's no-op root step id.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub step_id: String,
    pub column: Option<StepColumn>,
    pub transformation: Option<Transformation>,
    pub action_parameters: Option<ActionParameters>,
    pub filters: Vec<FilterLeaf>,
    /// Server-provided change annotation, display-only.
    pub diff: Option<Value>,
    /// Derived: true for every step strictly after the active threshold.
    pub inactive: bool,
    /// True only on the speculative early-preview step.
    pub preview: bool,
}

impl Step {
    /// Build the sentinel initial step from the backend's root step id.
    pub fn sentinel(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            column: None,
            transformation: None,
            action_parameters: None,
            filters: Vec::new(),
            diff: None,
            inactive: false,
            preview: false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.action_parameters.is_none()
    }

    /// True when the step's parameters come from a backend computation.
    pub fn has_dynamic_params(&self) -> bool {
        self.transformation.as_ref().is_some_and(|t| t.dynamic)
    }

    /// True when the step has statically-known parameter descriptors.
    pub fn has_static_params(&self) -> bool {
        self.transformation
            .as_ref()
            .is_some_and(|t| !t.dynamic && t.parameters.is_some())
    }

    /// Whether the parameter panel has anything to render for this step.
    pub fn has_parameters(&self) -> bool {
        self.has_dynamic_params() || self.has_static_params()
    }
}
