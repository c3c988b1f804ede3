//! Core engine of a data-preparation front-end: the recipe of transformation
//! steps applied to a dataset, an async undo/redo history over step
//! mutations, and debounced grid previews (step-diff hovers and
//! parameter-edit what-ifs) that race-proof themselves against slow backends.
//!
//! The REST transport and the grid widget stay outside the crate: the engine
//! consumes the backend through [`gateway::BackendGateway`] and drives the
//! grid through [`engine::preview::PreviewSink`].

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;

pub use config::{EngineConfig, RetryConfig};
pub use engine::history::{action, ActionFn, ActionStack};
pub use engine::preview::{PreviewCoordinator, PreviewSink};
pub use engine::recipe::StepRecipe;
pub use engine::session::PrepSession;
pub use engine::types::{ActionParameters, Step, StepColumn, Transformation};
pub use error::PrepError;
pub use gateway::{
    BackendGateway, DynamicParamsScope, PreparationDetails, ResolvedParams, StepAction,
    TransformationMeta,
};
