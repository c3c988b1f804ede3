use serde::Serialize;

/// Crate-wide error type. Every fallible function returns `Result<T, PrepError>`.
/// Serializes cleanly so the UI layer gets structured error messages for its
/// notification component.
#[derive(Debug, thiserror::Error)]
pub enum PrepError {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

/// The UI layer displays failed undo/redo, refresh and step mutations.
/// We serialize as `{ error: "...", kind: "..." }` for frontend consumption.
impl Serialize for PrepError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("PrepError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field(
            "kind",
            match self {
                PrepError::Gateway(_) => "gateway",
                PrepError::Validation(_) => "validation",
                PrepError::NotFound(_) => "not_found",
                PrepError::Serde(_) => "serde",
                PrepError::Config(_) => "config",
                PrepError::Internal(_) => "internal",
            },
        )?;
        s.end()
    }
}
