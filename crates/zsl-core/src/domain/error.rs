//! Error taxonomy for the zero-shot evaluation core.

/// Errors produced by the evaluation, training and persistence layers.
#[derive(Debug, thiserror::Error)]
pub enum ZslError {
    #[error("invalid semantic data: {0}")]
    SemanticData(String),

    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("class id {class} out of range for {num_classes} classes")]
    InvalidClass { class: usize, num_classes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ZslError {
    /// Shorthand for a [`ZslError::ShapeMismatch`] built from two displayable shapes.
    pub fn shape(
        context: &'static str,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            context,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

/// Result type for zero-shot core operations.
pub type Result<T> = std::result::Result<T, ZslError>;
