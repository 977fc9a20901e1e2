//! Error taxonomy for model orchestration.
//!
//! Every fallible operation of the registry, the ensemble combiner and the
//! model handles returns [`ModelResult`]. Failures raised by a backend are
//! wrapped once in [`ModelError::Backend`] by the handle implementation and are
//! then passed through the orchestration layer untouched.
//!
//! For bootstrap code that wants human-readable context attached while an error
//! bubbles up, [`ModelReport`] wraps the same error in an
//! [`error_stack::Report`]:
//!
//! ```rust,ignore
//! use error_stack::ResultExt;
//! use modelhub_kernel::error::{IntoModelReport, ModelReport};
//!
//! async fn warm_up(registry: &ModelRegistry) -> ModelReport<()> {
//!     registry.load_model("llama3.1:8b").await.into_report().attach("warming up llama")?;
//!     Ok(())
//! }
//! ```

use error_stack::Report;
use thiserror::Error;

/// Result type for model orchestration operations.
pub type ModelResult<T> = ::std::result::Result<T, ModelError>;

/// Error-stack–backed result alias for model orchestration.
///
/// Equivalent to `Result<T, error_stack::Report<ModelError>>`.
pub type ModelReport<T> = ::std::result::Result<T, Report<ModelError>>;

/// Extension trait to convert `Result<T, ModelError>` into [`ModelReport<T>`].
pub trait IntoModelReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> ModelReport<T>;
}

impl<T> IntoModelReport<T> for ModelResult<T> {
    #[inline]
    fn into_report(self) -> ModelReport<T> {
        self.map_err(Report::new)
    }
}

/// Errors surfaced by the registry, the ensemble combiner and model handles.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ModelError {
    /// A model with the same identifier is already registered.
    #[error("Model already registered: {0}")]
    DuplicateModel(String),

    /// No model (or ensemble) is registered under the identifier.
    #[error("Model not found: {0}")]
    NotFound(String),

    /// Every ensemble member failed or could not be resolved.
    #[error("No valid responses from ensemble: {0}")]
    NoValidResponses(String),

    /// The requested ensemble strategy name is not recognised.
    #[error("Unknown ensemble strategy: {0}")]
    UnknownStrategy(String),

    /// Opaque failure reported by a backend model.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Caller-supplied input was rejected before reaching any backend.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ModelError {
    /// Convenience constructor for backend failures.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Returns `true` if the error originated inside a backend handle.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
