//! # modelhub-kernel
//!
//! Contracts shared by every ModelHub crate:
//!
//! - [`ModelHandle`]: the capability a backend model exposes
//! - [`ModelResponse`] and [`GenerationOptions`]: request/response values
//! - [`ModelError`]: the error taxonomy of the orchestration layer
//! - [`config`]: multi-format configuration loading

// error module
pub mod error;

// types module
pub mod types;

// handle module
pub mod handle;

// config module
pub mod config;

pub use error::{IntoModelReport, ModelError, ModelReport, ModelResult};
pub use handle::ModelHandle;
pub use types::{DEFAULT_CONFIDENCE, GenerationOptions, ModelResponse, canonical_json};
