pub mod coordinator;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod prompt;
pub mod session;

pub use coordinator::{CoordinatorConfig, StreamingCoordinator};
pub use engine::{local::LocalEngine, InferenceEngine};
pub use error::{EngineError, GenerateError};
pub use formatter::{format_response, FormatOptions, FormattedResponse};
pub use session::{ResponseHistoryEntry, SessionState};
