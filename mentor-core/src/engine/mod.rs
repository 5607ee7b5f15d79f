//! Inference engine abstraction.
//!
//! The coordinator talks to the engine through this trait so it can be
//! exercised with a scripted fake in tests; the real implementation lives in
//! [`local`].

pub mod local;

use async_trait::async_trait;
use mentor_shared::{ChatMessage, GenerationParams, ModelRecord, StreamChunk};
use tokio::sync::mpsc;

use crate::error::EngineError;

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Opens a streaming chat completion for `messages`. Chunks arrive on the
    /// returned channel: zero or more [`StreamChunk::Delta`]s, optionally one
    /// [`StreamChunk::Usage`], then [`StreamChunk::Done`] (or channel close).
    /// A mid-stream failure is reported as a terminal [`StreamChunk::Error`].
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> Result<mpsc::UnboundedReceiver<StreamChunk>, EngineError>;

    /// Returns the last finalized assistant message.
    async fn final_message(&self) -> Result<String, EngineError>;

    /// Requests cooperative interruption of the active generation, if any.
    /// The engine finishes its current step before honoring the request.
    async fn interrupt(&self);

    /// Switches the active model. The id must be present in the catalog.
    async fn load_model(&self, model_id: &str) -> Result<(), EngineError>;

    /// Adds a custom model descriptor to the catalog. Re-registering an id
    /// already present is a no-op.
    fn register_model(&self, record: ModelRecord);

    /// Ids of all models the engine can serve.
    fn available_models(&self) -> Vec<String>;

    /// True once a model has been loaded and generations may be requested.
    fn is_ready(&self) -> bool;
}
