//! OpenAI-compatible local inference engine client.
//!
//! Works against any locally served OpenAI-style endpoint (MLC-LLM serve,
//! llama.cpp server, vLLM). Deltas are forwarded from a spawned task into an
//! unbounded channel; interruption is a per-generation notify the task
//! checks between deltas.

use std::sync::{Mutex, RwLock};
use std::time::Instant;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionStreamOptions, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use mentor_shared::{
    ChatMessage, GenerationParams, MessageRole, ModelRecord, StreamChunk, UsageStats,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use crate::engine::InferenceEngine;
use crate::error::EngineError;

pub struct LocalEngine {
    client: Client<OpenAIConfig>,
    catalog: RwLock<Vec<ModelRecord>>,
    active_model: RwLock<Option<String>>,
    /// Interrupt handle for the generation currently streaming, if any.
    active_interrupt: Mutex<Option<Arc<Notify>>>,
    /// Shared with the forwarding task, which stores the finalized text here.
    last_message: Arc<Mutex<String>>,
}

impl LocalEngine {
    /// `base_url` points at the local engine's OpenAI-compatible root, e.g.
    /// `http://127.0.0.1:8000/v1`. Most local servers ignore the key but the
    /// client requires one.
    pub fn new(base_url: String, api_key: String, catalog: Vec<ModelRecord>) -> Self {
        info!("initializing local engine client for {}", base_url);
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            catalog: RwLock::new(catalog),
            active_model: RwLock::new(None),
            active_interrupt: Mutex::new(None),
            last_message: Arc::new(Mutex::new(String::new())),
        }
    }

    fn convert_message(msg: ChatMessage) -> Result<ChatCompletionRequestMessage, EngineError> {
        let converted = match msg.role {
            MessageRole::System => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content)
                    .build()
                    .map_err(|e| EngineError::Request(e.to_string()))?,
            ),
            MessageRole::User => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content)
                    .build()
                    .map_err(|e| EngineError::Request(e.to_string()))?,
            ),
            MessageRole::Assistant => ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content)
                    .build()
                    .map_err(|e| EngineError::Request(e.to_string()))?,
            ),
        };
        Ok(converted)
    }
}

#[async_trait]
impl InferenceEngine for LocalEngine {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    ) -> Result<mpsc::UnboundedReceiver<StreamChunk>, EngineError> {
        let model = self
            .active_model
            .read()
            .expect("active_model lock poisoned")
            .clone()
            .ok_or(EngineError::NotLoaded)?;

        let messages = messages
            .into_iter()
            .map(Self::convert_message)
            .collect::<Result<Vec<_>, _>>()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&model)
            .messages(messages)
            .temperature(params.temperature)
            .top_p(params.top_p)
            .max_tokens(params.max_tokens)
            .stream(true)
            .stream_options(ChatCompletionStreamOptions {
                include_usage: true,
            })
            .build()
            .map_err(|e| EngineError::Request(e.to_string()))?;

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| {
                error!("failed to open completion stream: {e}");
                EngineError::Request(e.to_string())
            })?;

        let interrupt = Arc::new(Notify::new());
        *self
            .active_interrupt
            .lock()
            .expect("active_interrupt lock poisoned") = Some(interrupt.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let final_slot = Arc::clone(&self.last_message);

        tokio::spawn(async move {
            let started = Instant::now();
            let mut first_delta_at: Option<Instant> = None;
            let mut last_delta_at: Option<Instant> = None;
            let mut accumulated = String::new();
            let mut usage: Option<UsageStats> = None;
            let mut failed = false;

            loop {
                tokio::select! {
                    biased;
                    _ = interrupt.notified() => {
                        debug!("generation interrupted after {} chars", accumulated.len());
                        break;
                    }
                    item = stream.next() => {
                        let Some(result) = item else { break };
                        match result {
                            Ok(response) => {
                                if let Some(delta) = response
                                    .choices
                                    .first()
                                    .and_then(|c| c.delta.content.as_deref())
                                {
                                    if !delta.is_empty() {
                                        let now = Instant::now();
                                        first_delta_at.get_or_insert(now);
                                        last_delta_at = Some(now);
                                        accumulated.push_str(delta);
                                        if tx
                                            .send(StreamChunk::Delta { text: delta.to_string() })
                                            .is_err()
                                        {
                                            debug!("delta receiver dropped, stopping stream");
                                            break;
                                        }
                                    }
                                }
                                if let Some(wire_usage) = response.usage {
                                    let prefill_secs = first_delta_at
                                        .map(|t| (t - started).as_secs_f64())
                                        .unwrap_or_default()
                                        .max(1e-6);
                                    let decode_secs = match (first_delta_at, last_delta_at) {
                                        (Some(first), Some(last)) => (last - first).as_secs_f64(),
                                        _ => 0.0,
                                    }
                                    .max(1e-6);
                                    usage = Some(UsageStats {
                                        prompt_tokens: wire_usage.prompt_tokens,
                                        completion_tokens: wire_usage.completion_tokens,
                                        prefill_tokens_per_s: f64::from(wire_usage.prompt_tokens)
                                            / prefill_secs,
                                        decode_tokens_per_s: f64::from(
                                            wire_usage.completion_tokens,
                                        ) / decode_secs,
                                    });
                                }
                            }
                            Err(e) => {
                                error!("engine stream error: {e}");
                                let _ = tx.send(StreamChunk::Error {
                                    detail: e.to_string(),
                                });
                                failed = true;
                                break;
                            }
                        }
                    }
                }
            }

            *final_slot.lock().expect("last_message lock poisoned") = accumulated;
            if failed {
                return;
            }
            if let Some(stats) = usage {
                let _ = tx.send(StreamChunk::Usage { stats });
            }
            let _ = tx.send(StreamChunk::Done);
        });

        Ok(rx)
    }

    async fn final_message(&self) -> Result<String, EngineError> {
        Ok(self
            .last_message
            .lock()
            .expect("last_message lock poisoned")
            .clone())
    }

    async fn interrupt(&self) {
        let handle = self
            .active_interrupt
            .lock()
            .expect("active_interrupt lock poisoned")
            .clone();
        if let Some(notify) = handle {
            // Stores a permit, so the request is honored even if the
            // forwarding task is mid-chunk rather than awaiting.
            notify.notify_one();
        }
    }

    async fn load_model(&self, model_id: &str) -> Result<(), EngineError> {
        let known = self
            .catalog
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .any(|m| m.model_id == model_id);
        if !known {
            return Err(EngineError::UnknownModel(model_id.to_string()));
        }
        info!("switching active model to {}", model_id);
        *self
            .active_model
            .write()
            .expect("active_model lock poisoned") = Some(model_id.to_string());
        Ok(())
    }

    fn register_model(&self, record: ModelRecord) {
        let mut catalog = self.catalog.write().expect("catalog lock poisoned");
        if catalog.iter().any(|m| m.model_id == record.model_id) {
            debug!("model {} already registered", record.model_id);
            return;
        }
        info!("registered custom model {}", record.model_id);
        catalog.push(record);
    }

    fn available_models(&self) -> Vec<String> {
        self.catalog
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .map(|m| m.model_id.clone())
            .collect()
    }

    fn is_ready(&self) -> bool {
        self.active_model
            .read()
            .expect("active_model lock poisoned")
            .is_some()
    }
}
