use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One increment delivered while a generation is streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// An incremental fragment of generated text.
    Delta { text: String },
    /// Usage statistics, delivered once near the end of the stream.
    Usage { stats: UsageStats },
    /// The stream failed; `detail` carries the engine's error text. Terminal:
    /// no further chunks follow.
    Error { detail: String },
    /// The stream finished normally; no further chunks follow.
    Done,
}

/// Token counts and throughput for one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub prefill_tokens_per_s: f64,
    pub decode_tokens_per_s: f64,
}

impl UsageStats {
    /// One-line summary shown under a completed response.
    pub fn summary(&self) -> String {
        format!(
            "prompt_tokens: {}, completion_tokens: {}, prefill: {:.4} tokens/sec, decoding: {:.4} tokens/sec",
            self.prompt_tokens,
            self.completion_tokens,
            self.prefill_tokens_per_s,
            self.decode_tokens_per_s,
        )
    }
}

/// Sampling parameters forwarded to the engine with every request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 500,
        }
    }
}

/// Descriptor for a model the engine can serve, including user-registered
/// custom models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Remote location of the model weights.
    pub model_url: String,
    pub model_id: String,
    /// Location of the executable kernel/library for this model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_lib_url: Option<String>,
    /// Context-window override, in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_size: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_summary_format() {
        let usage = UsageStats {
            prompt_tokens: 42,
            completion_tokens: 128,
            prefill_tokens_per_s: 1234.56789,
            decode_tokens_per_s: 87.65432,
        };
        assert_eq!(
            usage.summary(),
            "prompt_tokens: 42, completion_tokens: 128, prefill: 1234.5679 tokens/sec, decoding: 87.6543 tokens/sec"
        );
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::system("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"system\""));
    }
}
