//! Streaming coordinator: drives one request/response cycle against the
//! inference engine.
//!
//! Exactly one generation may be active at a time. Each received delta is
//! appended to an accumulator, the formatter is run over the cumulative
//! text, and `on_update` is invoked with the full response-to-date. A
//! detected early-stop sentinel interrupts the engine cooperatively and
//! finishes with the truncated text. `cancel()` interrupts the engine and
//! terminates the in-flight call through `on_error(Interrupted)`; no update
//! is delivered after cancellation is observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mentor_shared::{ChatMessage, GenerationParams, MessageRole, StreamChunk, UsageStats};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::InferenceEngine;
use crate::error::GenerateError;
use crate::formatter::{format_response, FormatOptions};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub params: GenerationParams,
    pub format: FormatOptions,
    /// Maximum wait for the next chunk. The engine may hang indefinitely;
    /// a silent stream terminates through `on_error(Timeout)`.
    pub delta_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            params: GenerationParams::default(),
            format: FormatOptions::default(),
            delta_timeout: Duration::from_secs(120),
        }
    }
}

pub struct StreamingCoordinator {
    engine: Arc<dyn InferenceEngine>,
    config: CoordinatorConfig,
    busy: AtomicBool,
    cancel: watch::Sender<bool>,
}

impl StreamingCoordinator {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: CoordinatorConfig) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            engine,
            config,
            busy: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// True while a generation is outstanding.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Requests interruption of the active generation. The in-flight
    /// `generate` call terminates through its `on_error` path with
    /// [`GenerateError::Interrupted`]. With no generation consuming deltas
    /// yet the request is latched and cancels the next `generate` call
    /// before it forwards any update; a generation clears the latch when it
    /// exits, so a cancel aimed at it never leaks into a later request.
    pub async fn cancel(&self) {
        if !self.is_busy() {
            debug!("cancel latched with no generation consuming yet");
        }
        info!("cancel requested");
        self.cancel.send_replace(true);
        self.engine.interrupt().await;
    }

    /// Runs one generation. `session` must be non-empty and end with a user
    /// message. `on_update` is invoked once per received delta with the
    /// cumulative formatted text; exactly one of `on_finish` / `on_error`
    /// is invoked afterwards. A second call while one is outstanding is
    /// rejected with [`GenerateError::Busy`].
    pub async fn generate<U, F, E>(
        &self,
        session: Vec<ChatMessage>,
        mut on_update: U,
        on_finish: F,
        on_error: E,
    ) where
        U: FnMut(&str),
        F: FnOnce(String, Option<UsageStats>),
        E: FnOnce(GenerateError),
    {
        if !matches!(session.last().map(|m| m.role), Some(MessageRole::User)) {
            on_error(GenerateError::InvalidSession);
            return;
        }
        if !self.engine.is_ready() {
            on_error(GenerateError::EngineUnavailable(
                crate::error::EngineError::NotLoaded,
            ));
            return;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("generate rejected: another generation is in progress");
            on_error(GenerateError::Busy);
            return;
        }
        let _busy = BusyGuard {
            busy: &self.busy,
            cancel: &self.cancel,
        };

        // A cancel can arrive between the caller marking the generation
        // started and this future running; honor a latched one rather than
        // erasing it.
        if *self.cancel.borrow() {
            info!("generation cancelled before consuming any deltas");
            on_error(GenerateError::Interrupted);
            return;
        }
        let mut cancel_rx = self.cancel.subscribe();

        let mut rx = match self.engine.stream_chat(session, self.config.params).await {
            Ok(rx) => rx,
            Err(e) => {
                on_error(GenerateError::StreamFailure(e.to_string()));
                return;
            }
        };

        let mut accumulated = String::new();
        let mut usage: Option<UsageStats> = None;
        let mut stopped_early = false;

        loop {
            tokio::select! {
                // Cancellation wins races against already-queued deltas so no
                // update is forwarded after it is observed.
                biased;
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow_and_update() {
                        info!("generation interrupted by user");
                        on_error(GenerateError::Interrupted);
                        return;
                    }
                }
                next = tokio::time::timeout(self.config.delta_timeout, rx.recv()) => {
                    let chunk = match next {
                        Ok(chunk) => chunk,
                        Err(_) => {
                            warn!("no chunk within {:?}", self.config.delta_timeout);
                            self.engine.interrupt().await;
                            on_error(GenerateError::Timeout(self.config.delta_timeout));
                            return;
                        }
                    };
                    match chunk {
                        Some(StreamChunk::Delta { text }) => {
                            accumulated.push_str(&text);
                            let formatted = format_response(&accumulated, &self.config.format);
                            on_update(&formatted.text);
                            if formatted.stop_detected {
                                debug!("early-stop sentinel detected, interrupting engine");
                                self.engine.interrupt().await;
                                accumulated = formatted.text;
                                stopped_early = true;
                                break;
                            }
                        }
                        Some(StreamChunk::Usage { stats }) => {
                            usage = Some(stats);
                        }
                        Some(StreamChunk::Error { detail }) => {
                            warn!("engine reported stream failure: {detail}");
                            on_error(GenerateError::StreamFailure(detail));
                            return;
                        }
                        Some(StreamChunk::Done) | None => break,
                    }
                }
            }
        }

        if stopped_early {
            // The model signalled the end of its turn; this is a completion,
            // not a failure. Usage may not have arrived yet.
            on_finish(accumulated, usage);
            return;
        }

        match self.engine.final_message().await {
            Ok(final_text) => {
                let formatted = format_response(&final_text, &self.config.format);
                info!("generation finished ({} chars)", formatted.text.len());
                on_finish(formatted.text, usage);
            }
            Err(e) => on_error(GenerateError::StreamFailure(e.to_string())),
        }
    }
}

/// Releases the busy flag and consumes any cancel aimed at this generation
/// on every exit path.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    cancel: &'a watch::Sender<bool>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.cancel.send_replace(false);
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InferenceEngine;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use mentor_shared::ModelRecord;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Scripted engine: the test holds the sending half of the chunk channel
    /// and drives the stream by hand.
    struct FakeEngine {
        chunk_tx: Mutex<Option<mpsc::UnboundedSender<StreamChunk>>>,
        outlet: Mutex<Option<mpsc::UnboundedReceiver<StreamChunk>>>,
        final_text: Mutex<String>,
        interrupts: AtomicBool,
        ready: AtomicBool,
    }

    impl FakeEngine {
        fn new(final_text: &str) -> (Arc<Self>, mpsc::UnboundedSender<StreamChunk>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let engine = Arc::new(Self {
                chunk_tx: Mutex::new(Some(tx.clone())),
                outlet: Mutex::new(Some(rx)),
                final_text: Mutex::new(final_text.to_string()),
                interrupts: AtomicBool::new(false),
                ready: AtomicBool::new(true),
            });
            (engine, tx)
        }

        fn was_interrupted(&self) -> bool {
            self.interrupts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceEngine for FakeEngine {
        async fn stream_chat(
            &self,
            _messages: Vec<ChatMessage>,
            _params: GenerationParams,
        ) -> Result<mpsc::UnboundedReceiver<StreamChunk>, EngineError> {
            self.outlet
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| EngineError::Request("stream already taken".into()))
        }

        async fn final_message(&self) -> Result<String, EngineError> {
            Ok(self.final_text.lock().unwrap().clone())
        }

        async fn interrupt(&self) {
            self.interrupts.store(true, Ordering::SeqCst);
            // Engine-side cooperative stop: close the chunk channel.
            self.chunk_tx.lock().unwrap().take();
        }

        async fn load_model(&self, _model_id: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn register_model(&self, _record: ModelRecord) {}

        fn available_models(&self) -> Vec<String> {
            vec!["fake".to_string()]
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    fn user_session() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("prompt"),
            ChatMessage::user("question"),
        ]
    }

    fn usage() -> UsageStats {
        UsageStats {
            prompt_tokens: 5,
            completion_tokens: 3,
            prefill_tokens_per_s: 10.0,
            decode_tokens_per_s: 2.0,
        }
    }

    struct Recorded {
        updates: Mutex<Vec<String>>,
        finished: Mutex<Option<(String, Option<UsageStats>)>>,
        failed: Mutex<Option<GenerateError>>,
    }

    impl Recorded {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                updates: Mutex::new(Vec::new()),
                finished: Mutex::new(None),
                failed: Mutex::new(None),
            })
        }
    }

    async fn run_generate(
        coordinator: Arc<StreamingCoordinator>,
        session: Vec<ChatMessage>,
        rec: Arc<Recorded>,
    ) {
        let upd = rec.clone();
        let fin = rec.clone();
        let err = rec.clone();
        coordinator
            .generate(
                session,
                move |partial| upd.updates.lock().unwrap().push(partial.to_string()),
                move |text, usage| *fin.finished.lock().unwrap() = Some((text, usage)),
                move |e| *err.failed.lock().unwrap() = Some(e),
            )
            .await;
    }

    #[tokio::test]
    async fn updates_are_cumulative_and_finish_fires_once() {
        let (engine, tx) = FakeEngine::new("Hello world!");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine,
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        for part in ["Hello", " world", "!"] {
            tx.send(StreamChunk::Delta {
                text: part.to_string(),
            })
            .unwrap();
        }
        tx.send(StreamChunk::Usage { stats: usage() }).unwrap();
        tx.send(StreamChunk::Done).unwrap();

        run_generate(coordinator, user_session(), rec.clone()).await;

        assert_eq!(
            *rec.updates.lock().unwrap(),
            vec!["Hello", "Hello world", "Hello world!"]
        );
        let (text, reported) = rec.finished.lock().unwrap().clone().unwrap();
        assert_eq!(text, "Hello world!");
        assert_eq!(reported, Some(usage()));
        assert!(rec.failed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_after_second_delta_suppresses_the_third() {
        let (engine, tx) = FakeEngine::new("unused");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine.clone(),
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        let handle = tokio::spawn(run_generate(
            coordinator.clone(),
            user_session(),
            rec.clone(),
        ));

        tx.send(StreamChunk::Delta {
            text: "Hello".into(),
        })
        .unwrap();
        tx.send(StreamChunk::Delta {
            text: " world".into(),
        })
        .unwrap();

        // Wait until both deltas were forwarded before cancelling.
        tokio::time::timeout(Duration::from_secs(1), async {
            while rec.updates.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("coordinator never consumed the first two deltas");

        coordinator.cancel().await;
        let _ = tx.send(StreamChunk::Delta { text: "!".into() });

        handle.await.unwrap();

        assert_eq!(*rec.updates.lock().unwrap(), vec!["Hello", "Hello world"]);
        assert!(rec.finished.lock().unwrap().is_none());
        assert!(matches!(
            rec.failed.lock().unwrap().as_ref(),
            Some(GenerateError::Interrupted)
        ));
        assert!(engine.was_interrupted());
    }

    #[tokio::test]
    async fn mid_stream_engine_error_reports_stream_failure_not_finish() {
        let (engine, tx) = FakeEngine::new("unused");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine,
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        // One good delta, then the stream blows up (e.g. a malformed event
        // from the engine) instead of finishing.
        tx.send(StreamChunk::Delta {
            text: "partial hint".into(),
        })
        .unwrap();
        tx.send(StreamChunk::Error {
            detail: "malformed event stream".into(),
        })
        .unwrap();

        run_generate(coordinator, user_session(), rec.clone()).await;

        assert_eq!(*rec.updates.lock().unwrap(), vec!["partial hint"]);
        assert!(rec.finished.lock().unwrap().is_none());
        match rec.failed.lock().unwrap().as_ref() {
            Some(GenerateError::StreamFailure(detail)) => {
                assert_eq!(detail, "malformed event stream");
            }
            other => panic!("expected StreamFailure, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn cancel_before_generate_starts_is_latched() {
        let (engine, tx) = FakeEngine::new("unused");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine.clone(),
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        // The stop control can fire in the window after the UI marks the
        // generation started but before the spawned task runs.
        coordinator.cancel().await;
        tx.send(StreamChunk::Delta {
            text: "never shown".into(),
        })
        .unwrap();

        run_generate(coordinator.clone(), user_session(), rec.clone()).await;

        assert!(rec.updates.lock().unwrap().is_empty());
        assert!(rec.finished.lock().unwrap().is_none());
        assert!(matches!(
            rec.failed.lock().unwrap().as_ref(),
            Some(GenerateError::Interrupted)
        ));
        assert!(!coordinator.is_busy());

        // The latch was consumed: a fresh generation runs normally.
        let second = Recorded::new();
        let _ = tx.send(StreamChunk::Done);
        run_generate(coordinator, user_session(), second.clone()).await;
        assert!(second.failed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn second_generate_while_busy_is_rejected() {
        let (engine, tx) = FakeEngine::new("unused");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine,
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        let handle = tokio::spawn(run_generate(
            coordinator.clone(),
            user_session(),
            rec.clone(),
        ));

        tx.send(StreamChunk::Delta { text: "hi".into() }).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while rec.updates.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("first generation never started");

        let second = Recorded::new();
        run_generate(coordinator.clone(), user_session(), second.clone()).await;
        assert!(matches!(
            second.failed.lock().unwrap().as_ref(),
            Some(GenerateError::Busy)
        ));

        tx.send(StreamChunk::Done).unwrap();
        handle.await.unwrap();
        assert!(rec.finished.lock().unwrap().is_some());
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn sentinel_in_delta_interrupts_and_finishes_with_truncated_text() {
        let (engine, tx) = FakeEngine::new("unused");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine.clone(),
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        tx.send(StreamChunk::Delta {
            text: "Think about it.".into(),
        })
        .unwrap();
        tx.send(StreamChunk::Delta {
            text: "<|im_end|>leftover".into(),
        })
        .unwrap();

        run_generate(coordinator, user_session(), rec.clone()).await;

        let (text, _) = rec.finished.lock().unwrap().clone().unwrap();
        assert_eq!(text, "Think about it.");
        assert!(engine.was_interrupted());
        assert_eq!(rec.updates.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn session_not_ending_in_user_message_is_rejected() {
        let (engine, _tx) = FakeEngine::new("unused");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine,
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        run_generate(
            coordinator.clone(),
            vec![ChatMessage::system("only a system message")],
            rec.clone(),
        )
        .await;
        assert!(matches!(
            rec.failed.lock().unwrap().as_ref(),
            Some(GenerateError::InvalidSession)
        ));
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn generate_before_model_load_reports_engine_unavailable() {
        let (engine, _tx) = FakeEngine::new("unused");
        engine.ready.store(false, Ordering::SeqCst);
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine,
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        run_generate(coordinator.clone(), user_session(), rec.clone()).await;

        assert!(matches!(
            rec.failed.lock().unwrap().as_ref(),
            Some(GenerateError::EngineUnavailable(_))
        ));
        assert!(!coordinator.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_times_out() {
        let (engine, _tx) = FakeEngine::new("unused");
        let config = CoordinatorConfig {
            delta_timeout: Duration::from_millis(50),
            ..CoordinatorConfig::default()
        };
        let coordinator = Arc::new(StreamingCoordinator::new(engine.clone(), config));
        let rec = Recorded::new();

        run_generate(coordinator, user_session(), rec.clone()).await;

        assert!(matches!(
            rec.failed.lock().unwrap().as_ref(),
            Some(GenerateError::Timeout(_))
        ));
        assert!(rec.finished.lock().unwrap().is_none());
        assert!(engine.was_interrupted());
    }

    #[tokio::test]
    async fn formatter_is_applied_to_streamed_updates() {
        let (engine, tx) = FakeEngine::new("What if x is 0?");
        let coordinator = Arc::new(StreamingCoordinator::new(
            engine,
            CoordinatorConfig::default(),
        ));
        let rec = Recorded::new();

        tx.send(StreamChunk::Delta {
            text: "What if x is 0?".into(),
        })
        .unwrap();
        tx.send(StreamChunk::Done).unwrap();

        run_generate(coordinator, user_session(), rec.clone()).await;

        assert_eq!(*rec.updates.lock().unwrap(), vec!["What if x is 0?\n"]);
        let (text, _) = rec.finished.lock().unwrap().clone().unwrap();
        assert_eq!(text, "What if x is 0?\n");
    }
}
