//! The AI invoker contract consumed by pipeline phases.
//!
//! Named polymorphic types in place of the duck-typed callback bag the spec
//! flags for re-architecture: a streaming sink with `write_chunk`/`close`
//! replaces a bare `onStreamingChunk(text)` callback, the same way
//! [`crate::pool::session::AiSession`] replaces an untyped transport. Phases
//! depend only on this trait, never on a concrete backend — the same
//! boundary the teacher draws between `SessionManager` and the shell
//! transport it spawns.

use futures::future::BoxFuture;

/// Sink for incremental response text. `write_chunk` calls happen in order;
/// `close` fires once after the final chunk (or not at all, if the
/// invocation failed before producing any output).
pub trait StreamSink: Send {
    fn write_chunk(&mut self, text: &str);
    fn close(&mut self) {}
}

#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub working_directory: Option<String>,
    /// Tool names the invocation may use. `Some(vec![])` means read-only /
    /// no tools at all; `None` means the backend's default toolset.
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub success: bool,
    pub response: String,
    pub error: Option<String>,
    pub token_usage: Option<TokenUsage>,
}

impl InvokeOutcome {
    pub fn ok(response: impl Into<String>, token_usage: Option<TokenUsage>) -> Self {
        Self {
            success: true,
            response: response.into(),
            error: None,
            token_usage,
        }
    }

    pub fn timeout() -> Self {
        Self {
            success: false,
            response: String::new(),
            error: Some("timeout".to_string()),
            token_usage: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: String::new(),
            error: Some(error.into()),
            token_usage: None,
        }
    }
}

/// Invokes the backing LLM on behalf of a pipeline phase. `sink`, when
/// present, MUST receive chunks in order whose concatenation equals the
/// final `response`.
pub trait AiInvoker: Send + Sync {
    fn invoke(
        &self,
        prompt: String,
        options: InvokeOptions,
        sink: Option<Box<dyn StreamSink>>,
    ) -> BoxFuture<'static, InvokeOutcome>;
}

/// Default [`AiInvoker`] for pipeline phases: acquires a session from the
/// shared [`crate::pool::SessionPool`] for the duration of one invocation and
/// releases it afterward. `sink` is ignored since [`crate::pool::session::AiSession`]
/// has no streaming seam; phases that need streaming output wire in a
/// backend-specific invoker instead.
pub struct SessionPoolInvoker {
    pool: crate::pool::SessionPool,
}

impl SessionPoolInvoker {
    pub fn new(pool: crate::pool::SessionPool) -> Self {
        Self { pool }
    }
}

impl AiInvoker for SessionPoolInvoker {
    fn invoke(
        &self,
        prompt: String,
        options: InvokeOptions,
        _sink: Option<Box<dyn StreamSink>>,
    ) -> BoxFuture<'static, InvokeOutcome> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let timeout = options
                .timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(std::time::Duration::from_secs(120));
            let mut handle = match pool.acquire(timeout).await {
                Ok(handle) => handle,
                Err(e) => return InvokeOutcome::failed(e.to_string()),
            };
            match tokio::time::timeout(timeout, handle.send_and_wait(prompt)).await {
                Ok(Ok(response)) => {
                    handle.release().await;
                    InvokeOutcome::ok(response, None)
                }
                Ok(Err(e)) => {
                    handle.destroy().await;
                    InvokeOutcome::failed(e.to_string())
                }
                Err(_elapsed) => {
                    handle.destroy().await;
                    InvokeOutcome::timeout()
                }
            }
        })
    }
}
