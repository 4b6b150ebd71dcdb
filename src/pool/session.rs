//! The `SessionFactory` / `AiSession` adapter boundary.
//!
//! The pool never speaks to a concrete LLM transport — it only knows how to
//! create, use and destroy whatever a [`SessionFactory`] hands it. A real
//! binary wires in an adapter around its chosen backend; tests wire in a
//! fake. This mirrors the teacher's separation between `SessionManager`
//! (policy) and `spawn_shell_pgroup`/`spawn_shell_pty` (the concrete
//! transport), except here the transport boundary is a trait instead of a
//! free function, because the spec calls for a *pluggable* backend.
//!
//! Trait methods return boxed futures rather than using `async fn` so that
//! `Box<dyn AiSession>` stays object-safe — the same manual desugaring used
//! throughout the retrieval pack wherever a trait object needs async methods.

use futures::future::BoxFuture;

use crate::error::Error;

/// A live conversation handle with the backing LLM transport, reusable
/// across prompts.
pub trait AiSession: Send {
    /// Send a prompt and wait for the complete response.
    fn send_and_wait(&mut self, prompt: String) -> BoxFuture<'_, Result<String, Error>>;

    /// Tear down the underlying transport. Called on eviction and disposal;
    /// never called while a caller still holds the session.
    fn destroy(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Constructs new [`AiSession`] instances on demand.
pub trait SessionFactory: Send + Sync {
    fn create(&self) -> BoxFuture<'static, Result<Box<dyn AiSession>, Error>>;
}

/// Default [`SessionFactory`] for a binary with no real backend wired in: it
/// echoes the prompt back rather than calling out to an LLM. A real
/// deployment replaces this at startup with an adapter around its chosen
/// transport; the core never needs to change to support that.
pub struct EchoSessionFactory;

struct EchoSession;

impl AiSession for EchoSession {
    fn send_and_wait(&mut self, prompt: String) -> BoxFuture<'_, Result<String, Error>> {
        Box::pin(async move { Ok(prompt) })
    }

    fn destroy(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

impl SessionFactory for EchoSessionFactory {
    fn create(&self) -> BoxFuture<'static, Result<Box<dyn AiSession>, Error>> {
        Box::pin(async { Ok(Box::new(EchoSession) as Box<dyn AiSession>) })
    }
}
