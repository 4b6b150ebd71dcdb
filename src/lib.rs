#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! forgecore library — exposes the execution core for an AI-assisted
//! developer tooling server.
//!
//! This library re-exports the key building blocks:
//! - `pool` — bounded pool of reusable AI sessions
//! - `queue` — priority task queue with a single executor
//! - `store` — durable, observable process registry
//! - `pipeline` — incremental, cached component-documentation pipeline
//! - `rebuild` — change-driven rebuild controller
//! - `events` — typed domain-event bus shared by WS and SSE
//! - `routes` — REST API route handlers
//! - `ws` — WebSocket protocol handling
//! - `config` — configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod rebuild;
pub mod routes;
pub mod state;
pub mod store;
pub mod workspace;
pub mod ws;

pub use config::Config;
pub use error::Error;
pub use state::AppState;
