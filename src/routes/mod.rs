//! HTTP handlers, grouped by resource. Each module owns one row-cluster of
//! the external API table and depends only on [`crate::state::AppState`] and
//! its own resource's types.

pub mod events;
pub mod pipeline;
pub mod processes;
pub mod queue;
pub mod workspaces;
