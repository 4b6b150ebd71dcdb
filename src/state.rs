//! Shared application state passed to every handler via Axum's `State` extractor.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::events::EventBus;
use crate::pipeline::phases::{PhaseContext, PipelineOutput, PipelineRunner};
use crate::pool::SessionPool;
use crate::queue::TaskQueue;
use crate::rebuild::RebuildController;
use crate::store::ProcessStore;
use crate::workspace::WorkspaceRegistry;

/// Shared application state for the forgecore server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Typed domain-event bus. WS and SSE subscribers each get their own
    /// bounded receiver via [`EventBus::subscribe`].
    pub bus: EventBus,
    pub workspaces: WorkspaceRegistry,
    pub pool: SessionPool,
    pub queue: TaskQueue,
    pub store: ProcessStore,
    pub pipeline: Arc<PipelineRunner>,
    /// Last artifact graph and output tree per project, keyed by project
    /// name. Populated once a `POST /api/pipeline/run` completes; absent for
    /// a project that has never run.
    pub pipeline_outputs: Arc<RwLock<HashMap<String, Arc<PipelineOutput>>>>,
    /// One rebuild controller per watched workspace root, keyed by workspace
    /// id. `routes::workspaces::register` starts (or restarts) the entry for
    /// a workspace as soon as it's registered, wiring its callback to enqueue
    /// re-analysis on the shared [`TaskQueue`]. The standalone `watch-only`
    /// CLI mode runs its own controller directly against one root and never
    /// touches `AppState` at all, since it has no HTTP server, queue, or
    /// store to enqueue against.
    pub rebuild_controllers: Arc<RwLock<HashMap<String, Arc<RebuildController>>>>,
    /// Current number of open `/api/events` connections, for admission
    /// limiting.
    pub sse_connections: Arc<AtomicU32>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        bus: EventBus,
        workspaces: WorkspaceRegistry,
        pool: SessionPool,
        queue: TaskQueue,
        store: ProcessStore,
        pipeline_ctx: PhaseContext,
    ) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            bus,
            workspaces,
            pool,
            queue,
            store,
            pipeline: Arc::new(PipelineRunner::new(pipeline_ctx)),
            pipeline_outputs: Arc::new(RwLock::new(HashMap::new())),
            rebuild_controllers: Arc::new(RwLock::new(HashMap::new())),
            sse_connections: Arc::new(AtomicU32::new(0)),
        }
    }
}
