//! Typed domain events and the broadcast bus that fans them out to WS/SSE
//! subscribers.
//!
//! Grounded in the teacher's `AppState::session_events: broadcast::Sender<Value>`
//! (see `state.rs`), generalized to a typed enum per the spec's redesign flag:
//! *"Event buses delivered synchronously to subscribers → bounded channels per
//! subscriber with explicit drop-oldest-and-count policy; never invoke a
//! subscriber under a lock."* `tokio::sync::broadcast` already gives us a
//! bounded ring buffer with drop-oldest semantics and a `Lagged(n)` signal on
//! receive — [`EventBus::subscribe`] surfaces that as an explicit counter
//! instead of swallowing it.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::pipeline::graph::ComponentGraph;
use crate::queue::{PooledTask, QueueSnapshot};
use crate::store::Process;
use crate::workspace::Workspace;

/// Default channel capacity. Large enough that a burst of store mutations
/// from one pipeline run does not lag normal-rate subscribers.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DomainEvent {
    ProcessAdded { process: Process },
    ProcessUpdated { process: Process },
    ProcessRemoved { id: String },
    ProcessesCleared { ids: Vec<String> },
    WorkspaceRegistered { workspace: Workspace },
    QueueUpdated { snapshot: QueueSnapshot },
    TaskCompleted { task: PooledTask },
    TaskFailed { task: PooledTask },
    TaskCancelled { task: PooledTask },
    /// Emitted by the rebuild controller once a debounce window settles.
    RebuildAffected { component_ids: Vec<String> },
    /// Emitted when a pipeline phase finishes, successfully or not, for one
    /// artifact graph. Carries no payload beyond the graph itself — phase
    /// detail lives in the process records for the units that ran.
    PipelineGraphUpdated { graph: ComponentGraph },
}

/// Shared, cloneable handle onto the event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Never blocks and never holds a component lock —
    /// callers are expected to have already released any pool/queue/store
    /// lock before calling this.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is not an error: events are fire-and-forget.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            lagged: 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A single subscriber's view of the bus, tracking how many events it has
/// dropped due to falling behind.
pub struct Subscription {
    rx: broadcast::Receiver<DomainEvent>,
    lagged: u64,
}

pub enum Recv {
    Event(DomainEvent),
    /// The subscriber missed `n` events since the last successful receive.
    Lagged(u64),
    Closed,
}

impl Subscription {
    pub async fn recv(&mut self) -> Recv {
        match self.rx.recv().await {
            Ok(event) => Recv::Event(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.lagged += n;
                Recv::Lagged(n)
            }
            Err(broadcast::error::RecvError::Closed) => Recv::Closed,
        }
    }

    /// Total events dropped for this subscriber since it was created.
    pub fn lagged_total(&self) -> u64 {
        self.lagged
    }
}
