//! Process Store: the durable, observable registry of every AI job.
//!
//! Persistence follows the shape of the teacher's `sessions::journal` module —
//! an append-only log drained by a background writer task, replayed on
//! startup to rebuild the in-memory index — generalized from one file per
//! session to a single shared log for the whole store, since process records
//! are mutated far less often than session output is produced.

mod journal;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::Error;
use crate::events::{DomainEvent, EventBus};
use journal::{LogEntry, StoreJournal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Sort bucket per the default query order: running, queued, failed,
    /// completed, cancelled.
    fn sort_bucket(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Queued => 1,
            Self::Failed => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ProcessStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub prompt_preview: String,
    pub full_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ProcessMetadata,
}

impl Process {
    fn validate_new(&self) -> Result<(), Error> {
        if self.id.trim().is_empty() || self.kind.trim().is_empty() {
            return Err(Error::Validation("id and type are required".to_string()));
        }
        if let Some(end_time) = self.end_time {
            if !self.status.is_terminal() {
                return Err(Error::Validation(
                    "endTime may only be set for a terminal status".to_string(),
                ));
            }
            if end_time < self.start_time {
                return Err(Error::Validation("endTime must be >= startTime".to_string()));
            }
        } else if self.status.is_terminal() {
            return Err(Error::Validation(
                "a terminal status requires endTime".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update applied by `PATCH /api/processes/:id`. `None` leaves the
/// field untouched; there is no way to clear an already-set field back to
/// `None` through this API, mirroring the HTTP contract in the spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPatch {
    pub status: Option<ProcessStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub structured_result: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessFilter {
    pub workspace_id: Option<String>,
    pub status: Option<Vec<ProcessStatus>>,
    pub kind: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub parent_process_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl ProcessFilter {
    pub fn new() -> Self {
        Self {
            limit: 50,
            offset: 0,
            ..Default::default()
        }
    }

    /// Parse from the lenient query-param contract in the spec: unknown
    /// status tokens and unparseable `since` values are silently dropped
    /// rather than rejected, and empty strings are treated as absent.
    pub fn from_query_params(
        workspace: Option<&str>,
        status: Option<&str>,
        kind: Option<&str>,
        since: Option<&str>,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> Self {
        let non_empty = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);

        let status = status
            .filter(|s| !s.is_empty())
            .map(|s| s.split(',').filter_map(ProcessStatus::parse).collect::<Vec<_>>())
            .filter(|v| !v.is_empty());

        let since = since
            .filter(|s| !s.is_empty())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            workspace_id: non_empty(workspace),
            status,
            kind: non_empty(kind),
            since,
            parent_process_id: None,
            limit: limit.and_then(|v| v.parse().ok()).unwrap_or(50),
            offset: offset.and_then(|v| v.parse().ok()).unwrap_or(0),
        }
    }

    fn matches(&self, p: &Process) -> bool {
        if let Some(ws) = &self.workspace_id {
            if p.workspace_id.as_deref() != Some(ws.as_str()) {
                return false;
            }
        }
        if let Some(statuses) = &self.status {
            if !statuses.contains(&p.status) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if &p.kind != kind {
                return false;
            }
        }
        if let Some(since) = &self.since {
            if p.start_time < *since {
                return false;
            }
        }
        if let Some(parent) = &self.parent_process_id {
            if p.parent_process_id.as_deref() != Some(parent.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceCount {
    pub workspace_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStats {
    pub total_processes: usize,
    pub by_status: HashMap<String, usize>,
    pub by_workspace: Vec<WorkspaceCount>,
}

#[derive(Clone)]
pub struct ProcessStore {
    state: Arc<RwLock<HashMap<String, Process>>>,
    journal: Option<Arc<StoreJournal>>,
    bus: EventBus,
}

impl ProcessStore {
    /// In-memory store with no persistence, for tests and for `usePool=false`
    /// embeddings that don't need a data directory.
    pub fn in_memory(bus: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(HashMap::new())),
            journal: None,
            bus,
        }
    }

    /// Open (or create) the on-disk log under `data_dir`, replay it, and
    /// transition any process left non-terminal by a previous crash to
    /// `failed`/`interrupted` — the store's one automatic status transition.
    pub async fn open(data_dir: &std::path::Path, bus: EventBus) -> Result<Self, Error> {
        let path = data_dir.join("processes.jsonl");
        let replayed = StoreJournal::replay(&path).await.map_err(|e| {
            Error::Internal(format!("failed to replay process store log: {e}"))
        })?;

        let journal = StoreJournal::open(path).await.map_err(|e| {
            Error::Internal(format!("failed to open process store log: {e}"))
        })?;

        let mut state = replayed;
        let mut orphaned = Vec::new();
        for process in state.values_mut() {
            if !process.status.is_terminal() {
                warn!(id = %process.id, "orphaned process found on startup, marking interrupted");
                process.status = ProcessStatus::Failed;
                process.error = Some("interrupted".to_string());
                process.end_time = Some(Utc::now());
                orphaned.push(process.clone());
            }
        }
        for process in &orphaned {
            journal.append(LogEntry::Updated(process.clone())).await;
        }

        let store = Self {
            state: Arc::new(RwLock::new(state)),
            journal: Some(Arc::new(journal)),
            bus,
        };
        for process in orphaned {
            store.bus.publish(DomainEvent::ProcessUpdated { process });
        }
        Ok(store)
    }

    pub async fn create(&self, process: Process) -> Result<Process, Error> {
        process.validate_new()?;
        {
            let mut state = self.state.write().await;
            if state.contains_key(&process.id) {
                return Err(Error::Conflict(format!(
                    "process '{}' already exists",
                    process.id
                )));
            }
            state.insert(process.id.clone(), process.clone());
        }
        self.log(LogEntry::Created(process.clone())).await;
        self.bus.publish(DomainEvent::ProcessAdded {
            process: process.clone(),
        });
        Ok(process)
    }

    pub async fn get(&self, id: &str) -> Option<Process> {
        self.state.read().await.get(id).cloned()
    }

    pub async fn list(&self, filter: &ProcessFilter) -> (Vec<Process>, usize) {
        let state = self.state.read().await;
        let mut matching: Vec<Process> = state.values().filter(|p| filter.matches(p)).cloned().collect();
        matching.sort_by(|a, b| {
            a.status
                .sort_bucket()
                .cmp(&b.status.sort_bucket())
                .then_with(|| b.start_time.cmp(&a.start_time))
        });
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.max(1))
            .collect();
        (page, total)
    }

    pub async fn update(&self, id: &str, patch: ProcessPatch) -> Result<Process, Error> {
        let updated = {
            let mut state = self.state.write().await;
            let process = state
                .get_mut(id)
                .ok_or_else(|| Error::NotFound("Process not found".to_string()))?;

            if let Some(status) = patch.status {
                if process.status.is_terminal() && !status.is_terminal() {
                    return Err(Error::Conflict(
                        "cannot move a terminal process back to a non-terminal status".to_string(),
                    ));
                }
                process.status = status;
            }
            if let Some(end_time) = patch.end_time {
                process.end_time = Some(end_time);
            }
            if let Some(result) = patch.result {
                process.result = Some(result);
            }
            if let Some(structured) = patch.structured_result {
                process.structured_result = Some(structured);
            }
            if let Some(error) = patch.error {
                process.error = Some(error);
            }
            if process.status.is_terminal() && process.end_time.is_none() {
                process.end_time = Some(Utc::now());
            }
            process.clone()
        };
        self.log(LogEntry::Updated(updated.clone())).await;
        self.bus.publish(DomainEvent::ProcessUpdated {
            process: updated.clone(),
        });
        Ok(updated)
    }

    /// Deleting a non-terminal process cancels it first (logged and
    /// published as a `ProcessUpdated`) so nothing still running is dropped
    /// out from under itself; cancel-then-delete is the default policy.
    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let cancelled = {
            let mut state = self.state.write().await;
            let process = state
                .get_mut(id)
                .ok_or_else(|| Error::NotFound("Process not found".to_string()))?;
            if process.status.is_terminal() {
                None
            } else {
                process.status = ProcessStatus::Cancelled;
                process.end_time = Some(Utc::now());
                Some(process.clone())
            }
        };
        if let Some(process) = cancelled {
            self.log(LogEntry::Updated(process.clone())).await;
            self.bus.publish(DomainEvent::ProcessUpdated { process });
        }

        self.state.write().await.remove(id);
        self.log(LogEntry::Deleted(id.to_string())).await;
        self.bus.publish(DomainEvent::ProcessRemoved { id: id.to_string() });
        Ok(())
    }

    /// Bulk delete by status. Any matching process that isn't already
    /// terminal is cancelled first, same policy as [`Self::delete`]. Emits
    /// `processes-cleared` plus one `process-removed` per removed id, per
    /// the spec's event contract.
    pub async fn delete_by_status(&self, statuses: &[ProcessStatus]) -> usize {
        let (ids, cancelled): (Vec<String>, Vec<Process>) = {
            let mut state = self.state.write().await;
            let ids: Vec<String> = state
                .values()
                .filter(|p| statuses.contains(&p.status))
                .map(|p| p.id.clone())
                .collect();
            let mut cancelled = Vec::new();
            for id in &ids {
                if let Some(process) = state.get_mut(id) {
                    if !process.status.is_terminal() {
                        process.status = ProcessStatus::Cancelled;
                        process.end_time = Some(Utc::now());
                        cancelled.push(process.clone());
                    }
                }
            }
            (ids, cancelled)
        };

        for process in &cancelled {
            self.log(LogEntry::Updated(process.clone())).await;
        }
        for process in cancelled {
            self.bus.publish(DomainEvent::ProcessUpdated { process });
        }

        {
            let mut state = self.state.write().await;
            for id in &ids {
                state.remove(id);
            }
        }
        for id in &ids {
            self.log(LogEntry::Deleted(id.clone())).await;
        }
        if !ids.is_empty() {
            self.bus.publish(DomainEvent::ProcessesCleared { ids: ids.clone() });
            for id in &ids {
                self.bus.publish(DomainEvent::ProcessRemoved { id: id.clone() });
            }
        }
        ids.len()
    }

    pub async fn stats(&self) -> ProcessStats {
        let state = self.state.read().await;
        let mut by_status = HashMap::new();
        let mut by_workspace: HashMap<String, usize> = HashMap::new();
        for p in state.values() {
            *by_status.entry(p.status.as_str().to_string()).or_insert(0) += 1;
            if let Some(ws) = &p.workspace_id {
                *by_workspace.entry(ws.clone()).or_insert(0) += 1;
            }
        }
        let mut by_workspace: Vec<WorkspaceCount> = by_workspace
            .into_iter()
            .map(|(workspace_id, count)| WorkspaceCount { workspace_id, count })
            .collect();
        by_workspace.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        ProcessStats {
            total_processes: state.len(),
            by_status,
            by_workspace,
        }
    }

    async fn log(&self, entry: LogEntry) {
        if let Some(journal) = &self.journal {
            journal.append(entry).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(id: &str, status: ProcessStatus) -> Process {
        let start_time = Utc::now();
        Process {
            id: id.to_string(),
            parent_process_id: None,
            workspace_id: None,
            kind: "clarification".to_string(),
            status,
            start_time,
            end_time: if status.is_terminal() { Some(start_time) } else { None },
            prompt_preview: "hi".to_string(),
            full_prompt: "hi".to_string(),
            result: None,
            structured_result: None,
            error: None,
            metadata: ProcessMetadata::default(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Running)).await.unwrap();
        let err = store
            .create(process("p1", ProcessStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn update_enforces_terminal_monotonicity() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Completed)).await.unwrap();

        let err = store
            .update(
                "p1",
                ProcessPatch {
                    status: Some(ProcessStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn update_stamps_end_time_on_terminal_transition() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Running)).await.unwrap();

        let updated = store
            .update(
                "p1",
                ProcessPatch {
                    status: Some(ProcessStatus::Completed),
                    result: Some("ok".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ProcessStatus::Completed);
        assert!(updated.end_time.is_some());
        assert_eq!(updated.result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn delete_missing_process_is_not_found() {
        let store = ProcessStore::in_memory(EventBus::new());
        let err = store.delete("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_cancels_a_running_process_before_removing_it() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Running)).await.unwrap();

        store.delete("p1").await.unwrap();
        assert!(store.get("p1").await.is_none());
    }

    #[tokio::test]
    async fn delete_by_status_cancels_non_terminal_matches_before_removing() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Running)).await.unwrap();
        store.create(process("p2", ProcessStatus::Completed)).await.unwrap();

        let removed = store
            .delete_by_status(&[ProcessStatus::Running, ProcessStatus::Completed])
            .await;
        assert_eq!(removed, 2);
        assert!(store.get("p1").await.is_none());
        assert!(store.get("p2").await.is_none());
    }

    #[tokio::test]
    async fn list_filters_by_status_set() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Running)).await.unwrap();
        store.create(process("p2", ProcessStatus::Completed)).await.unwrap();
        store.create(process("p3", ProcessStatus::Failed)).await.unwrap();

        let filter = ProcessFilter {
            status: Some(vec![ProcessStatus::Running, ProcessStatus::Failed]),
            limit: 50,
            ..ProcessFilter::new()
        };
        let (page, total) = store.list(&filter).await;
        assert_eq!(total, 2);
        assert!(page.iter().all(|p| p.status == ProcessStatus::Running || p.status == ProcessStatus::Failed));
    }

    #[tokio::test]
    async fn list_default_order_is_running_then_queued_then_failed() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("completed", ProcessStatus::Completed)).await.unwrap();
        store.create(process("running", ProcessStatus::Running)).await.unwrap();
        store.create(process("queued", ProcessStatus::Queued)).await.unwrap();

        let (page, _) = store.list(&ProcessFilter::new()).await;
        let order: Vec<&str> = page.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["running", "queued", "completed"]);
    }

    #[tokio::test]
    async fn delete_by_status_removes_matching_and_counts() {
        let store = ProcessStore::in_memory(EventBus::new());
        store.create(process("p1", ProcessStatus::Completed)).await.unwrap();
        store.create(process("p2", ProcessStatus::Failed)).await.unwrap();
        store.create(process("p3", ProcessStatus::Running)).await.unwrap();

        let removed = store
            .delete_by_status(&[ProcessStatus::Completed, ProcessStatus::Failed])
            .await;
        assert_eq!(removed, 2);
        assert!(store.get("p3").await.is_some());
        assert!(store.get("p1").await.is_none());
    }

    #[tokio::test]
    async fn stats_aggregates_by_status_and_workspace() {
        let store = ProcessStore::in_memory(EventBus::new());
        let mut p1 = process("p1", ProcessStatus::Running);
        p1.workspace_id = Some("ws-1".to_string());
        let mut p2 = process("p2", ProcessStatus::Running);
        p2.workspace_id = Some("ws-1".to_string());
        store.create(p1).await.unwrap();
        store.create(p2).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total_processes, 2);
        assert_eq!(stats.by_status.get("running"), Some(&2));
        assert_eq!(stats.by_workspace[0].workspace_id, "ws-1");
        assert_eq!(stats.by_workspace[0].count, 2);
    }

    #[tokio::test]
    async fn rehydrating_store_marks_non_terminal_processes_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ProcessStore::open(dir.path(), EventBus::new()).await.unwrap();
            store.create(process("p1", ProcessStatus::Running)).await.unwrap();
            // Give the journal's background writer a moment to flush before
            // the store (and its channel sender) is dropped.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        let reopened = ProcessStore::open(dir.path(), EventBus::new()).await.unwrap();
        let p1 = reopened.get("p1").await.unwrap();
        assert_eq!(p1.status, ProcessStatus::Failed);
        assert_eq!(p1.error.as_deref(), Some("interrupted"));
    }
}
