//! Run Memory
//!
//! Durable state of a run inside its render directory: the append-only event
//! log (JSON Lines) and keyed text artifacts such as the validated plan, the
//! run report and the artifact manifest.
//!
//! Appends are serialized per log file, not per handle: every `RunMemory`
//! opened on the same `{project}.events.jsonl` in this process shares one
//! `tokio::sync::Mutex`, so events get strictly increasing `seq` numbers and
//! non-decreasing timestamps, and are never rewritten.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::conductor::types::{EventDraft, EventLevel, RunEvent, RunReport};
use sdk::EngineError;

/// Key of the validated plan document
pub const PLAN_KEY: &str = "plan.json";
/// Key of the append-only event log
pub const EVENTS_KEY: &str = "events.jsonl";
/// Key of the run report
pub const REPORT_KEY: &str = "report.json";
/// Key of the standalone artifact manifest
pub const MANIFEST_KEY: &str = "manifest.json";

/// Position of the next append in one log file
#[derive(Debug, Default)]
struct LogCursor {
    loaded: bool,
    next_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

type SharedCursor = Arc<Mutex<LogCursor>>;

static CURSORS: OnceLock<std::sync::Mutex<HashMap<PathBuf, SharedCursor>>> = OnceLock::new();

/// The cursor every handle on `key` appends through
fn cursor_for(key: PathBuf) -> SharedCursor {
    let mut cursors = CURSORS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(cursors.entry(key).or_default())
}

/// Event log and artifact store of one run
#[derive(Debug)]
pub struct RunMemory {
    dir: PathBuf,
    project: String,
    run_id: String,
    cursor: SharedCursor,
    /// Events recorded through this handle
    events: Mutex<Vec<RunEvent>>,
}

impl RunMemory {
    /// Open the memory for `project` in `dir`, creating the directory if needed.
    ///
    /// Sequence numbers continue from the last event already in the log.
    pub async fn open(
        dir: impl Into<PathBuf>,
        project: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let dir = dir.into();
        let project = project.into();
        fs::create_dir_all(&dir).await?;

        let log_path = dir.join(format!("{}.{}", project, EVENTS_KEY));
        let key = match fs::canonicalize(&dir).await {
            Ok(canonical) => canonical.join(format!("{}.{}", project, EVENTS_KEY)),
            Err(_) => log_path.clone(),
        };
        let cursor = cursor_for(key);
        {
            let mut position = cursor.lock().await;
            if !position.loaded {
                let existing = read_event_log(&log_path).await?;
                position.next_seq = existing.last().map(|e| e.seq + 1).unwrap_or(0);
                position.last_timestamp = existing.last().map(|e| e.timestamp);
                position.loaded = true;
            }
        }

        Ok(Self {
            dir,
            project,
            run_id: run_id.into(),
            cursor,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Path of the artifact stored under `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.project, key))
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.path_for(EVENTS_KEY)
    }

    /// Append one event to the durable log and return the sealed record.
    pub async fn record(&self, draft: EventDraft) -> Result<RunEvent, EngineError> {
        let mut log = self.cursor.lock().await;

        let now = Utc::now();
        let timestamp = match log.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        let event = RunEvent {
            seq: log.next_seq,
            run_id: self.run_id.clone(),
            timestamp,
            level: draft.level,
            kind: draft.kind,
            step: draft.step,
            message: draft.message,
            data: draft.data,
        };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.event_log_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        log.next_seq += 1;
        log.last_timestamp = Some(timestamp);
        self.events.lock().await.push(event.clone());
        drop(log);

        mirror(&event);
        Ok(event)
    }

    /// Events recorded through this handle, in append order
    pub async fn events(&self) -> Vec<RunEvent> {
        self.events.lock().await.clone()
    }

    /// Persist a text artifact under `key`, replacing any previous version.
    pub async fn save_artifact(&self, key: &str, contents: &str) -> Result<PathBuf, EngineError> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.{}.tmp", self.project, key));
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Persist a value as pretty JSON under `key`
    pub async fn save_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<PathBuf, EngineError> {
        let json = serde_json::to_string_pretty(value)?;
        self.save_artifact(key, &json).await
    }

    /// Load a text artifact, `None` if it was never written
    pub async fn load_artifact(&self, key: &str) -> Result<Option<String>, EngineError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The report of the previous run, if one was persisted
    pub async fn load_report(&self) -> Result<Option<RunReport>, EngineError> {
        match self.load_artifact(REPORT_KEY).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// Read every event of a log file. Malformed lines are skipped.
pub async fn read_event_log(path: &Path) -> Result<Vec<RunEvent>, EngineError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut events = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RunEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!("Skipping malformed event on line {} of {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(events)
}

fn mirror(event: &RunEvent) {
    let message = event.message.as_deref().unwrap_or("");
    match event.level {
        EventLevel::Info => info!(run = %event.run_id, seq = event.seq, kind = ?event.kind, step = ?event.step, "{}", message),
        EventLevel::Warn => warn!(run = %event.run_id, seq = event.seq, kind = ?event.kind, step = ?event.step, "{}", message),
        EventLevel::Error => error!(run = %event.run_id, seq = event.seq, kind = ?event.kind, step = ?event.step, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::EventKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let memory = RunMemory::open(dir.path(), "harbor", "run-1").await.unwrap();

        memory
            .record(EventDraft::new(EventKind::StepStart).step(0).message("start"))
            .await
            .unwrap();
        memory
            .record(EventDraft::new(EventKind::StepComplete).step(0))
            .await
            .unwrap();

        let events = memory.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
        assert!(events[0].timestamp <= events[1].timestamp);

        let on_disk = read_event_log(&memory.event_log_path()).await.unwrap();
        assert_eq!(on_disk, events);
    }

    #[tokio::test]
    async fn test_log_is_never_truncated_across_runs() {
        let dir = TempDir::new().unwrap();
        {
            let first = RunMemory::open(dir.path(), "harbor", "run-1").await.unwrap();
            first
                .record(EventDraft::new(EventKind::RunStart))
                .await
                .unwrap();
        }
        let second = RunMemory::open(dir.path(), "harbor", "run-2").await.unwrap();
        let event = second
            .record(EventDraft::new(EventKind::RunStart))
            .await
            .unwrap();

        assert_eq!(event.seq, 1);
        let all = read_event_log(&second.event_log_path()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].run_id, "run-1");
        assert_eq!(all[1].run_id, "run-2");
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(RunMemory::open(dir.path(), "p", "run").await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let memory = Arc::clone(&memory);
            handles.push(tokio::spawn(async move {
                memory
                    .record(EventDraft::new(EventKind::StepStart).step(i))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk = read_event_log(&memory.event_log_path()).await.unwrap();
        assert_eq!(on_disk.len(), 16);
        let seqs: Vec<u64> = on_disk.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_handles_on_one_log_share_sequence() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(RunMemory::open(dir.path(), "p", "run-a").await.unwrap());
        let second = Arc::new(RunMemory::open(dir.path(), "p", "run-b").await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            for memory in [Arc::clone(&first), Arc::clone(&second)] {
                handles.push(tokio::spawn(async move {
                    memory
                        .record(EventDraft::new(EventKind::StepStart).step(i))
                        .await
                        .unwrap();
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk = read_event_log(&first.event_log_path()).await.unwrap();
        let seqs: Vec<u64> = on_disk.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..16).collect::<Vec<u64>>());
        for pair in on_disk.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        assert_eq!(first.events().await.len(), 8);
        assert_eq!(second.events().await.len(), 8);

        // a handle opened later continues the shared sequence
        let third = RunMemory::open(dir.path(), "p", "run-c").await.unwrap();
        let event = third
            .record(EventDraft::new(EventKind::RunStart))
            .await
            .unwrap();
        assert_eq!(event.seq, 16);
    }

    #[tokio::test]
    async fn test_artifacts_round_trip() {
        let dir = TempDir::new().unwrap();
        let memory = RunMemory::open(dir.path(), "harbor", "run").await.unwrap();

        assert_eq!(memory.load_artifact(PLAN_KEY).await.unwrap(), None);
        let path = memory.save_artifact(PLAN_KEY, "{}").await.unwrap();
        assert_eq!(path, dir.path().join("harbor.plan.json"));
        assert_eq!(
            memory.load_artifact(PLAN_KEY).await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(memory.load_report().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let memory = RunMemory::open(dir.path(), "p", "run").await.unwrap();
        memory
            .record(EventDraft::new(EventKind::RunStart))
            .await
            .unwrap();
        let path = memory.event_log_path();
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("not json\n");
        std::fs::write(&path, contents).unwrap();

        assert_eq!(read_event_log(&path).await.unwrap().len(), 1);
    }
}
