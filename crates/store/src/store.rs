//! The durable signal store.
//!
//! One append-only JSONL file per recording (`<id>.jsonl`, one JSON
//! signal per line) plus an `index.json` of metadata. Appends write and
//! flush before returning; finalize fsyncs. Concurrent appends to the
//! same recording serialize behind a per-recording lock; different
//! recordings proceed in parallel.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use orchid_domain::{Error, Result, Signal, TraceEvent};
use orchid_hub::SignalSink;

use crate::recording::{
    NewRecording, Recording, RecordingFilter, RecordingMeta, RecordingStatus,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide signal store rooted at one directory.
pub struct SignalStore {
    dir: PathBuf,
    index: RwLock<HashMap<String, RecordingMeta>>,
    /// Per-recording append serialization.
    append_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SignalStore {
    /// Open (or create) a store at `dir`, loading the metadata index.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let index_path = dir.join("index.json");
        let index = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            recordings = index.len(),
            path = %dir.display(),
            "signal store opened"
        );

        Ok(Self {
            dir,
            index: RwLock::new(index),
            append_locks: Mutex::new(HashMap::new()),
        })
    }

    fn signals_path(&self, recording_id: &str) -> PathBuf {
        self.dir.join(format!("{recording_id}.jsonl"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    /// Persist the metadata index atomically (tmp + rename).
    fn persist_index(&self) -> Result<()> {
        let json = {
            let index = self.index.read();
            serde_json::to_string_pretty(&*index)?
        };
        let tmp = self.index_path().with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn append_lock(&self, recording_id: &str) -> Arc<Mutex<()>> {
        self.append_locks
            .lock()
            .entry(recording_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Open a new recording; returns its id. Status starts `open`.
    pub fn create(&self, new: NewRecording) -> Result<String> {
        let recording_id = uuid::Uuid::new_v4().to_string();
        let meta = RecordingMeta {
            recording_id: recording_id.clone(),
            name: new.name,
            tags: new.tags,
            provider_type: new.provider_type,
            status: RecordingStatus::Open,
            created_at: Utc::now(),
            finalized_at: None,
            duration_ms: None,
        };

        std::fs::File::create(self.signals_path(&recording_id))?;
        self.index.write().insert(recording_id.clone(), meta.clone());
        self.persist_index()?;

        TraceEvent::RecordingCreated {
            recording_id: recording_id.clone(),
            name: meta.name.clone(),
        }
        .emit();

        Ok(recording_id)
    }

    /// Append one signal. Fails with `NotFound` for unknown ids and
    /// `Conflict` for finalized recordings. The write is flushed before
    /// returning.
    pub fn append(&self, recording_id: &str, signal: &Signal) -> Result<()> {
        match self.index.read().get(recording_id) {
            None => {
                return Err(Error::NotFound(format!("recording {recording_id}")));
            }
            Some(meta) if !meta.is_open() => {
                return Err(Error::Conflict(format!(
                    "recording {recording_id} is finalized"
                )));
            }
            Some(_) => {}
        }

        let lock = self.append_lock(recording_id);
        let _guard = lock.lock();

        let json = serde_json::to_string(signal)?;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(self.signals_path(recording_id))?;
        writeln!(file, "{json}")?;
        file.flush()?;
        Ok(())
    }

    /// Mark a recording terminal. Fsyncs the signal log.
    pub fn finalize(&self, recording_id: &str, duration_ms: Option<u64>) -> Result<()> {
        {
            let index = self.index.read();
            match index.get(recording_id) {
                None => return Err(Error::NotFound(format!("recording {recording_id}"))),
                Some(meta) if !meta.is_open() => {
                    return Err(Error::Conflict(format!(
                        "recording {recording_id} is already finalized"
                    )));
                }
                Some(_) => {}
            }
        }

        let lock = self.append_lock(recording_id);
        let _guard = lock.lock();

        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(self.signals_path(recording_id))?;
        file.sync_all()?;

        let signals = self.count_signals(recording_id)?;
        {
            let mut index = self.index.write();
            if let Some(meta) = index.get_mut(recording_id) {
                meta.status = RecordingStatus::Finalized;
                meta.finalized_at = Some(Utc::now());
                meta.duration_ms = duration_ms;
            }
        }
        self.persist_index()?;

        TraceEvent::RecordingFinalized {
            recording_id: recording_id.to_owned(),
            signals,
            duration_ms,
        }
        .emit();

        Ok(())
    }

    /// Load a recording with its full ordered signal list. Malformed
    /// lines (torn writes from a crash) are skipped with a warning.
    pub fn load(&self, recording_id: &str) -> Result<Recording> {
        let meta = self
            .index
            .read()
            .get(recording_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("recording {recording_id}")))?;

        let raw = std::fs::read_to_string(self.signals_path(recording_id))?;
        let mut signals = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Signal>(line) {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    tracing::warn!(
                        recording_id = recording_id,
                        error = %e,
                        "skipping malformed signal line"
                    );
                }
            }
        }
        Ok(Recording { meta, signals })
    }

    /// List recording metadata, newest first.
    pub fn list(&self, filter: Option<&RecordingFilter>) -> Vec<RecordingMeta> {
        let index = self.index.read();
        let mut metas: Vec<RecordingMeta> = index
            .values()
            .filter(|m| filter.map_or(true, |f| f.matches(m)))
            .cloned()
            .collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        metas
    }

    /// Look up metadata for one recording.
    pub fn meta(&self, recording_id: &str) -> Option<RecordingMeta> {
        self.index.read().get(recording_id).cloned()
    }

    /// Delete a recording and its log file.
    pub fn delete(&self, recording_id: &str) -> Result<()> {
        if self.index.write().remove(recording_id).is_none() {
            return Err(Error::NotFound(format!("recording {recording_id}")));
        }
        self.append_locks.lock().remove(recording_id);
        let path = self.signals_path(recording_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        self.persist_index()
    }

    /// Fork: copy the source log up to `up_to` signals (all when `None`)
    /// into a fresh open recording. A pure log operation — nothing is
    /// re-executed; subsequent live emissions continue on the fork.
    pub fn fork(
        &self,
        source_id: &str,
        up_to: Option<usize>,
        new: NewRecording,
    ) -> Result<(String, usize)> {
        let source = self.load(source_id)?;
        let take = up_to.unwrap_or(source.signals.len()).min(source.signals.len());

        let new_id = self.create(new)?;
        for signal in &source.signals[..take] {
            self.append(&new_id, signal)?;
        }

        TraceEvent::RecordingForked {
            source_id: source_id.to_owned(),
            new_id: new_id.clone(),
            copied: take,
        }
        .emit();

        Ok((new_id, take))
    }

    /// Drop the oldest finalized recordings beyond `keep_latest`.
    /// Open recordings are never pruned. Returns how many were
    /// deleted.
    pub fn prune(&self, keep_latest: usize) -> Result<usize> {
        let stale: Vec<String> = self
            .list(None)
            .into_iter()
            .skip(keep_latest)
            .filter(|m| !m.is_open())
            .map(|m| m.recording_id)
            .collect();
        for recording_id in &stale {
            self.delete(recording_id)?;
        }
        if !stale.is_empty() {
            tracing::info!(pruned = stale.len(), "pruned recordings");
        }
        Ok(stale.len())
    }

    fn count_signals(&self, recording_id: &str) -> Result<usize> {
        let raw = std::fs::read_to_string(self.signals_path(recording_id))?;
        Ok(raw.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hub sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Binds a hub to one open recording.
pub struct RecordingSink {
    store: Arc<SignalStore>,
    recording_id: String,
}

impl RecordingSink {
    pub fn new(store: Arc<SignalStore>, recording_id: impl Into<String>) -> Self {
        Self {
            store,
            recording_id: recording_id.into(),
        }
    }
}

impl SignalSink for RecordingSink {
    fn append(&self, signal: &Signal) -> Result<()> {
        self.store.append(&self.recording_id, signal).map_err(|e| {
            TraceEvent::RecordingAppendFailed {
                recording_id: self.recording_id.clone(),
                error: e.to_string(),
            }
            .emit();
            e
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
