//! Recording and replaying provider runs.
//!
//! Record mode streams each signal of a run into an open recording and,
//! on finish, finalizes it and writes a fingerprint-keyed entry file.
//! Replay mode resolves a request's fingerprint to an entry and yields
//! the recorded signals (order and payloads preserved, timestamps
//! rewritten now-relative) plus the stored aggregate result — replacing
//! the live provider call entirely.
//!
//! A crash between begin and finish leaves an open recording and no
//! entry file; replay only ever sees finished entries.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use orchid_domain::{Error, ProviderRequest, ProviderResult, Result, Signal, TraceEvent};

use crate::fingerprint::fingerprint;
use crate::recording::NewRecording;
use crate::store::SignalStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A finished provider-run recording keyed by fingerprint. One JSON
/// object per entry on disk (`<hash>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    pub hash: String,
    pub prompt: Value,
    pub provider: String,
    pub stream_data: Vec<Signal>,
    pub result: ProviderResult,
    pub recorded_at: DateTime<Utc>,
}

/// Recorded signals ready for re-emission, plus the aggregate result.
#[derive(Debug, Clone)]
pub struct Replay {
    pub signals: Vec<Signal>,
    pub result: ProviderResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderMode {
    /// Stream live and persist the run.
    Record,
    /// Replace live runs with recorded ones.
    Replay,
    /// Stream live, persist nothing.
    Disabled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recorder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps provider runs with record/replay behavior.
pub struct Recorder {
    dir: PathBuf,
    streams: Arc<SignalStore>,
    mode: RecorderMode,
}

impl Recorder {
    /// Open a recorder rooted at `dir`. Stream logs live under
    /// `dir/streams`, entries as `dir/<hash>.json`.
    pub fn open(dir: impl Into<PathBuf>, mode: RecorderMode) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let streams = Arc::new(SignalStore::open(dir.join("streams"))?);
        Ok(Self { dir, streams, mode })
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    /// Begin a provider run: either a live handle to record through, or
    /// a resolved replay.
    pub fn begin(&self, request: &ProviderRequest) -> Result<RunHandle> {
        match self.mode {
            RecorderMode::Replay => Ok(RunHandle::Replay(self.replay(request)?)),
            RecorderMode::Disabled => Ok(RunHandle::Live(LiveRecording::disabled())),
            RecorderMode::Record => {
                let hash = fingerprint(request);
                let recording_id = self.streams.create(
                    NewRecording::named(format!("{} {}", request.provider, &hash[..12]))
                        .with_tag("provider-run")
                        .with_provider_type(request.provider.clone()),
                )?;
                Ok(RunHandle::Live(LiveRecording {
                    inner: Some(LiveInner {
                        streams: Arc::clone(&self.streams),
                        entry_path: self.entry_path(&hash),
                        recording_id,
                        hash,
                        prompt: request.prompt.clone(),
                        provider: request.provider.clone(),
                    }),
                }))
            }
        }
    }

    /// Resolve and load a replay for a request.
    ///
    /// Match rules: exact fingerprint; else, when the store holds
    /// exactly one entry, fall back to it (loose name-keyed
    /// compatibility); else `NotFound`.
    pub fn replay(&self, request: &ProviderRequest) -> Result<Replay> {
        let hash = fingerprint(request);
        let (entry, exact) = match self.load_entry(&hash) {
            Ok(entry) => (entry, true),
            Err(Error::NotFound(_)) => {
                let hashes = self.entry_hashes();
                if hashes.len() == 1 {
                    (self.load_entry(&hashes[0])?, false)
                } else {
                    TraceEvent::ReplayLookup {
                        hash: hash.clone(),
                        exact: false,
                        found: false,
                    }
                    .emit();
                    return Err(Error::NotFound(format!(
                        "no recording found for fingerprint {hash}"
                    )));
                }
            }
            Err(e) => return Err(e),
        };

        TraceEvent::ReplayLookup {
            hash,
            exact,
            found: true,
        }
        .emit();

        // Rewrite timestamps now-relative, keeping offsets, so
        // downstream consumers stay monotonic.
        let mut signals = entry.stream_data;
        if let Some(first) = signals.first() {
            let t0 = first.timestamp;
            let now = Utc::now();
            for signal in &mut signals {
                signal.timestamp = now + (signal.timestamp - t0);
            }
        }

        Ok(Replay {
            signals,
            result: entry.result,
        })
    }

    /// List the fingerprints with finished entries.
    pub fn entry_hashes(&self) -> Vec<String> {
        let mut hashes = Vec::new();
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return hashes;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    hashes.push(stem.to_owned());
                }
            }
        }
        hashes.sort();
        hashes
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    fn load_entry(&self, hash: &str) -> Result<ReplayEntry> {
        let path = self.entry_path(hash);
        if !path.exists() {
            return Err(Error::NotFound(format!("replay entry {hash}")));
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Live handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Either a live recording in progress or a resolved replay.
pub enum RunHandle {
    Live(LiveRecording),
    Replay(Replay),
}

struct LiveInner {
    streams: Arc<SignalStore>,
    entry_path: PathBuf,
    recording_id: String,
    hash: String,
    prompt: Value,
    provider: String,
}

/// Incremental recording of one provider run. `append` each forwarded
/// signal, then `finish` with the aggregate result. Dropping without
/// `finish` (or calling `abandon`) leaves the recording open — replay
/// rejects it.
pub struct LiveRecording {
    inner: Option<LiveInner>,
}

impl LiveRecording {
    /// A handle that records nothing. What `begin` returns when the
    /// recorder is disabled — also the default for sessions that run
    /// without a recorder at all.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Forward one signal into the open recording. No-op when the
    /// recorder is disabled.
    pub fn append(&self, signal: &Signal) -> Result<()> {
        match &self.inner {
            Some(inner) => inner.streams.append(&inner.recording_id, signal),
            None => Ok(()),
        }
    }

    /// Finalize the recording and publish the fingerprint entry.
    pub fn finish(self, result: &ProviderResult) -> Result<()> {
        let Some(inner) = self.inner else {
            return Ok(());
        };
        inner
            .streams
            .finalize(&inner.recording_id, Some(result.duration_ms))?;
        let recording = inner.streams.load(&inner.recording_id)?;

        let entry = ReplayEntry {
            hash: inner.hash.clone(),
            prompt: inner.prompt,
            provider: inner.provider,
            stream_data: recording.signals,
            result: result.clone(),
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&entry)?;
        let tmp = inner.entry_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &inner.entry_path)?;
        Ok(())
    }

    /// Drop the run without publishing an entry. The stream log stays
    /// open on disk for post-mortem inspection.
    pub fn abandon(self) {
        if let Some(inner) = &self.inner {
            tracing::warn!(
                recording_id = %inner.recording_id,
                hash = %inner.hash,
                "provider run abandoned before finish"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
