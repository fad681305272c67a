//! The reference renderer attachment.
//!
//! Buffers matching signals, debounces rendering by an idle interval
//! (default 3000 ms), and skips re-rendering identical content by
//! comparing a SHA-256 of the rendered output — external I/O is only
//! touched when something actually changed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sha2::{Digest, Sha256};

use orchid_domain::{Filter, Result, Signal, TraceEvent};

use crate::attach::{Cleanup, Transport};
use crate::runtime::State;

/// Default idle interval before a buffered render is flushed.
pub const DEFAULT_RENDER_IDLE: Duration = Duration::from_millis(3000);

/// Where rendered content goes (a file, a comment, a terminal, ...).
pub trait RenderTarget: Send + Sync + 'static {
    fn render(&self, content: &str) -> Result<()>;
}

/// Renders the whole document into one file, atomically (tmp +
/// rename), so readers never see a half-written render.
pub struct FileTarget {
    path: std::path::PathBuf,
}

impl FileTarget {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RenderTarget for FileTarget {
    fn render(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("render.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct RenderOptions {
    /// Idle time after the last matching signal before flushing.
    pub idle: Duration,
    /// Which signals feed the renderer.
    pub filter: Filter,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            idle: DEFAULT_RENDER_IDLE,
            filter: Filter::all(),
        }
    }
}

/// Build a renderer attachment.
///
/// `render_fn` turns the full signal buffer into the output document —
/// renders are whole-document, replacement-style.
pub fn renderer<S, T, F>(
    target: Arc<T>,
    render_fn: F,
    options: RenderOptions,
) -> impl FnOnce(Transport<S>) -> Cleanup
where
    S: State,
    T: RenderTarget,
    F: Fn(&[Signal]) -> String + Send + 'static,
{
    move |transport: Transport<S>| {
        let mut stream = transport.stream(options.filter.clone());
        let idle = options.idle;
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut buffer: Vec<Signal> = Vec::new();
            let mut dirty = false;
            let mut last_hash: Option<[u8; 32]> = None;

            loop {
                tokio::select! {
                    maybe = stream.next() => match maybe {
                        Some(signal) => {
                            buffer.push(signal);
                            dirty = true;
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(idle), if dirty => {
                        flush(&*target, &render_fn, &buffer, &mut last_hash);
                        dirty = false;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            if dirty {
                flush(&*target, &render_fn, &buffer, &mut last_hash);
            }
        });

        Box::new(move || {
            let _ = shutdown_tx.send(());
            drop(handle);
        })
    }
}

fn flush<F>(
    target: &dyn RenderTarget,
    render_fn: &F,
    buffer: &[Signal],
    last_hash: &mut Option<[u8; 32]>,
) where
    F: Fn(&[Signal]) -> String,
{
    let content = render_fn(buffer);
    let hash: [u8; 32] = Sha256::digest(content.as_bytes()).into();
    if *last_hash == Some(hash) {
        TraceEvent::RenderSkipped {
            reason: "content unchanged".into(),
        }
        .emit();
        return;
    }
    match target.render(&content) {
        Ok(()) => {
            *last_hash = Some(hash);
        }
        Err(e) => {
            tracing::warn!(error = %e, "render target write failed");
        }
    }
}
