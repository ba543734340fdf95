//! Asynchronous recording persistence.
//!
//! The request path hands finished [`Recording`]s to the [`Recorder`] with a
//! non-blocking enqueue. A single background worker owns the day files and
//! appends one JSON line per recording. When the queue is full the recording
//! is dropped and a warning is logged; the client path never waits on disk.

use crate::core::config::RecordingConfig;
use crate::core::recording::{day_file_name, Recording};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Default number of recordings that may wait for the worker.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Appends recordings to the current day file.
///
/// Every write opens the file in append mode, writes one line and closes it
/// again. The mutex linearizes steady-state writes with the shutdown drain.
pub struct RecordingWriter {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl RecordingWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file a recording written right now would land in.
    pub fn current_file(&self) -> PathBuf {
        self.dir.join(day_file_name(Utc::now().date_naive()))
    }

    pub async fn write(&self, rec: &Recording) -> anyhow::Result<()> {
        let line = rec.to_line()?;

        let _guard = self.lock.lock().await;
        let path = self.current_file();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open file {}: {}", path.display(), e))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

struct Active {
    sender: mpsc::Sender<Recording>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded producer/consumer hand-off from request tasks to the file writer.
pub struct Recorder {
    active: Option<Active>,
    dropped: AtomicU64,
}

impl Recorder {
    /// Build a recorder from configuration.
    ///
    /// Returns a disabled recorder when recording is turned off or the storage
    /// directory cannot be created. Must be called inside a tokio runtime.
    pub async fn new(config: &RecordingConfig) -> Self {
        if !config.enabled {
            tracing::info!("recording is disabled");
            return Self::disabled();
        }

        if let Err(e) = tokio::fs::create_dir_all(&config.path).await {
            tracing::error!(
                error = %e,
                path = %config.path.display(),
                "failed to create recordings directory"
            );
            return Self::disabled();
        }

        let (recorder, receiver) = Self::detached(config.queue_size);
        recorder
            .start_worker(receiver, Arc::new(RecordingWriter::new(&config.path)))
            .await;

        tracing::info!(
            path = %config.path.display(),
            queue_size = config.queue_size,
            "recording enabled"
        );
        recorder
    }

    /// A recorder whose `record` and `close` do nothing.
    pub fn disabled() -> Self {
        Self {
            active: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue without a worker attached; the caller owns the receiving end.
    pub(crate) fn detached(queue_size: usize) -> (Self, mpsc::Receiver<Recording>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let recorder = Self {
            active: Some(Active {
                sender,
                shutdown: Mutex::new(None),
                worker: Mutex::new(None),
            }),
            dropped: AtomicU64::new(0),
        };
        (recorder, receiver)
    }

    /// Spawn the single worker draining `receiver` into `writer`.
    pub(crate) async fn start_worker(
        &self,
        receiver: mpsc::Receiver<Recording>,
        writer: Arc<RecordingWriter>,
    ) {
        let Some(active) = &self.active else {
            return;
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(worker_task(receiver, shutdown_rx, writer));
        *active.shutdown.lock().await = Some(shutdown_tx);
        *active.worker.lock().await = Some(handle);
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// Number of recordings dropped because the queue was full or closed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Hand a finished recording to the worker without waiting.
    pub fn record(&self, rec: Recording) {
        let Some(active) = &self.active else {
            return;
        };

        match active.sender.try_send(rec) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(rec)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = %rec.id, "recording channel full, dropping recording");
            }
            Err(mpsc::error::TrySendError::Closed(rec)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = %rec.id, "recorder closed, dropping recording");
            }
        }
    }

    /// Stop the worker after it has written everything still queued.
    pub async fn close(&self) {
        let Some(active) = &self.active else {
            return;
        };

        if let Some(shutdown) = active.shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        let worker = active.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "recorder worker terminated abnormally");
            }
        }
    }
}

async fn worker_task(
    mut receiver: mpsc::Receiver<Recording>,
    mut shutdown: oneshot::Receiver<()>,
    writer: Arc<RecordingWriter>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            received = receiver.recv() => match received {
                Some(rec) => persist(&writer, &rec).await,
                None => return,
            },
        }
    }

    // Drain whatever was queued before shutdown.
    receiver.close();
    while let Some(rec) = receiver.recv().await {
        persist(&writer, &rec).await;
    }
    tracing::debug!("recorder worker stopped");
}

async fn persist(writer: &RecordingWriter, rec: &Recording) {
    if let Err(e) = writer.write(rec).await {
        tracing::error!(error = %e, id = %rec.id, "failed to write recording");
    }
}
