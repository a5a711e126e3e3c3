//! Upload queue orchestrating fingerprint, dedup check and transfer.
//!
//! Files are enqueued with a destination folder, then processed by
//! [`UploadQueue::run`] with at most `file_concurrency` files in flight.
//! Each file has its own cancellation token, addressable by [`UploadId`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cloudrive_transfer::{FileSource, ProgressState, TransferObserver, compute_fingerprint};
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backend::{DriveBackend, ExistsResult};
use crate::error::UploadError;
use crate::settings::UploadSettings;
use crate::types::{Stage, UploadEvent, UploadId, UploadOutcome, UploadReport, UploadState};
use crate::uploader::ChunkedUploader;

/// A queued file.
struct Entry {
    id: UploadId,
    source: Arc<dyn FileSource>,
    folder_id: i64,
    cancel: CancellationToken,
    state: Mutex<UploadState>,
    /// Set once a `run` has taken this entry.
    claimed: AtomicBool,
}

impl Entry {
    fn state(&self) -> UploadState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Queue of files to upload.
pub struct UploadQueue {
    backend: Arc<dyn DriveBackend>,
    settings: UploadSettings,
    entries: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadQueue {
    pub fn new(backend: Arc<dyn DriveBackend>, settings: UploadSettings) -> Self {
        let (events_tx, events_rx) = mpsc::channel(settings.event_buffer.max(1));
        Self {
            backend,
            settings,
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped (not awaited) when the channel is full.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Adds a file in the `ready` state and returns its id.
    pub fn enqueue(&self, source: Arc<dyn FileSource>, folder_id: i64) -> UploadId {
        self.enqueue_with_cancel(source, folder_id, CancellationToken::new())
    }

    /// Like [`enqueue`](Self::enqueue), but the caller supplies the token
    /// that stops this file.
    pub fn enqueue_with_cancel(
        &self,
        source: Arc<dyn FileSource>,
        folder_id: i64,
        cancel: CancellationToken,
    ) -> UploadId {
        let id = UploadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            id,
            source,
            folder_id,
            cancel,
            state: Mutex::new(UploadState::Ready),
            claimed: AtomicBool::new(false),
        });
        debug!(upload_id = %id, file = %entry.source.name(), folder_id, "file queued");
        self.lock_entries().push(entry);
        id
    }

    /// Current state of a queued file.
    pub fn state(&self, id: UploadId) -> Option<UploadState> {
        self.find(id).map(|e| e.state())
    }

    /// Cancellation token of a queued file.
    pub fn cancel_token(&self, id: UploadId) -> Option<CancellationToken> {
        self.find(id).map(|e| e.cancel.clone())
    }

    /// Requests cancellation of one file.
    ///
    /// A file still `ready` is canceled without ever starting; a running
    /// file stops at its next chunk boundary. Finished files are left alone.
    pub fn cancel(&self, id: UploadId) -> Result<(), UploadError> {
        let entry = self.find(id).ok_or(UploadError::NotFound(id))?;
        info!(upload_id = %id, file = %entry.source.name(), "cancel requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// Requests cancellation of every unfinished file.
    pub fn cancel_all(&self) {
        for entry in self.lock_entries().iter() {
            if !entry.state().is_terminal() {
                entry.cancel.cancel();
            }
        }
    }

    /// Number of files not yet finished.
    pub fn pending(&self) -> usize {
        self.lock_entries()
            .iter()
            .filter(|e| !e.state().is_terminal())
            .count()
    }

    /// Drops finished files from the queue, releasing their tokens.
    pub fn clear_finished(&self) {
        self.lock_entries().retain(|e| !e.state().is_terminal());
    }

    /// Processes every `ready` file and returns one report per file,
    /// ordered by id.
    ///
    /// Files enqueued while `run` is in progress wait for the next call.
    /// Concurrent calls split the ready files between them; a file is only
    /// ever processed by one call.
    pub async fn run(&self) -> Vec<UploadReport> {
        let ready: Vec<Arc<Entry>> = self
            .lock_entries()
            .iter()
            .filter(|e| {
                e.state() == UploadState::Ready && !e.claimed.swap(true, Ordering::AcqRel)
            })
            .cloned()
            .collect();

        if ready.is_empty() {
            return Vec::new();
        }
        info!(
            files = ready.len(),
            concurrency = self.settings.file_concurrency(),
            "upload batch started"
        );

        let mut reports: Vec<UploadReport> = stream::iter(ready)
            .map(|entry| self.process(entry))
            .buffer_unordered(self.settings.file_concurrency())
            .collect()
            .await;
        reports.sort_by_key(|r| r.id);
        reports
    }

    async fn process(&self, entry: Arc<Entry>) -> UploadReport {
        let outcome = self.drive(&entry).await;
        let state = outcome.state();
        let name = entry.source.name().to_string();

        if let Err(e) = self.transition(&entry, state) {
            // Only reachable if the entry was moved to a terminal state
            // elsewhere; the report still reflects what this run saw.
            debug!(upload_id = %entry.id, error = %e, "final transition skipped");
        }

        let error = match &outcome {
            UploadOutcome::Done {
                deduplicated,
                fingerprint,
                ..
            } => {
                info!(
                    upload_id = %entry.id,
                    file = %name,
                    fingerprint = %fingerprint,
                    deduplicated,
                    "upload finished"
                );
                None
            }
            UploadOutcome::Canceled => {
                info!(upload_id = %entry.id, file = %name, "upload canceled");
                None
            }
            UploadOutcome::Failed { stage, error } => {
                error!(upload_id = %entry.id, file = %name, %stage, error = %error, "upload failed");
                Some(error.to_string())
            }
        };

        self.emit(UploadEvent::Finished {
            id: entry.id,
            file_name: name.clone(),
            state,
            error,
        });

        UploadReport {
            id: entry.id,
            file_name: name,
            outcome,
        }
    }

    /// Runs the pipeline for one file up to (not including) its terminal state.
    async fn drive(&self, entry: &Entry) -> UploadOutcome {
        let source = entry.source.as_ref();
        let cancel = &entry.cancel;

        if cancel.is_cancelled() {
            return UploadOutcome::Canceled;
        }

        // 1. Calculate
        if let Err(error) = self.transition(entry, UploadState::Calculating) {
            return fail(Stage::Hashing, error);
        }
        let hash_observer = EventObserver {
            id: entry.id,
            stage: Stage::Hashing,
            events_tx: &self.events_tx,
        };
        let fingerprint = match compute_fingerprint(source, &hash_observer, cancel).await {
            Ok(hash) => hash,
            Err(e) if e.is_cancelled() => return UploadOutcome::Canceled,
            Err(e) => return fail(Stage::Hashing, e.into()),
        };

        // 2. Check
        if let Err(error) = self.transition(entry, UploadState::Checking) {
            return fail(Stage::Checking, error);
        }
        if cancel.is_cancelled() {
            return UploadOutcome::Canceled;
        }
        let exists = match self.check_exists(entry, &fingerprint).await {
            Ok(exists) => exists,
            Err(e) if e.is_cancelled() => return UploadOutcome::Canceled,
            Err(e) => return fail(Stage::Checking, e),
        };
        if exists.exists {
            debug!(
                upload_id = %entry.id,
                existing = exists.filename.as_deref().unwrap_or_default(),
                "content already on server, skipping transfer"
            );
            return UploadOutcome::Done {
                fingerprint,
                file_id: exists.new_file_id,
                deduplicated: true,
            };
        }

        // 3. Upload
        if let Err(error) = self.transition(entry, UploadState::Uploading) {
            return fail(Stage::Uploading, error);
        }
        let upload_observer = EventObserver {
            id: entry.id,
            stage: Stage::Uploading,
            events_tx: &self.events_tx,
        };
        let uploader = ChunkedUploader::new(self.backend.as_ref(), &self.settings);
        match uploader
            .upload_chunks(source, &fingerprint, entry.folder_id, &upload_observer, cancel)
            .await
        {
            Ok(()) => UploadOutcome::Done {
                fingerprint,
                file_id: None,
                deduplicated: false,
            },
            Err(e) if e.is_cancelled() => UploadOutcome::Canceled,
            Err(e) => fail(Stage::Uploading, e),
        }
    }

    async fn check_exists(
        &self,
        entry: &Entry,
        fingerprint: &str,
    ) -> Result<ExistsResult, UploadError> {
        let timeout: Duration = self.settings.chunk_timeout();
        tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => Err(UploadError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.backend.check_exists(entry.folder_id, fingerprint),
            ) => match result {
                Ok(result) => result,
                Err(_) => Err(UploadError::Timeout {
                    file: entry.source.name().to_string(),
                    index: None,
                    timeout,
                }),
            },
        }
    }

    fn transition(&self, entry: &Entry, next: UploadState) -> Result<(), UploadError> {
        {
            let mut state = entry.state.lock().unwrap_or_else(|p| p.into_inner());
            if !state.can_transition_to(next) {
                return Err(UploadError::InvalidTransition {
                    from: *state,
                    to: next,
                });
            }
            *state = next;
        }
        debug!(upload_id = %entry.id, state = %next, "state changed");
        self.emit(UploadEvent::StateChanged {
            id: entry.id,
            file_name: entry.source.name().to_string(),
            state: next,
        });
        Ok(())
    }

    fn emit(&self, event: UploadEvent) {
        send_event(&self.events_tx, event);
    }

    fn find(&self, id: UploadId) -> Option<Arc<Entry>> {
        self.lock_entries().iter().find(|e| e.id == id).cloned()
    }

    fn lock_entries(&self) -> MutexGuard<'_, Vec<Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn fail(stage: Stage, error: UploadError) -> UploadOutcome {
    UploadOutcome::Failed { stage, error }
}

fn send_event(tx: &mpsc::Sender<UploadEvent>, event: UploadEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(?event, "event channel full, upload event dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!("event receiver gone");
        }
    }
}

/// Forwards chunk progress of one stage to the event channel.
struct EventObserver<'a> {
    id: UploadId,
    stage: Stage,
    events_tx: &'a mpsc::Sender<UploadEvent>,
}

impl TransferObserver for EventObserver<'_> {
    fn on_chunk_completed(&self, index: u64, bytes: u64, elapsed: Duration) {
        trace!(upload_id = %self.id, stage = %self.stage, chunk = index, bytes, ?elapsed, "chunk done");
    }

    fn on_progress(&self, progress: ProgressState) {
        let event = match self.stage {
            Stage::Hashing => UploadEvent::HashProgress {
                id: self.id,
                percent: progress.percent,
            },
            _ => UploadEvent::UploadProgress {
                id: self.id,
                progress,
            },
        };
        send_event(self.events_tx, event);
    }
}
