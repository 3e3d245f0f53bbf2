use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fotodrop_core::{
    FotodropClient, FotodropError, PhotoRecord, PhotoStatus, UploadRecord, UploadState,
};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::log::{LogEntry, LogStatus, UploadLog};
use super::mime;
use super::pool::TokenPool;
use super::projection::{self, DashboardSnapshot};
use super::queue::{QueueItem, QueueStatus, UploadQueue};
use super::transfer::TransferClient;

const LOCAL_ID_PREFIX: &str = "local-";

fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] FotodropError),
    #[error("no failed upload with id: {0}")]
    MissingFailed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub upload_poll_interval: Duration,
    pub photo_poll_interval: Duration,
    pub removal_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            upload_poll_interval: Duration::from_secs(2),
            photo_poll_interval: Duration::from_secs(2),
            removal_delay: Duration::from_secs(3),
        }
    }
}

/// Drives a batch of local files through the two-phase upload protocol:
/// presign + direct storage write, then server-side processing into a photo,
/// then indexing. All shared state sits behind one mutex; network awaits
/// never hold it, so queue, log and watch sets only ever change from one
/// critical section at a time.
#[derive(Clone)]
pub struct UploadEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    api: FotodropClient,
    transfer: TransferClient,
    event_id: String,
    config: EngineConfig,
    next_local: AtomicU64,
    state: Mutex<EngineState>,
}

struct EngineState {
    queue: UploadQueue,
    pool: TokenPool,
    log: UploadLog,
    /// Upload ids awaiting server-side processing (phase 1 poll targets).
    pending_uploads: HashSet<String>,
    upload_poller_running: bool,
    photo_poller_running: bool,
}

struct TransferJob {
    id: String,
    path: PathBuf,
    file_name: String,
    content_type: String,
    file_size: u64,
}

impl EngineInner {
    fn state_guard(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UploadEngine {
    pub fn new(
        api: FotodropClient,
        transfer: TransferClient,
        event_id: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                api,
                transfer,
                event_id: event_id.into(),
                next_local: AtomicU64::new(1),
                state: Mutex::new(EngineState {
                    queue: UploadQueue::default(),
                    pool: TokenPool::new(config.max_concurrency),
                    log: UploadLog::default(),
                    pending_uploads: HashSet::new(),
                    upload_poller_running: false,
                    photo_poller_running: false,
                }),
                config,
            }),
        }
    }

    /// Admits files in input order and starts transfers while permits last.
    /// Non-photo or unreadable files are skipped, not failed. Returns the
    /// local ids of the admitted items.
    pub async fn add_files(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut prepared = Vec::new();
        for path in paths {
            let Some(content_type) = mime::from_path(path) else {
                tracing::debug!(path = %path.display(), "skipping non-photo file");
                continue;
            };
            let metadata = match tokio::fs::metadata(path).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable file");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            prepared.push((path.clone(), content_type, metadata.len()));
        }

        let mut admitted = Vec::new();
        if prepared.is_empty() {
            return admitted;
        }

        let mut state = self.inner.state_guard();
        for (path, content_type, file_size) in prepared {
            let id = self.next_local_id();
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone());

            let mut entry = LogEntry::new(id.clone(), LogStatus::Queued);
            entry.file_name = Some(file_name.clone());
            entry.file_size = Some(file_size);
            entry.uploaded_at = Some(OffsetDateTime::now_utc());
            state.log.insert(entry);

            state.queue.enqueue(QueueItem {
                id: id.clone(),
                path,
                file_name,
                content_type: content_type.to_string(),
                file_size,
                status: QueueStatus::Queued,
                error: None,
                upload_id: None,
            });
            admitted.push(id);
        }
        self.promote_locked(&mut state);
        admitted
    }

    /// Re-attempts a failed upload as a fresh logical upload: the failed
    /// item and its log entry are dropped, and a new item with a new local
    /// id joins the tail of the queue.
    pub fn retry_upload(&self, id: &str) -> Result<String, EngineError> {
        let mut state = self.inner.state_guard();
        let failed = state
            .queue
            .take_failed(id)
            .ok_or_else(|| EngineError::MissingFailed(id.to_string()))?;
        if let Some(upload_id) = &failed.upload_id {
            state.pending_uploads.remove(upload_id);
        }
        state.log.remove(id);

        let new_id = self.next_local_id();
        let mut entry = LogEntry::new(new_id.clone(), LogStatus::Queued);
        entry.file_name = Some(failed.file_name.clone());
        entry.file_size = Some(failed.file_size);
        entry.uploaded_at = Some(OffsetDateTime::now_utc());
        state.log.insert(entry);

        state.queue.enqueue(QueueItem {
            id: new_id.clone(),
            path: failed.path,
            file_name: failed.file_name,
            content_type: failed.content_type,
            file_size: failed.file_size,
            status: QueueStatus::Queued,
            error: None,
            upload_id: None,
        });
        self.promote_locked(&mut state);
        Ok(new_id)
    }

    /// Discards a failed upload. Any stale watch-set membership for the item
    /// is purged as well.
    pub fn remove_from_queue(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.inner.state_guard();
        let item = state
            .queue
            .take_failed(id)
            .ok_or_else(|| EngineError::MissingFailed(id.to_string()))?;
        if let Some(upload_id) = &item.upload_id {
            state.pending_uploads.remove(upload_id);
        }
        state.log.remove(id);
        Ok(())
    }

    /// Pre-populates the log with photos the server still reports as in
    /// flight, so work from a prior session stays visible. Local queue state
    /// is never resurrected; the server listing is the only source.
    pub async fn seed(&self) -> Result<usize, EngineError> {
        let records = self
            .inner
            .api
            .list_pending_photos(&self.inner.event_id)
            .await?;
        let mut state = self.inner.state_guard();
        let mut seeded = 0;
        for record in records {
            if state.log.contains(&record.id) {
                continue;
            }
            let Some(status) = map_photo_status(record.status) else {
                continue;
            };
            if status.is_terminal() {
                continue;
            }
            let mut entry = LogEntry::new(record.id.clone(), status);
            entry.file_name = record.file_name;
            entry.file_size = record.file_size;
            entry.face_count = record.face_count;
            entry.thumbnail_url = record.thumbnail_url;
            entry.uploaded_at = record.created_at.as_deref().and_then(parse_timestamp);
            state.log.insert(entry);
            seeded += 1;
        }
        if seeded > 0 {
            self.ensure_photo_poller(&mut state);
        }
        Ok(seeded)
    }

    /// Read-only projection of the current queue and log.
    pub fn snapshot(&self) -> DashboardSnapshot {
        let state = self.inner.state_guard();
        projection::project(&state.queue, &state.log)
    }

    fn next_local_id(&self) -> String {
        let n = self.inner.next_local.fetch_add(1, Ordering::Relaxed);
        format!("{LOCAL_ID_PREFIX}{n}")
    }

    /// Promotes queued items while permits remain, spawning one transfer
    /// task per promotion. Idempotent; called after every admission and
    /// every permit release.
    fn promote_locked(&self, state: &mut EngineState) {
        while state.queue.queued_len() > 0 && state.pool.try_acquire() {
            let Some(mut item) = state.queue.pop_queued() else {
                state.pool.release();
                break;
            };
            item.status = QueueStatus::Uploading;
            state
                .log
                .update(&item.id, |entry| entry.status = LogStatus::Uploading);
            let job = TransferJob {
                id: item.id.clone(),
                path: item.path.clone(),
                file_name: item.file_name.clone(),
                content_type: item.content_type.clone(),
                file_size: item.file_size,
            };
            state.queue.push_uploading(item);
            let engine = self.clone();
            tokio::spawn(async move { engine.run_transfer(job).await });
        }
    }

    async fn run_transfer(self, job: TransferJob) {
        let outcome = self.perform_transfer(&job).await;
        let mut state = self.inner.state_guard();
        state.pool.release();
        match outcome {
            Ok(upload_id) => {
                // The queue item is done; the log entry carries the upload
                // from here, re-keyed to the server-side upload id.
                state.queue.take_uploading(&job.id);
                state.log.rename(&job.id, &upload_id);
                state.log.update(&upload_id, |entry| {
                    entry.status = LogStatus::Processing;
                    entry.upload_id = Some(upload_id.clone());
                });
                state.pending_uploads.insert(upload_id);
                self.ensure_upload_poller(&mut state);
                tracing::debug!(id = %job.id, file = %job.file_name, "transfer complete");
            }
            Err(message) => {
                if let Some(mut item) = state.queue.take_uploading(&job.id) {
                    item.status = QueueStatus::Failed;
                    item.error = Some(message.clone());
                    state.queue.push_failed(item);
                }
                state.log.update(&job.id, |entry| {
                    entry.status = LogStatus::Failed;
                    entry.error = Some(message.clone());
                });
                tracing::warn!(id = %job.id, file = %job.file_name, error = %message, "transfer failed");
            }
        }
        self.promote_locked(&mut state);
    }

    async fn perform_transfer(&self, job: &TransferJob) -> Result<String, String> {
        let ticket = self
            .inner
            .api
            .presign(
                &self.inner.event_id,
                &job.file_name,
                &job.content_type,
                job.file_size,
            )
            .await
            .map_err(|err| format!("presign failed: {err}"))?;
        self.inner
            .transfer
            .put_file(ticket.put_url.as_str(), &ticket.required_headers, &job.path)
            .await
            .map_err(|err| format!("storage write failed: {err}"))?;
        Ok(ticket.upload_id)
    }

    fn ensure_upload_poller(&self, state: &mut EngineState) {
        if state.upload_poller_running || state.pending_uploads.is_empty() {
            return;
        }
        state.upload_poller_running = true;
        let engine = self.clone();
        tokio::spawn(async move { engine.run_upload_poller().await });
    }

    async fn run_upload_poller(self) {
        loop {
            tokio::time::sleep(self.inner.config.upload_poll_interval).await;
            let ids: Vec<String> = {
                let mut state = self.inner.state_guard();
                if state.pending_uploads.is_empty() {
                    state.upload_poller_running = false;
                    return;
                }
                state.pending_uploads.iter().cloned().collect()
            };
            match self.inner.api.poll_uploads(&ids).await {
                Ok(records) => self.apply_upload_records(records),
                // A failed round is not surfaced per item; the next tick
                // simply retries.
                Err(err) => tracing::debug!(error = %err, "upload status poll failed"),
            }
        }
    }

    fn apply_upload_records(&self, records: Vec<UploadRecord>) {
        let mut state = self.inner.state_guard();
        for record in records {
            if !state.pending_uploads.contains(&record.upload_id) {
                continue;
            }
            match record.status {
                UploadState::Completed => {
                    state.pending_uploads.remove(&record.upload_id);
                    match record.photo_id {
                        Some(photo_id) => {
                            // One step: the upload key disappears and the
                            // photo key appears, never both or neither.
                            if state.log.rename(&record.upload_id, &photo_id) {
                                state
                                    .log
                                    .update(&photo_id, |entry| entry.status = LogStatus::Uploading);
                                self.ensure_photo_poller(&mut state);
                            }
                        }
                        None => {
                            state.log.update(&record.upload_id, |entry| {
                                entry.status = LogStatus::Failed;
                                entry.error = Some(
                                    "processing completed without a photo record".to_string(),
                                );
                            });
                        }
                    }
                }
                UploadState::Failed | UploadState::Expired => {
                    state.pending_uploads.remove(&record.upload_id);
                    let message = record.error_message.clone().unwrap_or_else(|| {
                        if record.status == UploadState::Expired {
                            "upload expired before processing".to_string()
                        } else {
                            "upload processing failed".to_string()
                        }
                    });
                    state.log.update(&record.upload_id, |entry| {
                        entry.status = LogStatus::Failed;
                        entry.error = Some(message);
                    });
                }
                UploadState::Pending | UploadState::Unknown => {}
            }
        }
    }

    fn ensure_photo_poller(&self, state: &mut EngineState) {
        if state.photo_poller_running || photo_poll_targets(state).is_empty() {
            return;
        }
        state.photo_poller_running = true;
        let engine = self.clone();
        tokio::spawn(async move { engine.run_photo_poller().await });
    }

    async fn run_photo_poller(self) {
        loop {
            tokio::time::sleep(self.inner.config.photo_poll_interval).await;
            let ids: Vec<String> = {
                let mut state = self.inner.state_guard();
                let targets = photo_poll_targets(&state);
                if targets.is_empty() {
                    state.photo_poller_running = false;
                    return;
                }
                targets
            };
            match self.inner.api.poll_photos(&ids).await {
                Ok(records) => self.apply_photo_records(records),
                Err(err) => tracing::debug!(error = %err, "photo status poll failed"),
            }
        }
    }

    fn apply_photo_records(&self, records: Vec<PhotoRecord>) {
        let mut state = self.inner.state_guard();
        for record in records {
            let id = record.id.clone();
            let mapped = map_photo_status(record.status);
            let uploaded_at = record.created_at.as_deref().and_then(parse_timestamp);
            // Shallow merge: only fields present in the response overwrite
            // the entry.
            let updated = state.log.update(&id, |entry| {
                if let Some(status) = mapped {
                    entry.status = status;
                }
                if let Some(name) = record.file_name {
                    entry.file_name = Some(name);
                }
                if let Some(size) = record.file_size {
                    entry.file_size = Some(size);
                }
                if let Some(faces) = record.face_count {
                    entry.face_count = Some(faces);
                }
                if let Some(thumbnail) = record.thumbnail_url {
                    entry.thumbnail_url = Some(thumbnail);
                }
                if let Some(timestamp) = uploaded_at {
                    entry.uploaded_at = Some(timestamp);
                }
                if mapped == Some(LogStatus::Failed) {
                    entry.error = Some(
                        record
                            .error_message
                            .unwrap_or_else(|| "photo processing failed".to_string()),
                    );
                }
            });
            if updated
                && mapped == Some(LogStatus::Indexed)
                && state.log.schedule_removal(&id)
            {
                self.spawn_removal(&id);
            }
        }
    }

    fn spawn_removal(&self, id: &str) {
        let engine = self.clone();
        let id = id.to_string();
        let delay = self.inner.config.removal_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.inner.state_guard().log.complete_removal(&id);
        });
    }
}

/// Photo poll targets: every log entry whose key is neither a transient
/// local id nor a watched upload id, and whose status is not terminal.
fn photo_poll_targets(state: &EngineState) -> Vec<String> {
    state
        .log
        .iter()
        .filter(|entry| {
            !is_local_id(&entry.id)
                && !entry.status.is_terminal()
                && !state.pending_uploads.contains(&entry.id)
        })
        .map(|entry| entry.id.clone())
        .collect()
}

fn map_photo_status(status: PhotoStatus) -> Option<LogStatus> {
    match status {
        PhotoStatus::Uploading => Some(LogStatus::Uploading),
        PhotoStatus::Indexing => Some(LogStatus::Indexing),
        PhotoStatus::Indexed => Some(LogStatus::Indexed),
        PhotoStatus::Failed => Some(LogStatus::Failed),
        PhotoStatus::Unknown => None,
    }
}

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

#[cfg(test)]
#[path = "engine_tests/support.rs"]
mod engine_tests_support;
#[cfg(test)]
#[path = "engine_tests/part1.rs"]
mod engine_tests_part1;
#[cfg(test)]
#[path = "engine_tests/part2.rs"]
mod engine_tests_part2;
