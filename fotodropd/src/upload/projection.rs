use time::OffsetDateTime;

use super::log::{LogStatus, UploadLog};
use super::queue::{QueueStatus, UploadQueue};

#[derive(Debug, Clone)]
pub struct QueueItemView {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub status: QueueStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogEntryView {
    pub id: String,
    pub file_name: Option<String>,
    pub status: LogStatus,
    pub error: Option<String>,
    pub upload_id: Option<String>,
    pub file_size: Option<u64>,
    pub face_count: Option<u32>,
    pub thumbnail_url: Option<String>,
    pub uploaded_at: Option<OffsetDateTime>,
}

/// Read-only view handed to the UI layer. Derived afresh from the queue and
/// log; holding one never aliases engine state.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub version: u64,
    pub uploading: Vec<QueueItemView>,
    pub failed: Vec<QueueItemView>,
    pub entries: Vec<LogEntryView>,
    pub uploading_count: usize,
    pub queued_count: usize,
}

/// Pure derivation: same queue, log and version always produce the same
/// snapshot.
pub fn project(queue: &UploadQueue, log: &UploadLog) -> DashboardSnapshot {
    let uploading = queue.iter_active().map(queue_item_view).collect();
    let failed = queue.iter_failed().map(queue_item_view).collect();

    let mut entries: Vec<LogEntryView> = log
        .iter()
        .map(|entry| LogEntryView {
            id: entry.id.clone(),
            file_name: entry.file_name.clone(),
            status: entry.status,
            error: entry.error.clone(),
            upload_id: entry.upload_id.clone(),
            file_size: entry.file_size,
            face_count: entry.face_count,
            thumbnail_url: entry.thumbnail_url.clone(),
            uploaded_at: entry.uploaded_at,
        })
        .collect();
    // Newest first; entries without a timestamp sink to the end. The id
    // tiebreak keeps the order stable for a given version.
    entries.sort_by(|a, b| {
        b.uploaded_at
            .cmp(&a.uploaded_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    DashboardSnapshot {
        version: log.version(),
        uploading_count: queue.uploading_len(),
        queued_count: queue.queued_len(),
        uploading,
        failed,
        entries,
    }
}

fn queue_item_view(item: &super::queue::QueueItem) -> QueueItemView {
    QueueItemView {
        id: item.id.clone(),
        file_name: item.file_name.clone(),
        file_size: item.file_size,
        status: item.status,
        error: item.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::log::LogEntry;
    use crate::upload::queue::QueueItem;
    use std::path::PathBuf;

    fn queue_item(id: &str, status: QueueStatus) -> QueueItem {
        QueueItem {
            id: id.to_string(),
            path: PathBuf::from(format!("/in/{id}.jpg")),
            file_name: format!("{id}.jpg"),
            content_type: "image/jpeg".to_string(),
            file_size: 10,
            status,
            error: None,
            upload_id: None,
        }
    }

    #[test]
    fn counts_follow_queue_population() {
        let mut queue = UploadQueue::default();
        queue.push_uploading(queue_item("a", QueueStatus::Uploading));
        queue.push_uploading(queue_item("b", QueueStatus::Uploading));
        queue.enqueue(queue_item("c", QueueStatus::Queued));
        let log = UploadLog::default();

        let snapshot = project(&queue, &log);
        assert_eq!(snapshot.uploading_count, 2);
        assert_eq!(snapshot.queued_count, 1);
        assert_eq!(snapshot.uploading.len(), 3);
        assert!(snapshot.failed.is_empty());
    }

    #[test]
    fn entries_sort_newest_first_with_stable_tiebreak() {
        let mut log = UploadLog::default();
        let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let mut older = LogEntry::new("p-old", LogStatus::Indexing);
        older.uploaded_at = Some(base);
        log.insert(older);

        let mut newer = LogEntry::new("p-new", LogStatus::Uploading);
        newer.uploaded_at = Some(base + time::Duration::seconds(60));
        log.insert(newer);

        log.insert(LogEntry::new("p-untimed", LogStatus::Processing));

        let snapshot = project(&UploadQueue::default(), &log);
        let ids: Vec<&str> = snapshot.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["p-new", "p-old", "p-untimed"]);
    }

    #[test]
    fn projection_is_deterministic_for_a_version() {
        let mut queue = UploadQueue::default();
        queue.enqueue(queue_item("a", QueueStatus::Queued));
        let mut log = UploadLog::default();
        log.insert(LogEntry::new("local-a", LogStatus::Queued));

        let first = project(&queue, &log);
        let second = project(&queue, &log);
        assert_eq!(first.version, second.version);
        assert_eq!(first.uploading.len(), second.uploading.len());
        assert_eq!(
            first.entries.iter().map(|e| &e.id).collect::<Vec<_>>(),
            second.entries.iter().map(|e| &e.id).collect::<Vec<_>>()
        );
    }
}
