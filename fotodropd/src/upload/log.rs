use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Queued,
    Uploading,
    /// Transferred; waiting for the server to turn the upload into a photo.
    Processing,
    Indexing,
    Indexed,
    Failed,
}

impl LogStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LogStatus::Indexed | LogStatus::Failed)
    }
}

/// Reconciled, display-facing record for one logical upload. Keyed by the
/// local item id until the transfer succeeds, then by the server upload id,
/// then by the photo id once processing assigns one.
#[derive(Debug, Clone)]
pub struct LogEntry {
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

impl LogEntry {
    pub fn new(id: impl Into<String>, status: LogStatus) -> Self {
        Self {
            id: id.into(),
            file_name: None,
            status,
            error: None,
            upload_id: None,
            file_size: None,
            face_count: None,
            thumbnail_url: None,
            uploaded_at: None,
        }
    }
}

/// Single authoritative map of log entries plus a monotonic version counter.
/// Every observable mutation bumps the version so derived views recompute.
#[derive(Debug, Default)]
pub struct UploadLog {
    entries: HashMap<String, LogEntry>,
    version: u64,
    removal_scheduled: HashSet<String>,
}

impl UploadLog {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&LogEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    pub fn insert(&mut self, entry: LogEntry) {
        self.entries.insert(entry.id.clone(), entry);
        self.version += 1;
    }

    /// Applies `apply` to the entry if present. Returns whether an entry was
    /// found; the version is bumped only in that case.
    pub fn update(&mut self, id: &str, apply: impl FnOnce(&mut LogEntry)) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                apply(entry);
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// Re-keys an entry in one step: the old key is deleted and the new key
    /// inserted before anything can observe the map, so there is never zero
    /// or two entries for the logical upload.
    pub fn rename(&mut self, old_id: &str, new_id: &str) -> bool {
        let Some(mut entry) = self.entries.remove(old_id) else {
            return false;
        };
        entry.id = new_id.to_string();
        self.removal_scheduled.remove(old_id);
        self.entries.insert(new_id.to_string(), entry);
        self.version += 1;
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<LogEntry> {
        let removed = self.entries.remove(id);
        self.removal_scheduled.remove(id);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    /// Marks the entry for delayed removal. Returns false when the entry is
    /// absent or a removal is already scheduled, so repeated terminal
    /// observations never arm a second timer.
    pub fn schedule_removal(&mut self, id: &str) -> bool {
        if !self.entries.contains_key(id) {
            return false;
        }
        self.removal_scheduled.insert(id.to_string())
    }

    /// Fires a scheduled removal. Tolerates entries already gone.
    pub fn complete_removal(&mut self, id: &str) {
        self.removal_scheduled.remove(id);
        if self.entries.remove(id).is_some() {
            self.version += 1;
        }
    }

    #[cfg(test)]
    pub fn removal_scheduled_for(&self, id: &str) -> bool {
        self.removal_scheduled.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_bump_the_version() {
        let mut log = UploadLog::default();
        assert_eq!(log.version(), 0);

        log.insert(LogEntry::new("local-1", LogStatus::Queued));
        assert_eq!(log.version(), 1);

        assert!(log.update("local-1", |e| e.status = LogStatus::Uploading));
        assert_eq!(log.version(), 2);

        assert!(!log.update("missing", |e| e.status = LogStatus::Failed));
        assert_eq!(log.version(), 2);

        log.remove("local-1");
        assert_eq!(log.version(), 3);
        log.remove("local-1");
        assert_eq!(log.version(), 3);
    }

    #[test]
    fn rename_moves_the_entry_atomically() {
        let mut log = UploadLog::default();
        let mut entry = LogEntry::new("local-1", LogStatus::Processing);
        entry.file_name = Some("DSC_0001.jpg".to_string());
        entry.upload_id = Some("u-1".to_string());
        log.insert(entry);

        assert!(log.rename("local-1", "p-1"));
        assert_eq!(log.len(), 1);
        assert!(!log.contains("local-1"));
        let moved = log.get("p-1").unwrap();
        assert_eq!(moved.id, "p-1");
        assert_eq!(moved.file_name.as_deref(), Some("DSC_0001.jpg"));

        assert!(!log.rename("local-1", "p-2"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn removal_scheduling_is_idempotent() {
        let mut log = UploadLog::default();
        log.insert(LogEntry::new("p-1", LogStatus::Indexed));

        assert!(log.schedule_removal("p-1"));
        assert!(!log.schedule_removal("p-1"));
        assert!(!log.schedule_removal("p-2"));

        log.complete_removal("p-1");
        assert!(!log.contains("p-1"));
        assert!(!log.removal_scheduled_for("p-1"));

        // Firing again after the entry is gone is a no-op.
        let version = log.version();
        log.complete_removal("p-1");
        assert_eq!(log.version(), version);
    }

    #[test]
    fn remove_clears_any_scheduled_removal() {
        let mut log = UploadLog::default();
        log.insert(LogEntry::new("p-1", LogStatus::Indexed));
        assert!(log.schedule_removal("p-1"));

        log.remove("p-1");
        assert!(!log.removal_scheduled_for("p-1"));
    }
}
