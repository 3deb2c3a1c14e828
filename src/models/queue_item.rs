use super::FaceProcessingResult;
use serde::{Deserialize, Serialize};

/// Position of a queue item in the upload state machine
///
/// `pending/retrying -> processing -> completed | retrying | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Retrying => "retrying",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Counts against queue capacity
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QueueStatus::Pending | QueueStatus::Processing | QueueStatus::Retrying
        )
    }

    /// Eligible to be picked up by the processor
    pub fn is_ready(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Retrying)
    }

    /// The states in which a modal upload keeps the UI blocked
    pub fn is_modal_blocking(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags captured when a photo is enqueued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// The user waits in a blocking UI for this item
    pub is_modal_upload: bool,
    /// Auto-share preference at enqueue time
    pub should_auto_share: bool,
}

/// One captured photo awaiting upload and face processing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    /// Local file owned by the capture screen; only read here
    pub photo_uri: String,
    /// Target shared camera; `None` means personal / face-match only
    pub selected_cam: Option<String>,
    /// Creation time (epoch ms)
    pub timestamp: i64,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub should_auto_share: bool,
    pub is_modal_upload: bool,
    pub face_processing_result: Option<FaceProcessingResult>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Remote photo id once the upload went through
    #[serde(default)]
    pub photo_id: Option<String>,
}

impl QueueItem {
    pub fn new(
        photo_uri: impl Into<String>,
        selected_cam: Option<String>,
        options: EnqueueOptions,
        now_ms: i64,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            photo_uri: photo_uri.into(),
            selected_cam,
            timestamp: now_ms,
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            should_auto_share: options.should_auto_share,
            is_modal_upload: options.is_modal_upload,
            face_processing_result: None,
            completed_at: None,
            photo_id: None,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }

    pub fn targets_shared_camera(&self) -> bool {
        self.selected_cam.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_groups() {
        assert!(QueueStatus::Retrying.is_active());
        assert!(!QueueStatus::Completed.is_active());
        assert!(QueueStatus::Retrying.is_ready());
        assert!(!QueueStatus::Processing.is_ready());
        assert!(QueueStatus::Processing.is_modal_blocking());
        assert!(!QueueStatus::Retrying.is_modal_blocking());
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = QueueItem::new(
            "file:///a.jpg",
            Some("cam1".to_string()),
            EnqueueOptions {
                is_modal_upload: true,
                should_auto_share: false,
            },
            1_000,
        );
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.is_modal_upload);
        assert!(item.targets_shared_camera());
        assert_eq!(item.id.len(), 26);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&QueueStatus::Retrying).unwrap();
        assert_eq!(json, "\"retrying\"");
    }
}
