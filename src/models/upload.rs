use super::FaceProcessingResult;
use serde::{Deserialize, Serialize};

/// What the backend reports back for an uploaded photo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    pub photo_id: String,
    pub owner_identity_id: String,
    pub s3_key: String,
    #[serde(default)]
    pub thumb_key: Option<String>,
    #[serde(default)]
    pub face_processing_result: Option<FaceProcessingResult>,
}

/// Where a share happens
///
/// Shares into a shared camera carry the camera id; personal face-match
/// shares leave it empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareContext {
    pub shared_camera_id: Option<String>,
}

impl ShareContext {
    pub fn shared_camera(camera_id: impl Into<String>) -> Self {
        Self {
            shared_camera_id: Some(camera_id.into()),
        }
    }

    pub fn personal() -> Self {
        Self::default()
    }

    pub fn is_shared_camera(&self) -> bool {
        self.shared_camera_id.is_some()
    }
}
