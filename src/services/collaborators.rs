//! Operations the core calls into but does not implement.
//!
//! Production wires these to the backend API and object storage. Tests
//! supply mocks that control success and failure.

use crate::error::AppError;
use crate::models::{FaceMatch, ShareContext, UploadedPhoto};
use std::future::Future;

/// Uploads a captured photo and runs remote face matching on it
pub trait PhotoUploader: Send + Sync + 'static {
    fn upload_photo(
        &self,
        photo_uri: &str,
        selected_cam: Option<&str>,
    ) -> impl Future<Output = Result<UploadedPhoto, AppError>> + Send;
}

/// Shares an uploaded photo with matched friends
///
/// The same call serves shared-camera shares (context carries the camera
/// id) and personal face-match shares (context without camera).
pub trait FriendSharer: Send + Sync + 'static {
    fn share_to_friends(
        &self,
        photo_id: &str,
        friend_ids: &[String],
        matches: &[FaceMatch],
        context: &ShareContext,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Produces a fresh time-limited URL for a stored object
pub trait UrlSigner: Send + Sync + 'static {
    fn sign_url(
        &self,
        key: &str,
        owner_identity_id: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}
