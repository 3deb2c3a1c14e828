pub mod face_result;
pub mod queue_item;
pub mod upload;

pub use face_result::{FaceMatch, FaceProcessingResult};
pub use queue_item::{EnqueueOptions, QueueItem, QueueStatus};
pub use upload::{ShareContext, UploadedPhoto};
