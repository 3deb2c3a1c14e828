pub mod app_services;
pub mod collaborators;
pub mod completion;
pub mod queue_processor;
pub mod queue_storage;
pub mod queue_store;
pub mod shared_queue;
pub mod url_refresh;

pub use app_services::{AppLifecycle, AppServices, MaintenanceReport};
pub use collaborators::{FriendSharer, PhotoUploader, UrlSigner};
pub use completion::{ModalCompletionObserver, ModalCompletionSignal};
pub use queue_processor::QueueProcessor;
pub use queue_storage::{FileQueueStorage, MemoryQueueStorage, QueueStorage};
pub use queue_store::{ActiveStats, QueueSnapshot, QueueStore, StatusCounts};
pub use shared_queue::SharedQueue;
pub use url_refresh::{RefreshStats, UrlRefresher};
