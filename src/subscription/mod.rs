mod backoff;
mod batcher;
mod changefeed;
mod error;
mod manager;
mod quality;

pub use backoff::ReconnectPolicy;
pub use batcher::{BatcherHandle, UpdateBatcher};
pub use changefeed::{
    ChangeKind, ChangeNotification, ChangeRecord, Changefeed, FeedKey, MemoryChangefeed,
};
pub use error::SubscriptionError;
pub use manager::{SubscriptionEvent, SubscriptionHandle, SubscriptionManager};
pub use quality::{ConnectionHealth, ConnectionState, QualityTier, RecordedError};
