// Layer 2 - Decoding & Reconciliation
// Turns raw feed messages into reconciled, observable per-feed state

pub mod envelope;
pub mod classifier;
pub mod keyed_store;
pub mod content_store;
pub mod entity_watch;
pub mod publisher;
pub mod pipeline;

// Re-export commonly used items
pub use envelope::{Envelope, MessageType, DecodeError, DecodeReport};
pub use classifier::{
    ContentRecord, ContentUpdate, EntityChange, ChangeType, ClassifyError,
    classify_record, classify_update, decode_record, decode_update,
};
pub use keyed_store::KeyedStore;
pub use content_store::{ContentStore, ContentStoreStats};
pub use entity_watch::EntityWatchers;
pub use publisher::{ContentPublisher, ObserverId, PublisherStats};
pub use pipeline::{FeedPipeline, PipelineError, PipelineStats, ProcessOutcome};
