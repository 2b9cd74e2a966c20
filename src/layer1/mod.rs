// Layer 1 - Feed Transport Boundary
// Topic URIs and the single-consumer queues feeding each pipeline

pub mod topics;
pub mod transport;

// Re-export commonly used items for convenience
pub use topics::FeedTopic;
pub use transport::{
    FeedMessage, FeedTransport, ChannelTransport, ChannelTransportStats,
    SubscriptionHandle, TransportError,
};
