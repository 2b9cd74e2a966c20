// Sportsbook Feed - real-time content aggregation and reconciliation
//
// core   - domain entities, config, logging, store events
// layer1 - transport boundary (topics, feed messages, subscriptions)
// layer2 - envelope decoding, classification, keyed stores, publishing

pub mod core;
pub mod layer1;
pub mod layer2;

pub use crate::core::{get_config, init_logging, setup_logging, ConfigManager};
pub use crate::layer1::{ChannelTransport, FeedTopic, FeedTransport};
pub use crate::layer2::{Envelope, FeedPipeline, ProcessOutcome};
