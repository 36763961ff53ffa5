pub mod config;
pub mod error;
pub mod messages;
pub mod models;
pub mod pipeline;
pub mod predictor;
pub mod services;
pub mod sink;
pub mod store;

pub use config::{Config, SourceLimits};
pub use error::{RecommendationError, Result};
pub use messages::OutboundMessage;
pub use pipeline::{RecommendationMessages, RecommendationPipeline};
pub use predictor::{FileModelRepository, ModelRepository, Predictor};
pub use sink::{publish_all, JsonLinesSink, MessageSink};
pub use store::{ClickHouseDatasetStore, DatasetStore, InMemoryDatasetStore};
