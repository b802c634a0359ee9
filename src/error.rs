use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::format::FormatError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure a running topology can hit. All of them are fatal for the worker
/// that raises them.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("kafka runtime entered a fatal state: {0}")]
    Runtime(String),

    #[error("failed to decode record {topic}[{partition}]@{offset}: {source}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("failed to deliver record to {topic}: {source}")]
    Delivery {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("input topics are not co-partitioned: {counts:?}")]
    NotCoPartitioned { counts: Vec<(String, i32)> },

    #[error("state store {store} failed: {reason}")]
    Store { store: String, reason: String },

    #[error("stream thread {thread} panicked: {message}")]
    Panicked { thread: String, message: String },

    #[error("stream thread {thread} stopped without being asked to")]
    Stopped { thread: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub fn store(store: &str, reason: impl ToString) -> Self {
        StreamError::Store {
            store: store.to_string(),
            reason: reason.to_string(),
        }
    }
}
