use crate::error::StreamError;

pub mod filter;
pub mod join;
pub mod topic;

pub use filter::Filter;
pub use join::{join_store_names, JoinWindows, WindowedJoin};

/// Single record flowing through a task, with the position it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<K, V> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub key: Option<K>,
    /// `None` is a tombstone.
    pub value: Option<V>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<K, V> {
    /// Partition numbers currently assigned to this task.
    Rebalance(Vec<i32>),
    Item(Record<K, V>),
    /// The source had nothing to hand out for one poll interval.
    Idle,
}

/// KStream represents a stream of records
/// Each record having a timestamp
#[async_trait(? Send)]
pub trait KStream {
    type Key;
    type Value;

    async fn next(&mut self) -> Result<StreamItem<Self::Key, Self::Value>, StreamError>;

    /// True while records derived from an already consumed input are still waiting to be
    /// handed out. The source position must not be committed in that state.
    fn has_pending(&self) -> bool {
        false
    }

    /// Called once the task stops pulling records. Sources commit their progress here.
    async fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[async_trait(? Send)]
pub trait KSink {
    type Key;
    type Value;

    async fn send_next(
        &mut self,
        part: Option<i32>,
        k: Option<&Self::Key>,
        v: Option<&Self::Value>,
        timestamp: Option<i64>,
    ) -> Result<(), StreamError>;
}
