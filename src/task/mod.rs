use std::collections::HashSet;

use tokio::sync::watch;

use crate::{Config, KStream, StreamError, WindowStore};
use crate::error::BoxError;
use crate::format::Format;
use crate::stream::topic::{RawConsumer, RawProducer, TypedConsumer, TypedProducer};
use crate::stream::{Filter, JoinWindows, KSink, Record, StreamItem, WindowedJoin};

/// Task is a base unit of computation,
/// Each task constitutes a consumer group.
/// Each task executes within a single thread, across multiple servers, and internally manages
/// Partitioning. It is a DAG of the complete computation graph.
pub struct Task<S> {
    cfg: Config,
    name: String,
    stream: S,
}

impl Task<()> {
    pub fn new(cfg: Config, name: &str) -> Self {
        Self {
            stream: (),
            cfg,
            name: name.to_string(),
        }
    }

    /// Reads all of `topics` through one consumer in the task's group.
    pub fn stream<KF: Format, VF: Format>(self, topics: &[String]) -> Result<Task<TypedConsumer<KF, VF>>, StreamError> {
        let cfg = self.cfg.clone().set_group(&self.name);
        let consumer = RawConsumer::subscribe(&cfg, topics)?;
        info!("Task {} subscribed to {:?}", self.name, consumer.topics());
        Ok(Task {
            stream: consumer.into(),
            cfg: self.cfg,
            name: self.name,
        })
    }

    /// Uses an already built stream as the task's source.
    pub fn source<S: KStream>(self, stream: S) -> Task<S> {
        Task {
            stream,
            cfg: self.cfg,
            name: self.name,
        }
    }
}

impl<S: KStream> Task<S> {
    /// Drops records of `topics` for which `filt` returns false. Records read from other
    /// topics pass untested.
    pub fn filter_topics<F, E>(self, topics: &[String], filt: F) -> Task<Filter<S, F>>
        where F: Fn(&Record<S::Key, S::Value>) -> Result<bool, E>,
              E: Into<BoxError> + 'static
    {
        Task {
            stream: Filter {
                stream: self.stream,
                topics: Some(topics.iter().cloned().collect()),
                filt,
            },
            cfg: self.cfg,
            name: self.name,
        }
    }

    /// Joins records of `left_topics` with the records of every other source topic that
    /// share their key and fall within `windows`. The join's stores are named after the task.
    pub fn join_windowed<ST, J, O>(self, left_topics: &[String], windows: JoinWindows, joiner: J) -> Task<WindowedJoin<S, ST, J, O>>
        where ST: WindowStore<S::Key, S::Value>,
              J: Fn(&S::Key, &S::Value, &S::Value) -> O
    {
        let left: HashSet<String> = left_topics.iter().cloned().collect();
        let store = format!("{}-join", self.name);
        Task {
            stream: WindowedJoin::new(self.stream, self.cfg.clone(), &store, left, windows, joiner),
            cfg: self.cfg,
            name: self.name,
        }
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Writes every record into `topic` until `shutdown` turns true or the stream fails.
    pub async fn to<KF, VF>(self, topic: &str, shutdown: watch::Receiver<bool>) -> Result<(), StreamError>
        where KF: Format<Item=S::Key>,
              VF: Format<Item=S::Value>
    {
        let sink: TypedProducer<KF, VF> = RawProducer::new(&self.cfg, topic)?.into();
        self.sink_to(sink, shutdown).await
    }

    /// Sends every record to `sink`, stopping once `shutdown` is true (or its sender is gone).
    ///
    /// `shutdown` is only honoured between inputs: a record is always processed in full and
    /// everything derived from it delivered before the stream is closed and its position
    /// committed.
    pub async fn sink_to<K>(mut self, mut sink: K, shutdown: watch::Receiver<bool>) -> Result<(), StreamError>
        where K: KSink<Key=S::Key, Value=S::Value>
    {
        info!("Task {} running", self.name);
        let result = loop {
            let stop = *shutdown.borrow() || shutdown.has_changed().is_err();
            if stop && !self.stream.has_pending() {
                break Ok(());
            }
            match self.stream.next().await {
                Ok(StreamItem::Idle) => {}
                Ok(StreamItem::Rebalance(parts)) => info!("Task {} assigned partitions {:?}", self.name, parts),
                Ok(StreamItem::Item(rec)) => {
                    trace!("Sinking {}[{}]@{}", rec.topic, rec.partition, rec.offset);
                    if let Err(e) = sink.send_next(None, rec.key.as_ref(), rec.value.as_ref(), Some(rec.timestamp)).await {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(()) => {
                info!("Task {} stopping", self.name);
                self.stream.close().await
            }
            Err(e) => Err(e),
        }
    }
}
