use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::{Config, KStream, StreamError, WindowStore};
use crate::store::{Partitioned, WindowEntry};
use crate::stream::{Record, StreamItem};

/// Time bounds of a stream-stream join.
///
/// A left record at `t` matches right records in `[t - before, t + after]`. Both stores
/// retain records for `before + after + grace`, records older than that (relative to the
/// partition's stream time) are dropped as late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinWindows {
    pub before: Duration,
    pub after: Duration,
    pub grace: Duration,
}

impl JoinWindows {
    pub fn of_time_difference_with_no_grace(difference: Duration) -> Self {
        JoinWindows {
            before: difference,
            after: difference,
            grace: Duration::ZERO,
        }
    }

    pub fn retention_ms(&self) -> i64 {
        millis(self.before)
            .saturating_add(millis(self.after))
            .saturating_add(millis(self.grace))
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Names of the left and right window stores backing a join called `store`.
pub fn join_store_names(store: &str) -> (String, String) {
    (format!("{}-left", store), format!("{}-right", store))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Inner join of two co-partitioned record streams read through one source.
///
/// Records from `left_topics` form the left side, everything else the right side. Every
/// incoming record is put into its side's store and matched against the other side's
/// store, so each pair is produced exactly once, by whichever record of the pair arrives
/// last. Records without a key or without a value never take part.
pub struct WindowedJoin<S, ST, J, O>
    where S: KStream
{
    stream: S,
    left_topics: HashSet<String>,
    windows: JoinWindows,
    left: Partitioned<ST, S::Key, S::Value>,
    right: Partitioned<ST, S::Key, S::Value>,
    stream_time: HashMap<i32, i64>,
    joiner: J,
    pending: VecDeque<Record<S::Key, O>>,
}

impl<S, ST, J, O> WindowedJoin<S, ST, J, O>
    where S: KStream,
          ST: WindowStore<S::Key, S::Value>
{
    pub fn new(stream: S, cfg: Config, store: &str, left_topics: HashSet<String>, windows: JoinWindows, joiner: J) -> Self {
        let (left, right) = join_store_names(store);
        WindowedJoin {
            stream,
            left_topics,
            windows,
            left: Partitioned::new(cfg.clone(), left),
            right: Partitioned::new(cfg, right),
            stream_time: HashMap::new(),
            joiner,
            pending: VecDeque::new(),
        }
    }
}

impl<S, ST, J, O> WindowedJoin<S, ST, J, O>
    where S: KStream,
          S::Key: Clone,
          S::Value: Clone,
          ST: WindowStore<S::Key, S::Value>,
          J: Fn(&S::Key, &S::Value, &S::Value) -> O
{
    async fn rebalance(&mut self, parts: &[i32]) -> Result<(), StreamError> {
        let assigned: HashSet<i32> = parts.iter().copied().collect();
        self.left.ensure_partitions(assigned.clone()).await?;
        self.right.ensure_partitions(assigned.clone()).await?;
        self.stream_time.retain(|p, _| assigned.contains(p));
        Ok(())
    }

    async fn process(&mut self, rec: Record<S::Key, S::Value>) -> Result<(), StreamError> {
        let Record { topic, partition, offset, timestamp, key, value } = rec;
        let side = if self.left_topics.contains(&topic) { Side::Left } else { Side::Right };
        let (key, value) = match (key, value) {
            (Some(k), Some(v)) => (k, v),
            _ => {
                trace!("Skipping {}[{}]@{} without key or value", topic, partition, offset);
                return Ok(());
            }
        };

        let retention = self.windows.retention_ms();
        let now = {
            let st = self.stream_time.entry(partition).or_insert(timestamp);
            *st = (*st).max(timestamp);
            *st
        };
        let horizon = now.saturating_sub(retention);
        if timestamp < horizon {
            debug!("Dropping late record {}[{}]@{} with timestamp {} (stream time {})", topic, partition, offset, timestamp, now);
            return Ok(());
        }

        let before = millis(self.windows.before);
        let after = millis(self.windows.after);
        let (this, other, from, to) = match side {
            Side::Left => (&mut self.left, &mut self.right, timestamp.saturating_sub(before), timestamp.saturating_add(after)),
            Side::Right => (&mut self.right, &mut self.left, timestamp.saturating_sub(after), timestamp.saturating_add(before)),
        };

        let store = this.store(partition).await?;
        let seq = store.next_seq();
        store.put(WindowEntry { key: key.clone(), timestamp, seq, value: value.clone() }).await?;

        let partners = other.store(partition).await?.fetch(&key, from, to);
        for partner in partners {
            let joined = match side {
                Side::Left => (self.joiner)(&key, &value, &partner.value),
                Side::Right => (self.joiner)(&key, &partner.value, &value),
            };
            self.pending.push_back(Record {
                topic: topic.clone(),
                partition,
                offset,
                timestamp: timestamp.max(partner.timestamp),
                key: Some(key.clone()),
                value: Some(joined),
            });
        }

        this.store(partition).await?.evict_expired(horizon).await?;
        other.store(partition).await?.evict_expired(horizon).await?;
        Ok(())
    }
}

#[async_trait(? Send)]
impl<S, ST, J, O> KStream for WindowedJoin<S, ST, J, O>
    where S: KStream,
          S::Key: Clone,
          S::Value: Clone,
          ST: WindowStore<S::Key, S::Value>,
          J: Fn(&S::Key, &S::Value, &S::Value) -> O
{
    type Key = S::Key;
    type Value = O;

    async fn next(&mut self) -> Result<StreamItem<Self::Key, Self::Value>, StreamError> {
        loop {
            if let Some(joined) = self.pending.pop_front() {
                return Ok(StreamItem::Item(joined));
            }
            match self.stream.next().await? {
                StreamItem::Rebalance(parts) => {
                    trace!("Rebalancing join stores to {:?}", parts);
                    self.rebalance(&parts).await?;
                    return Ok(StreamItem::Rebalance(parts));
                }
                StreamItem::Item(rec) => self.process(rec).await?,
                StreamItem::Idle => return Ok(StreamItem::Idle),
            }
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.stream.has_pending()
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.stream.close().await
    }
}
