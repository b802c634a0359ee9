use std::marker::PhantomData;

use crate::format::raw::Raw;
use crate::format::{Format, FormatError};
use crate::store::{StoreConfig, WindowEntry, WindowStore};
use crate::stream::topic::{RawConsumer, RawProducer, TypedConsumer};
use crate::stream::{KStream, StreamItem};
use crate::StreamError;

const SUFFIX_LEN: usize = 16;
/// Empty polls after which a restore that has not reached the high watermark gives up waiting.
const RESTORE_IDLE_POLLS: usize = 50;

/// Changelog key of a windowed entry: serialized key, then timestamp and sequence
/// number as big-endian 8 byte integers.
pub fn windowed_key(key: &[u8], timestamp: i64, seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + SUFFIX_LEN);
    out.extend_from_slice(key);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes());
    out
}

pub fn split_windowed_key(raw: &[u8]) -> Result<(&[u8], i64, u64), FormatError> {
    if raw.len() < SUFFIX_LEN {
        return Err(FormatError::WindowedKey(format!("{} bytes is shorter than the suffix", raw.len())));
    }
    let (key, suffix) = raw.split_at(raw.len() - SUFFIX_LEN);
    let mut ts = [0u8; 8];
    let mut seq = [0u8; 8];
    ts.copy_from_slice(&suffix[..8]);
    seq.copy_from_slice(&suffix[8..]);
    Ok((key, i64::from_be_bytes(ts), u64::from_be_bytes(seq)))
}

/// Applies one changelog record to `store`: a value is a put, a tombstone a removal.
pub async fn restore_into<KF, VF, S>(store: &mut S, raw_key: &[u8], value: Option<&[u8]>) -> Result<(), StreamError>
    where KF: Format, VF: Format, S: WindowStore<KF::Item, VF::Item>
{
    let (key, timestamp, seq) = split_windowed_key(raw_key)?;
    let key = KF::deserialize(key)?;
    match value {
        Some(v) => store.put(WindowEntry { key, timestamp, seq, value: VF::deserialize(v)? }).await,
        None => store.remove(&key, timestamp, seq).await.map(|_| ()),
    }
}

/// Window store that mirrors every change into a compacted changelog topic and rebuilds
/// its state from that topic when opened.
pub struct Changelogged<KF, VF, S> {
    inner: S,
    name: String,
    partition: i32,
    producer: RawProducer,
    _marker: PhantomData<(KF, VF)>,
}

impl<KF, VF, S> Changelogged<KF, VF, S>
    where KF: Format, VF: Format
{
    async fn log(&mut self, key: &KF::Item, timestamp: i64, seq: u64, value: Option<&VF::Item>) -> Result<(), StreamError> {
        let key = windowed_key(&KF::serialize(key)?, timestamp, seq);
        let value = value.map(VF::serialize).transpose()?;
        self.producer
            .send_raw(Some(self.partition), Some(&key), value.as_deref(), Some(timestamp))
            .await
    }
}

#[async_trait(? Send)]
impl<KF, VF, S> WindowStore<KF::Item, VF::Item> for Changelogged<KF, VF, S>
    where KF: Format, VF: Format, S: WindowStore<KF::Item, VF::Item>
{
    async fn open(cfg: StoreConfig) -> Result<Self, StreamError> where Self: Sized {
        let topic = cfg.changelog_topic();
        trace!("Restoring {} partition {} from {}", cfg.name, cfg.partition, topic);

        let restore_cfg = cfg.global.clone()
            .set_group(&format!("{}-restore", cfg.name))
            .set("enable.auto.commit", "false");
        let mut changelog: TypedConsumer<Raw, Raw> = RawConsumer::assigned(&restore_cfg, &topic, cfg.partition)?.into();
        let (low, until) = changelog.raw.offset_range(&topic, cfg.partition)?;

        let mut store = S::open(cfg.clone()).await?;
        let mut restored = 0usize;

        // Load all available messages and rebuild state from them
        let mut position = low;
        let mut idle = 0;
        while position < until {
            match changelog.next().await? {
                StreamItem::Rebalance(_) => {
                    return Err(StreamError::store(&cfg.name, "changelog partition rebalanced during restore"));
                }
                StreamItem::Idle => {
                    // Transaction markers and compacted tails leave offsets without records
                    if let Some(next) = changelog.raw.position(&topic, cfg.partition)? {
                        position = position.max(next);
                    }
                    idle += 1;
                    if position < until && idle >= RESTORE_IDLE_POLLS {
                        warn!("Restore of {} partition {} stalled at {} of {}, continuing", cfg.name, cfg.partition, position, until);
                        break;
                    }
                }
                StreamItem::Item(rec) => {
                    idle = 0;
                    if rec.partition != cfg.partition {
                        return Err(StreamError::store(&cfg.name, format!("restore read partition {}", rec.partition)));
                    }
                    let raw_key = rec.key.ok_or_else(|| StreamError::store(&cfg.name, "changelog record without key"))?;
                    restore_into::<KF, VF, S>(&mut store, &raw_key, rec.value.as_deref()).await?;
                    restored += 1;
                    position = rec.offset + 1;
                }
            }
        }
        debug!("Restored {} changelog records into {} partition {} ({} live)", restored, cfg.name, cfg.partition, store.len());

        Ok(Self {
            inner: store,
            name: cfg.name.clone(),
            partition: cfg.partition,
            producer: RawProducer::new(&cfg.global, &topic)?,
            _marker: PhantomData,
        })
    }

    fn next_seq(&mut self) -> u64 {
        self.inner.next_seq()
    }

    async fn put(&mut self, entry: WindowEntry<KF::Item, VF::Item>) -> Result<(), StreamError> {
        self.log(&entry.key, entry.timestamp, entry.seq, Some(&entry.value)).await?;
        self.inner.put(entry).await
    }

    fn fetch(&self, key: &KF::Item, from: i64, to: i64) -> Vec<WindowEntry<KF::Item, VF::Item>> {
        self.inner.fetch(key, from, to)
    }

    async fn remove(&mut self, key: &KF::Item, timestamp: i64, seq: u64) -> Result<Option<VF::Item>, StreamError> {
        self.log(key, timestamp, seq, None).await?;
        self.inner.remove(key, timestamp, seq).await
    }

    async fn evict_expired(&mut self, before: i64) -> Result<Vec<WindowEntry<KF::Item, VF::Item>>, StreamError> {
        let evicted = self.inner.evict_expired(before).await?;
        for e in &evicted {
            self.log(&e.key, e.timestamp, e.seq, None).await?;
        }
        if !evicted.is_empty() {
            trace!("Evicted {} entries from {} partition {}", evicted.len(), self.name, self.partition);
        }
        Ok(evicted)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
