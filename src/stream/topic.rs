use rdkafka::producer::{FutureProducer, FutureRecord};
use crate::stream::{KSink, KStream, Record, StreamItem};
use crate::format::{Format, FormatError};
use crate::{Config, StreamError};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use rdkafka::config::{FromClientConfig, FromClientConfigAndContext};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

struct Context {
    rebalance_changed: AtomicBool,
    fatal: Mutex<Option<String>>,
}

impl ClientContext for Context {
    fn error(&self, error: KafkaError, reason: &str) {
        match error.rdkafka_error_code() {
            Some(RDKafkaErrorCode::Fatal) | Some(RDKafkaErrorCode::AllBrokersDown) => {
                error!("librdkafka reported fatal error: {}: {}", error, reason);
                if let Ok(mut fatal) = self.fatal.lock() {
                    fatal.get_or_insert_with(|| format!("{}: {}", error, reason));
                }
            }
            _ => warn!("librdkafka: {}: {}", error, reason),
        }
    }
}

impl ConsumerContext for Context {
    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(_) | Rebalance::Revoke(_) => {
                self.rebalance_changed.store(true, Ordering::SeqCst);
            }
            Rebalance::Error(e) => {
                error!("Rebalance failed: {}", e);
            }
        }
    }
}


pub struct RawConsumer {
    topics: Vec<String>,
    base: BaseConsumer<Context>,
    // Position of the last record handed out; stored once the caller comes back for more.
    last: Option<(String, i32, i64)>,
}

impl RawConsumer {
    fn create(config: &Config, topics: Vec<String>) -> Result<Self, StreamError> {
        let context = Context {
            rebalance_changed: Default::default(),
            fatal: Mutex::new(None),
        };
        let base = BaseConsumer::from_config_and_context(&config.0, context)?;
        Ok(Self { topics, base, last: None })
    }

    /// Joins the configured consumer group on all of `topics`.
    pub fn subscribe(config: &Config, topics: &[String]) -> Result<Self, StreamError> {
        let consumer = Self::create(config, topics.to_vec())?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.base.subscribe(&names)?;
        Ok(consumer)
    }

    /// Reads a single partition from the beginning, outside of any group management.
    pub fn assigned(config: &Config, topic: &str, part: i32) -> Result<Self, StreamError> {
        let consumer = Self::create(config, vec![topic.to_string()])?;
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(topic, part, Offset::Beginning)?;
        consumer.base.assign(&list)?;
        Ok(consumer)
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn offset_range(&self, topic: &str, part: i32) -> Result<(i64, i64), StreamError> {
        Ok(self.base.fetch_watermarks(topic, part, ADMIN_TIMEOUT)?)
    }

    fn store_last(&mut self) -> Result<(), StreamError> {
        if let Some((topic, part, offset)) = self.last.take() {
            let mut list = TopicPartitionList::new();
            list.add_partition_offset(&topic, part, Offset::Offset(offset + 1))?;
            self.base.store_offsets(&list)?;
        }
        Ok(())
    }

    fn check_fatal(&self) -> Result<(), StreamError> {
        let fatal = self.base.context().fatal.lock().ok().and_then(|f| f.clone());
        match fatal {
            Some(reason) => Err(StreamError::Runtime(reason)),
            None => Ok(()),
        }
    }

    /// Next record, rebalance notice, or `Idle` when nothing arrived within one poll interval.
    pub async fn poll_next<KF: Format, VF: Format>(&mut self) -> Result<StreamItem<KF::Item, VF::Item>, StreamError> {
        self.store_last()?;
        self.check_fatal()?;
        let rebalanced = self.base.context().rebalance_changed.swap(false, Ordering::SeqCst);
        if rebalanced {
            let parts: BTreeSet<i32> = self.base.assignment()?
                .elements()
                .iter()
                .map(|p| p.partition())
                .collect();
            return Ok(StreamItem::Rebalance(parts.into_iter().collect()));
        }
        let message = match self.base.poll(POLL_TIMEOUT) {
            Some(msg) => msg?,
            None => {
                tokio::task::yield_now().await;
                return Ok(StreamItem::Idle);
            }
        };
        let (topic, partition, offset) = (message.topic().to_string(), message.partition(), message.offset());
        let decode = |e: FormatError| StreamError::Decode {
            topic: topic.clone(),
            partition,
            offset,
            source: Box::new(e),
        };
        let key = message.key().map(KF::deserialize).transpose().map_err(decode)?;
        let value = message.payload().map(VF::deserialize).transpose().map_err(decode)?;
        let timestamp = message.timestamp().to_millis().unwrap_or_else(now_millis);
        self.last = Some((topic.clone(), partition, offset));
        Ok(StreamItem::Item(Record {
            topic,
            partition,
            offset,
            timestamp,
            key,
            value,
        }))
    }

    /// Offset the consumer will read next from `topic`/`part`, once it has one.
    pub fn position(&self, topic: &str, part: i32) -> Result<Option<i64>, StreamError> {
        let list = self.base.position()?;
        Ok(list.find_partition(topic, part).and_then(|p| match p.offset() {
            Offset::Offset(o) => Some(o),
            _ => None,
        }))
    }

    /// Stores the last handed out offset and commits synchronously.
    pub fn commit(&mut self) -> Result<(), StreamError> {
        self.store_last()?;
        match self.base.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // Nothing consumed since the last commit
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct TypedConsumer<KF, VF> {
    pub(crate) raw: RawConsumer,
    pub(crate) _marker: PhantomData<(KF, VF)>,
}

impl<KF, VF> From<RawConsumer> for TypedConsumer<KF, VF> {
    fn from(raw: RawConsumer) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }
}

#[async_trait(? Send)]
impl<KF, VF> KStream for TypedConsumer<KF, VF>
    where KF: Format, VF: Format
{
    type Key = KF::Item;
    type Value = VF::Item;

    async fn next(&mut self) -> Result<StreamItem<Self::Key, Self::Value>, StreamError> {
        self.raw.poll_next::<KF, VF>().await
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        info!("Committing offsets for {:?}", self.raw.topics());
        self.raw.commit()
    }
}


pub struct RawProducer {
    topic: String,
    base: FutureProducer,
}

impl RawProducer {
    pub fn new(config: &Config, topic: &str) -> Result<Self, StreamError> {
        let base = FutureProducer::from_config(&config.0)?;
        Ok(RawProducer {
            topic: topic.to_string(),
            base,
        })
    }

    pub async fn send_raw(&mut self, part: Option<i32>, k: Option<&[u8]>, v: Option<&[u8]>, timestamp: Option<i64>) -> Result<(), StreamError> {
        let mut rec: FutureRecord<[u8], [u8]> = FutureRecord::to(&self.topic);
        rec.key = k;
        rec.payload = v;
        rec.partition = part;
        rec.timestamp = timestamp;

        self.base.send(rec, Timeout::Never).await
            .map(|_| ())
            .map_err(|(source, _)| StreamError::Delivery {
                topic: self.topic.clone(),
                source,
            })
    }

    pub async fn send<KF: Format, VF: Format>(&mut self, part: Option<i32>, k: Option<&KF::Item>, v: Option<&VF::Item>, timestamp: Option<i64>) -> Result<(), StreamError> {
        let k = k.map(KF::serialize).transpose()?;
        let v = v.map(VF::serialize).transpose()?;
        self.send_raw(part, k.as_deref(), v.as_deref(), timestamp).await
    }
}


pub struct TypedProducer<KF, VF> {
    pub(crate) raw: RawProducer,
    pub(crate) _marker: PhantomData<(KF, VF)>,
}

impl<KF, VF> From<RawProducer> for TypedProducer<KF, VF> {
    fn from(p: RawProducer) -> Self {
        return Self {
            raw: p,
            _marker: PhantomData,
        };
    }
}

#[async_trait(? Send)]
impl<KF, VF> KSink for TypedProducer<KF, VF>
    where KF: Format, VF: Format
{
    type Key = KF::Item;
    type Value = VF::Item;

    async fn send_next(&mut self, part: Option<i32>, k: Option<&Self::Key>, v: Option<&Self::Value>, timestamp: Option<i64>) -> Result<(), StreamError> {
        self.raw.send::<KF, VF>(part, k, v, timestamp).await
    }
}

/// Number of partitions of `topic` as reported by the cluster metadata.
pub fn partition_count(config: &Config, topic: &str) -> Result<i32, StreamError> {
    let con: BaseConsumer = BaseConsumer::from_config(&config.0)?;
    let metadata = con.fetch_metadata(Some(topic), ADMIN_TIMEOUT)?;
    let partitions = metadata.topics()
        .iter()
        .find(|t| t.name() == topic)
        .map(|t| t.partitions().len())
        .unwrap_or_default();
    if partitions == 0 {
        return Err(StreamError::Kafka(KafkaError::MetadataFetch(RDKafkaErrorCode::UnknownTopicOrPartition)));
    }
    Ok(partitions as i32)
}

/// Creates compacted topics that don't exist yet. Existing topics are left alone.
pub async fn ensure_compacted_topics(config: &Config, topics: &[String], partitions: i32) -> Result<(), StreamError> {
    let admin: AdminClient<DefaultClientContext> = AdminClient::from_config(&config.0)?;
    let new_topics: Vec<NewTopic> = topics.iter()
        .map(|t| NewTopic::new(t, partitions, TopicReplication::Fixed(-1)).set("cleanup.policy", "compact"))
        .collect();
    let results = admin.create_topics(&new_topics, &AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT))).await?;
    for result in results {
        match result {
            Ok(name) => info!("Created changelog topic {}", name),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => debug!("Changelog topic {} already exists", name),
            Err((name, code)) => {
                return Err(StreamError::store(&name, format!("could not create changelog topic: {}", code)));
            }
        }
    }
    Ok(())
}
