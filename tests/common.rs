#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use smsak_stream::config::TopologySettings;
use smsak_stream::stream::{KSink, Record, StreamItem};
use smsak_stream::{Config, KStream, StreamError};
use tokio::sync::watch;

pub const HOUR: i64 = 60 * 60 * 1000;
pub const DAY: i64 = 24 * HOUR;

pub const OK_TOPIC: &str = "sykmelding-ok";
pub const MANUAL_TOPIC: &str = "sykmelding-manuell";
pub const INVALID_TOPIC: &str = "sykmelding-avvist";
pub const OUTCOME_TOPIC: &str = "behandlingsutfall";
pub const SINK_TOPIC: &str = "sykmelding-behandlingsutfall";

pub fn cfg() -> Config {
    Config::new()
        .set("bootstrap.servers", "localhost:29092")
        .set("auto.offset.reset", "earliest")
}

pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rdkafka=debug,trace"))
        .is_test(true)
        .try_init();
}

pub fn settings() -> TopologySettings {
    TopologySettings {
        application_id: "smsak-test".to_string(),
        primary_topics: vec![OK_TOPIC.to_string(), MANUAL_TOPIC.to_string(), INVALID_TOPIC.to_string()],
        outcome_topic: OUTCOME_TOPIC.to_string(),
        sink_topic: SINK_TOPIC.to_string(),
        join_window: TopologySettings::JOIN_WINDOW,
        stream_threads: 1,
        shutdown_timeout: TopologySettings::SHUTDOWN_TIMEOUT,
    }
}

pub fn record(topic: &str, offset: i64, key: &str, timestamp: i64, payload: Option<&str>) -> StreamItem<String, Bytes> {
    StreamItem::Item(Record {
        topic: topic.to_string(),
        partition: 0,
        offset,
        timestamp,
        key: Some(key.to_string()),
        value: payload.map(|p| Bytes::copy_from_slice(p.as_bytes())),
    })
}

pub fn certificate(id: &str) -> String {
    format!(r#"{{"id":"{}","merknader":null,"legekontorOrgNr":"223456789"}}"#, id)
}

pub fn certificate_under_review(id: &str) -> String {
    format!(r#"{{"id":"{}","merknader":[{{"type":"UNDER_BEHANDLING","beskrivelse":"manuell"}}]}}"#, id)
}

pub fn outcome(status: &str, rules: &[&str]) -> String {
    let hits: Vec<String> = rules.iter()
        .map(|r| format!(r#"{{"ruleName":"{}","messageForSender":"","ruleStatus":"{}"}}"#, r, status))
        .collect();
    format!(r#"{{"status":"{}","ruleHits":[{}]}}"#, status, hits.join(","))
}

/// Hands out its items in order, then behaves like an idle topic. Closing commits the
/// offset after the last record handed out, like the consumer does.
pub struct VecStream {
    items: VecDeque<StreamItem<String, Bytes>>,
    last: Option<i64>,
    pub closed: Rc<RefCell<bool>>,
    pub committed: Rc<RefCell<Option<i64>>>,
}

impl VecStream {
    pub fn new(items: Vec<StreamItem<String, Bytes>>) -> Self {
        VecStream {
            items: items.into(),
            last: None,
            closed: Rc::new(RefCell::new(false)),
            committed: Rc::new(RefCell::new(None)),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl KStream for VecStream {
    type Key = String;
    type Value = Bytes;

    async fn next(&mut self) -> Result<StreamItem<String, Bytes>, StreamError> {
        match self.items.pop_front() {
            Some(item) => {
                if let StreamItem::Item(rec) = &item {
                    self.last = Some(rec.offset);
                }
                Ok(item)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(StreamItem::Idle)
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        *self.closed.borrow_mut() = true;
        *self.committed.borrow_mut() = self.last.map(|o| o + 1);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent<K, V> {
    pub partition: Option<i32>,
    pub key: Option<K>,
    pub value: Option<V>,
    pub timestamp: Option<i64>,
}

pub struct CollectSink<K, V> {
    pub sent: Rc<RefCell<Vec<Sent<K, V>>>>,
    stop_after: Option<(usize, watch::Sender<bool>)>,
}

impl<K, V> CollectSink<K, V> {
    pub fn new() -> Self {
        CollectSink { sent: Rc::new(RefCell::new(vec![])), stop_after: None }
    }

    /// Requests shutdown through `tx` once `count` records were delivered.
    pub fn stopping_after(count: usize, tx: watch::Sender<bool>) -> Self {
        CollectSink { sent: Rc::new(RefCell::new(vec![])), stop_after: Some((count, tx)) }
    }
}

#[async_trait::async_trait(?Send)]
impl<K: Clone, V: Clone> KSink for CollectSink<K, V> {
    type Key = K;
    type Value = V;

    async fn send_next(&mut self, part: Option<i32>, k: Option<&K>, v: Option<&V>, timestamp: Option<i64>) -> Result<(), StreamError> {
        self.sent.borrow_mut().push(Sent {
            partition: part,
            key: k.cloned(),
            value: v.cloned(),
            timestamp,
        });
        if let Some((count, tx)) = &self.stop_after {
            if self.sent.borrow().len() >= *count {
                let _ = tx.send(true);
            }
        }
        Ok(())
    }
}

/// Pulls records until the stream reports it is idle.
pub async fn drain<S: KStream>(stream: &mut S) -> Result<Vec<Record<S::Key, S::Value>>, StreamError> {
    let mut out = vec![];
    loop {
        match stream.next().await? {
            StreamItem::Item(rec) => out.push(rec),
            StreamItem::Rebalance(_) => {}
            StreamItem::Idle => return Ok(out),
        }
    }
}
