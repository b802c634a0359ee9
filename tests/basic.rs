#[macro_use]
extern crate log;

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::*;
use smsak_stream::format::json::JSON;
use smsak_stream::format::raw::{Raw, Str};
use smsak_stream::model::CombinedRecord;
use smsak_stream::stream::topic::{now_millis, RawConsumer, RawProducer, TypedConsumer, TypedProducer};
use smsak_stream::stream::{KSink, StreamItem};
use smsak_stream::topology::{run_worker, Topology};
use smsak_stream::KStream;
use tokio::sync::watch;

// Needs a broker on localhost:29092 with the topics of `settings()` created with equal
// partition counts.
#[tokio::test]
#[ignore]
async fn certificates_are_joined_through_kafka() {
    init();
    let cfg = cfg().set_group("smsak-e2e");
    let settings = settings();
    Topology::new(cfg.clone(), settings.clone()).prepare().await.expect("changelog topics");

    let key = format!("e2e-{}", now_millis());
    let now = now_millis();
    let mut certificates = TypedProducer::<Str, Raw>::from(RawProducer::new(&cfg, OK_TOPIC).expect("producer"));
    let mut outcomes = TypedProducer::<Str, Raw>::from(RawProducer::new(&cfg, OUTCOME_TOPIC).expect("producer"));
    let cert = Bytes::from(certificate(&key));
    let result = Bytes::from(outcome("OK", &[]));
    certificates.send_next(None, Some(&key), Some(&cert), Some(now)).await.expect("certificate sent");
    outcomes.send_next(None, Some(&key), Some(&result), Some(now + HOUR)).await.expect("outcome sent");
    info!("Produced certificate and outcome for {}", key);

    let (tx, rx) = watch::channel(false);
    let worker = run_worker(cfg.clone(), settings.clone(), rx);

    let sink_cfg = cfg.clone().set_group(&format!("smsak-e2e-sink-{}", now));
    let mut sink: TypedConsumer<Str, JSON<CombinedRecord>> =
        RawConsumer::subscribe(&sink_cfg, &[SINK_TOPIC.to_string()]).expect("sink consumer").into();
    let read = async move {
        let found = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                match sink.next().await.expect("sink readable") {
                    StreamItem::Item(rec) if rec.key.as_deref() == Some(key.as_str()) => return rec,
                    _ => {}
                }
            }
        }).await;
        tx.send(true).expect("worker listens");
        found
    };

    let (worker_result, found) = futures::join!(worker, read);
    worker_result.expect("worker stops cleanly");
    let rec = found.expect("joined record within a minute");
    let combined = rec.value.expect("combined value");
    assert_eq!(combined.received_sykmelding, cert);
    assert_eq!(combined.behandlings_utfall, result);
}

// Same broker setup as above. The certificate is consumed by a first worker and has to be
// restored from the changelog by the second one.
#[tokio::test]
#[ignore]
async fn join_state_survives_a_worker_restart() {
    init();
    let cfg = cfg().set_group(&format!("smsak-restart-{}", now_millis()));
    let settings = settings();
    Topology::new(cfg.clone(), settings.clone()).prepare().await.expect("changelog topics");

    let key = format!("restart-{}", now_millis());
    let now = now_millis();
    let cert = Bytes::from(certificate(&key));
    let mut certificates = TypedProducer::<Str, Raw>::from(RawProducer::new(&cfg, OK_TOPIC).expect("producer"));
    certificates.send_next(None, Some(&key), Some(&cert), Some(now)).await.expect("certificate sent");

    let (tx, rx) = watch::channel(false);
    let (first, _) = futures::join!(run_worker(cfg.clone(), settings.clone(), rx), async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        tx.send(true).expect("worker listens");
    });
    first.expect("first worker stops cleanly");
    info!("First worker stopped, certificate {} is only in the changelog now", key);

    let result = Bytes::from(outcome("OK", &[]));
    let mut outcomes = TypedProducer::<Str, Raw>::from(RawProducer::new(&cfg, OUTCOME_TOPIC).expect("producer"));
    outcomes.send_next(None, Some(&key), Some(&result), Some(now + HOUR)).await.expect("outcome sent");

    let (tx, rx) = watch::channel(false);
    let worker = run_worker(cfg.clone(), settings.clone(), rx);
    let sink_cfg = cfg.clone().set_group(&format!("smsak-restart-sink-{}", now));
    let mut sink: TypedConsumer<Str, JSON<CombinedRecord>> =
        RawConsumer::subscribe(&sink_cfg, &[SINK_TOPIC.to_string()]).expect("sink consumer").into();
    let read = async move {
        let found = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let StreamItem::Item(rec) = sink.next().await.expect("sink readable") {
                    if rec.key.as_deref() == Some(key.as_str()) {
                        return rec;
                    }
                }
            }
        }).await;
        tx.send(true).expect("worker listens");
        found
    };

    let (worker_result, found) = futures::join!(worker, read);
    worker_result.expect("second worker stops cleanly");
    let combined = found.expect("joined record within a minute").value.expect("combined value");
    assert_eq!(combined.received_sykmelding, cert);
    assert_eq!(combined.behandlings_utfall, result);
}
