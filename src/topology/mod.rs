use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::config::TopologySettings;
use crate::format::json::JSON;
use crate::format::raw::{Raw, Str};
use crate::lifecycle::Supervised;
use crate::model::CombinedRecord;
use crate::store::{changelog_topic, Changelogged, InMemory};
use crate::stream::topic::{ensure_compacted_topics, partition_count};
use crate::stream::{join_store_names, JoinWindows, Record};
use crate::task::Task;
use crate::{Config, KStream, StreamError, WindowStore};

pub mod filters;

/// Window store the workers join with.
pub type JoinStore = Changelogged<Str, Raw, InMemory<String, Bytes>>;

/// Filters both inputs and joins what is left into combined records.
///
/// `task` reads the primary topics and the outcome topic of `settings`, keyed by string with
/// opaque payloads.
pub fn join_certificates<S, ST>(task: Task<S>, settings: &TopologySettings) -> Task<impl KStream<Key=String, Value=CombinedRecord>>
    where S: KStream<Key=String, Value=Bytes>,
          ST: WindowStore<String, Bytes>
{
    let windows = JoinWindows::of_time_difference_with_no_grace(settings.join_window);
    task
        .filter_topics(&settings.primary_topics, |rec: &Record<String, Bytes>| filters::keep_primary(rec.value.as_ref()))
        .filter_topics(&[settings.outcome_topic.clone()], |rec: &Record<String, Bytes>| filters::keep_outcome(rec.value.as_ref()))
        .join_windowed::<ST, _, _>(&settings.primary_topics, windows, |_key: &String, primary: &Bytes, outcome: &Bytes| {
            CombinedRecord::new(primary, outcome)
        })
}

/// Changelog topics backing the join stores of `application_id`.
pub fn changelog_topics(application_id: &str) -> Vec<String> {
    let (left, right) = join_store_names(&format!("{}-join", application_id));
    vec![changelog_topic(&left), changelog_topic(&right)]
}

/// The partition count shared by every input, or an error naming all of them.
pub fn co_partitioned(counts: Vec<(String, i32)>) -> Result<i32, StreamError> {
    match counts.first() {
        Some((_, first)) if counts.iter().all(|(_, n)| n == first) => Ok(*first),
        _ => Err(StreamError::NotCoPartitioned { counts }),
    }
}

/// Runs one worker until `shutdown` turns true or it fails.
pub async fn run_worker(cfg: Config, settings: TopologySettings, shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
    let task = Task::new(cfg, &settings.application_id)
        .stream::<Str, Raw>(&settings.source_topics())?;
    join_certificates::<_, JoinStore>(task, &settings)
        .to::<Str, JSON<CombinedRecord>>(&settings.sink_topic, shutdown)
        .await
}

#[derive(Debug)]
struct WorkerExit {
    thread: String,
    result: Result<(), StreamError>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_thread(cfg: Config, settings: TopologySettings, shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_worker(cfg, settings, shutdown))
}

/// The stream worker threads of one process.
pub struct Topology {
    cfg: Config,
    settings: TopologySettings,
}

impl Topology {
    pub fn new(cfg: Config, settings: TopologySettings) -> Self {
        Topology { cfg, settings }
    }

    /// Checks that all inputs are co-partitioned and creates the changelog topics of the
    /// join stores when they are missing.
    pub async fn prepare(&self) -> Result<(), StreamError> {
        let counts = self.settings.source_topics()
            .into_iter()
            .map(|topic| partition_count(&self.cfg, &topic).map(|n| (topic, n)))
            .collect::<Result<Vec<_>, _>>()?;
        let partitions = co_partitioned(counts)?;
        let topics = changelog_topics(&self.settings.application_id);
        debug!("Ensuring changelog topics {:?} with {} partitions", topics, partitions);
        ensure_compacted_topics(&self.cfg, &topics, partitions).await
    }

    pub fn start(self) -> Result<RunningTopology, StreamError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let threads = self.settings.stream_threads;
        for i in 1..=threads {
            let name = format!("{}-StreamThread-{}", self.settings.application_id, i);
            let cfg = self.cfg.clone();
            let settings = self.settings.clone();
            let shutdown = shutdown_rx.clone();
            let exits = exit_tx.clone();
            let thread_name = name.clone();

            thread::Builder::new().name(name).spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| run_thread(cfg, settings, shutdown))) {
                    Ok(result) => result,
                    Err(payload) => Err(StreamError::Panicked {
                        thread: thread_name.clone(),
                        message: panic_message(&*payload),
                    }),
                };
                if let Err(e) = &result {
                    error!("Stream thread {} failed: {}", thread_name, e);
                }
                let _ = exits.send(WorkerExit { thread: thread_name, result });
            })?;
        }
        info!("Started {} stream threads for {}", threads, self.settings.application_id);

        Ok(RunningTopology {
            shutdown: shutdown_tx,
            exits: exit_rx,
            running: threads,
        })
    }
}

pub struct RunningTopology {
    shutdown: watch::Sender<bool>,
    exits: mpsc::UnboundedReceiver<WorkerExit>,
    running: usize,
}

#[async_trait(? Send)]
impl Supervised for RunningTopology {
    async fn wait_for_fault(&mut self) -> StreamError {
        match self.exits.recv().await {
            Some(exit) => {
                self.running = self.running.saturating_sub(1);
                match exit.result {
                    Err(e) => e,
                    Ok(()) => StreamError::Stopped { thread: exit.thread },
                }
            }
            None => StreamError::Runtime("all stream threads are gone".to_string()),
        }
    }

    async fn close(&mut self, timeout: Duration) -> bool {
        let _ = self.shutdown.send(true);
        let running = &mut self.running;
        let exits = &mut self.exits;
        let drained = tokio::time::timeout(timeout, async {
            while *running > 0 {
                match exits.recv().await {
                    Some(exit) => {
                        *running -= 1;
                        match exit.result {
                            Ok(()) => debug!("Stream thread {} stopped", exit.thread),
                            Err(e) => warn!("Stream thread {} stopped with error: {}", exit.thread, e),
                        }
                    }
                    None => break,
                }
            }
        }).await;
        drained.is_ok()
    }
}
