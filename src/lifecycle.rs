use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::health::HealthState;
use crate::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    PendingShutdown,
    Error,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Created => "CREATED",
            State::Running => "RUNNING",
            State::PendingShutdown => "PENDING_SHUTDOWN",
            State::Error => "ERROR",
            State::Closed => "NOT_RUNNING",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Failed(String),
    ShutdownRequested,
    ShutdownCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    LogTransition { from: State, to: State },
    LogFault(String),
    RequestShutdown(Duration),
    InvalidateHealth,
    Escalate,
}

/// Next state of the topology and what has to happen to get there, in order.
///
/// A pair without a transition leaves the state as it is and asks for nothing.
pub fn transition(state: State, event: &Event, shutdown_timeout: Duration) -> (State, Vec<Effect>) {
    use self::Effect::*;

    let to = match (state, event) {
        (State::Created, Event::Started) => State::Running,
        (State::Created, Event::Failed(_)) | (State::Running, Event::Failed(_)) => State::Error,
        (State::Running, Event::ShutdownRequested) => State::PendingShutdown,
        (State::Running, Event::ShutdownCompleted)
        | (State::PendingShutdown, Event::ShutdownCompleted)
        | (State::Error, Event::ShutdownCompleted) => State::Closed,
        _ => return (state, vec![]),
    };

    let mut effects = vec![LogTransition { from: state, to }];
    match (to, event) {
        (State::Error, Event::Failed(reason)) => {
            effects.push(LogFault(reason.clone()));
            if state == State::Running {
                effects.push(RequestShutdown(shutdown_timeout));
            }
            effects.push(InvalidateHealth);
            effects.push(Escalate);
        }
        (State::PendingShutdown, _) => effects.push(RequestShutdown(shutdown_timeout)),
        _ => {}
    }
    (to, effects)
}

/// Tracks the lifecycle of one running topology and owns the write side of the health flags.
pub struct LifecycleMonitor {
    state: State,
    health: HealthState,
    shutdown_timeout: Duration,
}

impl LifecycleMonitor {
    pub fn new(health: HealthState, shutdown_timeout: Duration) -> Self {
        LifecycleMonitor {
            state: State::Created,
            health,
            shutdown_timeout,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn handle(&mut self, event: &Event) -> Vec<Effect> {
        let (next, effects) = transition(self.state, event, self.shutdown_timeout);
        self.state = next;
        effects
    }

    /// Carries out the effects that need nothing but the monitor. Returns the others.
    fn apply(&self, effect: Effect) -> Option<Effect> {
        match effect {
            Effect::LogTransition { from, to } => info!("From state={} to state={}", from, to),
            Effect::LogFault(reason) => error!("Stream topology failed: {}", reason),
            Effect::InvalidateHealth => self.health.mark_failed(),
            other => return Some(other),
        }
        None
    }

    /// Records a topology that could not be started at all.
    pub fn startup_failed(&mut self, err: &StreamError) {
        for effect in self.handle(&Event::Failed(err.to_string())) {
            if let Some(Effect::RequestShutdown(_)) = self.apply(effect) {
                warn!("Nothing to shut down before the topology started");
            }
        }
    }
}

/// A started topology as seen by the monitor.
#[async_trait(? Send)]
pub trait Supervised {
    /// Resolves once some worker stops without having been asked to, with the reason.
    async fn wait_for_fault(&mut self) -> StreamError;

    /// Asks every worker to stop and waits up to `timeout` for them.
    /// Returns false when the timeout elapsed first.
    async fn close(&mut self, timeout: Duration) -> bool;
}

/// Runs `topology` until it fails or `shutdown` resolves, then takes it down.
///
/// Returns the fault that stopped the topology, if any. Health flags are invalidated before
/// a fault is returned.
pub async fn supervise<T, F>(topology: &mut T, monitor: &mut LifecycleMonitor, shutdown: F) -> Result<(), StreamError>
    where T: Supervised,
          F: Future<Output=()>
{
    tokio::pin!(shutdown);
    let mut fault = None;
    let mut escalated = false;
    let mut events = VecDeque::from(vec![Event::Started]);

    loop {
        while let Some(event) = events.pop_front() {
            for effect in monitor.handle(&event) {
                match monitor.apply(effect) {
                    None => {}
                    Some(Effect::RequestShutdown(timeout)) => {
                        info!("Closing stream topology, waiting up to {:?}", timeout);
                        if !topology.close(timeout).await {
                            warn!("Stream topology did not close within {:?}", timeout);
                        }
                        events.push_back(Event::ShutdownCompleted);
                    }
                    Some(Effect::Escalate) => escalated = true,
                    Some(other) => debug!("Ignoring {:?}", other),
                }
            }
        }
        if escalated {
            return Err(fault.take().unwrap_or_else(|| StreamError::Runtime("topology failed".to_string())));
        }

        match monitor.state() {
            State::Running => {}
            State::Closed => return Ok(()),
            other => return Err(StreamError::Runtime(format!("topology left in state {}", other))),
        }

        tokio::select! {
            err = topology.wait_for_fault() => {
                events.push_back(Event::Failed(err.to_string()));
                fault = Some(err);
            }
            _ = &mut shutdown => events.push_back(Event::ShutdownRequested),
        }
    }
}
