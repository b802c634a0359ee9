#[macro_use]
extern crate log;

use std::process;

use tokio::sync::oneshot;

use smsak_stream::config::Environment;
use smsak_stream::error::BoxError;
use smsak_stream::health::{self, HealthState};
use smsak_stream::lifecycle::{supervise, LifecycleMonitor};
use smsak_stream::topology::Topology;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("Exiting: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let env = Environment::load()?;
    let health = HealthState::new();

    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(health::serve(env.http.socket_addr()?, health.reader(), async move {
        let _ = server_stopped.await;
    }));

    let settings = env.topology.clone();
    let mut monitor = LifecycleMonitor::new(health.clone(), settings.shutdown_timeout);
    let topology = Topology::new(env.kafka_config(), settings);

    let started = match topology.prepare().await {
        Ok(()) => topology.start(),
        Err(e) => Err(e),
    };
    let result = match started {
        Ok(mut running) => {
            let signal_health = health.clone();
            supervise(&mut running, &mut monitor, async move {
                shutdown_signal().await;
                signal_health.set_ready(false);
            }).await
        }
        Err(e) => {
            monitor.startup_failed(&e);
            Err(e)
        }
    };

    let _ = stop_server.send(());
    match server.await {
        Ok(Err(e)) => warn!("Health server failed: {}", e),
        Err(e) => warn!("Health server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    Ok(result?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for ctrl-c: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
