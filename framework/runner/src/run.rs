use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gust_coordinator::prelude::{ControlPlane, LoadShapeConfig};
use gust_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use gust_plan::prelude::TestPlan;
use tokio::sync::broadcast;

use crate::cli::GustCli;
use crate::interpret::Interpreter;
use crate::progress::start_progress;
use crate::shutdown::start_shutdown_listener;
use crate::transport::Transport;
use crate::worker::WorkerAgent;

/// What the run produced, for the caller to print or assert on.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub requests: u64,
    pub failures: u64,
    pub peak_population: u32,
}

/// Executes a load test to completion.
///
/// Builds the async runtime, wires the control plane to a local worker agent, ticks the load
/// shape until the planned duration elapses or Ctrl-C arrives, then drains every virtual user
/// before returning. The caller supplies the [`Transport`] that actually talks to the system
/// under test.
pub fn run(
    cli: &GustCli,
    plan: TestPlan,
    transport: Arc<dyn Transport>,
) -> anyhow::Result<RunReport> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?;

    let shutdown = start_shutdown_listener(&runtime);

    let report = runtime.block_on(run_inner(cli, plan, transport, shutdown));

    // Let spawned tasks wind down before the runtime is torn down.
    runtime.shutdown_timeout(Duration::from_secs(10));
    report
}

async fn run_inner(
    cli: &GustCli,
    plan: TestPlan,
    transport: Arc<dyn Transport>,
    shutdown: ShutdownHandle,
) -> anyhow::Result<RunReport> {
    let plan = Arc::new(plan);
    let tick_interval = Duration::from_millis(cli.tick_interval_ms);
    let config = LoadShapeConfig {
        tick_interval,
        max_spawn_rate: cli.max_spawn_rate,
    };

    let control = Arc::new(ControlPlane::new(&plan, config));
    let interpreter = Arc::new(Interpreter::new(&plan, transport));
    let stats = interpreter.stats();
    let agent = Arc::new(WorkerAgent::new(
        cli.worker_id.clone(),
        plan,
        interpreter,
        shutdown.clone(),
        cli.seed,
    ));

    if let Some(duration) = cli.duration {
        if !cli.no_progress {
            start_progress(
                Duration::from_secs(duration),
                shutdown.new_listener(),
                agent.clone(),
            );
        }
    }

    let pump = tokio::spawn(pump_deltas(
        control.subscribe(),
        control.clone(),
        agent.clone(),
        shutdown.new_listener(),
    ));

    if let Some(duration) = cli.duration {
        let timer_handle = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration)).await;
            log::info!("Planned runtime reached, stopping");
            timer_handle.shutdown();
        });
    }

    let mut listener = shutdown.new_listener();
    let mut ticker = tokio::time::interval(tick_interval);
    let mut peak_population = 0;
    loop {
        tokio::select! {
            _ = listener.wait_for_shutdown() => break,
            _ = ticker.tick() => {}
        }

        let population = agent.active_population();
        peak_population = peak_population.max(population);
        control.report_worker_population(agent.id(), population);

        for id in agent.take_tripped() {
            log::warn!("Scenario {id} exceeded its failure limit, disabling it");
            if let Err(e) = control.set_enabled(&id, false) {
                log::error!("Failed to disable scenario {id}: {e}");
            }
        }

        let snapshot = control.tick();
        let spawn_budget = (snapshot.spawn_rate * tick_interval.as_secs_f64()).ceil() as u32;
        agent.reconcile(spawn_budget);
    }

    log::info!("Draining {} active users", agent.active_population());
    agent.drain_all().await;
    pump.abort();

    Ok(RunReport {
        requests: stats.requests(),
        failures: stats.failures(),
        peak_population,
    })
}

/// Forwards published deltas to the worker agent. A lagged receiver is rebuilt from a full
/// registry sync rather than treated as fatal.
async fn pump_deltas(
    mut receiver: broadcast::Receiver<gust_coordinator::prelude::ScenarioDelta>,
    control: Arc<ControlPlane>,
    agent: Arc<WorkerAgent>,
    mut shutdown_listener: DelegatedShutdownListener,
) {
    loop {
        tokio::select! {
            _ = shutdown_listener.wait_for_shutdown() => break,
            delta = receiver.recv() => match delta {
                Ok(delta) => agent.apply_delta(&delta),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Delta stream lagged by {skipped} messages, resyncing");
                    for delta in control.full_sync() {
                        agent.apply_delta(&delta);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
