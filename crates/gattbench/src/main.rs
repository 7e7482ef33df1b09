//! Drives the orchestrator against the simulated peripheral stack.
//!
//! Connects the configured number of simulated clients, waits for their
//! exercise sequences, disconnects them, tears down, and prints the final
//! [`ServerViewState`] as JSON on stdout.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use gattbench_core::{DisconnectReason, ServerViewState, TestItem, logging};
use gattbench_runtime::sim::{ClientProfile, SimConfig, SimulatedStack};
use gattbench_runtime::{Orchestrator, OrchestratorConfig, RuntimeError};
use gattbench_settings::GattbenchSettings;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Slack added to every wait on top of the simulated step latency.
const WAIT_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "gattbench",
    about = "Run the GATT server test harness against simulated clients"
)]
struct Args {
    /// Settings file. Defaults to `~/.gattbench/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Number of simulated clients, overriding `simulator.clients`.
    #[arg(long)]
    clients: Option<usize>,

    /// Leave clients connected until teardown instead of disconnecting them.
    #[arg(long, default_value_t = false)]
    keep_connected: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load(&args)?;

    if settings.logging.json {
        logging::init_json_subscriber(&settings.logging.level);
    } else {
        logging::init_subscriber(&settings.logging.level);
    }

    let view = run(&settings, args.keep_connected).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    let failed = view.test_items.iter().filter(|o| !o.is_passed).count();
    if failed > 0 {
        anyhow::bail!("{failed} test(s) failed");
    }
    Ok(())
}

fn load(args: &Args) -> Result<GattbenchSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(gattbench_settings::settings_path);
    let mut settings = gattbench_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(clients) = args.clients {
        settings.simulator.clients = clients;
        settings.simulator.drop_before_ready = settings.simulator.drop_before_ready.min(clients);
    }
    settings.validate()?;
    Ok(settings)
}

async fn run(settings: &GattbenchSettings, keep_connected: bool) -> Result<ServerViewState> {
    let sim = &settings.simulator;
    let config = SimConfig::try_from(sim)?;
    let deadline = config.step_latency * 8 + WAIT_SLACK;
    let stack = Arc::new(SimulatedStack::new(config));

    let orchestrator =
        Orchestrator::with_stack(Arc::clone(&stack), OrchestratorConfig::from(&settings.orchestrator));
    let mut view = orchestrator.subscribe();
    let handle = match orchestrator.start().await {
        Ok(handle) => handle,
        Err(err @ RuntimeError::Startup { .. }) => {
            warn!(error = %err, category = err.category(), "startup failed");
            return Ok(view.borrow().clone());
        }
        Err(err) => return Err(err.into()),
    };

    let devices: Vec<_> = (0..sim.clients)
        .map(|i| {
            let profile = ClientProfile {
                drop_before_ready: i < sim.drop_before_ready,
                ..ClientProfile::default()
            };
            stack.connect_client_with(format!("SIM:{i:02}"), profile)
        })
        .collect();
    info!(clients = devices.len(), "simulated clients connected");

    let expected = sim.clients;
    timeout(deadline, stack.wait_for_sequences(expected))
        .await
        .context("simulated sequences did not finish")?;
    wait(&mut view, deadline, |v| {
        v.outcome(TestItem::ReliableWrite.name()).is_some() || expected == 0
    })
    .await?;

    if !keep_connected {
        for device in &devices {
            stack.disconnect_client(device, DisconnectReason::TerminatePeerUser);
        }
        wait(&mut view, deadline, |v| {
            v.waiting_count() == 0
                && (devices.is_empty() || v.outcome(TestItem::DeviceDisconnection.name()).is_some())
        })
        .await?;
    }

    let snapshot = handle.view();
    handle.shutdown().await?;
    info!(
        tests = snapshot.test_items.len(),
        all_passed = snapshot.all_passed(),
        "run complete"
    );
    Ok(snapshot)
}

async fn wait(
    view: &mut watch::Receiver<ServerViewState>,
    deadline: Duration,
    condition: impl FnMut(&ServerViewState) -> bool,
) -> Result<()> {
    let _ = timeout(deadline, view.wait_for(condition))
        .await
        .context("timed out waiting for the view")?
        .context("orchestrator stopped publishing")?;
    Ok(())
}
