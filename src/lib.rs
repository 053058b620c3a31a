pub mod cli;
pub mod commands;
pub mod config;
pub mod device;
pub mod host;
pub mod serial;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use cli::Cli;
use commands::App;
use config::ConfigStore;
use device::DeviceManager;
use host::LoggingHost;
use serial::{PortProvider, SystemPorts};

/// How often queued device events are delivered to their handlers.
const EVENT_TICK: Duration = Duration::from_millis(20);
const HEALTH_TICK: Duration = Duration::from_secs(1);

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.to_string()),
    )
    .init();

    if cli.list_ports {
        let ports = SystemPorts.list_ports().context("listing serial ports")?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let mut store = ConfigStore::load_from(cli.config_path());
    if let Some(port) = &cli.port {
        store
            .set_preferred_port(port)
            .context("saving preferred port")?;
    }

    let device = Arc::new(DeviceManager::new(
        Arc::new(SystemPorts),
        store.link_settings().clone(),
    ));
    let host = Arc::new(LoggingHost);
    let app = App::new(device, store, host.clone(), host);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime.block_on(event_loop(app))
}

async fn event_loop(app: Arc<App>) -> anyhow::Result<()> {
    if !app.start()? {
        log::warn!("No serial port selected; pass --port (see --list-ports)");
    }

    let mut events = tokio::time::interval(EVENT_TICK);
    let mut health = tokio::time::interval(HEALTH_TICK);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = events.tick() => {
                app.device().drain_events();
            }
            _ = health.tick() => {
                app.health_tick();
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    // Joins threads with a bounded wait; keep it off the runtime workers.
    tokio::task::spawn_blocking(move || app.shutdown())
        .await
        .context("shutting down")?;
    Ok(())
}
