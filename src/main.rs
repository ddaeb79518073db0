//! minion-core binary.
//!
//! Communicates with the presentation surface via JSON-line IPC on
//! stdin/stdout. Logs go to stderr and the rolling log file.

use anyhow::Context;
use tracing::info;

use minion_core::config::{get_config_path, read_companion_config};
use minion_core::ipc::bridge::spawn_stdin_reader;
use minion_core::{logging, Coordinator, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init() {
        eprintln!("{}", e);
    }

    let config = read_companion_config();
    info!(path = %get_config_path().display(), ?config, "Configuration loaded");

    let services = Services::native(&config);
    let coordinator = Coordinator::new(config, services);
    let commands = spawn_stdin_reader();

    tokio::spawn(coordinator.run(commands))
        .await
        .context("presence core task failed")?;

    info!("minion-core exiting");
    Ok(())
}
