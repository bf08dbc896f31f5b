//! CLI commands.

use scribe_ai::{OllamaSupervisor, ServerStatus, SupervisorConfig};
use std::path::PathBuf;

pub mod generate;
pub mod info;
pub mod model;
pub mod serve;

/// Environment configuration with command-line overrides applied.
pub(crate) fn supervisor_config(port: Option<u16>, ollama: Option<PathBuf>) -> SupervisorConfig {
    let mut config = SupervisorConfig::from_env();
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(binary) = ollama {
        config.binary = binary;
    }
    config
}

/// Start (or attach to) the embedded server, failing the command if it
/// does not come up.
pub(crate) async fn start_server(config: SupervisorConfig) -> miette::Result<OllamaSupervisor> {
    let mut supervisor = OllamaSupervisor::new(config);

    if supervisor.is_first_launch() {
        eprintln!("First run: creating model store in {}", supervisor.config().models_dir().display());
    }

    eprintln!("Starting AI engine...");
    supervisor.start().await;

    match supervisor.state().lifecycle {
        ServerStatus::Running => Ok(supervisor),
        ServerStatus::Failed(reason) => Err(miette::miette!("{}", reason)),
        other => Err(miette::miette!("Unexpected server state: {}", other)),
    }
}
