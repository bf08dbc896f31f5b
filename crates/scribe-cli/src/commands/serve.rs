//! Serve command - keep the embedded server running in the foreground.

use scribe_ai::SupervisorConfig;

pub(crate) async fn run(config: SupervisorConfig) -> miette::Result<()> {
    let mut supervisor = super::start_server(config).await?;
    let state = supervisor.state();

    println!("Ollama listening on {}", supervisor.base_url());
    println!("Model: {} ({})", supervisor.config().required_model, state.model);
    println!();
    println!("Press Ctrl-C to stop.");

    let signal = tokio::signal::ctrl_c().await;
    supervisor.stop().await;

    signal.map_err(|e| miette::miette!("Failed to listen for Ctrl-C: {}", e))?;
    println!("Stopped.");
    Ok(())
}
