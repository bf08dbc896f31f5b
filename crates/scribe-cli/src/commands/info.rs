//! Info command - show configuration and whether the server is up.

use scribe_ai::{GenerationClient, GenerationConfig, OllamaSupervisor, SupervisorConfig};

pub(crate) async fn run(config: SupervisorConfig) -> miette::Result<()> {
    let supervisor = OllamaSupervisor::new(config);
    let config = supervisor.config();

    println!("Scribe");
    println!("======");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Data directory:   {}", config.data_dir.display());
    println!("Models directory: {}", config.models_dir().display());
    println!("  First launch:   {}", supervisor.is_first_launch());
    println!();
    println!("Ollama binary:    {}", config.binary.display());
    println!("  Exists:         {}", config.binary.exists());
    println!("Base URL:         {}", supervisor.base_url());
    println!("Required model:   {}", config.required_model);
    println!();

    let client = GenerationClient::from_supervisor(&supervisor, GenerationConfig::from_env());
    if client.check_connection().await {
        println!("Server:           connected");
        let models = client.list_models().await;
        println!("Models:           {}", models.join(", "));
    } else {
        println!("Server:           not running (start it with: scribe serve)");
    }

    Ok(())
}
