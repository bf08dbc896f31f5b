//! Model management commands.

use indicatif::{ProgressBar, ProgressStyle};
use scribe_ai::{GenerationClient, GenerationConfig, ModelStatus, SupervisorConfig};

/// List models installed in the embedded server.
pub(crate) async fn list(config: SupervisorConfig) -> miette::Result<()> {
    let mut supervisor = super::start_server(config).await?;
    let client = GenerationClient::from_supervisor(&supervisor, GenerationConfig::from_env());

    let models = client.list_models().await;
    let connection = client.connection();
    supervisor.stop().await;

    if let Some(error) = connection.error_message {
        return Err(miette::miette!("{}", error));
    }

    println!("Models:");
    for model in models {
        println!("  - {}", model);
    }
    Ok(())
}

/// Pull the required model, showing download progress.
pub(crate) async fn pull(config: SupervisorConfig) -> miette::Result<()> {
    let mut supervisor = super::start_server(config).await?;
    let model = supervisor.config().required_model.clone();

    if supervisor.state().model == ModelStatus::Ready {
        println!("Model '{}' is already installed.", model);
        supervisor.stop().await;
        return Ok(());
    }

    println!("Downloading model: {}", model);
    println!("This may take a while depending on your connection...");
    println!();

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
            .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?
            .progress_chars("#>-"),
    );

    let mut updates = supervisor.subscribe();
    let progress = pb.clone();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            progress.set_position((state.download_progress * 1000.0) as u64);
            progress.set_message(state.status_message);
        }
    });

    supervisor.pull_model().await;
    let state = supervisor.state();
    supervisor.stop().await;
    drop(supervisor);
    let _ = watcher.await;

    match state.model {
        ModelStatus::Ready => {
            pb.finish_with_message("Download complete");
            println!();
            println!("Model downloaded successfully!");
            Ok(())
        }
        ModelStatus::Failed(reason) => {
            pb.abandon_with_message("Download failed");
            Err(miette::miette!("Failed to download model: {}", reason))
        }
        other => {
            pb.abandon();
            Err(miette::miette!("Unexpected model state: {}", other))
        }
    }
}
