//! Generate command - stream a clinical note for a transcript.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use scribe_ai::{GenerationClient, GenerationConfig, GenerationPhase, SupervisorConfig};
use tokio::io::AsyncReadExt;

pub(crate) async fn run(
    config: SupervisorConfig,
    file: Option<&Path>,
    model: Option<String>,
    stats: bool,
) -> miette::Result<()> {
    let conversation = read_transcript(file).await?;
    if conversation.trim().is_empty() {
        return Err(miette::miette!("Transcript is empty"));
    }

    let mut supervisor = super::start_server(config).await?;
    if !supervisor.ensure_model().await {
        let state = supervisor.state();
        supervisor.stop().await;
        return Err(miette::miette!("Model is not available: {}", state.model));
    }

    let generation_config = GenerationConfig::from_env();
    let model = model.unwrap_or_else(|| generation_config.model.clone());
    let client = Arc::new(GenerationClient::from_supervisor(&supervisor, generation_config));

    let handle = client.start(&conversation, &model);
    let mut updates = handle.subscribe();
    let mut printed = 0;
    let mut phase = GenerationPhase::Idle;
    let mut stdout = std::io::stdout();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            result = &mut ctrl_c, if !interrupted => {
                if result.is_ok() {
                    eprintln!();
                    eprintln!("Cancelling...");
                }
                interrupted = true;
                handle.cancel();
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = updates.borrow_and_update().clone();

                if stats && session.phase != phase {
                    eprintln!("[{}]", session.phase);
                    phase = session.phase.clone();
                }
                if let Some(fresh) = session.text.get(printed..) {
                    if !fresh.is_empty() {
                        print!("{}", fresh);
                        stdout.flush().ok();
                        printed = session.text.len();
                    }
                }
                if !session.is_generating {
                    break;
                }
            }
        }
    }

    let session = handle.join().await;
    if let Some(rest) = session.text.get(printed..) {
        print!("{}", rest);
    }
    println!();
    supervisor.stop().await;

    if stats {
        eprintln!();
        eprintln!("Tokens:        {}", session.tokens_generated);
        eprintln!("Tokens/sec:    {:.1}", session.tokens_per_second);
        eprintln!("Elapsed:       {:.1}s", session.elapsed.as_secs_f64());
        if let Some(load) = session.model_load_time {
            eprintln!("Model load:    {:.1}s", load.as_secs_f64());
        }
    }

    if let GenerationPhase::Failed(reason) = &session.phase {
        return Err(miette::miette!("Generation failed: {}", reason));
    }
    if session.cancelled {
        eprintln!("Generation cancelled.");
    }
    Ok(())
}

async fn read_transcript(file: Option<&Path>) -> miette::Result<String> {
    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| miette::miette!("Failed to read {}: {}", path.display(), e)),
        _ => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .map_err(|e| miette::miette!("Failed to read stdin: {}", e))?;
            Ok(input)
        }
    }
}
