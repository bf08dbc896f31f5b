//! Streaming chat client that drives a [`GenerationSession`].

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scribe_local_ai::{parse_line, LocalAIError, OllamaClient, OllamaSupervisor};

use crate::config::GenerationConfig;
use crate::prompt::build_chat_request;
use crate::session::{ChatChunk, GenerationPhase, GenerationSession};

/// What the client last learned about the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub available_models: Vec<String>,
    pub error_message: Option<String>,
}

/// Issues chat requests and publishes the resulting sessions.
///
/// One generation at a time: the running task is the only writer of the
/// session channel. Start a new one only after the previous handle was
/// cancelled or joined.
pub struct GenerationClient {
    client: OllamaClient,
    config: GenerationConfig,
    session: watch::Sender<GenerationSession>,
    connection: watch::Sender<ConnectionState>,
}

impl GenerationClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>, config: GenerationConfig) -> Self {
        let client = OllamaClient::with_url(base_url)
            .with_timeouts(config.stream_idle_timeout, config.request_timeout);
        let (session, _) = watch::channel(GenerationSession::default());
        let (connection, _) = watch::channel(ConnectionState::default());
        Self {
            client,
            config,
            session,
            connection,
        }
    }

    /// Create a client bound to the supervisor's dedicated port.
    pub fn from_supervisor(supervisor: &OllamaSupervisor, config: GenerationConfig) -> Self {
        Self::new(supervisor.base_url(), config)
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Latest session snapshot; stays readable after the request ends.
    pub fn session(&self) -> GenerationSession {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationSession> {
        self.session.subscribe()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Run one generation on a spawned task.
    pub fn start(self: &Arc<Self>, conversation: &str, model: &str) -> GenerationHandle {
        let cancel = CancellationToken::new();
        let updates = self.subscribe();

        let client = Arc::clone(self);
        let conversation = conversation.to_string();
        let model = model.to_string();
        let token = cancel.clone();
        let task =
            tokio::spawn(async move { client.generate(&conversation, &model, token).await });

        GenerationHandle {
            cancel,
            task,
            updates,
        }
    }

    /// Stream a clinical note for `conversation`.
    ///
    /// Never fails: errors end the session in [`GenerationPhase::Failed`].
    /// `cancel` is honoured between lines and while waiting on the network;
    /// the connection is dropped as soon as it fires.
    pub async fn generate(
        &self,
        conversation: &str,
        model: &str,
        cancel: CancellationToken,
    ) -> GenerationSession {
        let started = Instant::now();
        let mut session = GenerationSession::begin();
        self.publish(&session);

        info!("Generating note with {}", model);

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let request = build_chat_request(model, conversation, &self.config);
        let connect = self.client.post_ndjson("/api/chat", &request);
        tokio::pin!(connect);

        let connected = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    session.cancel();
                    return self.finish(session, started);
                }
                result = &mut connect => break result,
                _ = ticker.tick() => {
                    session.elapsed = started.elapsed();
                    self.publish(&session);
                }
            }
        };

        let mut lines = match connected {
            Ok(lines) => lines,
            Err(LocalAIError::Status(code)) => {
                warn!("Chat request rejected with HTTP {}", code);
                session.fail("request failed");
                return self.finish(session, started);
            }
            Err(e) => {
                warn!("Chat request failed: {}", e);
                session.fail(e.to_string());
                return self.finish(session, started);
            }
        };

        session.advance(GenerationPhase::LoadingModel);
        self.publish(&session);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Generation cancelled");
                    session.cancel();
                    break;
                }
                _ = ticker.tick() => {
                    session.elapsed = started.elapsed();
                    self.publish(&session);
                }
                line = lines.next_line() => match line {
                    None => break,
                    Some(Err(e)) => {
                        warn!("Chat stream failed: {}", e);
                        session.fail(e.to_string());
                        break;
                    }
                    Some(Ok(line)) => {
                        let Some(chunk) = parse_line::<ChatChunk>(&line) else {
                            continue;
                        };
                        let done = session.apply(&chunk);
                        session.elapsed = started.elapsed();
                        self.publish(&session);
                        if done {
                            break;
                        }
                    }
                },
            }
        }

        // Closes the connection before the final snapshot goes out.
        drop(lines);

        info!(
            "Generation finished: {} ({} tokens)",
            session.phase, session.tokens_generated
        );
        self.finish(session, started)
    }

    fn finish(&self, mut session: GenerationSession, started: Instant) -> GenerationSession {
        session.elapsed = started.elapsed();
        session.is_generating = false;
        self.publish(&session);
        session
    }

    fn publish(&self, session: &GenerationSession) {
        self.session.send_replace(session.clone());
    }

    /// Installed models, or the default model alone when none are listed or
    /// the server cannot be reached.
    pub async fn list_models(&self) -> Vec<String> {
        let fallback = vec![self.config.model.clone()];

        let (models, connected, error_message) =
            match self.client.list_models(self.config.listing_timeout).await {
                Ok(names) if names.is_empty() => (fallback, true, None),
                Ok(names) => (names, true, None),
                Err(e @ (LocalAIError::Status(_) | LocalAIError::Json(_))) => {
                    debug!("Unusable model listing: {}", e);
                    (fallback, false, None)
                }
                Err(e) => {
                    warn!("Cannot list models: {}", e);
                    (
                        fallback,
                        false,
                        Some("Cannot connect to Ollama. Make sure it's running.".to_string()),
                    )
                }
            };

        self.connection.send_modify(|c| {
            c.connected = connected;
            c.available_models = models.clone();
            if error_message.is_some() {
                c.error_message = error_message;
            }
        });
        models
    }

    /// Whether the server answers 200 on the listing endpoint.
    pub async fn check_connection(&self) -> bool {
        let connected = self.client.probe(self.config.listing_timeout).await;
        self.connection.send_modify(|c| {
            c.connected = connected;
            if connected {
                c.error_message = None;
            }
        });
        connected
    }
}

/// A generation running on its own task.
pub struct GenerationHandle {
    cancel: CancellationToken,
    task: JoinHandle<GenerationSession>,
    updates: watch::Receiver<GenerationSession>,
}

impl GenerationHandle {
    /// Request a stop. Text received so far is kept.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.updates.borrow().is_generating
    }

    /// Session updates for this and later requests on the same client.
    pub fn subscribe(&self) -> watch::Receiver<GenerationSession> {
        self.updates.clone()
    }

    /// Wait for the task and return the final session.
    pub async fn join(self) -> GenerationSession {
        match self.task.await {
            Ok(session) => session,
            Err(e) => {
                warn!("Generation task ended abnormally: {}", e);
                let mut session = self.updates.borrow().clone();
                session.is_generating = false;
                session
            }
        }
    }
}
