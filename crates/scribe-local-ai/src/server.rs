//! Supervisor for the embedded `ollama serve` process.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::client::{OllamaClient, LISTING_TIMEOUT};
use crate::config::SupervisorConfig;
use crate::error::LocalAIError;
use crate::model::{has_model_with_prefix, PullProgress, PullRequest, PullTracker};
use crate::paths;
use crate::status::{ModelStatus, ProcessState, ServerStatus};
use crate::stream::parse_line;

/// Executable search path handed to the child. Nothing else is inherited.
const CHILD_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Upper bound on buffered child stderr.
const DIAGNOSTIC_CAPACITY: usize = 8 * 1024;

/// Owns the embedded Ollama process and publishes its [`ProcessState`].
///
/// All mutating operations take `&mut self`, so the state has exactly one
/// writer. Observers follow it through [`OllamaSupervisor::subscribe`].
pub struct OllamaSupervisor {
    config: SupervisorConfig,
    client: OllamaClient,
    process: Option<Child>,
    diagnostics: Arc<Mutex<String>>,
    state: watch::Sender<ProcessState>,
}

impl OllamaSupervisor {
    /// Create a supervisor; nothing is spawned until [`start`](Self::start).
    pub fn new(config: SupervisorConfig) -> Self {
        let client = OllamaClient::with_url(config.base_url());
        let (state, _) = watch::channel(ProcessState::default());
        Self {
            config,
            client,
            process: None,
            diagnostics: Arc::new(Mutex::new(String::new())),
            state,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Base URL dependents should talk to.
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Client bound to the dedicated port.
    pub fn client(&self) -> OllamaClient {
        self.client.clone()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// True when no model store exists yet, i.e. setup has never run.
    pub fn is_first_launch(&self) -> bool {
        !self.config.models_dir().exists()
    }

    /// Environment passed to the child, and nothing more.
    pub fn child_environment(&self) -> Vec<(&'static str, String)> {
        let home = dirs::home_dir().unwrap_or_else(|| self.config.data_dir.clone());
        vec![
            ("OLLAMA_HOST", format!("127.0.0.1:{}", self.config.port)),
            (
                "OLLAMA_MODELS",
                self.config.models_dir().display().to_string(),
            ),
            ("HOME", home.display().to_string()),
            ("PATH", CHILD_PATH.to_string()),
        ]
    }

    /// Bring the server up, then check for the required model.
    ///
    /// Reuses a server already answering on the dedicated port. Never
    /// returns an error; failures land in [`ProcessState::lifecycle`].
    pub async fn start(&mut self) {
        if self.probe_liveness().await {
            info!("Ollama already running at {}", self.base_url());
            self.update(|s| {
                s.lifecycle = ServerStatus::Running;
                s.status_message = "Ollama running".to_string();
            });
            self.check_model_presence().await;
            return;
        }

        self.update(|s| {
            s.lifecycle = ServerStatus::Starting;
            s.status_message = "Starting Ollama...".to_string();
        });

        if let Some(child) = self.process.take() {
            debug!("Replacing stale Ollama process");
            terminate(child, self.config.stop_grace).await;
        }

        if let Err(e) = self.spawn() {
            warn!("Failed to spawn Ollama: {}", e);
            self.fail_server(e.to_string());
            return;
        }

        match self.wait_ready().await {
            Ok(()) => {
                info!("Ollama is ready on port {}", self.config.port);
                self.update(|s| {
                    s.lifecycle = ServerStatus::Running;
                    s.status_message = "Ollama running".to_string();
                });
                self.check_model_presence().await;
            }
            Err(e) => {
                warn!("Ollama did not become ready: {}", e);
                self.fail_server(e.to_string());
            }
        }
    }

    fn spawn(&mut self) -> Result<(), LocalAIError> {
        paths::ensure_dirs(&self.config.data_dir)
            .map_err(|e| LocalAIError::DataDirCreationFailed(e.to_string()))?;

        info!(
            "Starting {} serve on port {}",
            self.config.binary.display(),
            self.config.port
        );

        let mut child = Command::new(&self.config.binary)
            .arg("serve")
            .env_clear()
            .envs(self.child_environment())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    LocalAIError::ServerBinaryNotFound(self.config.binary.display().to_string())
                }
                _ => LocalAIError::ServerStartFailed(e.to_string()),
            })?;

        debug!("Ollama process started with PID: {:?}", child.id());

        self.diagnostics = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_stderr(stderr, Arc::clone(&self.diagnostics)));
        }
        self.process = Some(child);

        Ok(())
    }

    /// Poll the liveness probe until it succeeds or the budget runs out.
    async fn wait_ready(&mut self) -> Result<(), LocalAIError> {
        for attempt in 1..=self.config.max_attempts {
            sleep(self.config.poll_interval).await;

            if self.probe_liveness().await {
                return Ok(());
            }

            if let Some(status) = self.exit_status() {
                return Err(LocalAIError::ServerDied(format!(
                    "{}: {}",
                    status,
                    self.diagnostic_tail()
                )));
            }

            debug!(attempt, "Ollama not ready yet");
        }

        Err(LocalAIError::ServerStartTimeout(self.diagnostic_tail()))
    }

    fn exit_status(&mut self) -> Option<std::process::ExitStatus> {
        let child = self.process.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.process = None;
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Error checking Ollama status: {}", e);
                None
            }
        }
    }

    /// Last `diagnostic_limit` characters of captured stderr.
    fn diagnostic_tail(&self) -> String {
        let captured = self
            .diagnostics
            .lock()
            .map(|d| d.trim().to_string())
            .unwrap_or_default();
        let count = captured.chars().count();
        captured
            .chars()
            .skip(count.saturating_sub(self.config.diagnostic_limit))
            .collect()
    }

    /// Terminate the child, if any, and reset to `NotStarted`. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(child) = self.process.take() {
            terminate(child, self.config.stop_grace).await;
        }
        self.update(|s| {
            s.lifecycle = ServerStatus::NotStarted;
            s.status_message = "Ollama stopped".to_string();
        });
    }

    /// Whether the server answers on the dedicated port right now.
    pub async fn probe_liveness(&self) -> bool {
        self.client.probe(self.config.probe_timeout).await
    }

    /// Ask the server whether the required model is installed.
    pub async fn check_model_presence(&mut self) {
        self.update(|s| {
            s.model = ModelStatus::Checking;
            s.status_message = "Checking model...".to_string();
        });

        let result = self.client.list_models(LISTING_TIMEOUT).await;
        match result {
            Ok(names) if has_model_with_prefix(names.as_slice(), &self.config.model_prefix) => {
                info!("Model {} is installed", self.config.required_model);
                self.update(|s| {
                    s.model = ModelStatus::Ready;
                    s.status_message = "Ready".to_string();
                });
            }
            Ok(_) | Err(LocalAIError::Json(_)) => {
                info!("Model {} is not installed", self.config.required_model);
                self.update(|s| {
                    s.model = ModelStatus::NotInstalled;
                    s.status_message = "Model not installed".to_string();
                });
            }
            Err(e) => {
                warn!("Model check failed: {}", e);
                self.update(|s| {
                    s.model = ModelStatus::Failed(format!("Failed to check models: {}", e));
                    s.status_message = "Model check failed".to_string();
                });
            }
        }
    }

    /// Download the required model, tracking progress from the stream.
    pub async fn pull_model(&mut self) {
        if self.state.borrow().lifecycle != ServerStatus::Running {
            self.update(|s| {
                s.model = ModelStatus::Failed("Ollama server is not running".to_string());
            });
            return;
        }

        info!("Pulling model {}", self.config.required_model);
        self.update(|s| {
            s.model = ModelStatus::Downloading;
            s.download_progress = 0.0;
            s.status_message = "Starting download...".to_string();
        });

        match self.stream_pull().await {
            Ok(()) => {
                info!("Model {} downloaded", self.config.required_model);
                self.update(|s| {
                    s.model = ModelStatus::Ready;
                    s.download_progress = 1.0;
                    s.status_message = "Ready".to_string();
                });
            }
            Err(e) => {
                let reason = match e {
                    LocalAIError::Api(message) => message,
                    LocalAIError::Status(_) => "Download request failed".to_string(),
                    other => format!("Failed to download: {}", other),
                };
                warn!("Model download failed: {}", reason);
                self.update(|s| s.model = ModelStatus::Failed(reason));
            }
        }
    }

    async fn stream_pull(&self) -> Result<(), LocalAIError> {
        let request = PullRequest {
            name: &self.config.required_model,
            stream: true,
        };
        let mut lines = self.client.post_ndjson("/api/pull", &request).await?;
        let mut tracker = PullTracker::default();

        while let Some(line) = lines.next_line().await {
            let Some(progress) = parse_line::<PullProgress>(&line?) else {
                continue;
            };

            let message = tracker.observe(&progress);
            let fraction = tracker.progress();
            self.update(|s| {
                s.download_progress = fraction;
                if let Some(message) = message {
                    s.status_message = message;
                }
            });

            if let Some(error) = progress.error {
                return Err(LocalAIError::Api(error));
            }
        }

        Ok(())
    }

    /// Check for the model and pull it only if it is missing.
    ///
    /// Returns whether the model ended up ready.
    pub async fn ensure_model(&mut self) -> bool {
        if !matches!(self.state.borrow().model, ModelStatus::Ready) {
            self.check_model_presence().await;
        }
        if self.state.borrow().model == ModelStatus::NotInstalled {
            self.pull_model().await;
        }
        self.state.borrow().model == ModelStatus::Ready
    }

    fn fail_server(&self, reason: String) {
        self.update(|s| {
            s.status_message = reason.clone();
            s.lifecycle = ServerStatus::Failed(reason);
        });
    }

    fn update(&self, apply: impl FnOnce(&mut ProcessState)) {
        self.state.send_modify(apply);
    }
}

impl Drop for OllamaSupervisor {
    fn drop(&mut self) {
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// SIGTERM, then force kill if the child outlives `grace`.
async fn terminate(mut child: Child, grace: std::time::Duration) {
    info!("Stopping Ollama (PID: {:?})", child.id());

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("Ollama exited with status: {:?}", status),
        Ok(Err(e)) => {
            warn!("Error waiting for Ollama: {}", e);
            let _ = child.kill().await;
        }
        Err(_) => {
            warn!("Ollama didn't exit gracefully, killing...");
            let _ = child.kill().await;
        }
    }
}

/// Keep the most recent stderr output, bounded.
async fn capture_stderr(stderr: ChildStderr, sink: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "ollama", "{}", line);
        let Ok(mut buf) = sink.lock() else { return };
        buf.push_str(&line);
        buf.push('\n');
        if buf.len() > DIAGNOSTIC_CAPACITY {
            let mut cut = buf.len() - DIAGNOSTIC_CAPACITY;
            while !buf.is_char_boundary(cut) {
                cut += 1;
            }
            buf.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockOllama, MockRoute};
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn tags(names: &[&str]) -> MockRoute {
        let models: Vec<_> = names.iter().map(|n| json!({ "name": n })).collect();
        MockRoute::json(200, json!({ "models": models }))
    }

    fn config_for(port: u16, data_dir: &std::path::Path) -> SupervisorConfig {
        SupervisorConfig::builder()
            .port(port)
            .data_dir(data_dir)
            .binary(data_dir.join("missing-ollama"))
            .poll_interval(Duration::from_millis(20))
            .max_attempts(5)
            .probe_timeout(Duration::from_millis(100))
            .build()
    }

    /// A port with nothing listening on it.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn running(server: &MockOllama, data_dir: &std::path::Path) -> OllamaSupervisor {
        let mut supervisor = OllamaSupervisor::new(config_for(server.port(), data_dir));
        supervisor.start().await;
        assert_eq!(supervisor.state().lifecycle, ServerStatus::Running);
        supervisor
    }

    #[test]
    fn test_child_environment_is_allow_list() {
        let dir = tempdir().unwrap();
        let supervisor = OllamaSupervisor::new(config_for(11435, dir.path()));
        let env = supervisor.child_environment();

        let names: Vec<_> = env.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["OLLAMA_HOST", "OLLAMA_MODELS", "HOME", "PATH"]);
        assert_eq!(env[0].1, "127.0.0.1:11435");
        assert!(env[1].1.ends_with("models"));
    }

    #[tokio::test]
    async fn test_start_reuses_running_server() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&["gpt-oss:20b"]))
            .start()
            .await;

        let supervisor = running(&server, dir.path()).await;

        // Binary does not exist, so reaching Running proves nothing was spawned.
        assert_eq!(supervisor.state().model, ModelStatus::Ready);
        assert!(supervisor.is_first_launch());
    }

    #[tokio::test]
    async fn test_model_not_installed_without_prefix() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&["llama3:8b"]))
            .start()
            .await;

        let supervisor = running(&server, dir.path()).await;
        assert_eq!(supervisor.state().model, ModelStatus::NotInstalled);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_without_polling() {
        let dir = tempdir().unwrap();
        let port = closed_port().await;
        let mut supervisor = OllamaSupervisor::new(
            SupervisorConfig::builder()
                .port(port)
                .data_dir(dir.path())
                .binary(dir.path().join("missing-ollama"))
                .poll_interval(Duration::from_secs(5))
                .build(),
        );

        let started = Instant::now();
        supervisor.start().await;

        assert!(matches!(supervisor.state().lifecycle, ServerStatus::Failed(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        // Directories are created before the spawn attempt.
        assert!(!supervisor.is_first_launch());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exit_fails_with_bounded_diagnostic() {
        let dir = tempdir().unwrap();
        let port = closed_port().await;
        // `sh serve` fails because there is no script named "serve".
        let mut supervisor = OllamaSupervisor::new(
            SupervisorConfig::builder()
                .port(port)
                .data_dir(dir.path())
                .binary("/bin/sh")
                .poll_interval(Duration::from_millis(50))
                .max_attempts(20)
                .probe_timeout(Duration::from_millis(50))
                .diagnostic_limit(10)
                .build(),
        );

        supervisor.start().await;

        match supervisor.state().lifecycle {
            ServerStatus::Failed(reason) => {
                let diagnostic = reason.rsplit(": ").next().unwrap_or_default();
                assert!(diagnostic.chars().count() <= 10);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unresponsive_child_times_out_with_bounded_diagnostic() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let port = closed_port().await;
        let script = dir.path().join("fake-ollama");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'Error: listen tcp: bind: address already in use' >&2\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut supervisor = OllamaSupervisor::new(
            SupervisorConfig::builder()
                .port(port)
                .data_dir(dir.path())
                .binary(script.clone())
                .poll_interval(Duration::from_millis(50))
                .max_attempts(5)
                .probe_timeout(Duration::from_millis(50))
                .diagnostic_limit(20)
                .build(),
        );

        supervisor.start().await;

        match supervisor.state().lifecycle {
            ServerStatus::Failed(reason) => {
                let diagnostic = reason
                    .strip_prefix("Ollama server failed to start: ")
                    .expect("start timeout reason");
                assert!(diagnostic.chars().count() <= 20);
                assert!("Error: listen tcp: bind: address already in use".ends_with(diagnostic));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        supervisor.stop().await;
        assert_eq!(supervisor.state().lifecycle, ServerStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&["gpt-oss:20b"]))
            .start()
            .await;

        let mut supervisor = running(&server, dir.path()).await;
        supervisor.stop().await;
        assert_eq!(supervisor.state().lifecycle, ServerStatus::NotStarted);
        supervisor.stop().await;
        assert_eq!(supervisor.state().lifecycle, ServerStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_model_check_transport_error_fails() {
        let dir = tempdir().unwrap();
        let port = closed_port().await;
        let mut supervisor = OllamaSupervisor::new(config_for(port, dir.path()));

        supervisor.check_model_presence().await;
        assert!(matches!(supervisor.state().model, ModelStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_pull_tracks_progress_and_completes() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&[]))
            .route(
                "POST",
                "/api/pull",
                MockRoute::ndjson([
                    r#"{"status":"pulling manifest"}"#,
                    r#"{"status":"pulling","total":1000}"#,
                    r#"{"status":"pulling","completed":500}"#,
                    "garbage",
                    r#"{"status":"verifying sha256 digest"}"#,
                    r#"{"status":"success"}"#,
                ]),
            )
            .start()
            .await;

        let mut supervisor = running(&server, dir.path()).await;
        let mut updates = supervisor.subscribe();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while updates.changed().await.is_ok() {
                seen.push(updates.borrow().download_progress);
            }
            seen
        });

        supervisor.pull_model().await;

        let state = supervisor.state();
        assert_eq!(state.model, ModelStatus::Ready);
        assert_eq!(state.download_progress, 1.0);

        drop(supervisor);
        let seen = observer.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));

        let pulls: Vec<_> = server
            .requests()
            .into_iter()
            .filter(|r| r.path == "/api/pull")
            .collect();
        let body: serde_json::Value = serde_json::from_str(&pulls[0].body).unwrap();
        assert_eq!(body, json!({"name": "gpt-oss:20b", "stream": true}));
    }

    #[tokio::test]
    async fn test_pull_progress_holds_after_status_only_line() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&[]))
            .route(
                "POST",
                "/api/pull",
                MockRoute::ndjson([
                    r#"{"total":1000}"#,
                    r#"{"completed":500}"#,
                    r#"{"status":"still working"}"#,
                    r#"{"error":"disk full"}"#,
                ]),
            )
            .start()
            .await;

        let mut supervisor = running(&server, dir.path()).await;
        supervisor.pull_model().await;

        let state = supervisor.state();
        assert_eq!(state.download_progress, 0.5);
        assert_eq!(state.model, ModelStatus::Failed("disk full".to_string()));
    }

    #[tokio::test]
    async fn test_pull_error_line_is_terminal() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&[]))
            .route(
                "POST",
                "/api/pull",
                MockRoute::ndjson([r#"{"error":"boom"}"#, r#"{"status":"success"}"#]),
            )
            .start()
            .await;

        let mut supervisor = running(&server, dir.path()).await;
        supervisor.pull_model().await;
        assert_eq!(
            supervisor.state().model,
            ModelStatus::Failed("boom".to_string())
        );
    }

    #[tokio::test]
    async fn test_pull_non_200_fails() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&[]))
            .route("POST", "/api/pull", MockRoute::status(500))
            .start()
            .await;

        let mut supervisor = running(&server, dir.path()).await;
        supervisor.pull_model().await;
        assert_eq!(
            supervisor.state().model,
            ModelStatus::Failed("Download request failed".to_string())
        );
    }

    #[tokio::test]
    async fn test_pull_requires_running_server() {
        let dir = tempdir().unwrap();
        let mut supervisor = OllamaSupervisor::new(config_for(closed_port().await, dir.path()));

        supervisor.pull_model().await;

        let state = supervisor.state();
        assert_eq!(state.lifecycle, ServerStatus::NotStarted);
        assert!(matches!(state.model, ModelStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_ensure_model_pulls_when_missing() {
        let dir = tempdir().unwrap();
        let server = MockOllama::builder()
            .route("GET", "/api/tags", tags(&[]))
            .route(
                "POST",
                "/api/pull",
                MockRoute::ndjson([r#"{"status":"success"}"#]),
            )
            .start()
            .await;

        let mut supervisor = running(&server, dir.path()).await;
        assert!(supervisor.ensure_model().await);
        assert!(supervisor.state().is_ready());
    }
}
