//! Loopback stand-in for the Ollama HTTP API.
//!
//! Serves canned responses per `(method, path)` and records every request.
//! Bodies are written chunk by chunk with `Connection: close` framing, so
//! streaming behaviour (delays, stalls) can be reproduced.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A request as received by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Canned response for one route.
#[derive(Debug, Clone)]
pub struct MockRoute {
    status: u16,
    chunks: Vec<String>,
    chunk_delay: Duration,
    hang: bool,
}

impl MockRoute {
    /// Status code with an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            chunks: Vec::new(),
            chunk_delay: Duration::ZERO,
            hang: false,
        }
    }

    /// Single JSON document.
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            chunks: vec![body.to_string()],
            ..Self::status(status)
        }
    }

    /// 200 with one chunk per line, each newline-terminated.
    pub fn ndjson<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: lines
                .into_iter()
                .map(|l| format!("{}\n", l.into()))
                .collect(),
            ..Self::status(200)
        }
    }

    /// Raw body chunks, written exactly as given.
    pub fn chunks<I, S>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::status(status)
        }
    }

    /// Sleep before each chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Keep the connection open after the last chunk.
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// Builder for [`MockOllama`].
#[derive(Debug, Default)]
pub struct MockOllamaBuilder {
    routes: HashMap<(String, String), MockRoute>,
}

impl MockOllamaBuilder {
    pub fn route(mut self, method: &str, path: &str, route: MockRoute) -> Self {
        self.routes
            .insert((method.to_uppercase(), path.to_string()), route);
        self
    }

    /// Bind an ephemeral loopback port and start serving.
    pub async fn start(self) -> MockOllama {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock listener");
        let addr = listener.local_addr().expect("mock listener address");
        let routes = Arc::new(self.routes);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let accept_requests = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let requests = Arc::clone(&accept_requests);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, routes, requests).await;
                });
            }
        });

        MockOllama {
            addr,
            requests,
            task,
        }
    }
}

/// Running mock server. Stops accepting when dropped.
pub struct MockOllama {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl MockOllama {
    pub fn builder() -> MockOllamaBuilder {
        MockOllamaBuilder::default()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockOllama {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    routes: Arc<HashMap<(String, String), MockRoute>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).into_owned();

    requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        body,
    });

    let route = routes
        .get(&(method, path))
        .cloned()
        .unwrap_or_else(|| MockRoute::status(404));

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n",
        route.status,
        if route.status == 200 { "OK" } else { "Mock" }
    );
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;

    for body_chunk in &route.chunks {
        if !route.chunk_delay.is_zero() {
            tokio::time::sleep(route.chunk_delay).await;
        }
        stream.write_all(body_chunk.as_bytes()).await?;
        stream.flush().await?;
    }

    if route.hang {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }

    stream.shutdown().await
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
