//! Newline-delimited JSON framing over a streamed HTTP body.
//!
//! Ollama's streaming endpoints send one JSON object per line. Chunks from
//! the network do not respect line boundaries, so [`LineReader`] buffers raw
//! bytes and only yields complete lines.

use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::LocalAIError;

/// Boxed body stream as produced by [`crate::OllamaClient::post_ndjson`].
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, LocalAIError>>;

/// Splits a byte stream into lines.
///
/// `next_line` is cancel safe: dropping the future between chunks loses no
/// buffered data, so it can sit inside a `tokio::select!` next to a
/// cancellation branch. The idle deadline also survives a dropped future;
/// it only moves when a chunk arrives.
pub struct LineReader<S> {
    inner: S,
    buf: Vec<u8>,
    finished: bool,
    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,
}

impl<S, B, E> LineReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<LocalAIError>,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            finished: false,
            idle_timeout: None,
            idle_deadline: None,
        }
    }

    /// Fail with [`LocalAIError::StreamIdle`] if no chunk arrives in time.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Next complete line without its terminator, or `None` at end of body.
    ///
    /// A trailing line without a final newline is still returned. After a
    /// transport error the reader is exhausted.
    pub async fn next_line(&mut self) -> Option<Result<String, LocalAIError>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.finished {
                if self.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.buf);
                return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
            }

            let chunk = match self.idle_timeout {
                Some(limit) => {
                    let deadline = *self
                        .idle_deadline
                        .get_or_insert_with(|| Instant::now() + limit);
                    match tokio::time::timeout_at(deadline, self.inner.next()).await {
                        Ok(chunk) => {
                            self.idle_deadline = None;
                            chunk
                        }
                        Err(_) => {
                            self.finish();
                            return Some(Err(LocalAIError::StreamIdle(limit)));
                        }
                    }
                }
                None => self.inner.next().await,
            };

            match chunk {
                Some(Ok(bytes)) => self.buf.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    self.finish();
                    return Some(Err(e.into()));
                }
                None => self.finished = true,
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.buf.clear();
    }
}

/// Parse one NDJSON line on its own.
///
/// Blank and malformed lines yield `None`; they are never fatal to the
/// stream that carried them.
pub fn parse_line<T: DeserializeOwned>(line: &str) -> Option<T> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Skipping malformed stream line ({}): {}", e, line);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde::Deserialize;

    fn reader(chunks: Vec<&str>) -> LineReader<impl Stream<Item = Result<Vec<u8>, LocalAIError>> + Unpin> {
        let items: Vec<Result<Vec<u8>, LocalAIError>> =
            chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        LineReader::new(stream::iter(items))
    }

    async fn collect(mut reader: LineReader<impl Stream<Item = Result<Vec<u8>, LocalAIError>> + Unpin>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await {
            lines.push(line.unwrap());
        }
        lines
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let lines = collect(reader(vec!["{\"a\":", "1}\n{\"b\"", ":2}\n"])).await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let lines = collect(reader(vec!["one\r\ntwo"])).await;
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_between_chunks() {
        let text = "caf\u{e9}\n";
        let bytes = text.as_bytes();
        let items: Vec<Result<Vec<u8>, LocalAIError>> =
            vec![Ok(bytes[..4].to_vec()), Ok(bytes[4..].to_vec())];
        let lines = collect(LineReader::new(stream::iter(items))).await;
        assert_eq!(lines, vec!["caf\u{e9}"]);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let items: Vec<Result<Vec<u8>, LocalAIError>> = vec![
            Ok(b"first\npartial".to_vec()),
            Err(LocalAIError::Api("reset".to_string())),
            Ok(b"never\n".to_vec()),
        ];
        let mut reader = LineReader::new(stream::iter(items));

        assert_eq!(reader.next_line().await.unwrap().unwrap(), "first");
        assert!(reader.next_line().await.unwrap().is_err());
        assert!(reader.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let mut reader = LineReader::new(stream::pending::<Result<Vec<u8>, LocalAIError>>())
            .with_idle_timeout(Duration::from_millis(20));

        let result = reader.next_line().await.unwrap();
        assert!(matches!(result, Err(LocalAIError::StreamIdle(_))));
    }

    #[tokio::test]
    async fn test_idle_deadline_survives_dropped_reads() {
        let items: Vec<Result<Vec<u8>, LocalAIError>> = vec![Ok(b"first\n".to_vec())];
        let mut reader = LineReader::new(stream::iter(items).chain(stream::pending()))
            .with_idle_timeout(Duration::from_millis(200));
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "first");

        // Reads abandoned every 50ms, like a select! loop with a ticker.
        let started = std::time::Instant::now();
        let result = loop {
            match tokio::time::timeout(Duration::from_millis(50), reader.next_line()).await {
                Ok(result) => break result,
                Err(_) => assert!(started.elapsed() < Duration::from_secs(2)),
            }
        };

        assert!(matches!(result, Some(Err(LocalAIError::StreamIdle(_)))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(reader.next_line().await.is_none());
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        value: Option<i64>,
    }

    #[test]
    fn test_parse_line_is_tolerant() {
        assert!(parse_line::<Sample>("").is_none());
        assert!(parse_line::<Sample>("   ").is_none());
        assert!(parse_line::<Sample>("{not json").is_none());
        assert_eq!(parse_line::<Sample>("{\"value\":3}").unwrap().value, Some(3));
        // Unknown fields are ignored.
        assert_eq!(
            parse_line::<Sample>("{\"value\":1,\"extra\":true}").unwrap().value,
            Some(1)
        );
    }
}
