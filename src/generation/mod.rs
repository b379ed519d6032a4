#[cfg(test)]
mod tests;

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::GenerationConfig;
use crate::net::{RetryPolicy, request_with_retry};
use crate::{RagError, Result};

/// Client for an OpenAI-compatible chat-completions endpoint.
///
/// `complete` returns the full answer text; `stream` returns a finite,
/// consume-once iterator over incremental text fragments. Only request
/// establishment is retried -- once a stream is open, mid-stream failures
/// surface as iterator items.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    endpoint: Url,
    model: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl GenerationClient {
    #[inline]
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            agent: crate::net::agent_with_timeout(Duration::from_secs(config.timeout_secs)),
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                backoff: Duration::from_millis(config.backoff_ms),
            },
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = crate::net::agent_with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry = RetryPolicy { attempts, backoff };
        self
    }

    /// Check that the endpoint is reachable
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self.api_url("models")?;
        debug!("Checking generation service at {}", url);

        request_with_retry(&self.retry, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| RagError::GenerationServiceUnavailable {
            attempts: e.attempts,
            message: e.message,
        })?;

        Ok(())
    }

    /// Request a completion and return the generated text unmodified
    #[inline]
    pub fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = self.api_url("chat/completions")?;
        let request_json = serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        })
        .context("Failed to serialize chat request")?;

        debug!("Requesting completion for {} messages", messages.len());

        let body = request_with_retry(&self.retry, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| RagError::GenerationServiceUnavailable {
            attempts: e.attempts,
            message: e.message,
        })?;

        let response: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse chat response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RagError::Other(anyhow!("chat response contained no choices")))
    }

    /// Request a streaming completion.
    ///
    /// The returned stream yields text fragments as the server produces them
    /// and ends at the server's `[DONE]` marker.
    #[inline]
    pub fn stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream> {
        let url = self.api_url("chat/completions")?;
        let request_json = serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        })
        .context("Failed to serialize chat request")?;

        debug!("Opening completion stream for {} messages", messages.len());

        let response = request_with_retry(&self.retry, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
        })
        .map_err(|e| RagError::GenerationServiceUnavailable {
            attempts: e.attempts,
            message: e.message,
        })?;

        Ok(CompletionStream::new(response.into_body().into_reader()))
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|_| RagError::InvalidConfiguration(format!("invalid endpoint URL: {joined}")))
    }
}

/// Incremental completion output: a finite, non-restartable sequence of text
/// fragments, consumed once.
pub struct CompletionStream {
    reader: BufReader<Box<dyn Read + Send>>,
    done: bool,
}

impl CompletionStream {
    fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader)),
            done: false,
        }
    }

    fn next_fragment(&mut self) -> Result<Option<String>> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .context("Failed to read from completion stream")?;

            if read == 0 {
                // Server closed the stream without a [DONE] marker; treat end
                // of body as end of stream.
                self.done = true;
                return Ok(None);
            }

            let Some(payload) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();

            if payload.is_empty() {
                continue;
            }
            if payload == "[DONE]" {
                self.done = true;
                return Ok(None);
            }

            let chunk: StreamChunk =
                serde_json::from_str(payload).context("Failed to parse stream chunk")?;

            let fragment = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content);

            // Role-only or empty deltas carry no text; keep reading
            match fragment {
                Some(fragment) if !fragment.is_empty() => return Ok(Some(fragment)),
                _ => {}
            }
        }
    }
}

impl Iterator for CompletionStream {
    type Item = Result<String>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_fragment() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
