use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::llm::{LanguageModel, TokenStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest silence tolerated between two lines of a streamed answer.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Streamed lines buffered ahead of the consumer.
const STREAM_BUFFER: usize = 256;

/// Chat model client for Ollama or an OpenAI-compatible endpoint.
///
/// Prompts are sent as a single user message; the pipeline builds the whole
/// instruction text itself.
///
/// The client itself only bounds connecting. Blocking completions get
/// `timeout_secs` for the whole exchange; streams get an idle timeout
/// between lines instead, so a long generation is never cut off.
pub struct HttpChatModel {
    client: reqwest::blocking::Client,
    config: LlmConfig,
}

impl HttpChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .context("Failed to build chat HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn request_timeout(config: &LlmConfig) -> Duration {
        Duration::from_secs(config.timeout_secs)
    }

    fn user_message(prompt: &str) -> Vec<Message> {
        vec![Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }]
    }
}

impl LanguageModel for HttpChatModel {
    fn complete(&self, prompt: &str) -> Result<String> {
        match self.config.provider.as_str() {
            "ollama" => call_ollama(&self.client, &self.config, prompt),
            "openai" => call_openai(&self.client, &self.config, prompt),
            other => anyhow::bail!("Unknown LLM provider: {other}"),
        }
    }

    fn stream(&self, prompt: &str) -> Result<TokenStream> {
        match self.config.provider.as_str() {
            "ollama" => stream_ollama(&self.client, &self.config, prompt),
            "openai" => stream_openai(&self.client, &self.config, prompt),
            other => anyhow::bail!("Unsupported LLM provider for chat: {other}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: Message,
    done: bool,
}

fn call_ollama(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages: HttpChatModel::user_message(prompt),
        stream: false,
    };

    let resp = client
        .post(&url)
        .timeout(HttpChatModel::request_timeout(config))
        .json(&req)
        .send()
        .context("Failed to call Ollama chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let body: OllamaChatResponse = resp.json().context("Failed to parse Ollama chat response")?;
    Ok(body.message.content)
}

fn stream_ollama(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<TokenStream> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaChatRequest {
        model: config.chat_model.clone(),
        messages: HttpChatModel::user_message(prompt),
        stream: true,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .context("Failed to connect to Ollama for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let tokens = lines_with_idle_timeout(resp, STREAM_IDLE_TIMEOUT)?
        .filter_map(|line| match line {
            Ok(line) => parse_ollama_line(&line),
            Err(e) => Some(Err(anyhow::anyhow!("Stream read error: {e}"))),
        });

    Ok(Box::new(tokens))
}

/// Read `body` line by line on a helper thread. The iterator ends with a
/// `TimedOut` error when no line arrives within `idle`.
fn lines_with_idle_timeout<R>(
    body: R,
    idle: Duration,
) -> Result<impl Iterator<Item = std::io::Result<String>> + Send>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(STREAM_BUFFER);
    std::thread::Builder::new()
        .name("chat-stream".into())
        .spawn(move || {
            for line in BufReader::new(body).lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stream reader")?;

    let mut timed_out = false;
    Ok(std::iter::from_fn(move || {
        if timed_out {
            return None;
        }
        match rx.recv_timeout(idle) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                Some(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no data for {}s", idle.as_secs()),
                )))
            }
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }))
}

/// Parse a single Ollama streaming line. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for parse errors
/// - None to skip (empty content or done signal)
fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaStreamChunk>(line) {
        Ok(chunk) => {
            if chunk.done {
                return None;
            }
            let content = chunk.message.content;
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse Ollama chunk: {e}"))),
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

fn openai_request(config: &LlmConfig, prompt: &str, stream: bool) -> OpenAiChatRequest {
    OpenAiChatRequest {
        model: config.chat_model.clone(),
        messages: HttpChatModel::user_message(prompt),
        temperature: 0.0,
        stream,
    }
}

fn call_openai(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/v1/chat/completions", config.base_url);
    let api_key = config.api_key.as_deref().unwrap_or_default();

    let resp = client
        .post(&url)
        .timeout(HttpChatModel::request_timeout(config))
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&openai_request(config, prompt, false))
        .send()
        .context("Failed to call OpenAI chat API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let body: OpenAiChatResponse = resp.json().context("Failed to parse OpenAI chat response")?;
    Ok(body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

fn stream_openai(
    client: &reqwest::blocking::Client,
    config: &LlmConfig,
    prompt: &str,
) -> Result<TokenStream> {
    let url = format!("{}/v1/chat/completions", config.base_url);

    let resp = client
        .post(&url)
        .header(
            "Authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or("")),
        )
        .json(&openai_request(config, prompt, true))
        .send()
        .context("Failed to connect to OpenAI for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let tokens = lines_with_idle_timeout(resp, STREAM_IDLE_TIMEOUT)?
        .filter_map(|line| match line {
            Ok(line) => parse_openai_line(&line),
            Err(e) => Some(Err(anyhow::anyhow!("Stream read error: {e}"))),
        });

    Ok(Box::new(tokens))
}

/// Parse a single OpenAI SSE line. Returns:
/// - Some(Ok(content)) for content deltas
/// - Some(Err(e)) for parse errors
/// - None to skip (empty lines, [DONE], role-only chunks)
fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let data = if let Some(d) = line.strip_prefix("data: ") {
        d.trim()
    } else {
        return None;
    };

    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse OpenAI chunk: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Ollama parsing ──────────────────────────────────

    #[test]
    fn test_parse_ollama_chunk() {
        let line = r#"{"message":{"role":"assistant","content":"Згідно з"},"done":false}"#;
        let result = parse_ollama_line(line);
        assert_eq!(result.unwrap().unwrap(), "Згідно з");
    }

    #[test]
    fn test_parse_ollama_done() {
        let line = r#"{"message":{"role":"assistant","content":""},"done":true}"#;
        assert!(parse_ollama_line(line).is_none());
    }

    #[test]
    fn test_parse_ollama_malformed() {
        let result = parse_ollama_line("not valid json{{{");
        assert!(result.unwrap().is_err());
    }

    // ─── OpenAI parsing ──────────────────────────────────

    #[test]
    fn test_parse_openai_data_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Положення"}}]}"#;
        assert_eq!(parse_openai_line(line).unwrap().unwrap(), "Положення");
    }

    #[test]
    fn test_parse_openai_done() {
        assert!(parse_openai_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_openai_role_only_chunk() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_openai_line(line).is_none());
    }

    #[test]
    fn test_parse_openai_malformed() {
        let result = parse_openai_line("data: {broken json");
        assert!(result.unwrap().is_err());
    }

    // ─── Streaming reads ─────────────────────────────────

    /// Yields its chunks with a pause before each, then EOF.
    struct SlowBody {
        chunks: Vec<&'static [u8]>,
        pause: Duration,
    }

    impl Read for SlowBody {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            std::thread::sleep(self.pause);
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_stream_outlives_request_timeout_while_lines_keep_coming() {
        let body = SlowBody {
            chunks: vec![&b"one\n"[..], &b"two\n"[..], &b"three\n"[..]],
            pause: Duration::from_millis(40),
        };
        // Total time exceeds the idle limit; every gap stays below it.
        let lines: Vec<String> = lines_with_idle_timeout(body, Duration::from_millis(100))
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines, ["one", "two", "three"]);
    }

    #[test]
    fn test_stream_stalled_past_idle_timeout_errors_once() {
        let body = SlowBody {
            chunks: vec![&b"first\n"[..], &b"late\n"[..]],
            pause: Duration::from_millis(300),
        };
        let mut lines = lines_with_idle_timeout(body, Duration::from_millis(50)).unwrap();
        let err = lines.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_completion_timeout_comes_from_config() {
        let model = HttpChatModel::new(&LlmConfig::default()).unwrap();
        assert_eq!(HttpChatModel::request_timeout(&model.config), Duration::from_secs(300));
    }

    // ─── Edge cases ──────────────────────────────────────

    #[test]
    fn test_parse_whitespace_line() {
        assert!(parse_ollama_line("   ").is_none());
        assert!(parse_openai_line("   ").is_none());
    }

    #[test]
    fn test_parse_openai_non_data_line() {
        assert!(parse_openai_line("event: message").is_none());
    }

    #[test]
    fn test_openai_request_shape() {
        let req = openai_request(&LlmConfig::default(), "Питання", true);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Питання");
        assert_eq!(json["stream"], true);
    }
}
