use anyhow::{Context, Result, anyhow, bail};
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Credential, ProviderConfig, RuntimeConfig};
use crate::model::Message;
use crate::providers::http_errors::provider_request_error;
use crate::providers::sse::SseDecoder;
use crate::providers::{
    ChatBackend, ChatRequest, ChunkStream, ChunkStreamFuture, CompletionFuture, StreamChunk,
};

const DONE_SENTINEL: &str = "[DONE]";
const MAX_PREAMBLE_BYTES: usize = 8 * 1024;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ProviderError,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
}

enum StreamEvent {
    Chunk(StreamChunk),
    Done,
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Prefers the provider's `error.message` over the raw body when the body is the usual envelope.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => body.to_string(),
    }
}

fn parse_stream_event(data: &str) -> Result<StreamEvent> {
    if data.trim() == DONE_SENTINEL {
        return Ok(StreamEvent::Done);
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_str(data).context("Failed to parse streaming chunk")?;
    if let Some(error) = chunk.error {
        bail!("Provider reported an error mid-stream: {}", error.message);
    }

    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content);
    Ok(StreamEvent::Chunk(StreamChunk { delta }))
}

struct ChunkReader<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
    saw_event: bool,
    // Raw body kept until the first event, for reporting non-SSE replies.
    preamble: Vec<u8>,
}

/// A 2xx body that never produced an event is a plain error or a non-streaming reply.
fn eventless_body_error(preamble: &[u8]) -> anyhow::Error {
    let body = String::from_utf8_lossy(preamble);
    let body = body.trim();
    if body.is_empty() {
        return anyhow!("Provider closed the stream without sending any events");
    }
    anyhow!(
        "Provider returned a non-streaming response: {}",
        error_detail(body)
    )
}

/// Adapts a raw SSE byte stream into completion chunks, ending at `[DONE]` or end of body.
pub(crate) fn chunk_stream<'a, S, B, E>(bytes: S) -> ChunkStream<'a>
where
    S: Stream<Item = std::result::Result<B, E>> + 'a,
    B: AsRef<[u8]> + 'a,
    E: Into<anyhow::Error> + 'a,
{
    let reader = ChunkReader {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
        saw_event: false,
        preamble: Vec::new(),
    };

    Box::pin(stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(data) = reader.pending.pop_front() {
                match parse_stream_event(&data) {
                    Ok(StreamEvent::Chunk(chunk)) => return Some((Ok(chunk), reader)),
                    Ok(StreamEvent::Done) => return None,
                    Err(err) => {
                        reader.pending.clear();
                        reader.finished = true;
                        return Some((Err(err), reader));
                    }
                }
            }
            if reader.finished {
                return None;
            }

            match reader.bytes.next().await {
                Some(Ok(bytes)) => {
                    let bytes = bytes.as_ref();
                    if !reader.saw_event {
                        let room = MAX_PREAMBLE_BYTES.saturating_sub(reader.preamble.len());
                        reader
                            .preamble
                            .extend_from_slice(&bytes[..bytes.len().min(room)]);
                    }
                    let events = reader.decoder.push(bytes);
                    if !events.is_empty() {
                        reader.saw_event = true;
                        reader.preamble.clear();
                    }
                    reader.pending.extend(events);
                }
                Some(Err(err)) => {
                    reader.finished = true;
                    let err: anyhow::Error = err.into();
                    return Some((Err(err.context("Failed to read streaming response")), reader));
                }
                None => {
                    reader.finished = true;
                    reader.pending.extend(reader.decoder.finish());
                    if !reader.saw_event && reader.pending.is_empty() {
                        let err = eventless_body_error(&reader.preamble);
                        return Some((Err(err), reader));
                    }
                }
            }
        }
    }))
}

/// Client for any provider speaking the OpenAI chat-completions wire format.
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    client: Client,
    api_url: String,
    credential: Credential,
    timeout_secs: Option<u64>,
}

impl OpenAiCompatBackend {
    pub fn new(client: Client, cfg: &ProviderConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            client,
            api_url: completions_url(&runtime.endpoint_for(cfg)),
            credential: cfg.credential.clone(),
            timeout_secs: runtime.timeout_secs,
        }
    }

    pub fn connect(cfg: &ProviderConfig, runtime: &RuntimeConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = runtime.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .context("Failed to initialize HTTP client")?;
        Ok(Self::new(client, cfg, runtime))
    }

    #[cfg(test)]
    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<Response> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            stream,
        };
        debug!(
            api_url = %self.api_url,
            model = %request.model,
            message_count = request.messages.len(),
            stream,
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    api_url = %self.api_url,
                    model = %request.model,
                    error = %err,
                    "chat completion request failed"
                );
                provider_request_error(err, &self.api_url, self.timeout_secs)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let response_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            warn!(
                api_url = %self.api_url,
                model = %request.model,
                status = %status,
                response_body_len = response_body.len(),
                "provider returned non-success status"
            );
            return Err(anyhow!(
                "Provider returned status {}: {}",
                status,
                error_detail(&response_body)
            ));
        }

        Ok(response)
    }
}

impl ChatBackend for OpenAiCompatBackend {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        Box::pin(async move {
            let response = self.send(request, false).await?;
            let parsed: ChatCompletionResponse = response
                .json()
                .await
                .context("Failed to parse chat completion response")?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("Provider response contained no choices"))?;
            let content = choice.message.content.unwrap_or_default();
            debug!(
                model = %request.model,
                response_len = content.len(),
                "received chat completion response"
            );
            Ok(content)
        })
    }

    fn stream<'a>(&'a self, request: &'a ChatRequest) -> ChunkStreamFuture<'a> {
        Box::pin(async move {
            let response = self.send(request, true).await?;
            debug!(model = %request.model, "streaming chat completion response");
            Ok(chunk_stream(response.bytes_stream()))
        })
    }
}
