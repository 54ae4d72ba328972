use futures::StreamExt;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cli::Cli;
use crate::config::{ProviderConfig, build_client_config, resolve_credential};
use crate::error::RunError;
use crate::model::{MessageContent, build_messages};
use crate::output;
use crate::providers::{ChatBackend, ChatRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub text: String,
    pub latency: Duration,
}

impl RunResult {
    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// Everything needed to issue the request, resolved before any network activity.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: ProviderConfig,
    pub request: ChatRequest,
    pub streaming: bool,
}

pub fn prepare(
    cli: &Cli,
    get_var: impl FnMut(&str) -> Option<String>,
) -> Result<Invocation, RunError> {
    if cli.prompt.trim().is_empty() {
        return Err(RunError::EmptyPrompt);
    }

    let credential = resolve_credential(cli.provider, cli.key.as_deref(), get_var)?;
    let config = build_client_config(cli.provider.as_str(), credential)?;
    let messages = build_messages(&cli.prompt, cli.image_url.as_deref());

    Ok(Invocation {
        config,
        request: ChatRequest {
            model: cli.model.clone(),
            messages,
        },
        streaming: cli.stream,
    })
}

/// Issues exactly one request. Latency covers only the provider call and, when
/// streaming, the full consumption of the chunk sequence.
pub async fn execute<B, W>(
    backend: &B,
    request: &ChatRequest,
    streaming: bool,
    out: &mut W,
) -> Result<RunResult, RunError>
where
    B: ChatBackend + ?Sized,
    W: Write,
{
    let started = Instant::now();
    let text = if streaming {
        consume_stream(backend, request, out).await?
    } else {
        backend
            .complete(request)
            .await
            .map_err(RunError::ProviderRequestFailed)?
    };
    let latency = started.elapsed();

    debug!(
        latency_ms = latency.as_millis() as u64,
        response_len = text.len(),
        streaming,
        "chat request finished"
    );
    Ok(RunResult { text, latency })
}

async fn consume_stream<B, W>(
    backend: &B,
    request: &ChatRequest,
    out: &mut W,
) -> Result<String, RunError>
where
    B: ChatBackend + ?Sized,
    W: Write,
{
    let mut chunks = backend
        .stream(request)
        .await
        .map_err(RunError::ProviderRequestFailed)?;

    let mut collected = String::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(RunError::ProviderRequestFailed)?;
        let Some(delta) = chunk.delta.filter(|delta| !delta.is_empty()) else {
            continue;
        };
        collected.push_str(&delta);
        out.write_all(delta.as_bytes())?;
        out.flush()?;
    }
    writeln!(out)?;
    out.flush()?;

    Ok(collected)
}

fn carries_image(request: &ChatRequest) -> bool {
    request
        .messages
        .iter()
        .any(|message| matches!(message.content, MessageContent::Parts(_)))
}

/// The whole invocation: resolve, connect, print banner, execute, print summary.
///
/// `connect` is only called once the credential and provider are resolved, so a
/// configuration error never reaches the network.
pub async fn run_cli<B, F, W>(
    cli: &Cli,
    get_var: impl FnMut(&str) -> Option<String>,
    connect: F,
    out: &mut W,
) -> Result<RunResult, RunError>
where
    B: ChatBackend,
    F: FnOnce(&ProviderConfig) -> Result<B, RunError>,
    W: Write,
{
    let invocation = prepare(cli, get_var)?;
    let backend = connect(&invocation.config)?;

    info!(
        provider = %invocation.config.provider,
        model = %invocation.request.model,
        streaming = invocation.streaming,
        has_image = carries_image(&invocation.request),
        "dispatching chat request"
    );
    output::print_banner(out, invocation.config.provider, &invocation.request.model)?;
    let result = execute(&backend, &invocation.request, invocation.streaming, out).await?;
    output::print_summary(out, &result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use clap::Parser;
    use futures::stream;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    use super::{RunResult, carries_image, execute, prepare, run_cli};
    use crate::cli::Cli;
    use crate::config::{Provider, ProviderConfig};
    use crate::error::RunError;
    use crate::model::MessageContent;
    use crate::providers::{
        ChatBackend, ChatRequest, ChunkStream, ChunkStreamFuture, CompletionFuture, StreamChunk,
    };

    #[derive(Debug)]
    enum StubOutcome {
        Text(String),
        Chunks(Vec<Result<StreamChunk, String>>),
        Fail(String),
    }

    #[derive(Debug)]
    struct StubBackend {
        calls: RefCell<Vec<ChatRequest>>,
        outcome: StubOutcome,
        delay: Duration,
    }

    impl StubBackend {
        fn new(outcome: StubOutcome) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                outcome,
                delay: Duration::ZERO,
            }
        }

        fn text(content: &str) -> Self {
            Self::new(StubOutcome::Text(content.to_string()))
        }

        fn deltas(deltas: &[&str]) -> Self {
            Self::new(StubOutcome::Chunks(
                deltas.iter().map(|delta| Ok(StreamChunk::text(*delta))).collect(),
            ))
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl ChatBackend for StubBackend {
        fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
            self.calls.borrow_mut().push(request.clone());
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                match &self.outcome {
                    StubOutcome::Text(content) => Ok(content.clone()),
                    StubOutcome::Fail(message) => Err(anyhow!(message.clone())),
                    StubOutcome::Chunks(_) => Err(anyhow!("stub only streams")),
                }
            })
        }

        fn stream<'a>(&'a self, request: &'a ChatRequest) -> ChunkStreamFuture<'a> {
            self.calls.borrow_mut().push(request.clone());
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                match &self.outcome {
                    StubOutcome::Chunks(chunks) => {
                        let items: Vec<anyhow::Result<StreamChunk>> = chunks
                            .iter()
                            .map(|item| item.clone().map_err(|message| anyhow!(message)))
                            .collect();
                        let chunks: ChunkStream<'a> = Box::pin(stream::iter(items));
                        Ok(chunks)
                    }
                    StubOutcome::Fail(message) => Err(anyhow!(message.clone())),
                    StubOutcome::Text(_) => Err(anyhow!("stub does not stream")),
                }
            })
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["chatping"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("test args should parse")
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-5".to_string(),
            messages: crate::model::build_messages("hi", None),
        }
    }

    #[tokio::test]
    async fn streaming_accumulates_and_prints_non_empty_deltas_in_order() {
        let backend = StubBackend::deltas(&["Hel", "lo", "", " world"]);
        let mut out = Vec::new();

        let result = execute(&backend, &request(), true, &mut out).await.unwrap();

        assert_eq!(result.text, "Hello world");
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed, "Hello world\n");
        assert_eq!(printed.trim_end_matches('\n'), "Hello world");
    }

    #[tokio::test]
    async fn streaming_skips_chunks_without_delta() {
        let backend = StubBackend::new(StubOutcome::Chunks(vec![
            Ok(StreamChunk { delta: None }),
            Ok(StreamChunk::text("ok")),
            Ok(StreamChunk::default()),
        ]));
        let mut out = Vec::new();

        let result = execute(&backend, &request(), true, &mut out).await.unwrap();

        assert_eq!(result.text, "ok");
        assert_eq!(String::from_utf8(out).unwrap(), "ok\n");
    }

    #[tokio::test]
    async fn streaming_failure_abandons_partial_text() {
        let backend = StubBackend::new(StubOutcome::Chunks(vec![
            Ok(StreamChunk::text("par")),
            Err("stream dropped".to_string()),
            Ok(StreamChunk::text("tial")),
        ]));
        let mut out = Vec::new();

        let err = execute(&backend, &request(), true, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::ProviderRequestFailed(_)));
        assert!(err.to_string().contains("stream dropped"));
        assert_eq!(String::from_utf8(out).unwrap(), "par");
    }

    #[tokio::test]
    async fn non_streaming_returns_content_unmodified() {
        let backend = StubBackend::text("  spaced\nanswer  ");
        let mut out = Vec::new();

        let result = execute(&backend, &request(), false, &mut out).await.unwrap();

        assert_eq!(result.text, "  spaced\nanswer  ");
        assert!(out.is_empty(), "non-streaming path must not print");
    }

    #[tokio::test]
    async fn provider_failure_maps_to_provider_request_failed() {
        let backend = StubBackend::new(StubOutcome::Fail("401 Unauthorized".to_string()));
        let mut out = Vec::new();

        let err = execute(&backend, &request(), false, &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::ProviderRequestFailed(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn latency_covers_the_call_duration() {
        let backend = StubBackend::text("hello").with_delay(Duration::from_millis(50));
        let mut out = Vec::new();

        let result = execute(&backend, &request(), false, &mut out).await.unwrap();

        assert!(result.latency >= Duration::from_millis(50));
        assert!(result.latency_secs() >= 0.0);
    }

    #[tokio::test]
    async fn latency_excludes_time_spent_before_the_call() {
        let cli = cli(&["--provider", "openai", "--model", "gpt-5", "--prompt", "hi", "--key", "k"]);
        let setup_delay = Duration::from_millis(300);
        let call_delay = Duration::from_millis(20);
        let mut out = Vec::new();

        let result = run_cli(
            &cli,
            |_| None,
            |_: &ProviderConfig| {
                std::thread::sleep(setup_delay);
                Ok(StubBackend::text("hello").with_delay(call_delay))
            },
            &mut out,
        )
        .await
        .unwrap();

        assert!(result.latency >= call_delay);
        assert!(
            result.latency < setup_delay,
            "latency {:?} includes pre-call setup",
            result.latency
        );
    }

    #[test]
    fn prepare_builds_multimodal_request() {
        let cli = cli(&[
            "--provider",
            "xai",
            "--model",
            "grok-4",
            "--prompt",
            "what is this?",
            "--image-url",
            "https://example.com/a.png",
            "--stream",
        ]);

        let invocation = prepare(&cli, |_| Some("env-key".to_string())).unwrap();

        assert_eq!(invocation.config.provider, Provider::Xai);
        assert_eq!(invocation.config.credential.expose(), "env-key");
        assert_eq!(invocation.request.model, "grok-4");
        assert!(invocation.streaming);
        assert!(matches!(
            invocation.request.messages[0].content,
            MessageContent::Parts(ref parts) if parts.len() == 2
        ));
    }

    #[test]
    fn blank_image_url_does_not_count_as_an_image() {
        let with_blank = cli(&[
            "--provider", "openai", "--model", "gpt-5", "--prompt", "hi", "--image-url", "  ",
        ]);
        let invocation = prepare(&with_blank, |_| Some("k".to_string())).unwrap();
        assert!(!carries_image(&invocation.request));

        let with_image = cli(&[
            "--provider", "openai", "--model", "gpt-5", "--prompt", "hi", "--image-url",
            "https://example.com/a.png",
        ]);
        let invocation = prepare(&with_image, |_| Some("k".to_string())).unwrap();
        assert!(carries_image(&invocation.request));
    }

    #[test]
    fn prepare_rejects_blank_prompt() {
        let cli = cli(&["--provider", "openai", "--model", "gpt-5", "--prompt", "  "]);
        let err = prepare(&cli, |_| Some("k".to_string())).unwrap_err();
        assert!(matches!(err, RunError::EmptyPrompt));
    }

    #[tokio::test]
    async fn run_cli_prints_banner_latency_and_response() {
        let cli = cli(&["--provider", "openai", "--model", "gpt-5", "--prompt", "hi"]);
        let mut out = Vec::new();

        let result = run_cli(
            &cli,
            |key| (key == "OPENAI_API_KEY").then(|| "sk-env".to_string()),
            |cfg: &ProviderConfig| {
                assert_eq!(cfg.provider, Provider::Openai);
                assert_eq!(cfg.credential.expose(), "sk-env");
                Ok(StubBackend::text("hello"))
            },
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(result.text, "hello");
        let printed = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert!(lines[0].contains("openai") && lines[0].contains("gpt-5"));
        assert!(
            lines.iter().any(|line| line.starts_with("Latency: ") && line.contains("s  ")),
            "missing latency line: {printed}"
        );
        assert_eq!(lines.last().copied(), Some("hello"));
    }

    #[tokio::test]
    async fn run_cli_streams_between_banner_and_summary() {
        let cli = cli(&[
            "--provider",
            "openrouter",
            "--model",
            "x-ai/grok-4",
            "--prompt",
            "hi",
            "--stream",
            "--key",
            "sk-or",
        ]);
        let mut out = Vec::new();

        run_cli(
            &cli,
            |_| None,
            |_: &ProviderConfig| Ok(StubBackend::deltas(&["Hel", "lo"])),
            &mut out,
        )
        .await
        .unwrap();

        let printed = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert!(lines[0].contains("openrouter"));
        assert_eq!(lines[1], "Hello");
        assert!(lines[3].starts_with("Latency: "));
        assert_eq!(lines[4], "Hello");
    }

    #[tokio::test]
    async fn missing_credential_never_connects() {
        let cli = cli(&["--provider", "xai", "--model", "grok-4", "--prompt", "hi"]);
        let connected = Cell::new(false);
        let mut out = Vec::new();

        let err = run_cli(
            &cli,
            |_| None,
            |_: &ProviderConfig| {
                connected.set(true);
                Ok(StubBackend::text("unreachable"))
            },
            &mut out,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RunError::MissingCredential { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(!connected.get());
        assert!(out.is_empty());
    }

    #[test]
    fn latency_secs_matches_duration() {
        let result = RunResult {
            text: String::new(),
            latency: Duration::from_millis(1500),
        };
        assert!((result.latency_secs() - 1.5).abs() < f64::EPSILON);
    }
}
