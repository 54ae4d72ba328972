use clap::Parser;

use crate::config::Provider;

/// Send one chat prompt to a hosted LLM provider and report the latency.
#[derive(Debug, Clone, Parser)]
#[command(name = "chatping")]
#[command(version)]
pub struct Cli {
    /// Provider to call; selects the endpoint and the API key variable
    #[arg(long, value_enum)]
    pub provider: Provider,

    /// Model identifier, passed through verbatim (e.g. gpt-5, x-ai/grok-4)
    #[arg(long)]
    pub model: String,

    /// User prompt text
    #[arg(long)]
    pub prompt: String,

    /// Image URL to attach after the prompt text
    #[arg(long)]
    pub image_url: Option<String>,

    /// Print tokens as they arrive
    #[arg(long)]
    pub stream: bool,

    /// API key; overrides OPENROUTER_API_KEY / OPENAI_API_KEY / XAI_API_KEY
    #[arg(long)]
    pub key: Option<String>,
}
