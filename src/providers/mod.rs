pub(crate) mod http_errors;
pub mod openai_compat;
pub mod sse;

use anyhow::Result;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

use crate::model::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

/// One incremental unit of a streamed completion. Role-only and terminal chunks carry no delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: Option<String>,
}

impl StreamChunk {
    #[cfg(test)]
    pub(crate) fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
        }
    }
}

pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + 'a>>;
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + 'a>>;
pub type ChunkStreamFuture<'a> = Pin<Box<dyn Future<Output = Result<ChunkStream<'a>>> + 'a>>;

/// A chat-completion capability bound to one provider endpoint and credential.
pub trait ChatBackend {
    /// Blocking-style call; resolves to the first choice's message text.
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a>;

    /// Resolves once the provider accepted the request; the stream then yields
    /// chunks in delivery order and can be consumed once.
    fn stream<'a>(&'a self, request: &'a ChatRequest) -> ChunkStreamFuture<'a>;
}
