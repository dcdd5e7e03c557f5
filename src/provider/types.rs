use super::ProviderError;
use futures_core::future::BoxFuture;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the per-request event channel.
const EVENT_BUFFER: usize = 64;

pub const DEFAULT_AUTH_HEADER: &str = "Authorization";
pub const DEFAULT_AUTH_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Empty means "use the adapter's configured model".
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,

    /// Adapters override this per call.
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub content: String,
}

/// One item of a streaming completion.
///
/// A request yields any number of `Chunk`s followed by exactly one `Done` or `Error`,
/// unless it is cancelled, in which case the source simply closes.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(ProviderError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk(_))
    }
}

/// Resolved settings for one provider endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub auth_header: String,
    pub auth_prefix: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            auth_prefix: DEFAULT_AUTH_PREFIX.to_string(),
            model: model.into(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_header", &self.auth_header)
            .field("auth_prefix", &self.auth_prefix)
            .field("model", &self.model)
            .finish()
    }
}

/// Receiving end of one request's events.
///
/// Single producer (the reader task), single consumer (whoever holds this). The reader
/// closes the channel when it exits.
#[derive(Debug)]
pub struct EventSource {
    rx: mpsc::Receiver<StreamEvent>,
    reader: Option<JoinHandle<()>>,
}

impl EventSource {
    /// Spawn `reader` on the runtime and hand it the sending half.
    pub fn spawn<F, Fut>(reader: F) -> Self
    where
        F: FnOnce(mpsc::Sender<StreamEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(reader(tx));
        Self {
            rx,
            reader: Some(handle),
        }
    }

    /// Next event, or `None` once the reader has closed the source.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Detach the reader task so the caller can await its exit separately.
    pub fn take_reader(&mut self) -> Option<JoinHandle<()>> {
        self.reader.take()
    }
}

#[cfg(test)]
impl EventSource {
    /// Wait for the reader task to exit.
    pub async fn join(mut self) {
        if let Some(handle) = self.reader.take() {
            handle.await.expect("stream reader task panicked");
        }
    }
}

impl Stream for EventSource {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A chat-completions endpoint.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Model used when a request leaves `model` empty.
    fn model(&self) -> &str;

    /// Non-streaming completion. `Ok(None)` means `cancel` fired first.
    fn complete(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Option<ChatResponse>, ProviderError>>;

    /// Start a streaming completion and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    fn stream(&self, req: ChatRequest, cancel: CancellationToken) -> Result<EventSource, ProviderError>;
}
