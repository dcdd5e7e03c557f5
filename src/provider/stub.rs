use super::{ChatRequest, ChatResponse, EventSource, Provider, ProviderConfig, ProviderError, Role, StreamEvent};
use futures_core::future::BoxFuture;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_DELAY: Duration = Duration::from_millis(60);

/// Offline provider that echoes the last user message back word by word.
#[derive(Debug, Clone)]
pub struct StubProvider {
    config: ProviderConfig,
    delay: Duration,
}

impl StubProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            delay: DEFAULT_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn reply(&self, req: &ChatRequest) -> String {
        let prompt = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let model = if req.model.is_empty() { &self.config.model } else { &req.model };
        format!("[{model}] You said: {prompt}")
    }
}

impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn complete(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<Option<ChatResponse>, ProviderError>> {
        let content = self.reply(&req);
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            Ok(Some(ChatResponse { content }))
        })
    }

    fn stream(&self, req: ChatRequest, cancel: CancellationToken) -> Result<EventSource, ProviderError> {
        let reply = self.reply(&req);
        let delay = self.delay;

        Ok(EventSource::spawn(move |tx| async move {
            for word in reply.split_inclusive(' ') {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(StreamEvent::Chunk(word.to_string())).await.is_err() {
                    return;
                }
            }
            if !cancel.is_cancelled() {
                let _ = tx.send(StreamEvent::Done).await;
            }
        }))
    }
}
