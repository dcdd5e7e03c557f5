use super::sse::{SseDecoder, SseLine};
use super::{ChatMessage, ChatRequest, ChatResponse, EventSource, Provider, ProviderConfig, ProviderError, StreamEvent};
use futures_core::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Client for any endpoint speaking the OpenAI chat-completions dialect
/// (OpenAI, Ollama, OpenRouter, Groq, self-hosted gateways).
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    http: reqwest::Client,
    config: ProviderConfig,
    endpoint: String,
    headers: HeaderMap,
}

impl OpenAiCompatible {
    /// Validates the config up front so a bad header never reaches the network.
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Result<Self, ProviderError> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderError::configuration(&config.name, "base_url is required"));
        }
        if config.model.trim().is_empty() {
            return Err(ProviderError::configuration(&config.name, "model is required"));
        }

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let headers = build_headers(&config)?;

        Ok(Self {
            http,
            config,
            endpoint,
            headers,
        })
    }

    fn payload<'a>(&'a self, req: &'a ChatRequest, stream: bool) -> WireRequest<'a> {
        let model = if req.model.is_empty() {
            self.config.model.as_str()
        } else {
            req.model.as_str()
        };
        WireRequest {
            model,
            messages: &req.messages,
            stream,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        }
    }

    fn post(&self, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(body)
    }
}

fn build_headers(config: &ProviderConfig) -> Result<HeaderMap, ProviderError> {
    let mut h = HeaderMap::new();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(h);
    };

    let name = HeaderName::from_bytes(config.auth_header.as_bytes()).map_err(|e| {
        ProviderError::configuration(&config.name, format!("invalid auth header name: {e}"))
    })?;
    let mut value = HeaderValue::from_str(&format!("{}{}", config.auth_prefix, key)).map_err(|e| {
        ProviderError::configuration(&config.name, format!("invalid auth header value: {e}"))
    })?;
    value.set_sensitive(true);
    h.insert(name, value);
    Ok(h)
}

impl Provider for OpenAiCompatible {
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
        let body = serde_json::to_vec(&self.payload(&req, false));
        let this = self.clone();

        Box::pin(async move {
            let body = body?;
            tracing::debug!(provider = %this.config.name, endpoint = %this.endpoint, "sending completion request");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(provider = %this.config.name, "completion cancelled");
                    Ok(None)
                }
                res = this.fetch_completion(body) => match res {
                    Err(ProviderError::Transport(_)) if cancel.is_cancelled() => Ok(None),
                    other => other.map(Some),
                },
            }
        })
    }

    fn stream(&self, req: ChatRequest, cancel: CancellationToken) -> Result<EventSource, ProviderError> {
        let body = serde_json::to_vec(&self.payload(&req, true))?;
        let builder = self.post(body).header(ACCEPT, "text/event-stream");
        let provider = self.config.name.clone();

        Ok(EventSource::spawn(move |tx| async move {
            tracing::debug!(%provider, "stream reader started");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(%provider, "stream cancelled");
                }
                _ = async {
                    let terminal = match read_stream(builder, &tx).await {
                        Ok(()) => StreamEvent::Done,
                        // A read that failed because the caller gave up is not a provider fault.
                        Err(_) if cancel.is_cancelled() => return,
                        Err(e) => {
                            tracing::warn!(%provider, error = %e, "stream failed");
                            StreamEvent::Error(e)
                        }
                    };
                    let _ = tx.send(terminal).await;
                } => {}
            }

            tracing::debug!(%provider, "stream reader finished");
            // Dropping `tx` here closes the source.
        }))
    }
}

impl OpenAiCompatible {
    async fn fetch_completion(&self, body: Vec<u8>) -> Result<ChatResponse, ProviderError> {
        let resp = self.post(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::protocol(status.as_u16(), &text));
        }

        let bytes = resp.bytes().await?;
        let parsed: WireResponse = serde_json::from_slice(&bytes)?;
        let choice = parsed.choices.into_iter().next().ok_or(ProviderError::EmptyResponse)?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
        })
    }
}

/// Sends the request and forwards every text fragment into `tx`.
///
/// `Ok(())` means the stream ended normally (terminator or clean EOF) or the consumer went
/// away; the caller emits the terminal event.
async fn read_stream(
    builder: reqwest::RequestBuilder,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), ProviderError> {
    let resp = builder.send().await?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ProviderError::protocol(status.as_u16(), &text));
    }

    let mut body = std::pin::pin!(resp.bytes_stream());
    let mut decoder = SseDecoder::new();

    while let Some(item) = body.next().await {
        let bytes = item.map_err(|e| ProviderError::Transport(format!("network stream error: {e}")))?;
        for line in decoder.push(&bytes)? {
            if !forward(line, tx).await? {
                return Ok(());
            }
        }
    }

    if let Some(line) = decoder.finish()? {
        forward(line, tx).await?;
    }
    Ok(())
}

/// Returns `Ok(false)` once reading should stop.
async fn forward(line: SseLine, tx: &mpsc::Sender<StreamEvent>) -> Result<bool, ProviderError> {
    let data = match line {
        SseLine::Done => return Ok(false),
        SseLine::Data(data) => data,
    };

    let chunk: WireChunk = serde_json::from_str(&data)
        .map_err(|e| ProviderError::Decode(format!("malformed stream chunk: {e}")))?;

    for choice in chunk.choices {
        if let Some(reason) = &choice.finish_reason {
            tracing::trace!(%reason, "choice finished");
        }
        let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) else {
            continue;
        };
        if tx.send(StreamEvent::Chunk(text)).await.is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}
