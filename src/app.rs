use anyhow::Context;
use flux::config::Config;
use flux::provider::{ChatMessage, ChatRequest, Provider, ProviderError, Registry};
use flux::session::{Finalization, Session, TurnSettings, Update};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a run needs, resolved once at startup.
pub struct Runtime {
    pub provider: Arc<dyn Provider>,
    pub settings: TurnSettings,
}

pub fn build_http(cfg: &Config) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(cfg.request_timeout_secs()))
        .build()
        .context("failed to build HTTP client")
}

/// Resolve provider and per-turn settings from config plus command-line overrides.
pub fn build_runtime(
    registry: &Registry,
    http: &reqwest::Client,
    cfg: &Config,
    provider_override: Option<&str>,
    model_override: Option<&str>,
    system_override: Option<&str>,
) -> anyhow::Result<Runtime> {
    let name = provider_override.unwrap_or(cfg.provider_name());
    let settings = cfg.provider_settings(name);

    let provider = registry
        .build(name, &settings, http)
        .with_context(|| format!("failed to set up provider {name:?}"))?;
    tracing::info!(provider = provider.name(), model = provider.model(), "provider ready");

    let model = model_override
        .map(str::to_string)
        .or_else(|| cfg.model.clone())
        .unwrap_or_default();

    Ok(Runtime {
        provider,
        settings: TurnSettings {
            model,
            system_prompt: Some(system_override.unwrap_or(cfg.system_prompt()).to_string()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        },
    })
}

/// Stream one answer to `out`. Ctrl+C ends the turn without an error.
pub async fn run_streaming(rt: Runtime, prompt: String, out: &mut impl Write) -> anyhow::Result<()> {
    let mut session = Session::new(rt.provider, rt.settings);
    session.begin(prompt).context("failed to start streaming")?;

    let fin = loop {
        tokio::select! {
            ev = session.next_event() => match session.apply(ev) {
                Update::Appended(text) => {
                    write!(out, "{text}").ok();
                    out.flush().ok();
                }
                Update::Finished(fin) => break fin,
                Update::Stale => {}
            },
            _ = tokio::signal::ctrl_c() => {
                if let Some(fin) = session.cancel() {
                    break fin;
                }
            }
        }
    };
    session.shutdown().await;
    writeln!(out).ok();

    match fin {
        Finalization::Completed(_) => Ok(()),
        Finalization::Cancelled { .. } => {
            tracing::info!("cancelled");
            Ok(())
        }
        Finalization::Failed(e) => Err(describe(e)),
    }
}

/// Wait for the whole answer, then print it.
pub async fn run_complete(rt: Runtime, prompt: String, out: &mut impl Write) -> anyhow::Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = rt.settings.system_prompt.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let req = ChatRequest {
        model: rt.settings.model,
        messages,
        temperature: rt.settings.temperature,
        max_tokens: rt.settings.max_tokens,
        stream: false,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let guard = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let res = rt.provider.complete(req, cancel).await;
    guard.abort();

    match res {
        Ok(Some(resp)) => {
            writeln!(out, "{}", resp.content).context("failed to write response")?;
            Ok(())
        }
        Ok(None) => {
            tracing::info!("cancelled");
            Ok(())
        }
        Err(e) => Err(describe(e)),
    }
}

pub fn list_providers(registry: &Registry, cfg: &Config, out: &mut impl Write) -> anyhow::Result<()> {
    for name in registry.names() {
        writeln!(out, "{name}")?;
    }
    let extra: Vec<_> = cfg
        .providers
        .keys()
        .filter(|k| !registry.names().any(|n| n == k.as_str()))
        .collect();
    for name in extra {
        writeln!(out, "{name}\t(configured)")?;
    }
    Ok(())
}

fn describe(err: ProviderError) -> anyhow::Error {
    if err.is_retryable() {
        anyhow::Error::new(err).context("request failed (transient, try again)")
    } else {
        anyhow::Error::new(err).context("request failed")
    }
}
