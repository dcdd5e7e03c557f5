//! Name → adapter construction table.
//!
//! Every built-in vendor speaks the same wire dialect, so an entry is just defaults plus a
//! constructor. Adding a vendor is a new row, not a new type.

use super::openai::OpenAiCompatible;
use super::stub::StubProvider;
use super::{Provider, ProviderConfig, ProviderError, DEFAULT_AUTH_HEADER, DEFAULT_AUTH_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds an adapter from fully resolved settings and the shared transport.
pub type Constructor = fn(ProviderConfig, reqwest::Client) -> Result<Arc<dyn Provider>, ProviderError>;

/// Name of the generic entry used for providers the table does not know.
pub const FALLBACK: &str = "custom";

/// One provider record as written in the config file.
///
/// Unset fields fall back to the registry entry's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub auth_header: Option<String>,
    pub auth_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderEntry {
    pub base_url: Option<&'static str>,
    pub model: Option<&'static str>,
    pub constructor: Constructor,
}

impl ProviderEntry {
    /// An OpenAI-compatible endpoint with optional defaults.
    pub const fn compatible(base_url: Option<&'static str>, model: Option<&'static str>) -> Self {
        Self {
            base_url,
            model,
            constructor: openai_compatible,
        }
    }
}

fn openai_compatible(cfg: ProviderConfig, http: reqwest::Client) -> Result<Arc<dyn Provider>, ProviderError> {
    Ok(Arc::new(OpenAiCompatible::new(http, cfg)?))
}

fn stub(cfg: ProviderConfig, _http: reqwest::Client) -> Result<Arc<dyn Provider>, ProviderError> {
    Ok(Arc::new(StubProvider::new(cfg)))
}

#[derive(Debug, Clone)]
pub struct Registry {
    entries: BTreeMap<String, ProviderEntry>,
    fallback: Option<ProviderEntry>,
}

impl Registry {
    /// A registry with no entries and no fallback.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            fallback: None,
        }
    }

    /// The vendors flux knows out of the box, plus the generic fallback.
    pub fn builtin() -> Self {
        Self::empty()
            .with("openai", ProviderEntry::compatible(Some("https://api.openai.com/v1"), None))
            .with(
                "ollama",
                ProviderEntry::compatible(Some("http://localhost:11434/v1"), Some("codellama")),
            )
            .with("openrouter", ProviderEntry::compatible(Some("https://openrouter.ai/api/v1"), None))
            .with("groq", ProviderEntry::compatible(Some("https://api.groq.com/openai/v1"), None))
            .with(
                "stub",
                ProviderEntry {
                    base_url: Some("stub://local"),
                    model: Some("echo"),
                    constructor: stub,
                },
            )
            .with_fallback(ProviderEntry::compatible(None, None))
    }

    pub fn with(mut self, name: impl Into<String>, entry: ProviderEntry) -> Self {
        self.entries.insert(name.into(), entry);
        self
    }

    pub fn with_fallback(mut self, entry: ProviderEntry) -> Self {
        self.fallback = Some(entry);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .chain(self.fallback.as_ref().map(|_| FALLBACK))
    }

    /// Resolve `name` and construct its adapter. No network activity happens here.
    pub fn build(
        &self,
        name: &str,
        settings: &ProviderSettings,
        http: &reqwest::Client,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let entry = self
            .entries
            .get(name)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ProviderError::configuration(name, "no constructor registered for this provider"))?;

        let cfg = resolve(name, entry, settings)?;
        tracing::debug!(?cfg, "building provider");
        (entry.constructor)(cfg, http.clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn resolve(name: &str, entry: &ProviderEntry, settings: &ProviderSettings) -> Result<ProviderConfig, ProviderError> {
    let base_url = non_empty(&settings.base_url)
        .or(entry.base_url)
        .ok_or_else(|| ProviderError::configuration(name, "base_url is required"))?;
    let model = non_empty(&settings.model)
        .or(entry.model)
        .ok_or_else(|| ProviderError::configuration(name, "model is required"))?;

    Ok(ProviderConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        api_key: non_empty(&settings.api_key).map(str::to_string),
        auth_header: non_empty(&settings.auth_header)
            .unwrap_or(DEFAULT_AUTH_HEADER)
            .to_string(),
        // An explicitly empty prefix is meaningful (raw key headers).
        auth_prefix: settings
            .auth_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTH_PREFIX.to_string()),
        model: model.to_string(),
    })
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
