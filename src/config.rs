use crate::provider::ProviderSettings;
use anyhow::Context;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI coding assistant.";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Prefix of environment variables that override top-level settings.
pub const ENV_PREFIX: &str = "FLUX_";

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid pattern")
});

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Provider used when `--provider` is not given.
    pub provider: Option<String>,

    /// Per-request model override.
    pub model: Option<String>,

    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,

    /// Ceiling for a whole HTTP exchange, streaming included.
    pub request_timeout_secs: Option<u64>,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Config {
    /// Read the first of `candidates` that exists (defaults if none do), then apply
    /// `FLUX_PROVIDER`, `FLUX_MODEL` and `FLUX_SYSTEM_PROMPT` from the environment.
    pub fn load(candidates: &[PathBuf]) -> anyhow::Result<Self> {
        let mut cfg = Self::default();
        for path in candidates {
            if let Some(found) = Self::load_optional(path)? {
                tracing::debug!(path = %path.display(), "loaded config");
                cfg = found;
                break;
            }
        }
        cfg.apply_overrides(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let mut cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        cfg.expand_env(|name| std::env::var(name).ok());
        Ok(Some(cfg))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    /// Settings for `name`; an unconfigured provider gets all defaults.
    pub fn provider_settings(&self, name: &str) -> ProviderSettings {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.is_empty());

        if let Some(v) = var("PROVIDER") {
            self.provider = Some(v);
        }
        if let Some(v) = var("MODEL") {
            self.model = Some(v);
        }
        if let Some(v) = var("SYSTEM_PROMPT") {
            self.system_prompt = Some(v);
        }
    }

    fn expand_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for settings in self.providers.values_mut() {
            for field in [&mut settings.api_key, &mut settings.base_url] {
                if let Some(v) = field.as_mut() {
                    *v = expand_vars(v, &lookup);
                }
            }
        }
    }
}

/// Replace `$NAME` and `${NAME}` with values from `lookup`; unknown names become empty.
fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    VAR_REF
        .replace_all(input, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "OPENAI_API_KEY" => Some("sk-123".to_string()),
            "HOST" => Some("gpu-box".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expands_both_forms() {
        assert_eq!(expand_vars("${OPENAI_API_KEY}", env), "sk-123");
        assert_eq!(expand_vars("$OPENAI_API_KEY", env), "sk-123");
        assert_eq!(expand_vars("http://$HOST:11434/v1", env), "http://gpu-box:11434/v1");
        assert_eq!(expand_vars("http://${HOST}x/v1", env), "http://gpu-boxx/v1");
    }

    #[test]
    fn unknown_and_malformed_references() {
        assert_eq!(expand_vars("${MISSING}", env), "");
        assert_eq!(expand_vars("a$", env), "a$");
        assert_eq!(expand_vars("price $5", env), "price $5");
        assert_eq!(expand_vars("${unterminated", env), "${unterminated");
        assert_eq!(expand_vars("plain", env), "plain");
    }

    #[test]
    fn environment_overrides_top_level_settings() {
        let mut cfg: Config = toml::from_str("provider = \"openai\"\nmodel = \"gpt-4o\"\n").unwrap();
        cfg.apply_overrides(|name| match name {
            "FLUX_PROVIDER" => Some("groq".to_string()),
            "FLUX_SYSTEM_PROMPT" => Some("be brief".to_string()),
            "FLUX_MODEL" => Some(String::new()),
            _ => None,
        });

        assert_eq!(cfg.provider_name(), "groq");
        assert_eq!(cfg.system_prompt(), "be brief");
        // Empty values do not override.
        assert_eq!(cfg.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn load_takes_first_existing_candidate() {
        let dir = std::env::temp_dir().join(format!("flux-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let missing = dir.join("missing.toml");
        let first = dir.join("first.toml");
        let second = dir.join("second.toml");
        std::fs::write(&first, "temperature = 0.5\n").unwrap();
        std::fs::write(&second, "temperature = 0.9\n").unwrap();

        let cfg = Config::load(&[missing.clone(), first, second]).unwrap();
        assert_eq!(cfg.temperature, Some(0.5));

        let cfg = Config::load(&[missing]).unwrap();
        assert_eq!(cfg.temperature, None);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn parses_provider_records() {
        let mut cfg: Config = toml::from_str(
            r#"
            provider = "openrouter"
            temperature = 0.2

            [providers.openrouter]
            api_key = "${OPENAI_API_KEY}"
            model = "meta-llama/llama-3-70b"

            [providers.gateway]
            base_url = "http://${HOST}/v1"
            model = "m"
            auth_header = "x-api-key"
            auth_prefix = ""
            "#,
        )
        .unwrap();
        cfg.expand_env(env);

        assert_eq!(cfg.provider_name(), "openrouter");
        assert_eq!(cfg.temperature, Some(0.2));
        assert_eq!(cfg.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.request_timeout_secs(), DEFAULT_REQUEST_TIMEOUT_SECS);

        let or = cfg.provider_settings("openrouter");
        assert_eq!(or.api_key.as_deref(), Some("sk-123"));
        assert_eq!(or.base_url, None);

        let gw = cfg.provider_settings("gateway");
        assert_eq!(gw.base_url.as_deref(), Some("http://gpu-box/v1"));
        assert_eq!(gw.auth_prefix.as_deref(), Some(""));

        assert_eq!(cfg.provider_settings("nope"), ProviderSettings::default());
    }

    #[test]
    fn missing_file_is_none() {
        let path = std::env::temp_dir().join("flux-config-that-does-not-exist.toml");
        assert!(Config::load_optional(path).unwrap().is_none());
    }

    #[test]
    fn defaults_without_file() {
        let cfg = Config::default();
        assert_eq!(cfg.provider_name(), DEFAULT_PROVIDER);
    }
}
