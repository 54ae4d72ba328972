use std::env;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::error::RunError;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const XAI_BASE_URL: &str = "https://api.x.ai/v1";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Openrouter,
    Openai,
    Xai,
}

struct ProviderEntry {
    provider: Provider,
    id: &'static str,
    base_url: Option<&'static str>,
    key_env_var: &'static str,
}

// `None` means the provider's own default endpoint.
static PROVIDERS: [ProviderEntry; 3] = [
    ProviderEntry {
        provider: Provider::Openrouter,
        id: "openrouter",
        base_url: Some(OPENROUTER_BASE_URL),
        key_env_var: "OPENROUTER_API_KEY",
    },
    ProviderEntry {
        provider: Provider::Openai,
        id: "openai",
        base_url: None,
        key_env_var: "OPENAI_API_KEY",
    },
    ProviderEntry {
        provider: Provider::Xai,
        id: "xai",
        base_url: Some(XAI_BASE_URL),
        key_env_var: "XAI_API_KEY",
    },
];

impl Provider {
    fn entry(&self) -> &'static ProviderEntry {
        match self {
            Self::Openrouter => &PROVIDERS[0],
            Self::Openai => &PROVIDERS[1],
            Self::Xai => &PROVIDERS[2],
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.entry().id
    }

    pub fn base_url(&self) -> Option<&'static str> {
        self.entry().base_url
    }

    pub fn key_env_var(&self) -> &'static str {
        self.entry().key_env_var
    }
}

impl FromStr for Provider {
    type Err = RunError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        PROVIDERS
            .iter()
            .find(|entry| entry.id == raw)
            .map(|entry| entry.provider)
            .ok_or_else(|| RunError::UnknownProvider(raw.to_string()))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// API token for one provider. `Debug` is redacted so the value never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub base_url: Option<String>,
    pub credential: Credential,
}

pub fn resolve_credential(
    provider: Provider,
    explicit_key: Option<&str>,
    mut get_var: impl FnMut(&str) -> Option<String>,
) -> Result<Credential, RunError> {
    let env_var = provider.key_env_var();
    explicit_key
        .map(str::to_string)
        .filter(|key| !key.trim().is_empty())
        .or_else(|| get_var(env_var).filter(|key| !key.trim().is_empty()))
        .map(Credential)
        .ok_or(RunError::MissingCredential { provider, env_var })
}

pub fn build_client_config(
    provider_id: &str,
    credential: Credential,
) -> Result<ProviderConfig, RunError> {
    let provider: Provider = provider_id.parse()?;
    Ok(ProviderConfig {
        provider,
        base_url: provider.base_url().map(str::to_string),
        credential,
    })
}

/// Process-wide settings that are not part of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub timeout_secs: Option<u64>,
    pub openai_base_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    pub fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        Self {
            timeout_secs: parse_timeout_secs(get_var("MODEL_TIMEOUT_SECS").as_deref()),
            openai_base_url: parse_base_url(get_var("OPENAI_BASE_URL").as_deref())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        }
    }

    /// Endpoint for `cfg`, falling back to the provider default when the table has none.
    pub fn endpoint_for(&self, cfg: &ProviderConfig) -> String {
        cfg.base_url
            .clone()
            .unwrap_or_else(|| self.openai_base_url.clone())
    }
}

fn parse_timeout_secs(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn parse_base_url(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.trim_end_matches('/').to_string())
}
