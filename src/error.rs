use std::error::Error;
use std::fmt;
use std::io;

use crate::config::Provider;

pub const EXIT_PROVIDER_FAILURE: u8 = 1;
pub const EXIT_MISSING_CREDENTIAL: u8 = 2;
pub const EXIT_UNKNOWN_PROVIDER: u8 = 3;
pub const EXIT_USAGE: u8 = 64;

/// Every way a single chatping invocation can fail. None of them is recovered locally.
#[derive(Debug)]
pub enum RunError {
    MissingCredential {
        provider: Provider,
        env_var: &'static str,
    },
    UnknownProvider(String),
    EmptyPrompt,
    ProviderRequestFailed(anyhow::Error),
    Output(io::Error),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingCredential { .. } => EXIT_MISSING_CREDENTIAL,
            Self::UnknownProvider(_) => EXIT_UNKNOWN_PROVIDER,
            Self::EmptyPrompt => EXIT_USAGE,
            Self::ProviderRequestFailed(_) | Self::Output(_) => EXIT_PROVIDER_FAILURE,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential { provider, env_var } => write!(
                f,
                "no API key for provider '{}': pass --key or set {}",
                provider.as_str(),
                env_var
            ),
            Self::UnknownProvider(id) => write!(
                f,
                "unknown provider '{}'. Supported providers: openrouter, openai, xai.",
                id
            ),
            Self::EmptyPrompt => write!(f, "prompt must not be empty"),
            // `{:#}` keeps the anyhow context chain on one line.
            Self::ProviderRequestFailed(err) => write!(f, "provider request failed: {:#}", err),
            Self::Output(err) => write!(f, "failed to write to stdout: {}", err),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ProviderRequestFailed(err) => Some(&**err),
            Self::Output(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        Self::Output(err)
    }
}
