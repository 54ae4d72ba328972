use anyhow::anyhow;
use std::error::Error as StdError;
use std::io::ErrorKind;

fn error_chain_matches(err: &(dyn StdError + 'static), kind: ErrorKind, needle: &str) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>()
            && io_err.kind() == kind
        {
            return true;
        }

        // hyper and rustls wrap io errors in their own types, so fall back to the text.
        if source.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }

        current = source.source();
    }

    false
}

fn error_chain_has_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    error_chain_matches(err, ErrorKind::ConnectionRefused, "connection refused")
}

fn error_chain_has_timeout(err: &(dyn StdError + 'static)) -> bool {
    error_chain_matches(err, ErrorKind::TimedOut, "timed out")
}

/// Turns a transport failure into a message that says what to check.
pub(crate) fn provider_request_error(
    err: reqwest::Error,
    api_url: &str,
    timeout_secs: Option<u64>,
) -> anyhow::Error {
    if err.is_timeout() || error_chain_has_timeout(&err) {
        return match timeout_secs {
            Some(secs) => anyhow!(
                "Provider request timed out after {}s while calling '{}'. \
                 Increase MODEL_TIMEOUT_SECS or check provider responsiveness.",
                secs,
                api_url
            ),
            None => anyhow!("Provider request to '{}' timed out.", api_url),
        };
    }

    if err.is_connect() {
        if error_chain_has_connection_refused(&err) {
            return anyhow!(
                "Connection refused by provider API at '{}'. \
                 Check the endpoint (OPENAI_BASE_URL for openai) and network connectivity.",
                api_url
            );
        }

        return anyhow!(
            "Failed to connect to provider API at '{}'. Check network connectivity.",
            api_url
        );
    }

    anyhow!("Failed to call provider API at '{}': {}", api_url, err)
}
