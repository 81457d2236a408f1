//! Repodata downloading from HTTP channels.

use std::time::Duration;

use corral_util::errors::CorralError;
use reqwest::Client;

use crate::auth::{self, ChannelAuth};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// `corral/<version>`, sent with every request.
pub fn user_agent() -> String {
    format!("corral/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a shared reqwest client for channel downloads.
pub fn build_client() -> miette::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(user_agent())
        .build()
        .map_err(|e| {
            CorralError::Network {
                message: format!("Failed to create HTTP client: {e}"),
            }
            .into()
        })
}

/// Download raw bytes from a URL, with authentication and retries.
///
/// Returns `Ok(None)` for 404 (the channel does not publish this subdir).
/// Server errors, timeouts and connection failures are retried.
pub async fn download_bytes(
    client: &Client,
    auth: &ChannelAuth,
    url: &str,
) -> miette::Result<Option<Vec<u8>>> {
    let mut last_err = String::new();

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            tracing::debug!(url = %url, attempt, "retrying download");
            tokio::time::sleep(RETRY_DELAY * attempt).await;
        }

        let request = auth::apply_auth(client.get(url), auth);

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if status.is_server_error() {
                    last_err = format!("HTTP {status} from {url}");
                    continue;
                }
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                {
                    return Err(CorralError::Network {
                        message: format!(
                            "HTTP {status} fetching {url}; check [credentials] in config.toml"
                        ),
                    }
                    .into());
                }
                if !status.is_success() {
                    return Err(CorralError::Network {
                        message: format!("HTTP {status} fetching {url}"),
                    }
                    .into());
                }

                let bytes = resp.bytes().await.map_err(|e| CorralError::Network {
                    message: format!("Failed to read response from {url}: {e}"),
                })?;
                return Ok(Some(bytes.to_vec()));
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                last_err = format!("{e}");
                continue;
            }
            Err(e) => {
                return Err(CorralError::Network {
                    message: format!("Request to {url} failed: {e}"),
                }
                .into());
            }
        }
    }

    Err(CorralError::Network {
        message: format!("Failed after {MAX_RETRIES} retries for {url}: {last_err}"),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_the_tool() {
        assert!(user_agent().starts_with("corral/"));
    }

    #[test]
    fn client_builds() {
        assert!(build_client().is_ok());
    }
}
