//! Channel authentication using credentials from the global config.
//!
//! Credentials live under `[credentials.<channel>]` in `config.toml`, keyed
//! by channel name or base URL:
//!
//! ```toml
//! [credentials.private]
//! username = "alice"
//! password = "s3cret"
//!
//! [credentials."https://repo.example.com/internal"]
//! token = "abc123"
//! ```

use corral_core::config::CredentialEntry;
use reqwest::RequestBuilder;

/// Resolved credentials for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl ChannelAuth {
    pub fn from_entry(entry: &CredentialEntry) -> Self {
        Self {
            username: entry.username.clone(),
            password: entry.password.clone(),
            token: entry.token.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.token.is_none()
    }
}

/// Apply authentication to a request. A token wins over basic credentials.
pub fn apply_auth(request: RequestBuilder, auth: &ChannelAuth) -> RequestBuilder {
    if let Some(token) = &auth.token {
        return request.bearer_auth(token);
    }
    match (&auth.username, &auth.password) {
        (Some(user), Some(pass)) => request.basic_auth(user, Some(pass)),
        (Some(user), None) => request.basic_auth(user, None::<&str>),
        (None, Some(token)) => request.bearer_auth(token),
        (None, None) => request,
    }
}
