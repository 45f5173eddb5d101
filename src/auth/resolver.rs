use chrono::Utc;
use reqwest::header::COOKIE;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;

use super::cookies::CookieJar;
use super::storage::AuthStateStore;
use super::types::{AuthState, Credential, CredentialSource, FreshTokenResponse};
use crate::api::endpoints;

/// Default timeout for the one-shot fresh token fetch
pub const DEFAULT_TOKEN_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the client-side placeholder token for a known user
pub fn synthesize_token(user_id: &str) -> String {
    format!("manual_{}_{}", user_id, Utc::now().timestamp_millis())
}

/// Credential resolver
/// Picks the bearer token for an outgoing request from, in order:
/// direct key, persisted auth state, cookie, synthesized placeholder, network.
/// Every call re-reads all sources; nothing is cached.
pub struct CredentialResolver {
    store: AuthStateStore,
    cookies: Arc<CookieJar>,
    client: Client,
    base_url: Url,
    token_fetch_timeout: Duration,
    synthesize_fallback: bool,
}

impl CredentialResolver {
    pub fn new(store: AuthStateStore, cookies: Arc<CookieJar>, client: Client, base_url: Url) -> Self {
        Self {
            store,
            cookies,
            client,
            base_url,
            token_fetch_timeout: DEFAULT_TOKEN_FETCH_TIMEOUT,
            synthesize_fallback: true,
        }
    }

    pub fn with_token_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.token_fetch_timeout = timeout;
        self
    }

    /// Enable or disable the `manual_<id>_<millis>` placeholder source
    pub fn with_synthesized_fallback(mut self, enabled: bool) -> Self {
        self.synthesize_fallback = enabled;
        self
    }

    pub fn store(&self) -> &AuthStateStore {
        &self.store
    }

    /// Resolve the best available credential
    ///
    /// With `force_refresh`, exactly one network fetch runs before any local
    /// source; on failure the local chain is used without a second fetch.
    /// Without it, local sources come first and the network fetch is the last resort.
    pub async fn resolve(&self, force_refresh: bool) -> Option<Credential> {
        if force_refresh {
            if let Some(credential) = self.fetch_fresh().await {
                return Some(credential);
            }
            tracing::debug!("Forced refresh yielded no token, using local sources");
            return self.resolve_local().await;
        }

        if let Some(credential) = self.resolve_local().await {
            return Some(credential);
        }

        self.fetch_fresh().await
    }

    /// Local sources only, never touches the network
    pub async fn resolve_local(&self) -> Option<Credential> {
        if let Some(token) = self.direct_token() {
            return Some(found(token, CredentialSource::DirectKey));
        }

        let state = self.read_state();
        if let Some(token) = state.token() {
            return Some(found(token.to_string(), CredentialSource::PersistedState));
        }

        if let Some(token) = self.cookies.token().await {
            return Some(found(token, CredentialSource::Cookie));
        }

        if self.synthesize_fallback {
            if let Some(user_id) = state.user_id() {
                tracing::warn!(
                    user_id = user_id,
                    "No stored token for logged-in user, synthesizing placeholder"
                );
                return Some(found(
                    synthesize_token(user_id),
                    CredentialSource::Synthesized,
                ));
            }
        }

        tracing::debug!("No local credential source yielded a token");
        None
    }

    /// One attempt at `GET /users/generate-token/:userId`
    async fn fetch_fresh(&self) -> Option<Credential> {
        let state = self.read_state();
        let Some(user_id) = state.user_id() else {
            tracing::debug!("No user id known, skipping fresh token fetch");
            return None;
        };

        let url = endpoints::fresh_token(user_id).url(&self.base_url);
        tracing::debug!(url = %url, "Fetching fresh token");

        let mut request = self.client.get(url).timeout(self.token_fetch_timeout);
        if let Some(cookie) = self.cookies.header_value().await {
            request = request.header(COOKIE, cookie);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Fresh token request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Fresh token endpoint returned an error");
            return None;
        }

        match response.json::<FreshTokenResponse>().await {
            Ok(FreshTokenResponse {
                success: true,
                token: Some(token),
            }) if !token.is_empty() => Some(found(token, CredentialSource::Network)),
            Ok(_) => {
                tracing::warn!("Fresh token response did not contain a token");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse fresh token response");
                None
            }
        }
    }

    /// Write a token to the direct key and into the persisted auth state
    pub fn persist(&self, token: &str) -> anyhow::Result<()> {
        self.store.set_direct_token(token)?;

        let mut state = self.read_state();
        state.token = Some(token.to_string());
        self.store.write(&state)?;

        tracing::debug!("Persisted credential for subsequent requests");
        Ok(())
    }

    fn direct_token(&self) -> Option<String> {
        self.store.direct_token().unwrap_or_else(|e| {
            tracing::warn!("Error reading direct token key: {:#}", e);
            None
        })
    }

    // Unreadable state counts as empty
    fn read_state(&self) -> AuthState {
        self.store.read().unwrap_or_else(|e| {
            tracing::warn!("Error reading persisted auth state: {:#}", e);
            AuthState::default()
        })
    }
}

fn found(token: String, source: CredentialSource) -> Credential {
    tracing::debug!(source = %source, "Credential resolved");
    Credential::new(token, source)
}
