// Session lifecycle: login creates the auth state, logout clears it

use reqwest::header::COOKIE;
use reqwest::{Client, Url};
use std::sync::Arc;

use super::cookies::{CookieJar, TOKEN_COOKIE};
use super::resolver::synthesize_token;
use super::storage::AuthStateStore;
use super::types::{AuthState, UserRecord};
use crate::api::endpoints;
use crate::error::{RequestError, Result};
use crate::models::{Envelope, LoginRequest};

/// Login/logout against the server, keeping the persisted auth state in step
pub struct SessionManager {
    client: Client,
    base_url: Url,
    store: AuthStateStore,
    cookies: Arc<CookieJar>,
    synthesize_fallback: bool,
}

impl SessionManager {
    pub fn new(client: Client, base_url: Url, store: AuthStateStore, cookies: Arc<CookieJar>) -> Self {
        Self {
            client,
            base_url,
            store,
            cookies,
            synthesize_fallback: true,
        }
    }

    pub fn with_synthesized_fallback(mut self, enabled: bool) -> Self {
        self.synthesize_fallback = enabled;
        self
    }

    /// Log in and persist the resulting auth state
    ///
    /// The credential is the `token` cookie set by the server; without one a
    /// `manual_<id>_<millis>` placeholder is stored instead (if enabled).
    pub async fn login(&self, request: &LoginRequest) -> Result<Envelope> {
        let url = endpoints::login().url(&self.base_url);
        tracing::info!(email = %request.email, role = %request.role, "Logging in");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(RequestError::from_transport)?;

        let status = response.status();
        self.cookies.store_response_cookies(response.headers()).await;
        let body = response.text().await.map_err(RequestError::from_transport)?;

        if !status.is_success() {
            tracing::warn!(status = %status, "Login rejected");
            return Err(RequestError::from_status(status.as_u16(), &body));
        }

        let envelope =
            Envelope::parse(&body).map_err(|e| RequestError::MalformedResponse(e.to_string()))?;
        if !envelope.success {
            return Err(RequestError::ServerError {
                status: status.as_u16(),
                message: envelope
                    .message
                    .clone()
                    .unwrap_or_else(|| "Login failed. Please try again.".to_string()),
            });
        }

        let user = envelope.get("user").cloned().map(UserRecord::new);
        let token = match self.cookies.token().await {
            Some(token) => {
                tracing::info!("Token found in cookies after login");
                Some(token)
            }
            None => match user.as_ref().and_then(|u| u.id()) {
                Some(user_id) if self.synthesize_fallback => {
                    tracing::warn!("No token cookie after login, storing synthesized placeholder");
                    Some(synthesize_token(user_id))
                }
                _ => {
                    tracing::warn!("No token cookie after login");
                    None
                }
            },
        };

        let state = AuthState { user, token };
        self.store.write(&state)?;
        match state.token() {
            Some(token) => self.store.set_direct_token(token)?,
            // No previous session's key survives a login
            None => self.store.clear_direct_token()?,
        }

        Ok(envelope)
    }

    /// Log out; local state is cleared even when the server call fails
    pub async fn logout(&self) -> Result<Envelope> {
        let url = endpoints::logout().url(&self.base_url);
        let mut request = self.client.get(url);
        if let Some(cookie) = self.cookies.header_value().await {
            request = request.header(COOKIE, cookie);
        }

        let result = match request.send().await {
            Ok(response) => {
                let status = response.status();
                self.cookies.store_response_cookies(response.headers()).await;
                match response.text().await {
                    Ok(body) if status.is_success() => Envelope::parse(&body)
                        .map_err(|e| RequestError::MalformedResponse(e.to_string())),
                    Ok(body) => Err(RequestError::from_status(status.as_u16(), &body)),
                    Err(e) => Err(RequestError::from_transport(e)),
                }
            }
            Err(e) => Err(RequestError::from_transport(e)),
        };

        if let Err(ref e) = result {
            tracing::warn!("Logout request failed, clearing local session anyway: {}", e);
        }

        self.cookies.remove(TOKEN_COOKIE).await;
        self.store.clear()?;
        tracing::info!("Local session cleared");

        result
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.store.read().ok().and_then(|state| state.user)
    }

    pub fn is_logged_in(&self) -> bool {
        self.current_user().is_some()
    }
}
