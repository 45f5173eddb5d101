use anyhow::Context;
use reqwest::header::COOKIE;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::Endpoint;
use crate::auth::{CookieJar, Credential, CredentialResolver, CredentialSource};
use crate::error::RequestError;
use crate::models::Envelope;

/// Build the shared reqwest client
pub fn build_client(connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout))
        .timeout(Duration::from_secs(request_timeout))
        .build()
        .context("Failed to create HTTP client")
}

/// Phases of one logical call
///
/// Transitions only move forward, so every attempt runs at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Start,
    HeaderAttempt,
    QueryAttempt,
    AnonymousAttempt,
    Success,
    Failure,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Success | DispatchState::Failure)
    }

    /// State after credential resolution
    pub fn after_resolution(has_credential: bool, allow_anonymous: bool) -> Self {
        match (has_credential, allow_anonymous) {
            (true, _) => DispatchState::HeaderAttempt,
            (false, true) => DispatchState::AnonymousAttempt,
            (false, false) => DispatchState::Failure,
        }
    }

    /// State after an attempt finished with `outcome`
    pub fn after_attempt(self, outcome: AttemptOutcome, allow_anonymous: bool) -> Self {
        use AttemptOutcome::*;
        use DispatchState::*;

        match (self, outcome) {
            (HeaderAttempt | QueryAttempt | AnonymousAttempt, Succeeded) => Success,
            (HeaderAttempt, Unauthorized | TransportFailed) => QueryAttempt,
            (QueryAttempt, Unauthorized | TransportFailed) if allow_anonymous => AnonymousAttempt,
            (HeaderAttempt | QueryAttempt | AnonymousAttempt, _) => Failure,
            (state, _) => state,
        }
    }
}

/// Classification of a single attempt's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// HTTP 401
    Unauthorized,
    TransportFailed,
    /// Any other error; never escalated
    Rejected,
}

impl AttemptOutcome {
    fn of(result: &Result<Envelope, RequestError>) -> Self {
        match result {
            Ok(_) => AttemptOutcome::Succeeded,
            Err(RequestError::AuthorizationRejected { .. }) => AttemptOutcome::Unauthorized,
            Err(RequestError::TransportFailure { .. }) => AttemptOutcome::TransportFailed,
            Err(_) => AttemptOutcome::Rejected,
        }
    }
}

/// How an attempt carries the credential
#[derive(Clone, Copy)]
enum Carrier<'a> {
    Header(&'a Credential),
    HeaderAndQuery(&'a Credential),
    Anonymous,
}

impl Carrier<'_> {
    fn name(&self) -> &'static str {
        match self {
            Carrier::Header(_) => "header",
            Carrier::HeaderAndQuery(_) => "query",
            Carrier::Anonymous => "anonymous",
        }
    }
}

/// Authenticated request dispatcher for the job board API
/// Escalates on 401 or transport failure:
/// - bearer header (plus session cookie)
/// - same request with `?token=` appended
/// - anonymous request, public GET endpoints only
#[derive(Clone)]
pub struct JobBoardHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// API base URL, e.g. `https://backend.example.com/api/v1`
    base_url: Url,

    resolver: Arc<CredentialResolver>,

    /// Ambient session cookies sent on authenticated attempts
    cookies: Arc<CookieJar>,

    /// Force a fresh token fetch before each call
    force_refresh: bool,
}

impl JobBoardHttpClient {
    pub fn new(
        client: Client,
        base_url: Url,
        resolver: Arc<CredentialResolver>,
        cookies: Arc<CookieJar>,
    ) -> Self {
        Self {
            client,
            base_url,
            resolver,
            cookies,
            force_refresh: true,
        }
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn resolver(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    /// Dispatch a call that cannot be cancelled
    pub async fn dispatch(
        &self,
        endpoint: &Endpoint,
        body: Option<&Value>,
    ) -> Result<Envelope, RequestError> {
        self.dispatch_with_cancel(endpoint, body, &CancellationToken::new())
            .await
    }

    /// Dispatch a call, stopping as soon as `cancel` fires
    ///
    /// A cancelled call starts no further attempt and persists nothing.
    pub async fn dispatch_with_cancel(
        &self,
        endpoint: &Endpoint,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Envelope, RequestError> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let allow_anonymous = endpoint.allows_anonymous();

        tracing::debug!(
            request_id = %request_id,
            method = %endpoint.method(),
            path = endpoint.path(),
            "Dispatching request"
        );

        let mut state = DispatchState::Start;
        let mut credential: Option<Credential> = None;
        let mut last: Option<Result<Envelope, RequestError>> = None;
        let mut authenticated_success = false;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(request_id = %request_id, state = ?state, "Request cancelled");
                return Err(RequestError::Cancelled);
            }

            state = match state {
                DispatchState::Start => {
                    credential = tokio::select! {
                        _ = cancel.cancelled() => return Err(RequestError::Cancelled),
                        c = self.resolver.resolve(self.force_refresh) => c,
                    };

                    let next = DispatchState::after_resolution(credential.is_some(), allow_anonymous);
                    match &credential {
                        Some(c) => tracing::debug!(
                            request_id = %request_id,
                            source = %c.source(),
                            token = %c.redacted(),
                            "Using credential"
                        ),
                        None if allow_anonymous => tracing::info!(
                            request_id = %request_id,
                            "No credential available, requesting anonymously"
                        ),
                        None => last = Some(Err(RequestError::NoCredentialAvailable)),
                    }
                    next
                }

                DispatchState::HeaderAttempt
                | DispatchState::QueryAttempt
                | DispatchState::AnonymousAttempt => {
                    let carrier = match (state, credential.as_ref()) {
                        (DispatchState::HeaderAttempt, Some(c)) => Carrier::Header(c),
                        (DispatchState::QueryAttempt, Some(c)) => Carrier::HeaderAndQuery(c),
                        _ => Carrier::Anonymous,
                    };

                    let result = tokio::select! {
                        _ = cancel.cancelled() => return Err(RequestError::Cancelled),
                        r = self.attempt(endpoint, body, carrier, &request_id) => r,
                    };

                    let outcome = AttemptOutcome::of(&result);
                    if outcome == AttemptOutcome::Succeeded {
                        authenticated_success = !matches!(carrier, Carrier::Anonymous);
                    } else if outcome != AttemptOutcome::Rejected {
                        tracing::warn!(
                            request_id = %request_id,
                            attempt = carrier.name(),
                            outcome = ?outcome,
                            "Attempt failed, escalating"
                        );
                    }

                    last = Some(result);
                    state.after_attempt(outcome, allow_anonymous)
                }

                DispatchState::Success => {
                    if authenticated_success {
                        if let Some(c) = credential.as_ref() {
                            self.remember(c, cancel);
                        }
                    }
                    return last.unwrap_or_else(|| {
                        Err(RequestError::Internal(anyhow::anyhow!(
                            "Dispatch reached success without a response"
                        )))
                    });
                }

                DispatchState::Failure => {
                    let result = last.unwrap_or(Err(RequestError::NoCredentialAvailable));
                    if let Err(ref e) = result {
                        tracing::error!(
                            request_id = %request_id,
                            method = %endpoint.method(),
                            path = endpoint.path(),
                            error = %e,
                            "Request failed"
                        );
                    }
                    return result;
                }
            };
        }
    }

    /// Issue one request
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        body: Option<&Value>,
        carrier: Carrier<'_>,
        request_id: &str,
    ) -> Result<Envelope, RequestError> {
        let url = endpoint.url(&self.base_url);
        let mut request = self.client.request(endpoint.method().clone(), url.clone());

        match carrier {
            Carrier::Header(c) => {
                request = request.bearer_auth(c.token());
            }
            Carrier::HeaderAndQuery(c) => {
                request = request.bearer_auth(c.token()).query(&[("token", c.token())]);
            }
            Carrier::Anonymous => {}
        }

        if !matches!(carrier, Carrier::Anonymous) {
            if let Some(cookie) = self.cookies.header_value().await {
                request = request.header(COOKIE, cookie);
            }
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(
            request_id = request_id,
            attempt = carrier.name(),
            method = %endpoint.method(),
            url = %url,
            "Sending HTTP request"
        );

        let response = request.send().await.map_err(|e| {
            let err = RequestError::from_transport(e);
            tracing::warn!(request_id = request_id, attempt = carrier.name(), error = %err, "HTTP request error");
            err
        })?;

        let status = response.status();
        let text = response.text().await.map_err(RequestError::from_transport)?;

        tracing::debug!(
            request_id = request_id,
            attempt = carrier.name(),
            status = %status,
            "Received HTTP response"
        );

        if status.is_success() {
            return Envelope::parse(&text).map_err(|e| RequestError::MalformedResponse(e.to_string()));
        }

        Err(RequestError::from_status(status.as_u16(), &text))
    }

    /// Persist a server-issued credential that worked
    ///
    /// Direct-key hits are already stored; synthesized placeholders never are.
    fn remember(&self, credential: &Credential, cancel: &CancellationToken) {
        let skip = matches!(
            credential.source(),
            CredentialSource::DirectKey | CredentialSource::Synthesized
        );
        if skip || cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.resolver.persist(credential.token()) {
            tracing::warn!("Failed to persist credential: {:#}", e);
        }
    }
}
