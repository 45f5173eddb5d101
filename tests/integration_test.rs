// Integration tests for the job board client
//
// These tests run the full resolver + dispatcher stack against a mock
// HTTP server and pin the exact number of attempts per call.

use mockito::{Matcher, Server};
use reqwest::Url;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use jobboard_client::{
    api::{endpoints, JobBoardApi},
    auth::{
        AuthStateStore, CookieJar, CredentialResolver, CredentialSource, MemoryStorage, Storage,
        AUTH_TOKEN_KEY, PERSIST_ROOT_KEY,
    },
    error::RequestError,
    http_client::{self, JobBoardHttpClient},
    models::{ApplicationStatus, NewCompany, StatusUpdate},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

struct Harness {
    storage: Arc<MemoryStorage>,
    cookies: Arc<CookieJar>,
    http: JobBoardHttpClient,
    api: JobBoardApi,
}

impl Harness {
    fn new(base: &str, force_refresh: bool) -> Self {
        Self::with_storage(base, force_refresh, Arc::new(MemoryStorage::new()), "")
    }

    fn with_storage(base: &str, force_refresh: bool, storage: Arc<MemoryStorage>, cookie: &str) -> Self {
        let base = Url::parse(base).unwrap();
        let client = http_client::build_client(5, 5).unwrap();
        let cookies = Arc::new(CookieJar::from_cookie_string(cookie));
        let resolver = Arc::new(
            CredentialResolver::new(
                AuthStateStore::new(storage.clone()),
                cookies.clone(),
                client.clone(),
                base.clone(),
            )
            .with_token_fetch_timeout(Duration::from_secs(2)),
        );
        let http = JobBoardHttpClient::new(client, base, resolver, cookies.clone())
            .with_force_refresh(force_refresh);
        let api = JobBoardApi::new(http.clone());
        Self {
            storage,
            cookies,
            http,
            api,
        }
    }

    fn direct_token(&self) -> Option<String> {
        self.storage.get_item(AUTH_TOKEN_KEY).unwrap()
    }
}

fn storage_with_direct(token: &str) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(AUTH_TOKEN_KEY, token).unwrap();
    storage
}

fn storage_with_envelope(user_id: Option<&str>, token: Option<&str>) -> Arc<MemoryStorage> {
    let user = user_id.map(|id| json!({"_id": id, "role": "student"}).to_string());
    let auth = json!({"user": user, "token": token}).to_string();
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set_item(PERSIST_ROOT_KEY, &json!({"auth": auth}).to_string())
        .unwrap();
    storage
}

/// Raw HTTP server that hangs up on the first `drops` connections after reading
/// the request, then answers 200. Returns the base URL and every request head seen.
async fn flaky_server(drops: usize, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        let mut served = 0;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            if head.is_empty() {
                continue;
            }
            log.lock().unwrap().push(String::from_utf8_lossy(&head).to_lowercase());

            served += 1;
            if served <= drops {
                drop(stream);
                continue;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (url, seen)
}

fn request_line(head: &str) -> &str {
    head.lines().next().unwrap_or_default()
}

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

// ==================================================================================================
// Escalation Chain Tests
// ==================================================================================================

#[tokio::test]
async fn test_public_job_falls_back_to_anonymous_after_two_401s() {
    let mut server = Server::new_async().await;
    let header = server
        .mock("GET", "/job/get/42")
        .match_header("authorization", "Bearer bad")
        .with_status(401)
        .with_body(json!({"success": false, "message": "Invalid token"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let query = server
        .mock("GET", "/job/get/42")
        .match_query(Matcher::UrlEncoded("token".into(), "bad".into()))
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let anonymous = server
        .mock("GET", "/job/get/42")
        .match_header("authorization", Matcher::Missing)
        .match_header("cookie", Matcher::Missing)
        .with_status(200)
        .with_body(json!({"success": true, "job": {"_id": "42", "title": "Rust Engineer"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), true, storage_with_direct("bad"), "session=s1");
    let envelope = harness.api.get_job_by_id("42").await.unwrap();

    header.assert_async().await;
    query.assert_async().await;
    anonymous.assert_async().await;

    assert!(envelope.success);
    assert_eq!(envelope.get("job").unwrap()["title"], "Rust Engineer");
    assert!(envelope.get("job").unwrap().get("applications").is_none());
    // Anonymous success persists nothing
    assert_eq!(harness.direct_token().as_deref(), Some("bad"));
}

#[tokio::test]
async fn test_header_success_makes_single_request() {
    let mut server = Server::new_async().await;
    let header = server
        .mock("GET", "/application/get")
        .match_header("authorization", "Bearer good")
        .with_status(200)
        .with_body(json!({"success": true, "application": []}).to_string())
        .expect(1)
        .create_async()
        .await;
    let query = server
        .mock("GET", "/application/get")
        .match_query(Matcher::UrlEncoded("token".into(), "good".into()))
        .expect(0)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("good"), "");
    let envelope = harness.api.get_applied_jobs().await.unwrap();

    header.assert_async().await;
    query.assert_async().await;
    assert!(envelope.get("application").unwrap().is_array());
}

#[tokio::test]
async fn test_401_triggers_one_query_retry_and_persists_token() {
    let mut server = Server::new_async().await;
    let header = server
        .mock("GET", "/application/apply/42")
        .match_header("authorization", "Bearer env-token")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let query = server
        .mock("GET", "/application/apply/42")
        .match_query(Matcher::UrlEncoded("token".into(), "env-token".into()))
        .match_header("authorization", "Bearer env-token")
        .with_status(201)
        .with_body(json!({"success": true, "message": "Job applied successfully."}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::with_storage(
        &server.url(),
        false,
        storage_with_envelope(Some("u1"), Some("env-token")),
        "",
    );
    assert!(harness.direct_token().is_none());

    let envelope = harness.api.apply_for_job("42").await.unwrap();
    header.assert_async().await;
    query.assert_async().await;

    assert_eq!(envelope.message.as_deref(), Some("Job applied successfully."));
    assert_eq!(harness.direct_token().as_deref(), Some("env-token"));
}

#[tokio::test]
async fn test_non_401_error_is_terminal() {
    let mut server = Server::new_async().await;
    let header = server
        .mock("GET", "/job/get/404")
        .match_header("authorization", "Bearer good")
        .with_status(404)
        .with_body(json!({"success": false, "message": "Jobs not found."}).to_string())
        .expect(1)
        .create_async()
        .await;
    let query = server
        .mock("GET", "/job/get/404")
        .match_query(Matcher::UrlEncoded("token".into(), "good".into()))
        .expect(0)
        .create_async()
        .await;
    let anonymous = server
        .mock("GET", "/job/get/404")
        .match_header("authorization", Matcher::Missing)
        .expect(0)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("good"), "");
    let err = harness.api.get_job_by_id("404").await.unwrap_err();

    header.assert_async().await;
    query.assert_async().await;
    anonymous.assert_async().await;
    match err {
        RequestError::ServerError { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Jobs not found.");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_post_never_retries_anonymously() {
    let mut server = Server::new_async().await;
    let header = server
        .mock("POST", "/company/register")
        .match_header("authorization", "Bearer bad")
        .match_body(Matcher::Json(json!({"companyName": "Acme"})))
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let query = server
        .mock("POST", "/company/register")
        .match_query(Matcher::UrlEncoded("token".into(), "bad".into()))
        .match_body(Matcher::Json(json!({"companyName": "Acme"})))
        .with_status(401)
        .with_body(json!({"success": false, "message": "User not authenticated"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let anonymous = server
        .mock("POST", "/company/register")
        .match_header("authorization", Matcher::Missing)
        .expect(0)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("bad"), "");
    let err = harness
        .api
        .register_company(&NewCompany {
            company_name: "Acme".to_string(),
        })
        .await
        .unwrap_err();

    header.assert_async().await;
    query.assert_async().await;
    anonymous.assert_async().await;
    match err {
        RequestError::AuthorizationRejected { message } => {
            assert_eq!(message, "User not authenticated")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_private_get_does_not_fall_back_to_anonymous() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/job/getadminjobs")
        .match_header("authorization", "Bearer bad")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/job/getadminjobs")
        .match_query(Matcher::UrlEncoded("token".into(), "bad".into()))
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let anonymous = server
        .mock("GET", "/job/getadminjobs")
        .match_header("authorization", Matcher::Missing)
        .expect(0)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("bad"), "");
    let err = harness.api.get_admin_jobs().await.unwrap_err();

    anonymous.assert_async().await;
    assert!(matches!(err, RequestError::AuthorizationRejected { .. }));
    assert_eq!(err.user_message(), "Your session has expired. Please log in again.");
}

// ==================================================================================================
// Credential Availability Tests
// ==================================================================================================

#[tokio::test]
async fn test_no_credential_sends_nothing_for_private_endpoint() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/application/get")
        .expect(0)
        .create_async()
        .await;

    let harness = Harness::new(&server.url(), true);
    let err = harness.api.get_applied_jobs().await.unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, RequestError::NoCredentialAvailable));
}

#[tokio::test]
async fn test_no_credential_goes_straight_to_anonymous_for_public_endpoint() {
    let mut server = Server::new_async().await;
    let anonymous = server
        .mock("GET", "/job/get")
        .match_query(Matcher::UrlEncoded("keyword".into(), "rust".into()))
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(json!({"success": true, "jobs": [{"_id": "1"}, {"_id": "2"}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::new(&server.url(), true);
    let envelope = harness.api.get_all_jobs("rust").await.unwrap();

    anonymous.assert_async().await;
    assert_eq!(envelope.get("jobs").unwrap().as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_session_cookie_accompanies_authenticated_attempts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/company/get")
        .match_header("authorization", "Bearer xyz")
        .match_header("cookie", "token=xyz; theme=dark")
        .with_status(200)
        .with_body(json!({"success": true, "companies": []}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::with_storage(
        &server.url(),
        false,
        Arc::new(MemoryStorage::new()),
        "token=xyz; theme=dark",
    );
    harness.api.get_user_companies().await.unwrap();

    mock.assert_async().await;
    // The cookie token was not stored locally before, so it is now
    assert_eq!(harness.direct_token().as_deref(), Some("xyz"));
}

// ==================================================================================================
// Forced Refresh Tests
// ==================================================================================================

#[tokio::test]
async fn test_forced_refresh_prefers_network_token() {
    let mut server = Server::new_async().await;
    let fresh = server
        .mock("GET", "/users/generate-token/u1")
        .with_status(200)
        .with_body(json!({"success": true, "token": "fresh"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let call = server
        .mock("POST", "/application/status/a1/update")
        .match_header("authorization", "Bearer fresh")
        .match_body(Matcher::Json(json!({"status": "accepted"})))
        .with_status(200)
        .with_body(json!({"success": true, "message": "Status updated successfully."}).to_string())
        .expect(1)
        .create_async()
        .await;

    let storage = storage_with_envelope(Some("u1"), Some("stale"));
    storage.set_item(AUTH_TOKEN_KEY, "stale-direct").unwrap();
    let harness = Harness::with_storage(&server.url(), true, storage, "");

    harness
        .api
        .update_application_status(
            "a1",
            &StatusUpdate {
                status: ApplicationStatus::Accepted,
            },
        )
        .await
        .unwrap();

    fresh.assert_async().await;
    call.assert_async().await;
    assert_eq!(harness.direct_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_forced_refresh_failure_uses_local_token() {
    let mut server = Server::new_async().await;
    let fresh = server
        .mock("GET", "/users/generate-token/u1")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let call = server
        .mock("GET", "/application/get")
        .match_header("authorization", "Bearer stale")
        .with_status(200)
        .with_body(json!({"success": true, "application": []}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::with_storage(
        &server.url(),
        true,
        storage_with_envelope(Some("u1"), Some("stale")),
        "",
    );
    harness.api.get_applied_jobs().await.unwrap();

    fresh.assert_async().await;
    call.assert_async().await;
}

#[tokio::test]
async fn test_forced_refresh_fetches_exactly_once() {
    let mut server = Server::new_async().await;
    let fresh = server
        .mock("GET", "/users/generate-token/u1")
        .with_status(200)
        .with_body(json!({"success": false}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), true, storage_with_envelope(Some("u1"), None), "");
    let credential = harness.http.resolver().resolve(true).await.unwrap();

    fresh.assert_async().await;
    assert!(credential.token().starts_with("manual_u1_"));
}

#[tokio::test]
async fn test_local_chain_exhausted_falls_through_to_network() {
    let mut server = Server::new_async().await;
    let fresh = server
        .mock("GET", "/users/generate-token/u1")
        .with_status(200)
        .with_body(json!({"success": true, "token": "from-network"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let resolver = CredentialResolver::new(
        AuthStateStore::new(storage_with_envelope(Some("u1"), None)),
        Arc::new(CookieJar::new()),
        reqwest::Client::new(),
        base,
    )
    .with_synthesized_fallback(false);

    let credential = resolver.resolve(false).await.unwrap();
    fresh.assert_async().await;
    assert_eq!(credential.token(), "from-network");
}

// ==================================================================================================
// Transport, Cancellation and Concurrency Tests
// ==================================================================================================

#[tokio::test]
async fn test_unreachable_server_is_transport_failure() {
    let base = closed_port_url();
    let harness = Harness::with_storage(&base, false, storage_with_direct("t"), "");

    let err = harness.api.get_job_by_id("42").await.unwrap_err();
    assert!(matches!(err, RequestError::TransportFailure { .. }));
    assert_eq!(err.user_message(), "Could not reach the server. Please try again later.");

    let err = harness.api.get_admin_jobs().await.unwrap_err();
    assert!(matches!(err, RequestError::TransportFailure { .. }));
}

#[tokio::test]
async fn test_transport_failure_escalates_to_one_query_attempt() {
    let (base, seen) = flaky_server(1, r#"{"success":true,"application":[]}"#).await;
    let harness = Harness::with_storage(&base, false, storage_with_direct("t"), "");

    let envelope = harness.api.get_applied_jobs().await.unwrap();
    assert!(envelope.get("application").unwrap().is_array());

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(request_line(&seen[0]), "get /application/get http/1.1");
    assert!(seen[0].contains("authorization: bearer t"));
    assert_eq!(request_line(&seen[1]), "get /application/get?token=t http/1.1");
    assert!(seen[1].contains("authorization: bearer t"));
}

#[tokio::test]
async fn test_transport_failures_reach_anonymous_for_public_get() {
    let (base, seen) = flaky_server(2, r#"{"success":true,"job":{"_id":"42"}}"#).await;
    let harness = Harness::with_storage(&base, false, storage_with_direct("t"), "");

    harness.api.get_job_by_id("42").await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert_eq!(request_line(&seen[1]), "get /job/get/42?token=t http/1.1");
    assert_eq!(request_line(&seen[2]), "get /job/get/42 http/1.1");
    assert!(!seen[2].contains("authorization:"));
}

#[tokio::test]
async fn test_private_call_stops_after_two_transport_failures() {
    let (base, seen) = flaky_server(usize::MAX, "").await;
    let harness = Harness::with_storage(&base, false, storage_with_direct("t"), "");

    let err = harness.api.get_admin_jobs().await.unwrap_err();
    assert!(matches!(err, RequestError::TransportFailure { .. }));
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_synthesized_token_is_never_persisted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/job/get/42")
        .match_header("authorization", Matcher::Regex(r"^Bearer manual_u1_\d+$".to_string()))
        .with_status(200)
        .with_body(json!({"success": true, "job": {"_id": "42"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let harness = Harness::with_storage(
        &server.url(),
        false,
        storage_with_envelope(Some("u1"), None),
        "",
    );
    harness.api.get_job_by_id("42").await.unwrap();
    mock.assert_async().await;

    assert!(harness.direct_token().is_none());
    let state = AuthStateStore::new(harness.storage.clone()).read().unwrap();
    assert!(state.token().is_none());

    // A real token arriving later takes over
    harness.cookies.set("token", "real-server-token").await;
    let credential = harness.http.resolver().resolve(false).await.unwrap();
    assert_eq!(credential.token(), "real-server-token");
    assert_eq!(credential.source(), CredentialSource::Cookie);
}

#[tokio::test]
async fn test_cancelled_call_sends_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/application/get")
        .expect(0)
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("t"), "");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .http
        .dispatch_with_cancel(&endpoints::applied_jobs(), None, &cancel)
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, RequestError::Cancelled));
}

#[tokio::test]
async fn test_server_message_is_passed_through() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/application/apply/42")
        .match_header("authorization", "Bearer t")
        .with_status(400)
        .with_body(json!({"success": false, "message": "You have already applied for this job"}).to_string())
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("t"), "");
    let err = harness.api.apply_for_job("42").await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.user_message(), "You have already applied for this job");
}

#[tokio::test]
async fn test_malformed_success_body() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/company/get/c1")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let harness = Harness::with_storage(&server.url(), false, storage_with_direct("t"), "");
    let err = harness.api.get_company_by_id("c1").await.unwrap_err();
    assert!(matches!(err, RequestError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_concurrent_dispatches_converge_on_same_token() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/job/getadminjobs")
        .match_header("authorization", "Bearer env-token")
        .with_status(200)
        .with_body(json!({"success": true, "jobs": []}).to_string())
        .expect(5)
        .create_async()
        .await;

    let harness = Harness::with_storage(
        &server.url(),
        false,
        storage_with_envelope(Some("u1"), Some("env-token")),
        "",
    );

    let calls = (0..5).map(|_| harness.api.get_admin_jobs());
    let results = futures::future::join_all(calls).await;

    mock.assert_async().await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(harness.direct_token().as_deref(), Some("env-token"));
}
