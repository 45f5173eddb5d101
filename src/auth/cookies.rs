// Cookie jar mirroring the document cookie string

use reqwest::header::{HeaderMap, SET_COOKIE};
use tokio::sync::RwLock;

/// Name of the cookie the server sets on login
pub const TOKEN_COOKIE: &str = "token";

/// Name/value cookie pairs in insertion order
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<(String, String)>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `name=value; other=value` cookie string
    pub fn from_cookie_string(raw: &str) -> Self {
        Self {
            cookies: RwLock::new(parse_cookie_string(raw)),
        }
    }

    /// Raw (still escaped) value of a cookie
    pub async fn get(&self, name: &str) -> Option<String> {
        let cookies = self.cookies.read().await;
        cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    /// URL-unescaped value of the `token` cookie, if non-empty
    pub async fn token(&self) -> Option<String> {
        let raw = self.get(TOKEN_COOKIE).await?;
        let value = match urlencoding::decode(&raw) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => raw,
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub async fn set(&self, name: &str, value: &str) {
        let mut cookies = self.cookies.write().await;
        match cookies.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => cookies.push((name.to_string(), value.to_string())),
        }
    }

    pub async fn remove(&self, name: &str) {
        let mut cookies = self.cookies.write().await;
        cookies.retain(|(n, _)| n != name);
    }

    /// Apply one `Set-Cookie` header value
    ///
    /// An empty value or `Max-Age=0` deletes the cookie.
    pub async fn store_set_cookie(&self, header: &str) {
        let mut parts = header.split(';');
        let Some((name, value)) = parts.next().and_then(|p| p.split_once('=')) else {
            return;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return;
        }

        let expired = parts.any(|attr| {
            attr.split_once('=')
                .map(|(k, v)| k.trim().eq_ignore_ascii_case("max-age") && v.trim() == "0")
                .unwrap_or(false)
        });

        if value.is_empty() || expired {
            tracing::debug!(cookie = name, "Server cleared cookie");
            self.remove(name).await;
        } else {
            tracing::debug!(cookie = name, "Server set cookie");
            self.set(name, value).await;
        }
    }

    /// Apply every `Set-Cookie` header of a response
    pub async fn store_response_cookies(&self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(header) = value.to_str() {
                self.store_set_cookie(header).await;
            }
        }
    }

    /// Value for an outgoing `Cookie` header, `None` when the jar is empty
    pub async fn header_value(&self) -> Option<String> {
        let cookies = self.cookies.read().await;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Serialized jar, same format `from_cookie_string` reads
    pub async fn to_cookie_string(&self) -> String {
        self.header_value().await.unwrap_or_default()
    }
}

fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    let mut cookies: Vec<(String, String)> = Vec::new();
    for part in raw.split(';') {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match cookies.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => cookies.push((name.to_string(), value.to_string())),
        }
    }
    cookies
}
