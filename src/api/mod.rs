// Job board API surface
// Endpoint declarations and the typed operations built on the dispatcher

pub mod client;
pub mod endpoints;

pub use client::JobBoardApi;

use reqwest::{Method, Url};

/// A logical API operation: method, path, query, and whether it may be retried anonymously
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    allow_anonymous: bool,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            allow_anonymous: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Mark as a public read endpoint that degrades to an anonymous request
    pub fn public(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Anonymous fallback only ever applies to GET
    pub fn allows_anonymous(&self) -> bool {
        self.allow_anonymous && self.method == Method::GET
    }

    /// Absolute URL under the API base
    pub fn url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        let path = format!("{}{}", base.path().trim_end_matches('/'), self.path);
        url.set_path(&path);
        url.set_query(None);
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

/// Percent-encode one path segment
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
