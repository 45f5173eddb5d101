// Authentication types

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Where a resolved credential came from, in resolution priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialSource {
    /// `authToken` key in persisted storage
    DirectKey,
    /// `token` field inside the persisted auth-state envelope
    PersistedState,
    /// `token=` cookie
    Cookie,
    /// Client-side `manual_<userId>_<millis>` placeholder
    Synthesized,
    /// `GET /users/generate-token/:userId`
    Network,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::DirectKey => "direct_key",
            CredentialSource::PersistedState => "persisted_state",
            CredentialSource::Cookie => "cookie",
            CredentialSource::Synthesized => "synthesized",
            CredentialSource::Network => "network",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer token plus its provenance
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    source: CredentialSource,
}

impl Credential {
    pub fn new(token: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            token: token.into(),
            source,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// First characters of the token, for logs
    pub fn redacted(&self) -> String {
        let prefix: String = self.token.chars().take(10).collect();
        format!("{}...", prefix)
    }
}

// Never print the whole token
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.redacted())
            .field("source", &self.source)
            .finish()
    }
}

/// Opaque user record as returned by the login endpoint
///
/// Only `_id` and `role` are ever read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRecord(Value);

impl UserRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn id(&self) -> Option<&str> {
        self.0
            .get("_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn role(&self) -> Option<&str> {
        self.0.get("role").and_then(|v| v.as_str())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Client-side authentication state `{ user, token }`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<UserRecord>,
    pub token: Option<String>,
}

/// Inner shape of the persisted `auth` slice
#[derive(Serialize, Deserialize)]
struct PersistedAuth {
    #[serde(default)]
    user: Value,
    #[serde(default)]
    token: Option<String>,
}

impl AuthState {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.id())
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.is_some()
    }

    /// Decode the `auth` slice string: `{"user":"<json>|null","token":...}`
    pub fn decode(auth: &str) -> Result<Self> {
        let persisted: PersistedAuth =
            serde_json::from_str(auth).context("Failed to parse persisted auth slice")?;

        let user = match persisted.user {
            Value::Null => None,
            // Double-encoded form written by the state persister
            Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
                Ok(Value::Null) => None,
                Ok(value) => Some(UserRecord::new(value)),
                Err(e) => {
                    tracing::warn!("Ignoring unparseable persisted user record: {}", e);
                    None
                }
            },
            value @ Value::Object(_) => Some(UserRecord::new(value)),
            other => {
                tracing::warn!("Ignoring persisted user record of unexpected type: {}", other);
                None
            }
        };

        Ok(Self {
            user,
            token: persisted.token,
        })
    }

    /// Encode as the `auth` slice string, double-encoding the user record
    pub fn encode(&self) -> Result<String> {
        let user = match &self.user {
            Some(user) => Value::String(
                serde_json::to_string(user.as_value()).context("Failed to encode user record")?,
            ),
            None => Value::Null,
        };

        serde_json::to_string(&PersistedAuth {
            user,
            token: self.token.clone(),
        })
        .context("Failed to encode auth slice")
    }

    /// Read the state out of the serialized root object (`{"auth": "<slice>", ...}`)
    pub fn from_persisted_root(root: &str) -> Result<Self> {
        let root: Map<String, Value> =
            serde_json::from_str(root).context("Failed to parse persisted root state")?;

        match root.get("auth") {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::String(auth)) => Self::decode(auth),
            Some(inline @ Value::Object(_)) => Self::decode(&inline.to_string()),
            Some(other) => anyhow::bail!("Persisted auth slice has unexpected type: {}", other),
        }
    }

    /// Write the state into a serialized root object, keeping its other slices
    pub fn merge_into_persisted_root(&self, existing: Option<&str>) -> Result<String> {
        let mut root: Map<String, Value> = match existing {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                tracing::warn!("Replacing unparseable persisted root state: {}", e);
                Map::new()
            }),
            None => Map::new(),
        };

        root.insert("auth".to_string(), Value::String(self.encode()?));
        serde_json::to_string(&root).context("Failed to encode persisted root state")
    }
}

/// Response of `GET /users/generate-token/:userId`
#[derive(Debug, Deserialize)]
pub struct FreshTokenResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
}
