// Server response envelope: { success, message?, ...data }

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON wrapper used by every job board endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Remaining payload fields (jobs, job, companies, application, ...)
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Envelope {
    /// Parse a response body
    pub fn parse(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    /// Raw payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserialize a payload field into a typed value
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
