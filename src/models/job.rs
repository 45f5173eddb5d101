use serde::{Deserialize, Serialize};

// ==================================================================================================
// Models for /job/post
// ==================================================================================================

/// Job posting submitted by a recruiter
///
/// Numeric-looking fields (`salary`, `experience`) are sent as strings; the
/// server parses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub title: String,
    pub description: String,
    /// Comma-separated list
    pub requirements: String,
    pub salary: String,
    pub location: String,
    pub job_type: String,
    pub experience: String,
    pub position: u32,
    pub company_id: String,
}
