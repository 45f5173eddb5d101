use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account role chosen at login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Recruiter,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Student, Role::Recruiter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Recruiter => "recruiter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "recruiter" => Ok(Role::Recruiter),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Body of `POST /user/login`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Body of `POST /user/profile/update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Comma-separated list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
}
