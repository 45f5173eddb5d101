use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dialoguer::{Input, Password, Select};
use reqwest::Url;
use std::path::PathBuf;

use crate::models::{ApplicationStatus, LoginRequest, Role};

/// Job board client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Job board API base URL
    #[arg(
        short = 'u',
        long,
        env = "JOBBOARD_API_URL",
        default_value = "http://localhost:8000/api/v1"
    )]
    pub api_url: String,

    /// Path to the local storage database
    #[arg(short = 'd', long, env = "JOBBOARD_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Timeout for the fresh token fetch in seconds
    #[arg(long, env = "TOKEN_FETCH_TIMEOUT", default_value = "10")]
    pub token_timeout: u64,

    /// Fetch a fresh token before every authenticated call
    #[arg(long, env = "FORCE_TOKEN_REFRESH", default_value_t = true, action = ArgAction::Set)]
    pub force_refresh: bool,

    /// Fall back to a manual_<id>_<millis> placeholder when no token is stored
    #[arg(long, env = "SYNTHESIZE_FALLBACK_TOKEN", default_value_t = true, action = ArgAction::Set)]
    pub synthesize_token: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the session (prompts for missing fields)
    Login {
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long)]
        role: Option<Role>,
        #[arg(long, env = "JOBBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log out and clear the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Show which credential the next request would carry
    Token {
        /// Fetch a fresh token from the server first
        #[arg(long)]
        refresh: bool,
        /// Store the resolved token for later requests
        #[arg(long)]
        persist: bool,
    },
    /// Search jobs
    Jobs {
        #[arg(short, long, default_value = "")]
        keyword: String,
    },
    /// Show one job
    Job { id: String },
    /// List the recruiter's own jobs
    AdminJobs,
    /// Post a job from a JSON file
    PostJob {
        #[arg(long)]
        file: PathBuf,
    },
    /// List the recruiter's companies
    Companies,
    /// Show one company
    Company { id: String },
    /// Register a company
    RegisterCompany { name: String },
    /// Update a company from a JSON file
    UpdateCompany {
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Apply for a job
    Apply { job_id: String },
    /// List jobs the user applied for
    Applied,
    /// List applicants of a job
    Applicants { job_id: String },
    /// Accept or reject an application
    SetStatus {
        application_id: String,
        status: ApplicationStatus,
    },
    /// Update the user profile from a JSON file
    UpdateProfile {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base_url: Url,

    // Storage
    pub db_file: PathBuf,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,

    // HTTP client
    pub http_request_timeout: u64,
    pub http_connect_timeout: u64,
    pub token_fetch_timeout: u64,

    // Credential policy
    pub force_refresh: bool,
    pub synthesize_fallback_token: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Build configuration from parsed arguments (CLI > ENV > defaults)
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let api_base_url = Url::parse(&args.api_url)
            .with_context(|| format!("JOBBOARD_API_URL is not a valid URL: {}", args.api_url))?;

        let db_file = match args.db_file.as_deref() {
            Some(path) => expand_tilde(path),
            None => default_db_path()
                .context("Could not determine a data directory; set JOBBOARD_DB_FILE")?,
        };

        Ok(Config {
            api_base_url,
            db_file,
            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),
            http_request_timeout: args.http_timeout,
            http_connect_timeout: args.connect_timeout,
            token_fetch_timeout: args.token_timeout,
            force_refresh: args.force_refresh,
            synthesize_fallback_token: args.synthesize_token,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.api_base_url.scheme() {
            "http" | "https" => {}
            other => anyhow::bail!("JOBBOARD_API_URL must use http or https, got: {}", other),
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }
        if self.http_connect_timeout == 0 {
            anyhow::bail!("HTTP_CONNECT_TIMEOUT must be greater than zero");
        }
        if self.token_fetch_timeout == 0 {
            anyhow::bail!("TOKEN_FETCH_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// `<data dir>/jobboard-client/storage.sqlite3`
fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("jobboard-client").join("storage.sqlite3"))
}

fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

// === Interactive Login ===

/// Fill in whatever login fields were not given on the command line
pub fn complete_login_interactively(
    email: Option<String>,
    password: Option<String>,
    role: Option<Role>,
) -> Result<LoginRequest> {
    let email = match email {
        Some(email) => email,
        None => Input::<String>::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };

    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let role = match role {
        Some(role) => role,
        None => {
            let idx = Select::new()
                .with_prompt("Select your role")
                .items(&Role::ALL.map(|r| r.as_str()))
                .default(0)
                .interact()
                .context("Failed to read role selection")?;
            Role::ALL[idx]
        }
    };

    if email.is_empty() || password.is_empty() {
        anyhow::bail!("Email and password are required");
    }

    Ok(LoginRequest {
        email,
        password,
        role,
    })
}
