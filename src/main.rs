use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use jobboard_client::api::JobBoardApi;
use jobboard_client::auth::{
    AuthStateStore, CookieJar, CredentialResolver, SessionManager, SqliteStorage, Storage,
    COOKIE_KEY,
};
use jobboard_client::config::{self, CliArgs, Command, Config, LogFormat};
use jobboard_client::error::RequestError;
use jobboard_client::http_client::{self, JobBoardHttpClient};
use jobboard_client::models::{
    CompanyUpdate, Envelope, NewCompany, NewJob, ProfileUpdate, StatusUpdate,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    init_logging(&config);
    tracing::debug!(
        api = %config.api_base_url,
        db_file = %config.db_file.display(),
        force_refresh = config.force_refresh,
        "Configuration loaded"
    );

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.db_file)?);
    let cookies = Arc::new(load_cookies(storage.as_ref())?);
    let store = AuthStateStore::new(storage.clone());

    let client =
        http_client::build_client(config.http_connect_timeout, config.http_request_timeout)?;

    let resolver = Arc::new(
        CredentialResolver::new(
            store.clone(),
            cookies.clone(),
            client.clone(),
            config.api_base_url.clone(),
        )
        .with_token_fetch_timeout(Duration::from_secs(config.token_fetch_timeout))
        .with_synthesized_fallback(config.synthesize_fallback_token),
    );

    let http = JobBoardHttpClient::new(
        client.clone(),
        config.api_base_url.clone(),
        resolver.clone(),
        cookies.clone(),
    )
    .with_force_refresh(config.force_refresh);

    let session = SessionManager::new(client, config.api_base_url.clone(), store, cookies.clone())
        .with_synthesized_fallback(config.synthesize_fallback_token);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    let api = JobBoardApi::new(http).with_cancellation(cancel);

    let outcome = run(args.command, &api, &session, &resolver).await;

    storage
        .set_item(COOKIE_KEY, &cookies.to_cookie_string().await)
        .context("Failed to save cookies")?;

    if let Err(e) = outcome {
        tracing::debug!("Command failed: {:?}", e);
        match &e {
            RequestError::Internal(inner) => eprintln!("Error: {:#}", inner),
            _ => eprintln!("Error: {}", e.user_message()),
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize logging on stderr so stdout stays machine-readable
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_file(true).with_line_number(true).init(),
    }
}

fn load_cookies(storage: &dyn Storage) -> Result<CookieJar> {
    let saved = storage
        .get_item(COOKIE_KEY)
        .context("Failed to load saved cookies")?;
    Ok(saved
        .map(|raw| CookieJar::from_cookie_string(&raw))
        .unwrap_or_default())
}

async fn run(
    command: Command,
    api: &JobBoardApi,
    session: &SessionManager,
    resolver: &CredentialResolver,
) -> Result<(), RequestError> {
    let envelope = match command {
        Command::Login {
            email,
            role,
            password,
        } => {
            let request = config::complete_login_interactively(email, password, role)?;
            session.login(&request).await?
        }
        Command::Logout => session.logout().await?,
        Command::Whoami => {
            match session.current_user() {
                Some(user) => print_json(user.as_value())?,
                None => println!("Not logged in"),
            }
            return Ok(());
        }
        Command::Token { refresh, persist } => {
            let credential = resolver
                .resolve(refresh)
                .await
                .ok_or(RequestError::NoCredentialAvailable)?;
            println!("source: {}", credential.source());
            println!("token:  {}", credential.redacted());
            if persist {
                resolver.persist(credential.token())?;
                println!("persisted");
            }
            return Ok(());
        }
        Command::Jobs { keyword } => api.get_all_jobs(&keyword).await?,
        Command::Job { id } => api.get_job_by_id(&id).await?,
        Command::AdminJobs => api.get_admin_jobs().await?,
        Command::PostJob { file } => {
            let job: NewJob = read_json(&file)?;
            api.post_job(&job).await?
        }
        Command::Companies => api.get_user_companies().await?,
        Command::Company { id } => api.get_company_by_id(&id).await?,
        Command::RegisterCompany { name } => {
            api.register_company(&NewCompany { company_name: name })
                .await?
        }
        Command::UpdateCompany { id, file } => {
            let update: CompanyUpdate = read_json(&file)?;
            api.update_company(&id, &update).await?
        }
        Command::Apply { job_id } => api.apply_for_job(&job_id).await?,
        Command::Applied => api.get_applied_jobs().await?,
        Command::Applicants { job_id } => api.get_job_applicants(&job_id).await?,
        Command::SetStatus {
            application_id,
            status,
        } => {
            api.update_application_status(&application_id, &StatusUpdate { status })
                .await?
        }
        Command::UpdateProfile { file } => {
            let update: ProfileUpdate = read_json(&file)?;
            api.update_profile(&update).await?
        }
    };

    print_envelope(&envelope)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_envelope(envelope: &Envelope) -> Result<(), RequestError> {
    if let Some(message) = envelope.message.as_deref() {
        eprintln!("{}", message);
    }
    print_json(&envelope.data)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), RequestError> {
    let out = serde_json::to_string_pretty(value).context("Failed to format response")?;
    println!("{}", out);
    Ok(())
}

/// Cancel in-flight requests on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, cancelling request...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, cancelling request...");
        },
    }

    cancel.cancel();
}
