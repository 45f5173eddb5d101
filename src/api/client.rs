use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{endpoints, Endpoint};
use crate::error::{RequestError, Result};
use crate::http_client::JobBoardHttpClient;
use crate::models::{CompanyUpdate, Envelope, NewCompany, NewJob, ProfileUpdate, StatusUpdate};

/// Typed job board operations, all routed through the dispatcher
#[derive(Clone)]
pub struct JobBoardApi {
    http: JobBoardHttpClient,
    cancel: CancellationToken,
}

impl JobBoardApi {
    pub fn new(http: JobBoardHttpClient) -> Self {
        Self {
            http,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel every in-flight and future call through this handle when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn http(&self) -> &JobBoardHttpClient {
        &self.http
    }

    async fn call(&self, endpoint: Endpoint) -> Result<Envelope> {
        self.http
            .dispatch_with_cancel(&endpoint, None, &self.cancel)
            .await
    }

    async fn call_with<B: Serialize>(&self, endpoint: Endpoint, body: &B) -> Result<Envelope> {
        let body: Value = serde_json::to_value(body)
            .map_err(|e| RequestError::Internal(anyhow::anyhow!("Failed to encode request body: {}", e)))?;
        self.http
            .dispatch_with_cancel(&endpoint, Some(&body), &self.cancel)
            .await
    }

    // ==================================================================================================
    // Jobs
    // ==================================================================================================

    /// Public; anonymous callers get the same listing
    pub async fn get_all_jobs(&self, keyword: &str) -> Result<Envelope> {
        self.call(endpoints::all_jobs(keyword)).await
    }

    /// Public; an anonymous response simply lacks per-user fields such as `applications`
    pub async fn get_job_by_id(&self, job_id: &str) -> Result<Envelope> {
        self.call(endpoints::job_by_id(job_id)).await
    }

    pub async fn get_admin_jobs(&self) -> Result<Envelope> {
        self.call(endpoints::admin_jobs()).await
    }

    pub async fn post_job(&self, job: &NewJob) -> Result<Envelope> {
        self.call_with(endpoints::post_job(), job).await
    }

    // ==================================================================================================
    // Companies
    // ==================================================================================================

    pub async fn get_user_companies(&self) -> Result<Envelope> {
        self.call(endpoints::user_companies()).await
    }

    pub async fn get_company_by_id(&self, company_id: &str) -> Result<Envelope> {
        self.call(endpoints::company_by_id(company_id)).await
    }

    pub async fn register_company(&self, company: &NewCompany) -> Result<Envelope> {
        self.call_with(endpoints::register_company(), company).await
    }

    pub async fn update_company(&self, company_id: &str, update: &CompanyUpdate) -> Result<Envelope> {
        self.call_with(endpoints::update_company(company_id), update)
            .await
    }

    // ==================================================================================================
    // Applications
    // ==================================================================================================

    pub async fn apply_for_job(&self, job_id: &str) -> Result<Envelope> {
        self.call(endpoints::apply_for_job(job_id)).await
    }

    pub async fn get_applied_jobs(&self) -> Result<Envelope> {
        self.call(endpoints::applied_jobs()).await
    }

    pub async fn get_job_applicants(&self, job_id: &str) -> Result<Envelope> {
        self.call(endpoints::job_applicants(job_id)).await
    }

    pub async fn update_application_status(
        &self,
        application_id: &str,
        update: &StatusUpdate,
    ) -> Result<Envelope> {
        self.call_with(endpoints::update_application_status(application_id), update)
            .await
    }

    // ==================================================================================================
    // Profile
    // ==================================================================================================

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Envelope> {
        self.call_with(endpoints::update_profile(), update).await
    }
}
