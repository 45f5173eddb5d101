// Endpoint catalogue

use super::{segment, Endpoint};

pub fn all_jobs(keyword: &str) -> Endpoint {
    Endpoint::get("/job/get").with_query("keyword", keyword).public()
}

pub fn job_by_id(job_id: &str) -> Endpoint {
    Endpoint::get(format!("/job/get/{}", segment(job_id))).public()
}

pub fn admin_jobs() -> Endpoint {
    Endpoint::get("/job/getadminjobs")
}

pub fn post_job() -> Endpoint {
    Endpoint::post("/job/post")
}

pub fn user_companies() -> Endpoint {
    Endpoint::get("/company/get")
}

pub fn company_by_id(company_id: &str) -> Endpoint {
    Endpoint::get(format!("/company/get/{}", segment(company_id)))
}

pub fn register_company() -> Endpoint {
    Endpoint::post("/company/register")
}

pub fn update_company(company_id: &str) -> Endpoint {
    Endpoint::put(format!("/company/update/{}", segment(company_id)))
}

pub fn apply_for_job(job_id: &str) -> Endpoint {
    Endpoint::get(format!("/application/apply/{}", segment(job_id)))
}

pub fn applied_jobs() -> Endpoint {
    Endpoint::get("/application/get")
}

pub fn job_applicants(job_id: &str) -> Endpoint {
    Endpoint::get(format!("/application/{}/applicants", segment(job_id)))
}

pub fn update_application_status(application_id: &str) -> Endpoint {
    Endpoint::post(format!(
        "/application/status/{}/update",
        segment(application_id)
    ))
}

pub fn update_profile() -> Endpoint {
    Endpoint::post("/user/profile/update")
}

pub fn login() -> Endpoint {
    Endpoint::post("/user/login")
}

pub fn logout() -> Endpoint {
    Endpoint::get("/user/logout")
}

/// Cookie-authenticated lookup of a fresh token for a user
pub fn fresh_token(user_id: &str) -> Endpoint {
    Endpoint::get(format!("/users/generate-token/{}", segment(user_id)))
}
