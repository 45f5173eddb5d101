// Data models for job board requests and responses

pub mod application;
pub mod company;
pub mod envelope;
pub mod job;
pub mod user;

pub use application::{ApplicationStatus, StatusUpdate};
pub use company::{CompanyUpdate, NewCompany};
pub use envelope::Envelope;
pub use job::NewJob;
pub use user::{LoginRequest, ProfileUpdate, Role};
