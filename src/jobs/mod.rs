//! Analysis jobs.

pub mod manager;
pub mod worker;

pub use manager::{JobLimits, JobManager};
pub use worker::AnalysisService;
