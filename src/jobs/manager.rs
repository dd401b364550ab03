//! Job registry and lifecycle state machine.
//!
//! The manager is the only writer of job records. Every transition is checked
//! against [`JobStatus::can_advance_to`]; progress only moves forward.

use crate::error::EngineError;
use crate::models::{AnalysisOptions, Job, JobId, JobStatus, JobStatusView, Report};
use crate::pipelines::PROMPT_VERSION;
use crate::reviews::{parse_app_url, StoreApp};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Input limits enforced when a job is created.
#[derive(Debug, Clone)]
pub struct JobLimits {
    pub supported_locales: Vec<String>,
    pub max_review_limit: u32,
    /// How long a completed job is handed out again for an identical request.
    pub reuse_ttl: Duration,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            supported_locales: vec!["en-US".to_string(), "en-GB".to_string()],
            max_review_limit: 1000,
            reuse_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Identity of an analysis request, used to reuse completed jobs.
pub fn request_hash(app_url: &str, options: &AnalysisOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app_url.trim().as_bytes());
    hasher.update(b"|");
    hasher.update(options.review_limit.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(options.locale.as_bytes());
    hasher.update(b"|");
    if let Some(budget) = options.token_budget {
        hasher.update(budget.to_string().as_bytes());
    }
    hasher.update(b"|");
    hasher.update(PROMPT_VERSION.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Job>>,
    limits: JobLimits,
}

impl JobManager {
    pub fn new(limits: JobLimits) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Check a request against the URL shape and the configured limits.
    pub fn validate(&self, app_url: &str, options: &AnalysisOptions) -> Result<StoreApp, EngineError> {
        let app = parse_app_url(app_url)?;

        if let Some(platform) = options.platform {
            if platform != app.platform {
                return Err(EngineError::Validation(format!(
                    "platform {} does not match URL store ({})",
                    platform, app.platform
                )));
            }
        }
        if !self.limits.supported_locales.contains(&options.locale) {
            return Err(EngineError::Validation(format!(
                "unsupported locale '{}' (supported: {})",
                options.locale,
                self.limits.supported_locales.join(", ")
            )));
        }
        if options.review_limit == 0 || options.review_limit > self.limits.max_review_limit {
            return Err(EngineError::Validation(format!(
                "review limit must be between 1 and {}, got {}",
                self.limits.max_review_limit, options.review_limit
            )));
        }
        Ok(app)
    }

    /// Validate the request and register a new job in `CREATED`.
    pub async fn create(&self, app_url: &str, options: AnalysisOptions) -> Result<JobId, EngineError> {
        let app = self.validate(app_url, &options)?;

        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            status: JobStatus::Created,
            progress: 0,
            created_at: now,
            updated_at: now,
            app_url: app_url.trim().to_string(),
            app_id: app.app_id,
            platform: app.platform,
            request_hash: request_hash(app_url, &options),
            options,
            result: None,
            error: None,
            tokens_used: 0,
        };
        let id = job.id;

        info!(job_id = %id, app_id = %job.app_id, platform = %job.platform, "Job created");
        self.jobs.write().await.insert(id, job);
        Ok(id)
    }

    /// A completed job for the same request, if one finished within the reuse TTL.
    pub async fn find_completed(&self, request_hash: &str) -> Option<JobId> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.limits.reuse_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == JobStatus::Completed && job.request_hash == request_hash)
            .filter(|job| now - job.updated_at < ttl)
            .max_by_key(|job| job.updated_at)
            .map(|job| job.id)
    }

    /// Move a job to `status`.
    ///
    /// `Completed` is only reachable through [`attach_result`](Self::attach_result).
    /// Entering `Failed` records `error`.
    pub async fn advance(
        &self,
        id: JobId,
        status: JobStatus,
        progress: u8,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if status == JobStatus::Completed || !job.status.can_advance_to(status) {
            return Err(EngineError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to: status,
            });
        }

        let from = job.status;
        job.status = status;
        job.progress = job.progress.max(progress.min(100));
        job.updated_at = Utc::now();
        if status == JobStatus::Failed {
            job.error = Some(error.unwrap_or_else(|| "job failed".to_string()));
            warn!(job_id = %id, from = %from, "Job failed: {}", job.error.as_deref().unwrap_or_default());
        } else {
            info!(job_id = %id, from = %from, to = %status, progress = job.progress, "Job advanced");
        }
        Ok(())
    }

    /// Raise progress within the current state. Lower values are ignored.
    pub async fn report_progress(&self, id: JobId, progress: u8) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if job.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to: job.status,
            });
        }

        let progress = progress.min(99);
        if progress > job.progress {
            job.progress = progress;
            job.updated_at = Utc::now();
            debug!(job_id = %id, progress, "Job progress");
        }
        Ok(())
    }

    /// Fail a job from whatever non-terminal state it is in.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<(), EngineError> {
        self.advance(id, JobStatus::Failed, 0, Some(error.into())).await
    }

    /// Store the report and complete the job.
    pub async fn attach_result(&self, id: JobId, report: Report) -> Result<(), EngineError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if job.status != JobStatus::AggregatingResults {
            return Err(EngineError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to: JobStatus::Completed,
            });
        }

        let available = [
            report.sentiment.is_available(),
            report.issues.is_available(),
            report.features.is_available(),
            report.monetization.is_available(),
            report.actions.is_available(),
        ];
        if !available.contains(&true) {
            return Err(EngineError::Validation(
                "report has no available sections".to_string(),
            ));
        }

        job.status = JobStatus::Completed;
        job.progress = 100;
        job.updated_at = Utc::now();
        job.tokens_used = report.total_token_cost;
        info!(
            job_id = %id,
            tokens_used = job.tokens_used,
            degraded = report.degraded.len(),
            "Job completed"
        );
        job.result = Some(report);
        Ok(())
    }

    pub async fn get_status(&self, id: JobId) -> Result<JobStatusView, EngineError> {
        let jobs = self.jobs.read().await;
        let job = jobs
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(JobStatusView {
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
        })
    }

    /// The report of a completed job.
    pub async fn get_result(&self, id: JobId) -> Result<Report, EngineError> {
        let jobs = self.jobs.read().await;
        let job = jobs
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        match (&job.status, &job.result) {
            (JobStatus::Completed, Some(report)) => Ok(report.clone()),
            _ => Err(EngineError::NotReady {
                job_id: id.to_string(),
                status: job.status,
            }),
        }
    }

    /// Snapshot of the full job record.
    pub async fn get_job(&self, id: JobId) -> Result<Job, EngineError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }
}
