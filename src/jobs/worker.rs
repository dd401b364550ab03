//! Job driver: fetch, analyze, aggregate.

use super::manager::{request_hash, JobManager};
use crate::analysis::{aggregate, describe_failures, CorpusSummary};
use crate::error::{EngineError, FetchError};
use crate::models::{AnalysisOptions, JobId, JobStatus, JobStatusView, Report};
use crate::reviews::{FetchRequest, ReviewFetcher};
use crate::runner::{PipelineRunner, TokenBudget};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const PROGRESS_FETCHING: u8 = 5;
const PROGRESS_FETCHED: u8 = 20;
/// Progress spread over the pipelines as they settle.
const PROGRESS_ANALYSIS_SPAN: usize = 70;
const PROGRESS_AGGREGATING: u8 = 90;

/// Public job interface: create a job, poll its status, read its report.
///
/// Cheap to clone; clones share the same registry and runner.
#[derive(Clone)]
pub struct AnalysisService {
    jobs: Arc<JobManager>,
    fetcher: Arc<dyn ReviewFetcher>,
    runner: Arc<PipelineRunner>,
    default_budget: u64,
}

impl AnalysisService {
    pub fn new(
        jobs: Arc<JobManager>,
        fetcher: Arc<dyn ReviewFetcher>,
        runner: Arc<PipelineRunner>,
        default_budget: u64,
    ) -> Self {
        Self {
            jobs,
            fetcher,
            runner,
            default_budget,
        }
    }

    /// Validate and start an analysis. Returns at once with the job id.
    ///
    /// An identical request that already completed returns that job instead.
    pub async fn create_job(
        &self,
        app_url: &str,
        options: AnalysisOptions,
    ) -> Result<JobId, EngineError> {
        self.jobs.validate(app_url, &options)?;
        if let Some(existing) = self.jobs.find_completed(&request_hash(app_url, &options)).await {
            info!(job_id = %existing, "Reusing completed job for identical request");
            return Ok(existing);
        }

        let id = self.jobs.create(app_url, options).await?;
        let service = self.clone();
        tokio::spawn(async move { service.process_job(id).await });
        Ok(id)
    }

    pub async fn get_status(&self, id: JobId) -> Result<JobStatusView, EngineError> {
        self.jobs.get_status(id).await
    }

    pub async fn get_result(&self, id: JobId) -> Result<Report, EngineError> {
        self.jobs.get_result(id).await
    }

    /// Drive a job to a terminal state.
    pub async fn process_job(&self, id: JobId) {
        if let Err(e) = self.drive(id).await {
            match e {
                EngineError::InvalidTransition { .. } => {
                    warn!(job_id = %id, "Job stopped: {}", e);
                }
                other => {
                    error!(job_id = %id, "Job processing error: {}", other);
                    if let Err(e) = self.jobs.fail(id, other.to_string()).await {
                        warn!(job_id = %id, "Could not mark job failed: {}", e);
                    }
                }
            }
        }
    }

    async fn drive(&self, id: JobId) -> Result<(), EngineError> {
        let job = self.jobs.get_job(id).await?;
        self.jobs
            .advance(id, JobStatus::FetchingReviews, PROGRESS_FETCHING, None)
            .await?;

        let request = FetchRequest {
            app_url: job.app_url.clone(),
            app_id: job.app_id.clone(),
            platform: job.platform,
            locale: job.options.locale.clone(),
            limit: job.options.review_limit,
        };
        let corpus = match self.fetcher.fetch(&request).await {
            Ok(corpus) if !corpus.is_empty() => corpus,
            Ok(_) => {
                let err = FetchError::Empty {
                    app_id: job.app_id.clone(),
                    locale: job.options.locale.clone(),
                };
                return self.jobs.fail(id, err.to_string()).await;
            }
            Err(err) => {
                warn!(job_id = %id, "Review fetch failed: {}", err);
                return self.jobs.fail(id, err.to_string()).await;
            }
        };
        info!(job_id = %id, reviews = corpus.len(), "Reviews fetched");
        self.jobs.report_progress(id, PROGRESS_FETCHED).await?;

        self.jobs
            .advance(id, JobStatus::AnalyzingReviews, PROGRESS_FETCHED, None)
            .await?;

        let corpus = Arc::new(corpus);
        let budget = TokenBudget::new(job.options.token_budget.unwrap_or(self.default_budget));
        let total = self.runner.kinds().len().max(1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = self.runner.run_with_events(corpus.clone(), budget, Some(tx));
        let progress = async {
            let mut settled = 0usize;
            while rx.recv().await.is_some() {
                settled += 1;
                let step = PROGRESS_FETCHED as usize + PROGRESS_ANALYSIS_SPAN * settled / total;
                if let Err(e) = self.jobs.report_progress(id, step as u8).await {
                    warn!(job_id = %id, "Progress update rejected: {}", e);
                }
            }
        };
        let (run, ()) = tokio::join!(run, progress);

        if run.all_failed() {
            return self.jobs.fail(id, describe_failures(&run.results)).await;
        }

        self.jobs
            .advance(id, JobStatus::AggregatingResults, PROGRESS_AGGREGATING, None)
            .await?;

        let report = aggregate(&CorpusSummary::from(corpus.as_ref()), &run);
        if report.is_degraded() {
            warn!(job_id = %id, degraded = ?report.degraded, "Report is missing sections");
        }
        self.jobs.attach_result(id, report).await
    }
}
