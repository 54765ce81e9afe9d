/// Batch Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Evaluate every submission of a batch and assemble the Report.
///
/// **Architecture:**
/// 1. Validate submission completeness up front (single-threaded)
/// 2. One task per submission, at most W running at once (Semaphore)
/// 3. Each task runs a fresh `TestRunner` on the blocking pool, then bumps progress
/// 4. Wait for every task up to a global deadline of per-submission timeout x N
/// 5. Grade finished runs; record overrun or crashed runs as incomplete
/// 6. Cluster detector similarity pairs onto the Report
///
/// Width W bounds how many runs hold a permit at once. The runs themselves use the
/// caller runtime's shared blocking pool rather than a dedicated pool per batch.
///
/// This module is the glue layer - it knows nothing about:
/// - How calls are bounded (sandbox's job)
/// - How Results are scored (evaluator's job)
use crate::clustering;
use crate::evaluator;
use crate::progress::{Progress, ProgressSink, TracingProgress};
use crate::runner::TestRunner;
use crate::resolver::Resolver;
use crate::sandbox::Sandbox;
use crate::suite::Suite;
use crate::unit::BuildService;
use anyhow::{Context, Result};
use assessor_common::config::AssessorConfig;
use assessor_common::types::{CheckDefinition, ErrorCode, Outcome, Report, SimilarityPair, Submission};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const DEFAULT_SUBMISSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Scan `root` for one submission per subdirectory, sorted by name.
pub fn validate_submissions(root: &Path, expected: &BTreeSet<String>) -> Result<Vec<Submission>> {
    let mut directories: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("Failed to read submissions directory {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    directories.sort();

    let submissions: Vec<Submission> = directories
        .iter()
        .enumerate()
        .map(|(index, dir)| Submission::from_dir(index as u64 + 1, dir, expected))
        .collect();

    for submission in submissions.iter().filter(|s| !s.is_valid()) {
        warn!(
            submission = %submission.name,
            missing = ?submission.missing_files(),
            "Submission is incomplete"
        );
    }
    info!(
        root = %root.display(),
        total = submissions.len(),
        complete = submissions.iter().filter(|s| s.is_valid()).count(),
        "Validated submissions"
    );
    Ok(submissions)
}

pub struct BatchExecutor {
    runner: TestRunner,
    build: Arc<dyn BuildService>,
    concurrency: usize,
    submission_timeout: Duration,
    progress: Arc<dyn ProgressSink>,
    similarity: Vec<SimilarityPair>,
    cluster_threshold: f64,
}

impl BatchExecutor {
    pub fn new(suite: Arc<Suite>, build: Arc<dyn BuildService>, sandbox: Arc<Sandbox>) -> Self {
        Self {
            runner: TestRunner::new(suite, build.clone(), sandbox),
            build,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            submission_timeout: DEFAULT_SUBMISSION_TIMEOUT,
            progress: Arc::new(TracingProgress),
            similarity: Vec::new(),
            cluster_threshold: clustering::DEFAULT_THRESHOLD,
        }
    }

    pub fn from_config(
        suite: Arc<Suite>,
        build: Arc<dyn BuildService>,
        sandbox: Arc<Sandbox>,
        config: &AssessorConfig,
    ) -> Self {
        let mut executor = Self::new(suite, build, sandbox)
            .with_concurrency(config.batch.concurrency)
            .with_submission_timeout(config.batch.submission_timeout())
            .with_cluster_threshold(config.clustering.threshold);
        executor.runner = executor
            .runner
            .with_resolver(Resolver::new(config.resolver.name_tolerance));
        executor
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Detector scores to cluster onto the Report once the batch is graded.
    pub fn with_similarity(mut self, pairs: Vec<SimilarityPair>) -> Self {
        self.similarity = pairs;
        self
    }

    pub fn with_cluster_threshold(mut self, threshold: f64) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    pub fn suite(&self) -> &Suite {
        self.runner.suite()
    }

    /// Discover submissions under `root`, validate them against the suite's
    /// required files, and evaluate them.
    pub async fn run_directory(&self, description: &str, root: &Path) -> Result<Report> {
        let expected = self.suite().required_files();
        let submissions = validate_submissions(root, &expected)?;
        Ok(self.run(description, submissions).await)
    }

    #[tracing::instrument(skip(self, submissions), fields(suite = %self.suite().name(), submissions = submissions.len()))]
    pub async fn run(&self, description: &str, submissions: Vec<Submission>) -> Report {
        let total = submissions.len();
        let mut report = Report::new(description);
        let definitions: Vec<CheckDefinition> = self.suite().definitions().cloned().collect();
        let max = evaluator::max_grade(&definitions);

        info!(
            report_id = %report.id,
            concurrency = self.concurrency,
            timeout_secs = self.submission_timeout.as_secs(),
            "Starting batch"
        );

        let progress = Arc::new(Progress::new(total, self.progress.clone()));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let scale = u32::try_from(total).unwrap_or(u32::MAX);
        let deadline = Instant::now() + self.submission_timeout.saturating_mul(scale);

        let mut tasks = Vec::with_capacity(total);
        for submission in submissions {
            let submission = Arc::new(submission);
            let runner = self.runner.clone();
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            let task_submission = submission.clone();

            let handle = tokio::spawn(async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                tokio::task::spawn_blocking(move || {
                    let output = runner.run(task_submission.clone());
                    progress.step(Some(task_submission.name.as_str()));
                    output
                })
                .await
            });
            tasks.push((submission, handle));
        }

        for (submission, handle) in tasks {
            let entry = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(output))) => evaluator::evaluate(Submission::clone(&submission), output, max),
                Ok(Ok(Err(e))) | Ok(Err(e)) => {
                    error!(submission = %submission.name, error = %e, "Evaluation task failed");
                    evaluator::incomplete(
                        Submission::clone(&submission),
                        &definitions,
                        Outcome::error(ErrorCode::UnexpectedError, format!("Evaluation crashed: {}", e)),
                        max,
                    )
                }
                Err(_) => {
                    warn!(submission = %submission.name, "Batch deadline passed, abandoning evaluation");
                    evaluator::incomplete(
                        Submission::clone(&submission),
                        &definitions,
                        Outcome::error(
                            ErrorCode::SchedulerTimeout,
                            "Evaluation did not finish before the batch deadline",
                        ),
                        max,
                    )
                }
            };
            report.add(entry);
        }

        self.build.release();

        if !self.similarity.is_empty() {
            clustering::annotate(&mut report, &self.similarity, self.cluster_threshold);
        }

        info!(
            report_id = %report.id,
            completed = report.iter().filter(|e| e.completed).count(),
            total,
            "Batch finished"
        );
        report
    }
}
