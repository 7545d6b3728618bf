// Build triggers and the per-job poll trigger
//
// A DosTrigger polls by running its script; a present cause is handed to a
// BuildTrigger, which schedules the build on the CI server.

use crate::errors::{ScriptError, TriggerError};
use crate::models::{Cause, ExecutionEnvironment, TickOutcome};
use crate::schedule::PollSchedule;
use crate::script::ScriptRunner;
use crate::telemetry;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// BuildTrigger schedules a build of a job with a human-readable cause
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    async fn schedule_build(&self, job: &str, cause: &Cause) -> Result<(), TriggerError>;
}

/// LogBuildTrigger only logs the builds it would schedule
#[derive(Debug, Clone, Default)]
pub struct LogBuildTrigger;

#[async_trait]
impl BuildTrigger for LogBuildTrigger {
    async fn schedule_build(&self, job: &str, cause: &Cause) -> Result<(), TriggerError> {
        info!(job, cause = %cause, "Build requested (dry run)");
        Ok(())
    }
}

/// HttpBuildTrigger calls the remote build endpoint of a Jenkins-compatible server.
///
/// Folder jobs are given as `folder/job` and map to `/job/folder/job/job/build`.
pub struct HttpBuildTrigger {
    client: Client,
    base_url: Url,
    token: Option<String>,
    credentials: Option<(String, String)>,
}

impl HttpBuildTrigger {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, TriggerError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            TriggerError::InvalidConfiguration(format!("Invalid base URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TriggerError::InvalidConfiguration(format!(
                "Base URL '{}' cannot hold a path",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| {
                TriggerError::InvalidConfiguration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token: None,
            credentials: None,
        })
    }

    /// Remote trigger token configured on the job
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// User and API token for basic authentication
    pub fn with_credentials(mut self, user: impl Into<String>, api_token: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), api_token.into()));
        self
    }

    fn build_url(&self, job: &str) -> Result<Url, TriggerError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TriggerError::InvalidConfiguration("Base URL cannot hold a path".to_string())
            })?;
            segments.pop_if_empty();
            for name in job.split('/').filter(|s| !s.is_empty()) {
                segments.push("job").push(name);
            }
            segments.push("build");
        }
        Ok(url)
    }
}

#[async_trait]
impl BuildTrigger for HttpBuildTrigger {
    #[instrument(skip(self, cause))]
    async fn schedule_build(&self, job: &str, cause: &Cause) -> Result<(), TriggerError> {
        let url = self.build_url(job)?;

        let mut query = vec![("delay", "0sec"), ("cause", cause.as_str())];
        if let Some(token) = &self.token {
            query.push(("token", token.as_str()));
        }

        let mut request = self.client.post(url).query(&query);
        if let Some((user, api_token)) = &self.credentials {
            request = request.basic_auth(user, Some(api_token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TriggerError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), "Build request accepted");
        Ok(())
    }
}

/// Everything a DosTrigger needs to know about its job
#[derive(Debug, Clone)]
pub struct TriggerDefinition {
    pub job: String,
    pub schedule: PollSchedule,
    pub script: String,
    pub workspace: PathBuf,
    pub environment: ExecutionEnvironment,
}

/// DosTrigger polls one job by running its batch script
pub struct DosTrigger {
    definition: TriggerDefinition,
    runner: Arc<ScriptRunner>,
    build_trigger: Arc<dyn BuildTrigger>,
    quiet_down: Arc<AtomicBool>,
}

impl DosTrigger {
    pub fn new(
        definition: TriggerDefinition,
        runner: Arc<ScriptRunner>,
        build_trigger: Arc<dyn BuildTrigger>,
    ) -> Self {
        Self {
            definition,
            runner,
            build_trigger,
            quiet_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a quiet-down flag; polls are skipped while it is set
    pub fn with_quiet_down(mut self, flag: Arc<AtomicBool>) -> Self {
        self.quiet_down = flag;
        self
    }

    pub fn job(&self) -> &str {
        &self.definition.job
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.definition.schedule
    }

    /// Poll once: run the script and schedule a build if it reported a cause.
    ///
    /// Never fails; problems are logged and reported as `TickOutcome::Failed`.
    #[instrument(skip(self), fields(job = %self.definition.job))]
    pub async fn run(&self) -> TickOutcome {
        let job = self.definition.job.as_str();

        if self.quiet_down.load(Ordering::SeqCst) {
            debug!("Quieting down, skipping poll");
            return TickOutcome::Skipped;
        }

        telemetry::record_poll(job);
        let started = Instant::now();
        let result = self
            .runner
            .run(
                &self.definition.script,
                &self.definition.environment,
                &self.definition.workspace,
            )
            .await;
        telemetry::record_script_duration(job, started.elapsed().as_secs_f64());

        let cause = match result {
            Ok(cause) => cause,
            Err(e) => {
                if let ScriptError::Execution { cause, .. } = &e {
                    if cause.is_present() {
                        warn!(cause = %cause, "Ignoring cause reported by a failed run");
                    }
                }
                error!(error = %e, "Problem while running trigger script");
                telemetry::record_poll_failure(job, e.kind());
                return TickOutcome::Failed(e.to_string());
            }
        };

        let Some(cause) = cause.into_option() else {
            debug!("No cause reported");
            return TickOutcome::NoCause;
        };

        match self.build_trigger.schedule_build(job, &cause).await {
            Ok(()) => {
                info!(cause = %cause, "Build scheduled");
                telemetry::record_build_scheduled(job);
                TickOutcome::Triggered(cause)
            }
            Err(e) => {
                error!(error = %e, cause = %cause, "Failed to schedule build");
                telemetry::record_poll_failure(job, "build_trigger");
                TickOutcome::Failed(e.to_string())
            }
        }
    }
}
