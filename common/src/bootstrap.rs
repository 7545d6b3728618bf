// Bootstrap utilities: turn settings into ready-to-run components

use crate::config::{BuildMode, BuildSettings, RunnerSettings, Settings, TriggerSettings};
use crate::executor::{LocalFileSystem, TokioProcessExecutor};
use crate::models::ExecutionEnvironment;
use crate::schedule::PollSchedule;
use crate::script::{RunnerConfig, ScriptRunner};
use crate::trigger::{BuildTrigger, DosTrigger, HttpBuildTrigger, LogBuildTrigger, TriggerDefinition};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Script runner backed by the local file system and tokio processes
pub fn init_script_runner(settings: &RunnerSettings) -> Arc<ScriptRunner> {
    let executor = match settings.timeout_seconds {
        Some(secs) => TokioProcessExecutor::with_timeout(Duration::from_secs(secs)),
        None => TokioProcessExecutor::new(),
    };

    let config = RunnerConfig {
        interpreter: settings.interpreter.clone(),
        cause_variable: settings.cause_variable.clone(),
        log_file_name: settings.log_file_name.clone(),
    };

    Arc::new(ScriptRunner::new(
        config,
        Arc::new(LocalFileSystem::default()),
        Arc::new(executor),
    ))
}

/// Build trigger selected by `build.mode`
///
/// # Errors
/// Returns error if the HTTP trigger cannot be configured
pub fn init_build_trigger(settings: &BuildSettings) -> Result<Arc<dyn BuildTrigger>> {
    match settings.mode {
        BuildMode::Log => {
            info!("Build trigger in dry-run mode, builds are only logged");
            Ok(Arc::new(LogBuildTrigger))
        }
        BuildMode::Http => {
            let base_url = settings
                .base_url
                .as_deref()
                .context("build.base_url is required in http mode")?;

            let mut trigger = HttpBuildTrigger::new(base_url, settings.timeout_seconds)
                .context("Failed to create HTTP build trigger")?;
            if let Some(token) = &settings.token {
                trigger = trigger.with_token(token);
            }
            if let (Some(user), Some(api_token)) = (&settings.user, &settings.api_token) {
                trigger = trigger.with_credentials(user, api_token);
            }

            info!(base_url, "HTTP build trigger initialized");
            Ok(Arc::new(trigger))
        }
    }
}

/// Assemble the environment a trigger's script runs with
///
/// An empty parameter list is only warned about; the script still runs.
pub fn build_environment(settings: &TriggerSettings) -> ExecutionEnvironment {
    if settings.parameters.is_empty() {
        warn!(job = %settings.job, "No job parameters configured, running with the base environment only");
    }

    let base = if settings.inherit_env {
        ExecutionEnvironment::inherit()
    } else {
        ExecutionEnvironment::new()
    };
    base.with_parameters(&settings.parameters)
}

/// Create one DosTrigger per configured trigger
///
/// # Errors
/// Returns error if a schedule is invalid or a script file cannot be read
pub fn init_triggers(
    settings: &Settings,
    runner: Arc<ScriptRunner>,
    build_trigger: Arc<dyn BuildTrigger>,
) -> Result<Vec<DosTrigger>> {
    settings
        .triggers
        .iter()
        .map(|trigger| {
            let schedule = PollSchedule::parse(&trigger.schedule, &trigger.timezone)
                .with_context(|| format!("Invalid schedule for job '{}'", trigger.job))?;
            let script = trigger
                .load_script()
                .with_context(|| format!("Failed to load script for job '{}'", trigger.job))?;

            info!(
                job = %trigger.job,
                schedule = %trigger.schedule,
                timezone = %trigger.timezone,
                workspace = %trigger.workspace.display(),
                "Trigger configured"
            );

            let definition = TriggerDefinition {
                job: trigger.job.clone(),
                schedule,
                script,
                workspace: trigger.workspace.clone(),
                environment: build_environment(trigger),
            };
            Ok(DosTrigger::new(
                definition,
                runner.clone(),
                build_trigger.clone(),
            ))
        })
        .collect()
}
