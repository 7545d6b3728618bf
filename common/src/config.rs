// Configuration management with layered configuration (file, env)
//
// Files written before multi-trigger support carry a single `[trigger]`
// table and no `version`; they are migrated on load.

use crate::models::Parameter;
use crate::schedule::{parse_cron_expression, parse_timezone};
use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current configuration file version
pub const CONFIG_VERSION: u32 = 2;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub triggers: Vec<TriggerSettings>,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Version of the file this was migrated from, if it needed migrating
    #[serde(skip)]
    pub migrated_from: Option<u32>,
}

/// One polled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub job: String,
    /// Cron expression, 5-field or with a leading seconds field
    pub schedule: String,
    #[serde(default = "default_timezone_name")]
    pub timezone: String,
    /// Inline batch script
    #[serde(default)]
    pub script: Option<String>,
    /// Batch script read from disk, used when `script` is not set
    #[serde(default)]
    pub script_file: Option<PathBuf>,
    pub workspace: PathBuf,
    /// Start from the scheduler's own environment
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl TriggerSettings {
    /// Script text, inline or loaded from `script_file`
    pub fn load_script(&self) -> std::io::Result<String> {
        match (&self.script, &self.script_file) {
            (Some(script), _) => Ok(script.clone()),
            (None, Some(path)) => std::fs::read_to_string(path),
            (None, None) => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Trigger '{}' has no script", self.job),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub interpreter: Vec<String>,
    pub cause_variable: String,
    pub log_file_name: String,
    /// Kill scripts running longer than this; unlimited when unset
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Only log the builds that would be scheduled
    Log,
    /// Call the CI server's remote build endpoint
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub mode: BuildMode,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub api_token: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

/// On-disk shape accepted by the loader, including the legacy layout
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    trigger: Option<TriggerSettings>,
    #[serde(default)]
    triggers: Vec<TriggerSettings>,
    #[serde(default)]
    runner: RunnerSettings,
    #[serde(default)]
    build: BuildSettings,
    #[serde(default)]
    observability: ObservabilityConfig,
}

impl RawSettings {
    fn migrate(self) -> Result<Settings, ConfigError> {
        let version = self.version.unwrap_or(1);
        if version > CONFIG_VERSION {
            return Err(ConfigError::Message(format!(
                "Unsupported configuration version {} (newest known is {})",
                version, CONFIG_VERSION
            )));
        }

        let mut triggers = self.triggers;
        let mut migrated_from = None;
        if let Some(legacy) = self.trigger {
            if version >= CONFIG_VERSION {
                return Err(ConfigError::Message(
                    "Use [[triggers]] instead of [trigger] in version 2 configuration".to_string(),
                ));
            }
            triggers.insert(0, legacy);
            migrated_from = Some(version);
        }

        Ok(Settings {
            version: CONFIG_VERSION,
            triggers,
            runner: self.runner,
            build: self.build,
            observability: self.observability,
            migrated_from,
        })
    }
}

impl Settings {
    /// Load configuration with layered precedence: file → local file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let config = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize::<RawSettings>()?.migrate()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.triggers.is_empty() {
            return Err("At least one trigger must be configured".to_string());
        }

        let mut seen = Vec::new();
        for trigger in &self.triggers {
            if trigger.job.trim().is_empty() {
                return Err("Trigger job name cannot be empty".to_string());
            }
            if seen.contains(&trigger.job.as_str()) {
                return Err(format!("Trigger for job '{}' is configured twice", trigger.job));
            }
            seen.push(trigger.job.as_str());

            parse_cron_expression(&trigger.schedule).map_err(|e| e.to_string())?;
            parse_timezone(&trigger.timezone).map_err(|e| e.to_string())?;

            if trigger.script.is_none() && trigger.script_file.is_none() {
                return Err(format!(
                    "Trigger '{}' needs either script or script_file",
                    trigger.job
                ));
            }
            if trigger.workspace.as_os_str().is_empty() {
                return Err(format!("Trigger '{}' workspace cannot be empty", trigger.job));
            }
            if trigger.parameters.iter().any(|p| p.name.is_empty()) {
                return Err(format!(
                    "Trigger '{}' has a parameter without a name",
                    trigger.job
                ));
            }
        }

        if self.runner.interpreter.is_empty() {
            return Err("Runner interpreter cannot be empty".to_string());
        }
        if !is_batch_variable_name(&self.runner.cause_variable) {
            return Err(format!(
                "Runner cause_variable '{}' must only contain letters, digits and underscores",
                self.runner.cause_variable
            ));
        }
        if self.runner.log_file_name.trim().is_empty() {
            return Err("Runner log_file_name cannot be empty".to_string());
        }
        if self.runner.timeout_seconds == Some(0) {
            return Err("Runner timeout_seconds must be greater than 0".to_string());
        }

        if matches!(self.build.mode, BuildMode::Http) {
            match &self.build.base_url {
                Some(url) if !url.is_empty() => {}
                _ => return Err("Build base_url is required when mode is 'http'".to_string()),
            }
            if self.build.user.is_some() != self.build.api_token.is_some() {
                return Err("Build user and api_token must be set together".to_string());
            }
        }
        if self.build.timeout_seconds == 0 {
            return Err("Build timeout_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Names that survive `set NAME=` and `%NAME%` expansion unchanged
fn is_batch_variable_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]+$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_timezone_name() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            interpreter: vec!["cmd".to_string(), "/c".to_string(), "call".to_string()],
            cause_variable: "CAUSE".to_string(),
            log_file_name: "dos-trigger.log".to_string(),
            timeout_seconds: None,
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            mode: BuildMode::Log,
            base_url: None,
            token: None,
            user: None,
            api_token: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            triggers: vec![TriggerSettings {
                job: "example".to_string(),
                schedule: "*/5 * * * *".to_string(),
                timezone: default_timezone_name(),
                script: Some("rem set CAUSE=why the build should run".to_string()),
                script_file: None,
                workspace: PathBuf::from("workspace/example"),
                inherit_env: true,
                parameters: Vec::new(),
            }],
            runner: RunnerSettings::default(),
            build: BuildSettings::default(),
            observability: ObservabilityConfig::default(),
            migrated_from: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, content: &str) {
        std::fs::write(dir.join("default.toml"), content).unwrap();
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_job_name() {
        let mut settings = Settings::default();
        settings.triggers[0].job = "  ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_invalid_cron() {
        let mut settings = Settings::default();
        settings.triggers[0].schedule = "every now and then".to_string();
        assert!(settings.validate().unwrap_err().contains("Invalid cron expression"));
    }

    #[test]
    fn test_validation_catches_missing_script() {
        let mut settings = Settings::default();
        settings.triggers[0].script = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_duplicate_jobs() {
        let mut settings = Settings::default();
        let duplicate = settings.triggers[0].clone();
        settings.triggers.push(duplicate);
        assert!(settings.validate().unwrap_err().contains("twice"));
    }

    #[test]
    fn test_validation_catches_unusable_cause_variable() {
        let mut settings = Settings::default();
        for name in ["", "A B", "CAUSE%", "A=B", "X&Y", " CAUSE"] {
            settings.runner.cause_variable = name.to_string();
            assert!(
                settings.validate().unwrap_err().contains("cause_variable"),
                "accepted {:?}",
                name
            );
        }
        settings.runner.cause_variable = "BUILD_CAUSE_2".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_http_mode_without_url() {
        let mut settings = Settings::default();
        settings.build.mode = BuildMode::Http;
        assert!(settings.validate().is_err());
        settings.build.base_url = Some("https://ci.example.com".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_current_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
version = 2

[[triggers]]
job = "nightly"
schedule = "0 2 * * *"
script = "set CAUSE=disk full"
workspace = "ws/nightly"

[[triggers.parameters]]
name = "TARGET"
value = "release"

[[triggers.parameters]]
name = "DEPLOY_KEY"
value = "abc"
kind = "password"

[build]
mode = "http"
base_url = "https://ci.example.com"
timeout_seconds = 10
"#,
        );

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.triggers.len(), 1);
        let trigger = &settings.triggers[0];
        assert_eq!(trigger.timezone, "UTC");
        assert!(trigger.inherit_env);
        assert_eq!(trigger.parameters[1].kind, crate::models::ParameterKind::Password);
        assert!(matches!(settings.build.mode, BuildMode::Http));
        assert_eq!(settings.runner.cause_variable, "CAUSE");
        assert_eq!(settings.migrated_from, None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_migrates_legacy_trigger_table() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
[trigger]
job = "legacy"
schedule = "*/10 * * * *"
script = "set CAUSE=old style"
workspace = "ws/legacy"
"#,
        );

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.version, CONFIG_VERSION);
        assert_eq!(settings.migrated_from, Some(1));
        assert_eq!(settings.triggers.len(), 1);
        assert_eq!(settings.triggers[0].job, "legacy");
    }

    #[test]
    fn test_load_rejects_legacy_table_in_current_version() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
version = 2

[trigger]
job = "legacy"
schedule = "*/10 * * * *"
script = "rem"
workspace = "ws"
"#,
        );
        assert!(Settings::load_from_path(dir.path()).is_err());
    }

    #[test]
    fn test_load_script_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("poll.bat");
        std::fs::write(&script_path, "set CAUSE=from file").unwrap();

        let mut trigger = Settings::default().triggers.remove(0);
        trigger.script = None;
        trigger.script_file = Some(script_path);
        assert_eq!(trigger.load_script().unwrap(), "set CAUSE=from file");
    }
}
