// Script runner: wraps a user batch script so that a variable it sets can be
// read back from the captured output, runs it and extracts that variable.

use crate::errors::{ProcessError, ScriptError};
use crate::executor::{FileSystem, FileWriter, OutputSink, ProcessExecutor};
use crate::models::{Cause, ExecutionEnvironment};
use async_trait::async_trait;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};

/// Delimiter around the echoed variable; never produced by ordinary output
pub const MARKER: &str = "#:#:#";

/// Variable a script sets to request a build
pub const CAUSE_VARIABLE: &str = "CAUSE";

const CRLF: &str = "\r\n";
const SCRIPT_LABEL: &str = ":DosTriggerScript";

/// Build the wrapper script around `user_script`.
///
/// The wrapper clears `var_name`, calls the user script as a subroutine,
/// then echoes `MARKER var MARKER %var% MARKER` and exits before falling
/// through into the user script, which sits at the end under a label.
/// All lines end in CRLF.
pub fn build_wrapper_script(user_script: &str, var_name: &str) -> String {
    let mut script = String::with_capacity(user_script.len() + 128);
    for line in [
        format!("@set {}=", var_name),
        "@echo off".to_string(),
        format!("call {}", SCRIPT_LABEL),
        // the user script may have turned echo back on
        "@echo off".to_string(),
        format!("echo {m}{v}{m}%{v}%{m}", m = MARKER, v = var_name),
        "goto :EOF".to_string(),
        SCRIPT_LABEL.to_string(),
        to_crlf(user_script),
    ] {
        script.push_str(&line);
        script.push_str(CRLF);
    }
    script
}

fn to_crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', CRLF)
}

/// Extract the value echoed for `var_name` from captured script output.
///
/// The last marker line for the variable wins. Returns the trimmed value,
/// or an empty string when there is no marker line or the value is blank.
pub fn extract_marked_value(output: &str, var_name: &str) -> String {
    let marker = regex::escape(MARKER);
    let pattern = format!(
        r"(?s).*{m}{v}{m}([^\r\n]*){m}.*",
        m = marker,
        v = regex::escape(var_name)
    );

    // Only fails if the pattern exceeds the regex size limit
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!(var_name, error = %e, "Unable to build marker pattern");
            return String::new();
        }
    };

    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Settings for a script runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Command prefix; the script path is appended as the last argument
    pub interpreter: Vec<String>,
    pub cause_variable: String,
    /// Name of the output log written into the workspace on every run
    pub log_file_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["cmd".to_string(), "/c".to_string(), "call".to_string()],
            cause_variable: CAUSE_VARIABLE.to_string(),
            log_file_name: "dos-trigger.log".to_string(),
        }
    }
}

/// ScriptRunner runs a user script and reports the cause it set, if any
pub struct ScriptRunner {
    config: RunnerConfig,
    fs: Arc<dyn FileSystem>,
    executor: Arc<dyn ProcessExecutor>,
}

impl ScriptRunner {
    pub fn new(
        config: RunnerConfig,
        fs: Arc<dyn FileSystem>,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Self {
        Self {
            config,
            fs,
            executor,
        }
    }

    /// Run `user_script` inside `workspace` and return the cause it set.
    ///
    /// The temporary script is deleted and the output log closed on every
    /// path. On an execution failure the error carries whatever cause could
    /// still be read from the output captured so far.
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    pub async fn run(
        &self,
        user_script: &str,
        env: &ExecutionEnvironment,
        workspace: &Path,
    ) -> Result<Cause, ScriptError> {
        let wrapper = build_wrapper_script(user_script, &self.config.cause_variable);

        let script_path = self
            .fs
            .create_temp_script(workspace, &wrapper)
            .await
            .map_err(|e| {
                error!(error = %e, "Unable to produce a script file");
                ScriptError::Materialization(e)
            })?;

        let started = Instant::now();
        let (result, output) = self.execute(&script_path, env, workspace).await;
        self.remove_script(&script_path).await;

        let cause = Cause::new(extract_marked_value(&output, &self.config.cause_variable));
        debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            output_bytes = output.len(),
            cause_present = cause.is_present(),
            "Script finished"
        );

        match result {
            Ok(exit_code) => {
                info!(exit_code = ?exit_code, cause = %cause, "Script completed");
                Ok(cause)
            }
            Err(source) => {
                error!(error = %source, "Command execution failed");
                Err(ScriptError::Execution { source, cause })
            }
        }
    }

    /// Launch the script and collect its output, closing the log either way
    async fn execute(
        &self,
        script_path: &Path,
        env: &ExecutionEnvironment,
        workspace: &Path,
    ) -> (Result<Option<i32>, ProcessError>, String) {
        let log_path = workspace.join(&self.config.log_file_name);
        let log = match self.fs.open_for_write(&log_path).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "Unable to open output log, capturing in memory only");
                None
            }
        };

        let mut sink = CaptureSink::new(log);
        let command = self.command_for(script_path);
        let result = self
            .executor
            .execute(&command, env, workspace, &mut sink)
            .await;

        (result, sink.finish().await)
    }

    fn command_for(&self, script_path: &Path) -> Vec<String> {
        let mut command = self.config.interpreter.clone();
        command.push(script_path.to_string_lossy().into_owned());
        command
    }

    async fn remove_script(&self, script_path: &Path) {
        if let Err(source) = self.fs.delete(script_path).await {
            let err = ScriptError::Cleanup {
                path: PathBuf::from(script_path),
                source,
            };
            error!(error = %err, "Temporary script left behind");
        }
    }
}

/// CaptureSink keeps all output in memory and mirrors it to the output log.
///
/// A failing log write closes the log; in-memory capture continues.
struct CaptureSink {
    captured: Vec<u8>,
    log: Option<FileWriter>,
}

impl CaptureSink {
    fn new(log: Option<FileWriter>) -> Self {
        Self {
            captured: Vec::new(),
            log,
        }
    }

    /// Close the log and return the captured text
    async fn finish(mut self) -> String {
        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.shutdown().await {
                warn!(error = %e, "Unable to close output log");
            }
        }
        String::from_utf8_lossy(&self.captured).into_owned()
    }
}

#[async_trait]
impl OutputSink for CaptureSink {
    async fn write_output(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.captured.extend_from_slice(chunk);
        let failed = match self.log.as_mut() {
            Some(log) => log.write_all(chunk).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            warn!(error = %e, "Unable to write output log, closing it");
            self.log = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_layout() {
        let script = build_wrapper_script("set CAUSE=disk full", "CAUSE");
        let lines: Vec<&str> = script.split("\r\n").collect();
        assert_eq!(
            lines,
            vec![
                "@set CAUSE=",
                "@echo off",
                "call :DosTriggerScript",
                "@echo off",
                "echo #:#:#CAUSE#:#:#%CAUSE%#:#:#",
                "goto :EOF",
                ":DosTriggerScript",
                "set CAUSE=disk full",
                "",
            ]
        );
    }

    #[test]
    fn test_wrapper_uses_crlf_only() {
        let script = build_wrapper_script("echo one\necho two\r\necho three", "CAUSE");
        assert!(script.ends_with("echo three\r\n"));
        assert!(!script.replace("\r\n", "").contains('\n'));
        assert!(script.contains("echo one\r\necho two\r\necho three\r\n"));
    }

    #[test]
    fn test_wrapper_exits_before_user_script() {
        let script = build_wrapper_script("echo body", "CAUSE");
        let goto = script.find("goto :EOF").unwrap();
        let label = script.find("\r\n:DosTriggerScript\r\n").unwrap();
        let body = script.find("echo body").unwrap();
        assert!(goto < label && label < body);
    }

    #[test]
    fn test_extract_single_marker() {
        let output = "hello\r\n#:#:#CAUSE#:#:#disk full#:#:#\r\n";
        assert_eq!(extract_marked_value(output, "CAUSE"), "disk full");
    }

    #[test]
    fn test_extract_trims_value() {
        let output = "#:#:#CAUSE#:#:#   disk full  #:#:#";
        assert_eq!(extract_marked_value(output, "CAUSE"), "disk full");
    }

    #[test]
    fn test_extract_without_marker_is_empty() {
        assert_eq!(extract_marked_value("hello\r\nworld\r\n", "CAUSE"), "");
        assert_eq!(extract_marked_value("", "CAUSE"), "");
    }

    #[test]
    fn test_extract_blank_value_is_empty() {
        assert_eq!(extract_marked_value("#:#:#CAUSE#:#:##:#:#\r\n", "CAUSE"), "");
        assert_eq!(extract_marked_value("#:#:#CAUSE#:#:#  \t #:#:#\r\n", "CAUSE"), "");
    }

    #[test]
    fn test_extract_last_marker_wins() {
        let output = "#:#:#CAUSE#:#:#first#:#:#\r\nnoise\r\n#:#:#CAUSE#:#:#second#:#:#\r\ntrailer";
        assert_eq!(extract_marked_value(output, "CAUSE"), "second");
    }

    #[test]
    fn test_extract_ignores_other_variables() {
        let output = "#:#:#OTHER#:#:#nope#:#:#\r\n";
        assert_eq!(extract_marked_value(output, "CAUSE"), "");
    }

    #[test]
    fn test_extract_does_not_cross_lines() {
        let output = "#:#:#CAUSE#:#:#broken\r\nvalue#:#:#";
        assert_eq!(extract_marked_value(output, "CAUSE"), "");
    }

    #[test]
    fn test_extract_escapes_variable_name() {
        let output = "#:#:#A.B#:#:#dotted#:#:#\r\n#:#:#AxB#:#:#other#:#:#";
        assert_eq!(extract_marked_value(output, "A.B"), "dotted");
    }

    #[test]
    fn test_default_runner_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.interpreter, vec!["cmd", "/c", "call"]);
        assert_eq!(config.cause_variable, "CAUSE");
        assert_eq!(config.log_file_name, "dos-trigger.log");
    }
}
