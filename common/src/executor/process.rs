// Process executor built on tokio::process
// Streams stdout and stderr into one sink while the child runs

use crate::errors::ProcessError;
use crate::executor::{OutputSink, ProcessExecutor};
use crate::models::ExecutionEnvironment;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, instrument, warn};

const READ_BUFFER_SIZE: usize = 8192;

/// TokioProcessExecutor launches commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct TokioProcessExecutor {
    timeout: Option<Duration>,
}

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child and fail once it has run for longer than `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    #[instrument(skip(self, env, sink), fields(program = command.first().map(String::as_str)))]
    async fn execute(
        &self,
        command: &[String],
        env: &ExecutionEnvironment,
        working_dir: &Path,
        sink: &mut dyn OutputSink,
    ) -> Result<Option<i32>, ProcessError> {
        let (program, args) = command.split_first().ok_or(ProcessError::InvalidCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(env.iter())
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        debug!(pid = child.id(), "Process started");

        let status = match self.timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, drive(&mut child, sink)).await;
                match outcome {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!(timeout_seconds = limit.as_secs(), "Process timed out, killing it");
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "Failed to kill timed out process");
                        }
                        return Err(ProcessError::Timeout(limit.as_secs()));
                    }
                }
            }
            None => drive(&mut child, sink).await?,
        };

        let code = status.code();
        if !status.success() {
            debug!(exit_code = ?code, "Process exited unsuccessfully");
        }
        Ok(code)
    }
}

/// Pump both output pipes into the sink, then reap the child
async fn drive(
    child: &mut Child,
    sink: &mut dyn OutputSink,
) -> Result<std::process::ExitStatus, ProcessError> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; READ_BUFFER_SIZE];
    let mut err_buf = [0u8; READ_BUFFER_SIZE];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => {
                match read.map_err(ProcessError::Stream)? {
                    0 => stdout = None,
                    n => sink.write_output(&out_buf[..n]).await.map_err(ProcessError::Stream)?,
                }
            }
            read = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => {
                match read.map_err(ProcessError::Stream)? {
                    0 => stderr = None,
                    n => sink.write_output(&err_buf[..n]).await.map_err(ProcessError::Stream)?,
                }
            }
        }
    }

    child.wait().await.map_err(ProcessError::Stream)
}

async fn read_some<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink(Vec<u8>);

    #[async_trait]
    impl OutputSink for VecSink {
        async fn write_output(&mut self, chunk: &[u8]) -> std::io::Result<()> {
            self.0.extend_from_slice(chunk);
            Ok(())
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = VecSink::default();
        let code = TokioProcessExecutor::new()
            .execute(
                &sh("echo out; echo err 1>&2"),
                &ExecutionEnvironment::new(),
                dir.path(),
                &mut sink,
            )
            .await
            .unwrap();

        let output = String::from_utf8(sink.0).unwrap();
        assert_eq!(code, Some(0));
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_passes_only_given_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = ExecutionEnvironment::new();
        env.insert("JOB_PARAM", "value-42");

        let mut sink = VecSink::default();
        TokioProcessExecutor::new()
            .execute(&sh("echo \"$JOB_PARAM|$HOME\""), &env, dir.path(), &mut sink)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(sink.0).unwrap(), "value-42|\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = VecSink::default();
        let code = TokioProcessExecutor::new()
            .execute(&sh("exit 3"), &ExecutionEnvironment::new(), dir.path(), &mut sink)
            .await
            .unwrap();
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = VecSink::default();
        let result = TokioProcessExecutor::new()
            .execute(
                &["/definitely/not/a/program".to_string()],
                &ExecutionEnvironment::new(),
                dir.path(),
                &mut sink,
            )
            .await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = VecSink::default();
        let result = TokioProcessExecutor::new()
            .execute(&[], &ExecutionEnvironment::new(), dir.path(), &mut sink)
            .await;
        assert!(matches!(result, Err(ProcessError::InvalidCommand)));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = VecSink::default();
        let result = TokioProcessExecutor::with_timeout(Duration::from_millis(500))
            .execute(
                &sh("echo started; sleep 5"),
                &ExecutionEnvironment::new(),
                dir.path(),
                &mut sink,
            )
            .await;

        assert!(matches!(result, Err(ProcessError::Timeout(_))));
        assert_eq!(String::from_utf8(sink.0).unwrap(), "started\n");
    }
}
