// Executor module: the collaborators a script run depends on
// Provides the process and file system seams plus their local implementations

pub mod fs;
pub mod process;

use crate::errors::ProcessError;
use crate::models::ExecutionEnvironment;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;

pub use fs::LocalFileSystem;
pub use process::TokioProcessExecutor;

/// Writer handed out by a `FileSystem`
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// OutputSink receives the combined stdout/stderr of a process as it arrives
#[async_trait]
pub trait OutputSink: Send {
    async fn write_output(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// ProcessExecutor runs a command to completion, streaming its output
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `command` in `working_dir` with exactly the variables in `env`.
    ///
    /// Returns the exit code (`None` when the process was killed by a
    /// signal). A nonzero exit code is not an error.
    async fn execute(
        &self,
        command: &[String],
        env: &ExecutionEnvironment,
        working_dir: &Path,
        sink: &mut dyn OutputSink,
    ) -> Result<Option<i32>, ProcessError>;
}

/// FileSystem manages the temporary files of a script run
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Write `content` to a new, uniquely named script file inside `dir`
    async fn create_temp_script(&self, dir: &Path, content: &str) -> io::Result<PathBuf>;

    async fn delete(&self, path: &Path) -> io::Result<()>;

    /// Create or truncate `path` for writing
    async fn open_for_write(&self, path: &Path) -> io::Result<FileWriter>;
}
