//! External command execution.
//!
//! Every call to `kubectl`, `helm`, `flux` and `git` goes through a
//! [`CommandRunner`]. The production runner, [`SystemRunner`], spawns the
//! process with tokio and captures its output; in dry-run mode it logs the
//! would-be invocation and reports success without spawning anything.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::context::RunContext;

/// A fully described external program invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    inherit_output: bool,
}

impl Command {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable on top of the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Feed these bytes to the process' stdin.
    #[must_use]
    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Stream output to the terminal while still capturing it.
    #[must_use]
    pub fn inherit_output(mut self) -> Self {
        self.inherit_output = true;
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    #[must_use]
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    #[must_use]
    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output carrying only stdout; handy for fakes.
    #[must_use]
    pub fn from_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Trimmed stdout followed by stderr, as text.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        out.push_str(&String::from_utf8_lossy(&self.stderr));
        out.trim().to_string()
    }
}

/// Errors raised by external command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The process could not be started or its pipes failed.
    #[error("failed to run external command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited non-zero.
    #[error("external command {command:?} exited with code {}, output: {output}", exit_code.map_or_else(|| "'unknown'".to_string(), |c| c.to_string()))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
}

impl CommandError {
    /// Combined output of a failed process (empty when it never ran).
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Spawn { .. } => "",
            Self::Failed { output, .. } => output,
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Spawn { .. } => None,
            Self::Failed { exit_code, .. } => *exit_code,
        }
    }
}

/// Executes external commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion.
    ///
    /// Returns the captured output on a zero exit code and
    /// [`CommandError::Failed`] (carrying the combined output) otherwise.
    async fn run(&self, cmd: &Command) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Command) -> Result<CommandOutput, CommandError> {
        let cmdline = cmd.to_string();

        if self.dry_run {
            info!(command = %cmdline, "Would execute command");
            if let Some(dir) = cmd.get_current_dir() {
                info!(dir = %dir.display(), "Would execute in directory");
            }
            return Ok(CommandOutput::default());
        }

        let spawn_err = |source| CommandError::Spawn {
            command: cmdline.clone(),
            source,
        };

        let mut process = tokio::process::Command::new(&cmd.program);
        process
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &cmd.env {
            process.env(k, v);
        }
        if let Some(dir) = &cmd.current_dir {
            debug!(dir = %dir.display(), "Set command working directory");
            process.current_dir(dir);
        }

        debug!(command = %cmdline, "Running command");
        let mut child = process.spawn().map_err(spawn_err)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let input = cmd.stdin.clone();

        let write_stdin = async move {
            if let (Some(mut pipe), Some(bytes)) = (stdin, input) {
                pipe.write_all(&bytes).await?;
                pipe.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (echo_out, echo_err) = if cmd.inherit_output {
            (Some(tokio::io::stdout()), Some(tokio::io::stderr()))
        } else {
            (None, None)
        };

        let (_, out, err) = tokio::try_join!(
            write_stdin,
            capture(stdout, echo_out),
            capture(stderr, echo_err)
        )
        .map_err(spawn_err)?;
        let status = child.wait().await.map_err(spawn_err)?;

        let output = CommandOutput {
            stdout: out,
            stderr: err,
            exit_code: status.code().unwrap_or(-1),
        };
        let combined = output.combined();
        if !combined.is_empty() {
            debug!(command = %cmdline, output = %combined, "Command produced output");
        }

        if status.success() {
            Ok(output)
        } else {
            let err = CommandError::Failed {
                command: cmdline,
                exit_code: status.code(),
                output: combined,
            };
            debug!(error = %err, "Command error");
            Err(err)
        }
    }
}

/// Read a pipe to the end, optionally echoing each chunk.
async fn capture<R, W>(pipe: Option<R>, mut echo: Option<W>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok(captured);
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Some(w) = echo.as_mut() {
            w.write_all(&buf[..n]).await?;
        }
        captured.extend_from_slice(&buf[..n]);
    }
    if let Some(w) = echo.as_mut() {
        w.flush().await?;
    }
    Ok(captured)
}

/// Verify that every named binary can be found in `PATH`.
///
/// Under dry-run nothing is spawned, so the lookup is skipped.
///
/// # Errors
///
/// Returns [`crate::Error::MissingBinary`] for the first binary not found.
pub fn check_binaries(ctx: &RunContext, names: &[&str]) -> crate::Result<()> {
    if ctx.is_dry_run() {
        info!(binaries = ?names, "Would require these binaries in PATH");
        return Ok(());
    }
    for name in names {
        which::which(name).map_err(|_| crate::Error::MissingBinary((*name).to_string()))?;
        debug!(binary = name, "Found required binary");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_args() {
        let cmd = Command::new("helm").args(["repo", "list"]);
        assert_eq!(cmd.to_string(), "helm repo list");
    }

    #[test]
    fn test_combined_output_is_trimmed() {
        let out = CommandOutput {
            stdout: b"  ok\n".to_vec(),
            stderr: b"warning\n".to_vec(),
            exit_code: 0,
        };
        assert_eq!(out.combined(), "ok\nwarning");
    }

    #[test]
    fn test_failed_error_message() {
        let err = CommandError::Failed {
            command: "kubectl get ns".into(),
            exit_code: Some(1),
            output: "boom".into(),
        };
        assert!(err.to_string().contains("exited with code 1"));
        assert_eq!(err.output(), "boom");
    }

    #[tokio::test]
    async fn test_dry_run_does_not_spawn() {
        let runner = SystemRunner::new(true);
        let out = runner
            .run(&Command::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap();
        assert_eq!(out, CommandOutput::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_with_stdin_and_captures_stdout() {
        let runner = SystemRunner::new(false);
        let out = runner
            .run(&Command::new("cat").stdin(b"hello".to_vec()))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"hello");
        assert_eq!(out.exit_code, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failed_with_output() {
        let runner = SystemRunner::new(false);
        let err = runner
            .run(&Command::new("sh").args(["-c", "echo AlreadyExists >&2; exit 3"]))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert!(err.output().contains("AlreadyExists"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_and_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner::new(false);
        let out = runner
            .run(
                &Command::new("sh")
                    .args(["-c", "echo $GREETING; pwd"])
                    .env("GREETING", "hi")
                    .current_dir(dir.path()),
            )
            .await
            .unwrap();
        let text = out.combined();
        assert!(text.starts_with("hi"));
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(text.contains(&dir_name));
    }

    #[test]
    fn test_check_binaries_reports_missing() {
        let ctx = RunContext::new(false, "/tmp").unwrap();
        let err = check_binaries(&ctx, &["definitely-not-a-real-binary-xyz"]).unwrap_err();
        assert!(matches!(err, crate::Error::MissingBinary(_)));
    }

    #[test]
    fn test_check_binaries_skipped_under_dry_run() {
        let ctx = RunContext::new(true, "/tmp").unwrap();
        check_binaries(&ctx, &["definitely-not-a-real-binary-xyz", "kubectl", "flux"]).unwrap();
    }
}
