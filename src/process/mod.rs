//! External process execution with timeouts and output capture.
//!
//! Every external tool the pipeline touches (cargo, npm, gradle, the Android
//! build scripts, the signing tool) goes through [`Cmd`]. Invocations are
//! synchronous: the calling thread blocks until the child exits or its
//! timeout elapses, at which point the child is killed.
//!
//! ```rust,ignore
//! use release_builder::process::Cmd;
//! use std::time::Duration;
//!
//! let out = Cmd::new("cargo")
//!     .args(["build", "--release"])
//!     .dir(repo_root)
//!     .timeout(Duration::from_secs(1800))
//!     .error_msg("cargo build failed")
//!     .run()?;
//! println!("{}", out.stdout);
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{ReleaseError, Result};

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A command to run, with its working directory, environment overrides and
/// timeout.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    envs: BTreeMap<String, String>,
    timeout: Duration,
    error_msg: Option<String>,
    allow_fail: bool,
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The error stream, or the output stream when the error stream is empty.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Success flag plus diagnostic text, the shape callers log and record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub succeeded: bool,
    pub output: String,
}

/// Executes commands. The pipeline holds one runner for the whole run; tests
/// substitute a recording runner.
pub trait CommandRunner {
    fn run(&self, cmd: &Cmd) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            envs: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Override one variable for the child. The parent environment is never
    /// modified; overrides win over inherited values.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.envs.insert(k.into(), v.into());
        }
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefix used for the failure detail when the command exits nonzero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the output even when the exit code is nonzero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> impl Iterator<Item = String> + '_ {
        self.args.iter().map(|a| a.to_string_lossy().into_owned())
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.envs
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in self.arguments() {
            out.push(' ');
            if arg.contains(' ') {
                out.push('"');
                out.push_str(&arg);
                out.push('"');
            } else {
                out.push_str(&arg);
            }
        }
        out
    }

    /// Run with the system runner.
    pub fn run(&self) -> Result<CommandOutput> {
        SystemRunner.run(self)
    }

    /// Run and collapse the result into a success flag and diagnostic text.
    pub fn execute_with(&self, runner: &dyn CommandRunner) -> CommandOutcome {
        match runner.run(self) {
            Ok(out) => CommandOutcome {
                succeeded: true,
                output: out.stdout,
            },
            Err(ReleaseError::CommandFailed { detail, .. }) => CommandOutcome {
                succeeded: false,
                output: detail,
            },
            Err(e) => CommandOutcome {
                succeeded: false,
                output: e.to_string(),
            },
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn failure(&self, output: &CommandOutput) -> ReleaseError {
        let code = output
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let diag = output.diagnostic();
        let detail = match &self.error_msg {
            Some(msg) => format!("{msg} (exit {code}): {diag}"),
            None if diag.is_empty() => format!("exit {code}"),
            None => format!("exit {code}: {diag}"),
        };
        ReleaseError::CommandFailed {
            command: self.display(),
            detail,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
        log::debug!("running: {}", cmd.display());
        let start = Instant::now();

        let mut child = cmd.to_command().spawn().map_err(|e| {
            let detail = if e.kind() == ErrorKind::NotFound {
                format!("not found: '{}' is not installed or not on PATH", cmd.program)
            } else {
                format!("could not launch '{}': {}", cmd.program, e)
            };
            ReleaseError::CommandFailed {
                command: cmd.display(),
                detail,
            }
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let code = match wait_with_timeout(&mut child, cmd.timeout) {
            Ok(Some(code)) => code,
            Ok(None) => {
                // Reader threads are left detached: a grandchild may still hold
                // the pipes open after the direct child is gone.
                log::warn!(
                    "killed `{}` after {}s timeout",
                    cmd.display(),
                    cmd.timeout.as_secs()
                );
                return Err(ReleaseError::Timeout {
                    command: cmd.display(),
                    seconds: cmd.timeout.as_secs(),
                });
            }
            Err(e) => {
                return Err(ReleaseError::CommandFailed {
                    command: cmd.display(),
                    detail: format!("waiting for process failed: {e}"),
                })
            }
        };

        let output = CommandOutput {
            code,
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
            duration: start.elapsed(),
        };

        if output.success() || cmd.allow_fail {
            Ok(output)
        } else {
            Err(cmd.failure(&output))
        }
    }
}

/// `Ok(Some(code))` when the child exited, `Ok(None)` when it was killed
/// after the timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<Option<i32>>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.code()));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Check if a program is on the host's `PATH`.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Fail with an install hint if a program is missing from `PATH`.
pub fn ensure_exists(program: &str, install_hint: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| ReleaseError::CommandFailed {
        command: program.to_string(),
        detail: format!("not found on PATH (install: {install_hint})"),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Cmd {
        Cmd::new("sh").args(["-c", script])
    }

    #[test]
    fn captures_stdout_on_success() {
        let out = sh("echo hello").run().unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_reports_stderr() {
        let err = sh("echo out; echo broken >&2; exit 3").run().unwrap_err();
        match err {
            ReleaseError::CommandFailed { detail, .. } => {
                assert!(detail.contains("exit 3"), "{detail}");
                assert!(detail.contains("broken"), "{detail}");
                assert!(!detail.contains("out"), "{detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nonzero_exit_falls_back_to_stdout() {
        let outcome = sh("echo only-stdout; exit 1").execute_with(&SystemRunner);
        assert!(!outcome.succeeded);
        assert!(outcome.output.contains("only-stdout"));
    }

    #[test]
    fn missing_program_reports_not_found() {
        let outcome = Cmd::new("definitely_not_a_real_command_12345").execute_with(&SystemRunner);
        assert!(!outcome.succeeded);
        assert!(outcome.output.contains("not found"), "{}", outcome.output);
    }

    #[test]
    fn timeout_kills_and_reports() {
        let start = Instant::now();
        let err = sh("sleep 10")
            .timeout(Duration::from_secs(1))
            .run()
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(8));
        assert!(matches!(err, ReleaseError::Timeout { seconds: 1, .. }));
        assert!(err.to_string().contains("timed out after 1 seconds"));
    }

    #[test]
    fn env_overrides_win_without_touching_parent() {
        std::env::set_var("RELEASE_BUILDER_TEST_VAR", "parent");
        let out = sh("echo $RELEASE_BUILDER_TEST_VAR")
            .env("RELEASE_BUILDER_TEST_VAR", "override")
            .run()
            .unwrap();
        assert_eq!(out.stdout.trim(), "override");
        assert_eq!(
            std::env::var("RELEASE_BUILDER_TEST_VAR").as_deref(),
            Ok("parent")
        );

        let inherited = sh("echo $RELEASE_BUILDER_TEST_VAR").run().unwrap();
        assert_eq!(inherited.stdout.trim(), "parent");
    }

    #[test]
    fn working_directory_is_applied() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = sh("pwd").dir(tmp.path()).run().unwrap();
        let reported = PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            tmp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn allow_fail_returns_output() {
        let out = sh("exit 7").allow_fail().run().unwrap();
        assert_eq!(out.code, Some(7));
        assert!(!out.success());
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }
}
