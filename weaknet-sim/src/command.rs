//! Structured external commands and the executors that run them.
//!
//! Every interaction with `tc` goes through a [`Command`] (a program plus an argument vector,
//! never a shell string) handed to an [`Executor`]. The controller only knows about the trait,
//! so tests can swap in a scripted executor and operators can preview a run with
//! [`DryRunExecutor`].

use std::{ffi::OsStr, fmt, io, path::PathBuf, process};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty commmand provided")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("non-zero exit status ({}): {}", .0.status, .0.stderr.trim())]
    NonZero(Output),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Exit status of a finished command. `None` when it was terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub Option<i32>);

impl ExitCode {
    pub const SUCCESS: Self = Self(Some(0));

    pub fn success(&self) -> bool {
        self.0 == Some(0)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub status: ExitCode,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// A successful output carrying the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { status: ExitCode::SUCCESS, stdout: stdout.into(), stderr: String::new() }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { status: ExitCode(Some(code)), stdout: String::new(), stderr: stderr.into() }
    }
}

impl From<process::Output> for Output {
    fn from(value: process::Output) -> Self {
        Self {
            status: ExitCode(value.status.code()),
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

/// A program invocation as an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builds a command from a whitespace separated string. Only meant for fixed, trusted
    /// strings such as test fixtures.
    pub fn by_str(cmd: &str) -> Result<Self> {
        let mut iter = cmd.split_ascii_whitespace();
        let program = iter.next().ok_or(Error::Empty)?;
        Ok(Self::new(program).args(iter))
    }

    /// Returns `true` if the arguments start with the given words, e.g. `["filter", "show"]`.
    pub fn starts_with<S: AsRef<str>>(&self, words: &[S]) -> bool {
        self.args.len() >= words.len()
            && self.args.iter().zip(words).all(|(arg, word)| arg == word.as_ref())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The single capability used to run external tools.
pub trait Executor {
    /// Runs the command to completion. A non-zero exit status is an [`Error::NonZero`].
    fn execute(&self, cmd: &Command) -> Result<Output>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, cmd: &Command) -> Result<Output> {
        (**self).execute(cmd)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute(&self, cmd: &Command) -> Result<Output> {
        (**self).execute(cmd)
    }
}

/// Runs commands on the host with [`std::process::Command`], optionally through `sudo`.
///
/// The `tc` program name in a [`Command`] is replaced by the configured binary path, so
/// builders can stay agnostic of where `tc` lives.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    sudo: bool,
    tc_bin: PathBuf,
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self { sudo: true, tc_bin: PathBuf::from(crate::tc::TC) }
    }
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether to prefix every command with `sudo`. Defaults to `true`.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Path of the `tc` binary. Defaults to `tc`, resolved through `PATH`.
    pub fn with_tc_bin(mut self, tc_bin: impl Into<PathBuf>) -> Self {
        self.tc_bin = tc_bin.into();
        self
    }

    fn to_process(&self, cmd: &Command) -> process::Command {
        let program: &OsStr = if cmd.program == crate::tc::TC {
            self.tc_bin.as_os_str()
        } else {
            cmd.program.as_ref()
        };

        let mut process = if self.sudo {
            let mut process = process::Command::new("sudo");
            process.arg(program);
            process
        } else {
            process::Command::new(program)
        };

        process.args(&cmd.args).stderr(process::Stdio::piped()).stdout(process::Stdio::piped());
        process
    }
}

impl Executor for SystemExecutor {
    fn execute(&self, cmd: &Command) -> Result<Output> {
        if cmd.program.is_empty() {
            return Err(Error::Empty);
        }

        let mut process = self.to_process(cmd);

        tracing::debug!(?process, "running command");

        let output: Output = process.spawn()?.wait_with_output()?.into();

        if !output.status.success() {
            tracing::debug!(
                ?output.stderr,
                %output.status,
                %cmd,
                "command returned non-zero status"
            );
            return Err(Error::NonZero(output));
        }

        Ok(output)
    }
}

/// Logs commands instead of running them. Every command succeeds with empty output, which
/// makes filter listings look empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

impl Executor for DryRunExecutor {
    fn execute(&self, cmd: &Command) -> Result<Output> {
        tracing::info!(%cmd, "dry run");
        Ok(Output::ok(""))
    }
}
