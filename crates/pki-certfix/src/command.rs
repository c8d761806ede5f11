//! External tool invocation.
//!
//! Every subprocess goes through a [`ToolCommand`] built against a fixed
//! allowlist of programs. Arguments are passed directly to the program, never
//! through a shell. Passwords travel in files, so a command line is safe to
//! display or log.
//!
//! Execution is behind the [`CommandRunner`] trait so the repair workflow can
//! be driven against a recording runner in tests.

use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::CommandError;

/// Programs the repair workflow is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// `ldapsearch`, connectivity probe.
    Ldapsearch,
    /// `ldappasswd`, password resets.
    Ldappasswd,
    /// `ldapmodify`, entry updates.
    Ldapmodify,
    /// `openssl`, certificate format conversion.
    Openssl,
    /// `systemctl`, server start and stop.
    Systemctl,
    /// `pki-server`, certificate operations on the instance.
    PkiServer,
}

impl Tool {
    /// Program name looked up on `PATH`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ldapsearch => "ldapsearch",
            Self::Ldappasswd => "ldappasswd",
            Self::Ldapmodify => "ldapmodify",
            Self::Openssl => "openssl",
            Self::Systemctl => "systemctl",
            Self::PkiServer => "pki-server",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FORBIDDEN_CHARS: &[char] = &['\0', '\n', '\r'];

fn validate_argument(arg: &str) -> Result<(), String> {
    match arg.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        Some(c) => Err(format!("argument contains forbidden character {c:?}")),
        None => Ok(()),
    }
}

/// A validated command line for one allowlisted tool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    tool: Tool,
    args: Vec<String>,
    stdin: Option<String>,
    rejected: Option<String>,
}

impl ToolCommand {
    /// Starts a command for `tool`.
    #[must_use]
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            args: Vec::new(),
            stdin: None,
            rejected: None,
        }
    }

    /// Adds an argument. One containing a NUL or line break poisons the
    /// command; see [`ToolCommand::check`].
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        let value = arg.as_ref();
        match validate_argument(value) {
            Ok(()) => self.args.push(value.to_string()),
            Err(reason) => {
                self.rejected.get_or_insert(reason);
            }
        }
        self
    }

    /// Adds several arguments.
    #[must_use]
    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Feeds `input` to the program's standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program this command runs.
    #[must_use]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Argument values.
    pub fn arg_values(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }

    /// Standard input, if any.
    #[must_use]
    pub fn stdin_data(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Fails if any argument was rejected while building.
    pub fn check(&self) -> Result<(), CommandError> {
        match &self.rejected {
            Some(reason) => Err(CommandError::InvalidArgument {
                program: self.tool.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool.as_str())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
    /// Exit code.
    pub exit_code: i32,
}

impl ToolOutput {
    /// Standard output as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs tool commands.
pub trait CommandRunner {
    /// Runs `command` to completion. A non-zero exit is an error.
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, CommandError>;
}

/// Runs commands as local subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> Result<ToolOutput, CommandError> {
        command.check()?;
        debug!(command = %command, "running");

        let program = command.tool.as_str();
        let spawn_err = |source| CommandError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut cmd = Command::new(program);
        cmd.args(command.arg_values())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn().map_err(spawn_err)?;
        if let (Some(input), Some(mut pipe)) = (&command.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).map_err(spawn_err)?;
        }
        let output = child.wait_with_output().map_err(spawn_err)?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(CommandError::non_zero_exit(
                command.to_string(),
                exit_code,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }
}
