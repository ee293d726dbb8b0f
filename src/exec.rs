//! External command execution
//!
//! Every external tool (easy-rsa, openssl, openvpn, iptables, systemctl) is
//! invoked through [`CommandExecutor`]. The environment a command sees is
//! carried on the [`Invocation`] itself; nothing here mutates the process
//! environment of the caller.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use thiserror::Error;

/// Failure of an external command that did run
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("Command '{command}' failed with exit code: {code}")]
    NonZeroExit { command: String, code: i32 },
    #[error("Command '{command}' was terminated by a signal")]
    Terminated { command: String },
}

/// A single external command: program, arguments, working directory and
/// the environment overlay it runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    capture: bool,
    accepted: Vec<i32>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            capture: false,
            accepted: vec![0],
        }
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Overlay these variables on the inherited environment
    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Capture stdout and stderr instead of passing them through to the
    /// terminal. Captured stderr is still echoed once the command exits.
    pub fn capture_output(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Treat `code` as success in addition to 0
    pub fn accept_code(mut self, code: i32) -> Self {
        if !self.accepted.contains(&code) {
            self.accepted.push(code);
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// File name of the program, e.g. `pkitool` for `/etc/openvpn/openvpn-ca/pkitool`
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn captures_output(&self) -> bool {
        self.capture
    }

    /// Map an exit status to success or an [`ExecError`] naming this command
    pub fn check_status(&self, status: ExitStatus) -> std::result::Result<(), ExecError> {
        match status.code() {
            Some(code) if self.accepted.contains(&code) => {
                if code != 0 {
                    log::debug!("'{}' exited with accepted code {}", self, code);
                }
                Ok(())
            }
            Some(code) => Err(ExecError::NonZeroExit {
                command: self.to_string(),
                code,
            }),
            None => Err(ExecError::Terminated {
                command: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Trait for executing external commands
pub trait CommandExecutor {
    /// Run the command and return its raw output, whatever the exit status
    fn execute(&self, invocation: &Invocation) -> Result<Output>;

    /// Check if a command is available
    fn check_command_exists(&self, command: &str) -> bool;

    /// Run the command and fail unless it exits with an accepted code
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        match invocation.cwd() {
            Some(dir) => log::debug!("running '{}' in {}", invocation, dir.display()),
            None => log::debug!("running '{}'", invocation),
        }
        let output = self.execute(invocation)?;
        invocation.check_status(output.status)?;
        Ok(output)
    }
}

/// Executes commands on the local host
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl CommandExecutor for LocalExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<Output> {
        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.arguments());
        cmd.envs(invocation.env());
        cmd.stdin(Stdio::null());
        if let Some(dir) = invocation.cwd() {
            cmd.current_dir(dir);
        }

        if invocation.captures_output() {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            let output = cmd
                .output()
                .with_context(|| format!("Failed to execute command: {}", invocation.program()))?;
            std::io::stderr().write_all(&output.stderr)?;
            Ok(output)
        } else {
            let status = cmd
                .status()
                .with_context(|| format!("Failed to execute command: {}", invocation.program()))?;
            Ok(Output {
                status,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    fn check_command_exists(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }
}

/// Fail if any of `commands` cannot be found
pub fn require_commands(exec: &dyn CommandExecutor, commands: &[&str]) -> Result<()> {
    let missing: Vec<&str> = commands
        .iter()
        .copied()
        .filter(|c| !exec.check_command_exists(c))
        .collect();

    if !missing.is_empty() {
        anyhow::bail!(
            "Required command(s) not found in PATH: {}\n\nInstall them first, e.g.:\n  apt-get install openvpn easy-rsa iptables",
            missing.join(", ")
        );
    }
    Ok(())
}

/// Escape a string for safe use in shell commands
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    if s.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '/' || c == '.')
    {
        return s.to_string();
    }

    // End quote, add escaped quote, start new quote
    let escaped = s.replace('\'', "'\"'\"'");
    format!("'{}'", escaped)
}

/// Render a path as a command argument
pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Scripted executor for tests: records every invocation and answers with
/// queued responses per program name.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::os::unix::process::ExitStatusExt;

    #[derive(Debug, Clone, Default)]
    pub struct MockResponse {
        code: i32,
        stdout: String,
        writes: Vec<(PathBuf, String)>,
    }

    impl MockResponse {
        pub fn ok() -> Self {
            Self::default()
        }

        pub fn exit(code: i32) -> Self {
            Self {
                code,
                ..Self::default()
            }
        }

        pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
            self.stdout = stdout.into();
            self
        }

        /// Simulate the tool producing a file
        pub fn writes(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
            self.writes.push((path.into(), content.into()));
            self
        }
    }

    #[derive(Debug, Default)]
    pub struct MockExecutor {
        calls: RefCell<Vec<Invocation>>,
        queued: RefCell<HashMap<String, VecDeque<MockResponse>>>,
        missing: HashSet<String>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for the next call to `program` (matched by file name)
        pub fn respond(&self, program: &str, response: MockResponse) -> &Self {
            self.queued
                .borrow_mut()
                .entry(program.to_string())
                .or_default()
                .push_back(response);
            self
        }

        pub fn without_command(mut self, command: &str) -> Self {
            self.missing.insert(command.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.borrow().clone()
        }

        pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| c.program_name() == program)
                .cloned()
                .collect()
        }

        pub fn command_lines(&self) -> Vec<String> {
            self.calls.borrow().iter().map(|c| c.to_string()).collect()
        }
    }

    impl CommandExecutor for MockExecutor {
        fn execute(&self, invocation: &Invocation) -> Result<Output> {
            self.calls.borrow_mut().push(invocation.clone());

            let response = self
                .queued
                .borrow_mut()
                .get_mut(invocation.program_name())
                .and_then(|q| q.pop_front())
                .unwrap_or_default();

            for (path, content) in &response.writes {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, content)?;
            }

            Ok(Output {
                status: ExitStatus::from_raw(response.code << 8),
                stdout: response.stdout.into_bytes(),
                stderr: Vec::new(),
            })
        }

        fn check_command_exists(&self, command: &str) -> bool {
            !self.missing.contains(command)
        }
    }
}
