//! External program invocation.
//!
//! Session control, service control, immutability flags and sandboxed-app
//! block-lists are all driven through system tools. The engine talks to them
//! through [`CommandRunner`] so a pass can be observed without touching the
//! host.

use std::fmt;
use std::process::Command;

use crate::error::{KisitError, Result};

/// Captured result of an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn ok_with(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run `program` with `args` to completion. An `Err` means the program
    /// could not be started at all.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs programs on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| KisitError::Command {
                program: program.to_string(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a best-effort step: failures are logged and reported as `false`.
pub fn run_logged(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> bool {
    match runner.run(program, args) {
        Ok(output) if output.success() => true,
        Ok(output) => {
            tracing::warn!(
                program,
                ?args,
                status = ?output.status,
                stderr = %output.stderr.trim(),
                "command exited unsuccessfully"
            );
            false
        }
        Err(err) => {
            tracing::warn!(program, ?args, error = %err, "command could not be started");
            false
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use recording::RecordingRunner;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use super::{CommandOutput, CommandRunner};
    use crate::error::{KisitError, Result};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every invocation and answers with canned outputs.
    /// Programs without a canned answer succeed with empty output.
    #[derive(Debug, Default)]
    pub struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
        responses: Mutex<HashMap<String, CommandOutput>>,
        missing: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, program: &str, output: CommandOutput) {
            self.responses
                .lock()
                .unwrap()
                .insert(program.to_string(), output);
        }

        /// Make `program` behave as if it were not installed.
        pub fn missing(&self, program: &str) {
            self.missing.lock().unwrap().push(program.to_string());
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        /// Invocations of `program`, arguments only.
        pub fn calls_for(&self, program: &str) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter(|call| call.first().map(String::as_str) == Some(program))
                .map(|call| call.into_iter().skip(1).collect())
                .collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|arg| arg.to_string()));
            self.calls.lock().unwrap().push(call);

            if self.missing.lock().unwrap().iter().any(|p| p == program) {
                return Err(KisitError::Command {
                    program: program.to_string(),
                    message: "No such file or directory (os error 2)".to_string(),
                });
            }

            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(program)
                .cloned()
                .unwrap_or_else(|| CommandOutput::ok_with("")))
        }
    }
}
