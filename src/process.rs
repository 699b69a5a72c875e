//! External tool invocation.
//!
//! Repository and signing tools are configured as command strings (split
//! with shell-words) so wrappers and mocks can stand in for the real binary.
//! Calls block until the tool exits; there is no timeout.
use crate::error::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

/// A configured external tool: program plus any leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    leading_args: Vec<String>,
}

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl ToolCommand {
    pub fn parse(command: &str) -> Result<Self> {
        let mut words = shell_words::split(command).map_err(|err| Error::ToolUnavailable {
            program: command.to_string(),
            reason: format!("cannot parse command: {err}"),
        })?;
        if words.is_empty() {
            return Err(Error::ToolUnavailable {
                program: command.to_string(),
                reason: "command is empty".to_string(),
            });
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            leading_args: words,
        })
    }

    /// Fail early with a clear error when the program cannot be found.
    pub fn ensure_available(&self) -> Result<()> {
        which::which(&self.program)
            .map(|_| ())
            .map_err(|err| Error::ToolUnavailable {
                program: self.program.clone(),
                reason: err.to_string(),
            })
    }

    /// Human-readable rendering of an invocation for error messages.
    pub fn describe(&self, args: &[&str]) -> String {
        let mut words = vec![self.program.as_str()];
        words.extend(self.leading_args.iter().map(String::as_str));
        words.extend(args.iter().copied());
        shell_words::join(words)
    }

    pub fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<ToolOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let start = Instant::now();
        let output = command.output().map_err(|err| Error::ToolUnavailable {
            program: self.program.clone(),
            reason: err.to_string(),
        })?;
        let elapsed_ms = start.elapsed().as_millis();
        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::info!(
            elapsed_ms,
            exit_code = ?result.exit_code,
            command = %self.describe(args),
            "tool invoke complete"
        );
        tracing::debug!("stdout:\n{}", result.stdout);
        tracing::debug!("stderr:\n{}", result.stderr);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_leading_args() {
        let tool = ToolCommand::parse("sh '/tmp/mock signer.sh'").expect("parse");
        assert_eq!(tool.describe(&[]), "sh '/tmp/mock signer.sh'");
        assert_eq!(
            tool.describe(&["verify", "-d", "a.sig"]),
            "sh '/tmp/mock signer.sh' verify -d a.sig"
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            ToolCommand::parse("   "),
            Err(Error::ToolUnavailable { .. })
        ));
    }

    #[test]
    fn captures_exit_code_and_streams() {
        if which::which("sh").is_err() {
            return;
        }
        let tool = ToolCommand::parse("sh -c").expect("parse");
        let output = tool
            .run(&["echo out; echo err >&2; exit 3"], None)
            .expect("run");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn missing_program_is_unavailable() {
        let tool = ToolCommand::parse("themis-definitely-missing-tool").expect("parse");
        assert!(matches!(
            tool.ensure_available(),
            Err(Error::ToolUnavailable { .. })
        ));
    }
}
