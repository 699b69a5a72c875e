//! Error taxonomy for resolution, caching, integrity and signing.
//!
//! Every variant carries enough context (hashes, exit codes, offending ids)
//! to diagnose a failure from a single run.
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed location {location:?}: {reason}")]
    MalformedLocation { location: String, reason: String },

    #[error("too many colons in SSH-style location {location:?}")]
    TooManyColons { location: String },

    #[error("cache index lists {source_key:?} but its content file {} is missing", path.display())]
    CacheCorruption { source_key: String, path: PathBuf },

    #[error("template hash mismatch for {source_ref}: expected {expected}, got {actual}")]
    TemplateHashMismatch {
        source_ref: String,
        expected: String,
        actual: String,
    },

    #[error("template not found: {location} ({})", path.display())]
    TemplateNotFound { location: String, path: PathBuf },

    #[error("repository operation `{operation}` failed ({}){}", exit_label(*exit_code), ToolDiagnostics::new(stdout, stderr))]
    RepositoryOperation {
        operation: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("signing `{operation}` failed ({}){}", exit_label(*exit_code), ToolDiagnostics::new(stdout, stderr))]
    Signing {
        operation: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("signature verification failed with {} problem(s):{}", problems.len(), ProblemList(problems))]
    SignatureVerification { problems: Vec<SignatureProblem> },

    #[error("contract format error: {0}")]
    ContractFormat(String),

    #[error("fetch {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("external tool `{program}` is not available: {reason}")]
    ToolUnavailable { program: String, reason: String },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn contract_format(message: impl Into<String>) -> Self {
        Error::ContractFormat(message.into())
    }
}

/// One accumulated verification finding.
///
/// `subject` is `counterparty/signatory` for contract verification, or the
/// signature file for a standalone check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureProblem {
    pub subject: String,
    pub reason: String,
}

impl SignatureProblem {
    pub fn signatory(counterparty_id: &str, signatory_id: &str, reason: impl Into<String>) -> Self {
        Self {
            subject: format!("{counterparty_id}/{signatory_id}"),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SignatureProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.reason)
    }
}

struct ProblemList<'a>(&'a [SignatureProblem]);

impl fmt::Display for ProblemList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for problem in self.0 {
            write!(f, "\n  - {problem}")?;
        }
        Ok(())
    }
}

struct ToolDiagnostics<'a> {
    stdout: &'a str,
    stderr: &'a str,
}

impl<'a> ToolDiagnostics<'a> {
    fn new(stdout: &'a str, stderr: &'a str) -> Self {
        Self { stdout, stderr }
    }
}

impl fmt::Display for ToolDiagnostics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        if !stdout.is_empty() {
            write!(f, "\nstdout:\n{stdout}")?;
        }
        if !stderr.is_empty() {
            write!(f, "\nstderr:\n{stderr}")?;
        }
        Ok(())
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
