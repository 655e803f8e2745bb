/// Core types shared across the userbox engine
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Longest login name accepted by shadow-utils
pub const MAX_ACCOUNT_NAME_LEN: usize = 32;

/// Random hex characters appended to the account prefix
const EXECUTION_ID_ENTROPY_CHARS: usize = 24;

/// Supported source languages - closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    Java,
    Cpp,
    C,
}

impl Language {
    /// All supported languages, in listing order
    pub fn all() -> [Language; 5] {
        [
            Language::JavaScript,
            Language::Python,
            Language::Java,
            Language::Cpp,
            Language::C,
        ]
    }

    /// Canonical identifier used on the wire
    pub fn id(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
        }
    }

    /// Human-readable name
    pub fn display_name(self) -> &'static str {
        match self {
            Language::JavaScript => "JavaScript (Node.js)",
            Language::Python => "Python 3",
            Language::Java => "Java",
            Language::Cpp => "C++",
            Language::C => "C",
        }
    }

    /// Whether the language has a compile phase before the run phase
    pub fn is_compiled(self) -> bool {
        matches!(self, Language::Java | Language::Cpp | Language::C)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "python" | "python3" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            "c" => Ok(Language::C),
            _ => Err(SandboxError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Inbound execution request. Immutable once accepted.
///
/// The language stays as raw text so that an unsupported value can be
/// rejected before any account is touched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code to compile and/or run
    #[serde(alias = "code")]
    pub source: String,
    /// Language identifier as submitted
    pub language: String,
    /// Data fed to the program's stdin
    #[serde(default)]
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            language: language.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// Opaque per-request token. Doubles as the disposable account name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh id: `<prefix>` followed by 96 random bits in hex
    pub fn generate(prefix: &str) -> Self {
        let entropy = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", prefix, &entropy[..EXECUTION_ID_ENTROPY_CHARS]))
    }

    /// Accept an existing token (e.g. one left over by a crashed run)
    pub fn parse(token: &str) -> Result<Self> {
        if is_valid_account_name(token) {
            Ok(Self(token.to_string()))
        } else {
            Err(SandboxError::InvalidExecutionId(token.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// POSIX-portable login name: `[a-z_][a-z0-9_-]*`, at most 32 bytes
pub fn is_valid_account_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_ACCOUNT_NAME_LEN
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Fixed per-language resource ceilings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard memory ceiling for the whole scope
    pub memory_bytes: u64,
    /// CPU time ceiling (RLIMIT_CPU)
    pub cpu_seconds: u64,
    /// Process/thread ceiling for the account
    pub max_processes: u32,
    /// Largest file the program may write
    pub max_file_bytes: u64,
}

impl ResourceLimits {
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }

    /// `ulimit -f` operates on 1024-byte blocks in bash
    pub fn file_size_blocks(&self) -> u64 {
        (self.max_file_bytes + 1023) / 1024
    }
}

/// Disposable account owned by exactly one in-flight request.
///
/// Deliberately not `Clone`: releasing consumes it, so an identity
/// cannot be torn down twice.
#[derive(Debug, PartialEq, Eq)]
pub struct SandboxIdentity {
    account_name: String,
    uid: u32,
    gid: u32,
    home_directory: PathBuf,
    working_directory: PathBuf,
}

impl SandboxIdentity {
    pub(crate) fn new(account_name: String, uid: u32, gid: u32, home_directory: PathBuf) -> Self {
        let working_directory = home_directory.join("work");
        Self {
            account_name,
            uid,
            gid,
            home_directory,
            working_directory,
        }
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn home_directory(&self) -> &Path {
        &self.home_directory
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}

/// Rendered script plus where it (and the source) live on disk
#[derive(Clone, Debug)]
pub struct GeneratedScript {
    pub text: String,
    pub path: PathBuf,
    pub source_path: PathBuf,
}

/// How far the generated script got
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecPhase {
    Compile,
    Run,
}

/// What the sandbox runner observed, before classification
#[derive(Clone, Debug)]
pub struct RawExecResult {
    /// Combined stdout+stderr, bounded
    pub output: Vec<u8>,
    /// Output exceeded the bound and was cut
    pub truncated: bool,
    /// The stream failed or a descendant still held it open after the drain grace
    pub output_incomplete: bool,
    /// Exit code on normal exit
    pub exit_code: Option<i32>,
    /// Terminating signal number
    pub signal: Option<i32>,
    /// Wall-clock bound expired and the group was killed
    pub timed_out: bool,
    pub phase: ExecPhase,
    pub wall_time_ms: u64,
    /// Wall-clock bound that applied to this run
    pub wall_limit_ms: u64,
    pub cpu_time_ms: Option<u64>,
    pub memory_peak_kb: Option<u64>,
}

/// Classified terminal status of one execution attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    ResourceExceeded,
    InternalError,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::CompileError => "compile_error",
            OutcomeKind::RuntimeError => "runtime_error",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::ResourceExceeded => "resource_exceeded",
            OutcomeKind::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// Resource usage reported alongside a result
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub wall_time_ms: u64,
    pub cpu_time_ms: Option<u64>,
    pub memory_peak_kb: Option<u64>,
}

/// Result returned to the caller
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: OutcomeKind,
    /// Program output on success, otherwise the surfaced diagnostic
    pub output: String,
    pub exit_code: Option<i32>,
    /// Signal name, e.g. `SIGKILL`
    pub signal: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ExecutionStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl ExecutionResult {
    /// Result for a request that failed inside the sandbox tooling
    pub fn internal_error(message: impl fmt::Display) -> Self {
        Self {
            outcome: OutcomeKind::InternalError,
            output: format!("Internal Error\n\n{}", message),
            exit_code: None,
            signal: None,
            truncated: false,
            stats: None,
            execution_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeKind::Success
    }
}

/// Errors from the OS account collaborator
#[derive(Error, Debug)]
pub enum AccountError {
    #[error("{command} failed with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{command} did not finish within {waited:?}")]
    CommandTimeout { command: String, waited: Duration },

    #[error("account {0} missing from the account database after creation")]
    NotFound(String),

    #[error("account lookup failed: {0}")]
    Lookup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<nix::errno::Errno> for AccountError {
    fn from(err: nix::errno::Errno) -> Self {
        AccountError::Lookup(err.to_string())
    }
}

/// Errors that abort a request before or outside classification.
/// Surfaced to callers as the InternalError outcome.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid execution id: {0}")]
    InvalidExecutionId(String),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for userbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Result type for account collaborator operations
pub type AccountResult<T> = std::result::Result<T, AccountError>;
