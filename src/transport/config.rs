//! Immutable launch configuration for the subprocess transport.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default session id stamped onto user turns that do not carry one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Configuration for spawning and driving the CLI process.
///
/// Built once with the consuming `with_*` methods and then passed to the
/// transport; it is never mutated after construction. The executable path
/// and argument list are expected to be fully resolved by the caller; the
/// transport performs no discovery and no argument construction of its own.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    executable: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    session_id: String,
    close_stdin_after_prompt: bool,
}

impl TransportConfig {
    /// Create a configuration for the given resolved executable path.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            session_id: DEFAULT_SESSION_ID.to_string(),
            close_stdin_after_prompt: false,
        }
    }

    /// Set the full argument list passed to the executable.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set an environment variable for the child process.
    ///
    /// Variables are applied on top of the inherited environment; the
    /// transport never mutates the parent process's environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory for the child process.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the session id stamped onto user turns lacking one.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Close the child's stdin once the prompt source ends (streaming mode).
    #[must_use]
    pub fn with_close_stdin_after_prompt(mut self, close: bool) -> Self {
        self.close_stdin_after_prompt = close;
        self
    }

    /// The resolved executable path.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The argument list passed to the executable.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Extra environment variables for the child process.
    #[must_use]
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// The working directory, if set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// The session id stamped onto user turns lacking one.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether stdin closes once the prompt source ends.
    #[must_use]
    pub fn close_stdin_after_prompt(&self) -> bool {
        self.close_stdin_after_prompt
    }
}
