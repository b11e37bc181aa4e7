//! Invocation options.
//!
//! Options are resolved with the following priority (highest to lowest):
//! 1. Builder calls
//! 2. Environment variables (`Options::apply_env`)
//! 3. Options file (JSON)
//! 4. Default values

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SpawnError;
use crate::execution::Interpreter;
use crate::output::OutputSource;

/// Directory searched in the working directory and its ancestors when
/// `prefer_local` is set.
pub const DEFAULT_LOCAL_BIN_DIR: &str = "node_modules/.bin";

/// How one standard stream of the subprocess is connected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stdio {
    /// A pipe owned by the subprocess handle.
    #[default]
    Pipe,
    /// Connected to the null device.
    Ignore,
    /// Shared with the current process.
    Inherit,
    /// Literal text written to stdin, which is then closed. Stdin only.
    Input(String),
}

impl Stdio {
    /// Whether the stream is a pipe readable or writable by this crate.
    pub fn is_piped(&self) -> bool {
        matches!(self, Self::Pipe | Self::Input(_))
    }
}

/// Options passed through to the spawn primitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeOptions {
    /// Override for `argv[0]` (Unix only).
    pub argv0: Option<String>,
    /// Kill the process when its `Child` is dropped.
    pub kill_on_drop: bool,
}

/// Options of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Stdin mode, falls back to `stdio`.
    pub stdin: Option<Stdio>,
    /// Stdout mode, falls back to `stdio`.
    pub stdout: Option<Stdio>,
    /// Stderr mode, falls back to `stdio`.
    pub stderr: Option<Stdio>,
    /// Mode of every stream not set individually.
    pub stdio: Option<Stdio>,
    /// Working directory, relative to the current one.
    pub cwd: Option<PathBuf>,
    /// Environment overrides merged over the current environment.
    pub env: Option<HashMap<String, String>>,
    /// Prepend local binary directories to `PATH`.
    pub prefer_local: bool,
    /// Directory looked up by `prefer_local`.
    pub local_bin_dir: PathBuf,
    /// Explicit shell choice; `None` lets the platform decide.
    pub shell: Option<bool>,
    /// Terminate the process after this long.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Option<Duration>,
    /// Terminate the process when cancelled.
    #[serde(skip)]
    pub signal: Option<CancellationToken>,
    /// Interpreter whose name is re-invoked with its own executable.
    #[serde(skip)]
    pub interpreter: Option<Interpreter>,
    /// Pass-through options.
    pub native: NativeOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            stdio: None,
            cwd: None,
            env: None,
            prefer_local: false,
            local_bin_dir: PathBuf::from(DEFAULT_LOCAL_BIN_DIR),
            shell: None,
            timeout: None,
            signal: None,
            interpreter: None,
            native: NativeOptions::default(),
        }
    }
}

impl Options {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SpawnError> {
        let content = std::fs::read_to_string(path).map_err(SpawnError::OptionsFileIo)?;
        Self::from_json(&content)
    }

    /// Parse options from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SpawnError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = var("SPAWNLINE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }

        if let Some(prefer_local) = var("SPAWNLINE_PREFER_LOCAL") {
            self.prefer_local = matches!(prefer_local.as_str(), "1" | "true" | "yes");
        }
    }

    /// Set the stdin mode.
    pub fn stdin(mut self, stdio: Stdio) -> Self {
        self.stdin = Some(stdio);
        self
    }

    /// Set the stdout mode.
    pub fn stdout(mut self, stdio: Stdio) -> Self {
        self.stdout = Some(stdio);
        self
    }

    /// Set the stderr mode.
    pub fn stderr(mut self, stdio: Stdio) -> Self {
        self.stderr = Some(stdio);
        self
    }

    /// Set the mode of every stream not set individually.
    pub fn stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = Some(stdio);
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (k, v) in vars {
            env.insert(k.into(), v.into());
        }
        self
    }

    /// Prefer binaries from local bin directories.
    pub fn prefer_local(mut self, prefer: bool) -> Self {
        self.prefer_local = prefer;
        self
    }

    /// Set the directory looked up by `prefer_local`.
    pub fn local_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_bin_dir = dir.into();
        self
    }

    /// Run the command through a shell, or never.
    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = Some(shell);
        self
    }

    /// Set the execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Terminate the process when `token` is cancelled.
    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }

    /// Set the interpreter re-invoked by name.
    pub fn interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Override `argv[0]` (Unix only).
    pub fn argv0(mut self, argv0: impl Into<String>) -> Self {
        self.native.argv0 = Some(argv0.into());
        self
    }

    /// Kill the process when its handle is dropped.
    pub fn kill_on_drop(mut self, kill: bool) -> Self {
        self.native.kill_on_drop = kill;
        self
    }

    /// Resolved stdin mode.
    pub fn stdin_mode(&self) -> &Stdio {
        Self::resolve(&self.stdin, &self.stdio)
    }

    /// Resolved mode of an output stream.
    pub fn output_mode(&self, source: OutputSource) -> &Stdio {
        match source {
            OutputSource::Stdout => Self::resolve(&self.stdout, &self.stdio),
            OutputSource::Stderr => Self::resolve(&self.stderr, &self.stdio),
        }
    }

    fn resolve<'a>(own: &'a Option<Stdio>, combined: &'a Option<Stdio>) -> &'a Stdio {
        const PIPE: &Stdio = &Stdio::Pipe;
        own.as_ref().or(combined.as_ref()).unwrap_or(PIPE)
    }

    /// Check the options before launching, returning the reason they are invalid.
    pub(crate) fn validate(&self) -> Result<(), String> {
        for source in [OutputSource::Stdout, OutputSource::Stderr] {
            if let Stdio::Input(_) = self.output_mode(source) {
                return Err(format!(
                    "the \"{}\" option cannot be a literal input",
                    source.as_str()
                ));
            }
        }

        if self.local_bin_dir.as_os_str().is_empty() && self.prefer_local {
            return Err("\"prefer_local\" requires a local bin directory".to_string());
        }

        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}
