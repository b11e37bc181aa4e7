//! Process launcher.
//!
//! Turns a program, its arguments and the options into a running
//! [`Child`]: interpreter self-reinvocation, shell forcing and escaping,
//! working directory and environment normalization.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::escape::{escape_arguments, is_forced_shell, shell_invocation, Platform};
use crate::config::{Options, Stdio};
use crate::output::OutputSource;

/// Flag prefix of debugger attachment, never forwarded to a reinvocation.
const DEBUG_FLAG_PREFIX: &str = "--inspect";

/// An interpreter whose name, when used as a program, is replaced by the
/// executable currently running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    name: String,
    path: PathBuf,
    flags: Vec<String>,
}

impl Interpreter {
    /// Describe an interpreter. Debug attachment flags are dropped.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, flags: Vec<String>) -> Self {
        Self {
            name: normalize_name(&name.into()),
            path: path.into(),
            flags: flags
                .into_iter()
                .filter(|flag| !flag.starts_with(DEBUG_FLAG_PREFIX))
                .collect(),
        }
    }

    /// The current executable, without flags.
    pub fn current() -> Option<Self> {
        let path = std::env::current_exe().ok()?;
        let name = path.file_stem()?.to_string_lossy().into_owned();
        Some(Self::new(name, path, Vec::new()))
    }

    /// Name matched against programs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flags prepended to the arguments of a reinvocation.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Whether `program` names this interpreter. Paths never match.
    pub fn matches(&self, program: &str) -> bool {
        !program.contains(['/', '\\']) && normalize_name(program) == self.name
    }
}

fn normalize_name(name: &str) -> String {
    let lowercase = name.to_lowercase();
    match lowercase.strip_suffix(".exe") {
        Some(stem) => stem.to_owned(),
        None => lowercase,
    }
}

/// Handle to a running subprocess.
///
/// Cheap to clone. The stdin pipe closes once it is closed explicitly or
/// every handle is dropped.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    terminate: CancellationToken,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Option<u32>, stdin: Option<ChildStdin>, terminate: CancellationToken) -> Self {
        Self {
            pid,
            stdin: Arc::new(Mutex::new(stdin)),
            terminate,
        }
    }

    /// OS process id, `None` if the process had already been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write bytes to the stdin pipe.
    pub async fn write_stdin(&self, data: &[u8]) -> io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"));
        };
        pipe.write_all(data).await?;
        pipe.flush().await
    }

    /// Close the stdin pipe. Closing twice is a no-op.
    pub async fn close_stdin(&self) -> io::Result<()> {
        match self.stdin.lock().await.take() {
            Some(mut pipe) => pipe.shutdown().await,
            None => Ok(()),
        }
    }

    /// Request termination (`SIGTERM` on Unix). The result still waits
    /// for the real exit.
    pub fn kill(&self) {
        self.terminate.cancel();
    }

    pub(crate) async fn take_stdin(&self) -> Option<ChildStdin> {
        self.stdin.lock().await.take()
    }

    pub(crate) fn termination(&self) -> CancellationToken {
        self.terminate.clone()
    }
}

/// Spawn `program` with normalized options.
pub(crate) fn launch(program: &str, args: &[String], options: &Options) -> io::Result<Child> {
    let platform = Platform::current();
    let interpreter = options.interpreter.clone().or_else(Interpreter::current);
    let (program, args) = match interpreter.filter(|interpreter| interpreter.matches(program)) {
        Some(interpreter) => (
            interpreter.path.to_string_lossy().into_owned(),
            interpreter.flags.iter().chain(args).cloned().collect(),
        ),
        None => (program.to_owned(), args.to_vec()),
    };

    let cwd = resolve_cwd(options.cwd.as_deref())?;
    let env = build_env(options, &cwd, platform)?;
    let path_var = env_value(&env, "PATH", platform).map(|value| value.to_string_lossy().into_owned());

    let forced = is_forced_shell(
        &program,
        platform,
        options.shell,
        &cwd,
        path_var.as_deref(),
        Path::is_file,
    );
    let (program, args) = escape_arguments(&program, &args, forced);
    let (program, args, verbatim) = if forced || options.shell == Some(true) {
        let comspec = env_value(&env, "ComSpec", platform).map(|value| value.to_string_lossy().into_owned());
        shell_invocation(platform, &program, &args, comspec.as_deref())
    } else {
        (program, args, false)
    };

    debug!(program = %program, ?args, cwd = %cwd.display(), forced, "launching subprocess");

    let mut command = Command::new(&program);
    push_args(&mut command, &args, verbatim);
    command
        .current_dir(&cwd)
        .env_clear()
        .envs(env)
        .stdin(to_stdio(options.stdin_mode()))
        .stdout(to_stdio(options.output_mode(OutputSource::Stdout)))
        .stderr(to_stdio(options.output_mode(OutputSource::Stderr)))
        .kill_on_drop(options.native.kill_on_drop);

    #[cfg(unix)]
    {
        if let Some(argv0) = &options.native.argv0 {
            command.arg0(argv0);
        }
    }

    command.spawn()
}

#[cfg(windows)]
fn push_args(command: &mut Command, args: &[String], verbatim: bool) {
    for arg in args {
        if verbatim {
            command.raw_arg(arg);
        } else {
            command.arg(arg);
        }
    }
}

#[cfg(not(windows))]
fn push_args(command: &mut Command, args: &[String], _verbatim: bool) {
    command.args(args);
}

fn to_stdio(mode: &Stdio) -> std::process::Stdio {
    match mode {
        Stdio::Pipe | Stdio::Input(_) => std::process::Stdio::piped(),
        Stdio::Ignore => std::process::Stdio::null(),
        Stdio::Inherit => std::process::Stdio::inherit(),
    }
}

fn resolve_cwd(cwd: Option<&Path>) -> io::Result<PathBuf> {
    let current = std::env::current_dir()?;
    Ok(match cwd {
        Some(dir) => normalize_path(&current.join(dir)),
        None => current,
    })
}

/// Resolve `.` and `..` lexically, without touching the file system.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Snapshot of the ambient environment merged with the overrides.
fn build_env(options: &Options, cwd: &Path, platform: Platform) -> io::Result<HashMap<OsString, OsString>> {
    let mut env: HashMap<OsString, OsString> = std::env::vars_os().collect();
    if let Some(overrides) = &options.env {
        for (key, value) in overrides {
            let key = existing_key(&env, key, platform).unwrap_or_else(|| OsString::from(key));
            env.insert(key, OsString::from(value));
        }
    }

    if options.prefer_local {
        let key = existing_key(&env, "PATH", platform).unwrap_or_else(|| OsString::from("PATH"));
        let path = prepend_local_dirs(env.get(&key).map(OsString::as_os_str), cwd, &options.local_bin_dir)?;
        env.insert(key, path);
    }

    Ok(env)
}

/// Key of an existing variable; names are case-insensitive on Windows.
fn existing_key(env: &HashMap<OsString, OsString>, name: &str, platform: Platform) -> Option<OsString> {
    env.keys()
        .find(|key| match platform {
            Platform::Windows => key.to_string_lossy().eq_ignore_ascii_case(name),
            Platform::Unix => key.as_os_str() == OsStr::new(name),
        })
        .cloned()
}

fn env_value<'a>(env: &'a HashMap<OsString, OsString>, name: &str, platform: Platform) -> Option<&'a OsStr> {
    let key = existing_key(env, name, platform)?;
    env.get(&key).map(OsString::as_os_str)
}

/// Prepend `<dir>/<local_bin_dir>` for `cwd` and each of its ancestors.
fn prepend_local_dirs(path: Option<&OsStr>, cwd: &Path, local_bin_dir: &Path) -> io::Result<OsString> {
    let existing: Vec<PathBuf> = path.map(|path| std::env::split_paths(path).collect()).unwrap_or_default();

    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in cwd.ancestors().map(|ancestor| ancestor.join(local_bin_dir)) {
        if !existing.contains(&dir) && !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs.extend(existing);

    std::env::join_paths(dirs).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}
