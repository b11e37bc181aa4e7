//! Shell forcing and `cmd.exe` escaping.
//!
//! On Windows only `*.exe` and `*.com` files start without an interpreter;
//! scripts and `*.cmd` / `*.bat` launchers need `cmd.exe`. The decision and
//! the escaping are pure functions of an explicit [`Platform`], so both
//! branches run on any host.

use std::path::Path;

/// Extensions of files the Windows loader starts directly.
const NATIVE_EXTENSIONS: [&str; 2] = [".exe", ".com"];

/// Operating system family the command is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Windows: native binaries only, `cmd.exe` for everything else.
    Windows,
    /// Any other platform.
    Unix,
}

impl Platform {
    /// The platform this crate was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Separator of `PATH` entries.
    pub fn path_delimiter(&self) -> char {
        match self {
            Self::Windows => ';',
            Self::Unix => ':',
        }
    }
}

/// Decide whether `program` must run through `cmd.exe`.
///
/// An explicit `shell` choice from the caller is never overridden. The
/// search covers `cwd` and every `PATH` entry, with each native
/// extension appended to `program`.
pub fn is_forced_shell(
    program: &str,
    platform: Platform,
    shell: Option<bool>,
    cwd: &Path,
    path_var: Option<&str>,
    is_file: impl Fn(&Path) -> bool,
) -> bool {
    if platform != Platform::Windows || shell.is_some() {
        return false;
    }

    let lowercase = program.to_lowercase();
    if NATIVE_EXTENSIONS.iter().any(|ext| lowercase.ends_with(ext)) {
        return false;
    }

    let path_dirs = path_var
        .unwrap_or_default()
        .split(platform.path_delimiter())
        .filter(|part| !part.is_empty())
        .map(strip_quotes);
    let dirs: Vec<&Path> = std::iter::once(cwd)
        .chain(path_dirs.map(Path::new))
        .collect();

    let found = NATIVE_EXTENSIONS.iter().any(|ext| {
        dirs.iter()
            .any(|dir| is_file(&dir.join(format!("{program}{ext}"))))
    });
    !found
}

fn strip_quotes(part: &str) -> &str {
    part.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(part)
}

/// Escape the program and arguments for `cmd.exe` when the shell is forced.
pub fn escape_arguments(program: &str, args: &[String], forced: bool) -> (String, Vec<String>) {
    if !forced {
        return (program.to_owned(), args.to_vec());
    }

    (
        escape_metacharacters(program),
        args.iter().map(|arg| escape_argument(arg)).collect(),
    )
}

/// Quote one argument for `cmd.exe` running a batch file.
///
/// Metacharacters are escaped twice: once for `cmd.exe` itself and once
/// for the batch file it runs.
fn escape_argument(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');

    escape_metacharacters(&escape_metacharacters(&quoted))
}

/// Prefix every `cmd.exe` metacharacter with `^`.
fn escape_metacharacters(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '(' | ')' | '[' | ']' | '%' | '!' | '^' | '"' | '`' | '<' | '>' | '&' | '|' | ';'
                | ',' | ' ' | '*' | '?'
        ) {
            escaped.push('^');
        }
        escaped.push(c);
    }
    escaped
}

/// The command handed to the loader when a shell runs `program`.
///
/// Returns `(program, args, verbatim)`. Verbatim arguments must be passed
/// to the loader without any further quoting.
pub fn shell_invocation(
    platform: Platform,
    program: &str,
    args: &[String],
    comspec: Option<&str>,
) -> (String, Vec<String>, bool) {
    let line = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    match platform {
        Platform::Windows => (
            comspec.unwrap_or("cmd.exe").to_owned(),
            vec![
                "/d".to_owned(),
                "/s".to_owned(),
                "/c".to_owned(),
                format!("\"{line}\""),
            ],
            true,
        ),
        Platform::Unix => ("/bin/sh".to_owned(), vec!["-c".to_owned(), line], false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn never(_: &Path) -> bool {
        false
    }

    #[test]
    fn test_never_forced_off_windows() {
        assert!(!is_forced_shell(
            "script.cmd",
            Platform::Unix,
            None,
            Path::new("/tmp"),
            Some("/usr/bin"),
            never
        ));
    }

    #[test]
    fn test_explicit_choice_respected() {
        for shell in [Some(true), Some(false)] {
            assert!(!is_forced_shell(
                "script",
                Platform::Windows,
                shell,
                Path::new("C:\\work"),
                None,
                never
            ));
        }
    }

    #[test]
    fn test_native_extension_not_forced() {
        for program in ["tool.exe", "TOOL.EXE", "legacy.Com"] {
            assert!(!is_forced_shell(
                program,
                Platform::Windows,
                None,
                Path::new("C:\\work"),
                None,
                never
            ));
        }
    }

    #[test]
    fn test_native_binary_found_on_path() {
        let found = |path: &Path| {
            let path = path.to_string_lossy();
            path.contains("Program Files") && path.ends_with("git.exe")
        };
        assert!(!is_forced_shell(
            "git",
            Platform::Windows,
            None,
            Path::new("C:\\work"),
            Some(";C:\\Windows;\"C:\\Program Files\\Git\";"),
            found
        ));
    }

    #[test]
    fn test_native_binary_found_in_cwd() {
        let found = |path: &Path| path.starts_with("C:\\work") && path.ends_with("tool.com");
        assert!(!is_forced_shell(
            "tool",
            Platform::Windows,
            None,
            Path::new("C:\\work"),
            None,
            found
        ));
    }

    #[test]
    fn test_script_forced_and_candidates_checked() {
        let checked = Mutex::new(Vec::<PathBuf>::new());
        let forced = is_forced_shell(
            "eslint",
            Platform::Windows,
            None,
            Path::new("C:\\work"),
            Some("C:\\bin;\"C:\\node\""),
            |path: &Path| {
                checked.lock().unwrap().push(path.to_path_buf());
                false
            },
        );

        assert!(forced);
        let checked = checked.into_inner().unwrap();
        assert_eq!(checked.len(), 6);
        assert!(checked.iter().all(|p| !p.to_string_lossy().contains('"')));
        assert!(checked
            .iter()
            .any(|p| p.to_string_lossy().ends_with("eslint.com")));
    }

    #[test]
    fn test_no_escaping_unless_forced() {
        let args = vec!["a b".to_string(), "\"q\"".to_string()];
        let (program, escaped) = escape_arguments("prog", &args, false);
        assert_eq!(program, "prog");
        assert_eq!(escaped, args);
    }

    #[test]
    fn test_escape_program_single_pass() {
        let (program, _) = escape_arguments("my tool", &[], true);
        assert_eq!(program, "my^ tool");
    }

    #[test]
    fn test_escape_plain_argument() {
        let (_, args) = escape_arguments("prog", &["value".to_string()], true);
        assert_eq!(args, vec!["^^^\"value^^^\""]);
    }

    #[test]
    fn test_escape_argument_with_space() {
        let (_, args) = escape_arguments("prog", &["foo bar".to_string()], true);
        assert_eq!(args, vec!["^^^\"foo^^^ bar^^^\""]);
    }

    #[test]
    fn test_escape_embedded_quote() {
        let (_, args) = escape_arguments("prog", &["a\"b".to_string()], true);
        assert_eq!(args, vec!["^^^\"a\\^^^\"b^^^\""]);
    }

    #[test]
    fn test_escape_backslashes_before_quote_doubled() {
        let (_, args) = escape_arguments("prog", &["a\\\"b".to_string()], true);
        assert_eq!(args, vec!["^^^\"a\\\\\\^^^\"b^^^\""]);
    }

    #[test]
    fn test_escape_trailing_backslash_doubled() {
        let (_, args) = escape_arguments("prog", &["dir\\".to_string()], true);
        assert_eq!(args, vec!["^^^\"dir\\\\^^^\""]);
    }

    #[test]
    fn test_interior_backslashes_untouched() {
        let (_, args) = escape_arguments("prog", &["C:\\a\\b".to_string()], true);
        assert_eq!(args, vec!["^^^\"C:\\a\\b^^^\""]);
    }

    #[test]
    fn test_shell_invocation_unix() {
        let (program, args, verbatim) =
            shell_invocation(Platform::Unix, "echo", &["$HOME".to_string()], None);
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c", "echo $HOME"]);
        assert!(!verbatim);
    }

    #[test]
    fn test_shell_invocation_windows() {
        let (program, args, verbatim) = shell_invocation(
            Platform::Windows,
            "npm",
            &["^^^\"install^^^\"".to_string()],
            Some("C:\\Windows\\system32\\cmd.exe"),
        );
        assert_eq!(program, "C:\\Windows\\system32\\cmd.exe");
        assert_eq!(args, vec!["/d", "/s", "/c", "\"npm ^^^\"install^^^\"\""]);
        assert!(verbatim);
    }

    #[test]
    fn test_path_delimiter() {
        assert_eq!(Platform::Windows.path_delimiter(), ';');
        assert_eq!(Platform::Unix.path_delimiter(), ':');
    }
}
