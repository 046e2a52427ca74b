//! Built-in commands that run without spawning a process.

use std::path::{Path, PathBuf};

use crate::files::PathValidator;

use super::policy::CommandPolicy;

/// Commands handled inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Print the working directory.
    Pwd,
    /// Change the working directory.
    Cd,
    /// List a directory.
    Ls,
    /// Describe available commands.
    Help,
}

impl Builtin {
    /// Looks up a built-in by command name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pwd" => Some(Builtin::Pwd),
            "cd" => Some(Builtin::Cd),
            "ls" => Some(Builtin::Ls),
            "help" => Some(Builtin::Help),
            _ => None,
        }
    }
}

/// Result of a built-in: text to emit and the exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinOutput {
    pub output: String,
    pub code: i32,
}

impl BuiltinOutput {
    fn ok(output: String) -> Self {
        Self { output, code: 0 }
    }

    fn fail(output: String) -> Self {
        Self { output, code: 1 }
    }
}

/// `pwd`
pub fn pwd(cwd: &Path) -> BuiltinOutput {
    BuiltinOutput::ok(format!("{}\r\n", cwd.display()))
}

/// `cd [path]`
///
/// Resolves `path` against `cwd` (or uses `home` when omitted) and
/// re-validates the result. `cwd` is only updated on success.
pub fn cd(
    cwd: &mut PathBuf,
    home: &Path,
    args: &[String],
    validator: &dyn PathValidator,
) -> BuiltinOutput {
    let target = match args {
        [] => home.to_path_buf(),
        [path] => cwd.join(path),
        _ => return BuiltinOutput::fail("cd: too many arguments\r\n".to_string()),
    };
    let shown = args.first().map(String::as_str).unwrap_or("~");

    match validator.validate_dir(&target) {
        Ok(canonical) => {
            *cwd = canonical;
            BuiltinOutput::ok(String::new())
        }
        Err(e) => BuiltinOutput::fail(format!("cd: {}: {}\r\n", shown, e)),
    }
}

/// `ls [path]`
///
/// Option tokens are ignored. Directory entries are sorted lexicographically;
/// a file operand lists its own name.
pub async fn ls(cwd: &Path, args: &[String], validator: &dyn PathValidator) -> BuiltinOutput {
    let operand = args.iter().find(|a| !a.starts_with('-'));
    let target = operand.map(|p| cwd.join(p)).unwrap_or_else(|| cwd.to_path_buf());
    let shown = operand.map(String::as_str).unwrap_or(".");

    let canonical = match validator.validate(&target) {
        Ok(p) => p,
        Err(e) => return BuiltinOutput::fail(format!("ls: cannot access '{}': {}\r\n", shown, e)),
    };

    if !canonical.is_dir() {
        let name = target
            .file_name()
            .or_else(|| canonical.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| shown.to_string());
        return BuiltinOutput::ok(format!("{}\r\n", name));
    }

    match read_names(&canonical).await {
        Ok(names) => BuiltinOutput::ok(names.iter().map(|n| format!("{}\r\n", n)).collect()),
        Err(e) => BuiltinOutput::fail(format!("ls: cannot open directory '{}': {}\r\n", shown, e)),
    }
}

async fn read_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// `help`
pub fn help(policy: &CommandPolicy) -> BuiltinOutput {
    let mut out = String::from("Built-in commands: cd, help, ls, pwd\r\n");
    if policy.is_allowlist_mode() {
        out.push_str("Allowed commands:\r\n");
        let width = policy.allowlist().keys().map(|k| k.len()).max().unwrap_or(0);
        for (name, title) in policy.allowlist() {
            out.push_str(&format!("  {:width$}  {}\r\n", name, title, width = width));
        }
    } else {
        out.push_str("Other commands run directly; shell operators are not supported.\r\n");
    }
    BuiltinOutput::ok(out)
}
