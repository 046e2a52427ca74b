//! Launch parameters for the interactive agent program.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use protocol::AgentMode;

use crate::config::AgentConfig;
use crate::session::SessionError;

/// Terminal type advertised to the agent program.
pub const TERM: &str = "xterm-256color";

/// Locale used when the host does not set one.
const DEFAULT_LANG: &str = "en_US.UTF-8";

/// Finds the agent executable.
///
/// The override is used when it names an executable file; a bare name is
/// looked up on `PATH`. Otherwise the install location is used if it is
/// executable. There is no further fallback.
pub fn resolve_executable(config: &AgentConfig) -> Result<PathBuf, SessionError> {
    if let Some(ref candidate) = config.executable {
        match resolve_override(candidate) {
            Some(path) => return Ok(path),
            None => tracing::warn!(
                path = %candidate.display(),
                "Agent executable override is not executable, trying install location"
            ),
        }
    }

    if is_executable(&config.install_path) {
        return Ok(config.install_path.clone());
    }

    Err(SessionError::ExecutableNotFound(
        config.install_path.display().to_string(),
    ))
}

fn resolve_override(candidate: &Path) -> Option<PathBuf> {
    if candidate.components().count() == 1 && !candidate.is_absolute() {
        return which::which(candidate).ok();
    }
    is_executable(candidate).then(|| candidate.to_path_buf())
}

/// Returns true if `path` is a regular file with an execute bit.
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Builds the agent's environment from the inherited one.
///
/// Variables whose names start with any of `strip_prefixes` are removed;
/// terminal capabilities are then set and `LANG` is defaulted.
pub fn build_env<I>(inherited: I, strip_prefixes: &[String]) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: BTreeMap<String, String> = inherited
        .into_iter()
        .filter(|(key, _)| !strip_prefixes.iter().any(|p| key.starts_with(p.as_str())))
        .collect();

    env.insert("TERM".to_string(), TERM.to_string());
    env.insert("COLORTERM".to_string(), "truecolor".to_string());
    env.entry("LANG".to_string())
        .or_insert_with(|| DEFAULT_LANG.to_string());
    env
}

/// Command-line switches for a launch mode.
pub fn mode_args(mode: AgentMode, config: &AgentConfig) -> Vec<String> {
    let flag = match mode {
        AgentMode::Default => return Vec::new(),
        AgentMode::Plan => &config.plan_flag,
        AgentMode::Auto => &config.auto_flag,
    };
    flag.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_build_env_strips_prefixes() {
        let env = build_env(
            vars(&[
                ("PATH", "/usr/bin"),
                ("TERMGATE_TOKEN", "secret"),
                ("HOST_SOCKET", "/tmp/s"),
                ("HOME", "/home/dev"),
            ]),
            &["TERMGATE_".to_string(), "HOST_".to_string()],
        );

        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/dev"));
        assert!(!env.contains_key("TERMGATE_TOKEN"));
        assert!(!env.contains_key("HOST_SOCKET"));
    }

    #[test]
    fn test_build_env_sets_terminal_and_locale() {
        let env = build_env(vars(&[("TERM", "dumb")]), &[]);
        assert_eq!(env["TERM"], TERM);
        assert_eq!(env["COLORTERM"], "truecolor");
        assert_eq!(env["LANG"], "en_US.UTF-8");

        let env = build_env(vars(&[("LANG", "de_DE.UTF-8")]), &[]);
        assert_eq!(env["LANG"], "de_DE.UTF-8");
    }

    #[test]
    fn test_mode_args() {
        let config = AgentConfig {
            plan_flag: "--permission-mode plan".to_string(),
            ..AgentConfig::default()
        };
        assert!(mode_args(AgentMode::Default, &config).is_empty());
        assert_eq!(
            mode_args(AgentMode::Plan, &config),
            vec!["--permission-mode", "plan"]
        );
        assert_eq!(mode_args(AgentMode::Auto, &config), vec!["--auto"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_prefers_executable_override() {
        let tmp = TempDir::new().unwrap();
        let override_bin = write_script(tmp.path(), "override", 0o755);
        let installed = write_script(tmp.path(), "installed", 0o755);

        let config = AgentConfig {
            executable: Some(override_bin.clone()),
            install_path: installed,
            ..AgentConfig::default()
        };
        assert_eq!(resolve_executable(&config).unwrap(), override_bin);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_falls_back_to_install_path() {
        let tmp = TempDir::new().unwrap();
        let not_executable = write_script(tmp.path(), "override", 0o644);
        let installed = write_script(tmp.path(), "installed", 0o755);

        let config = AgentConfig {
            executable: Some(not_executable),
            install_path: installed.clone(),
            ..AgentConfig::default()
        };
        assert_eq!(resolve_executable(&config).unwrap(), installed);
    }

    #[test]
    fn test_resolve_fails_without_candidates() {
        let tmp = TempDir::new().unwrap();
        let config = AgentConfig {
            executable: Some(tmp.path().join("missing")),
            install_path: tmp.path().join("also-missing"),
            ..AgentConfig::default()
        };
        assert!(matches!(
            resolve_executable(&config),
            Err(SessionError::ExecutableNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_bare_name_on_path() {
        let tmp = TempDir::new().unwrap();
        let config = AgentConfig {
            executable: Some(PathBuf::from("sh")),
            install_path: tmp.path().join("missing"),
            ..AgentConfig::default()
        };
        let resolved = resolve_executable(&config).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn test_directory_is_not_executable() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_executable(tmp.path()));
    }
}
