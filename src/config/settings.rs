use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Settings file path override.
pub const SETTINGS_PATH_VAR: &str = "VENICE_LAUNCHER_CONFIG";
/// Interpreter override, wins over the settings file.
pub const PYTHON_VAR: &str = "VENICE_PYTHON";

const SETTINGS_FILE_NAME: &str = "launcher.toml";
const DEFAULT_PYTHON: &str = "python";
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;
const DEFAULT_DRAIN_MS: u64 = 500;

/// Python/uvicorn style prefixes: `INFO:     Uvicorn running on ...`
pub const DEFAULT_LOG_PATTERN: &str =
    r"^\s*(?P<level>DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL|FATAL)\b";

/// Optional knobs not exposed as CLI flags (`launcher.toml`).
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LauncherSettings {
    /// Interpreter used to run `server.py`
    pub python: Option<String>,
    /// Address the status listener binds to
    pub listen_host: Option<IpAddr>,
    pub shutdown_grace_ms: Option<u64>,
    /// How long buffered backend output is still forwarded after exit
    pub drain_ms: Option<u64>,
    /// Regex with a `level` group used to classify backend output
    pub log_pattern: Option<String>,
}

impl LauncherSettings {
    /// Load from `VENICE_LAUNCHER_CONFIG` or `launcher.toml` next to the executable.
    /// A missing file yields defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os(SETTINGS_PATH_VAR) {
            Some(path) => PathBuf::from(path),
            None => default_settings_path()?,
        };
        let mut settings = Self::load_from(&path)?;
        if let Some(python) = std::env::var(PYTHON_VAR).ok().filter(|p| !p.is_empty()) {
            settings.python = Some(python);
        }
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No launcher settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read launcher settings {}: {}",
                    path.display(),
                    e
                ))
            }
        };
        let settings: Self = toml::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!("Invalid launcher settings {}: {}, using defaults", path.display(), e);
            Self::default()
        });
        Ok(settings)
    }

    pub fn python(&self) -> &str {
        self.python.as_deref().unwrap_or(DEFAULT_PYTHON)
    }

    pub fn listen_host(&self) -> IpAddr {
        self.listen_host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_ms.unwrap_or(DEFAULT_DRAIN_MS))
    }

    pub fn log_pattern(&self) -> &str {
        self.log_pattern.as_deref().unwrap_or(DEFAULT_LOG_PATTERN)
    }
}

/// Directory holding the launcher executable; the backend ships alongside it.
pub fn install_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("Executable {} has no parent directory", exe.display()))
}

fn default_settings_path() -> anyhow::Result<PathBuf> {
    Ok(install_dir()?.join(SETTINGS_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = LauncherSettings::default();
        assert_eq!(s.python(), "python");
        assert_eq!(s.listen_host(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(s.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(s.drain_timeout(), Duration::from_millis(500));
        assert_eq!(s.log_pattern(), DEFAULT_LOG_PATTERN);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = LauncherSettings::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(s, LauncherSettings::default());
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.toml");
        std::fs::write(
            &path,
            r#"
python = "python3.12"
listen_host = "127.0.0.1"
shutdown_grace_ms = 250
"#,
        )
        .unwrap();

        let s = LauncherSettings::load_from(&path).unwrap();
        assert_eq!(s.python(), "python3.12");
        assert_eq!(s.listen_host(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(s.shutdown_grace(), Duration::from_millis(250));
        // 지정하지 않은 값은 기본값 유지
        assert_eq!(s.drain_timeout(), Duration::from_millis(DEFAULT_DRAIN_MS));
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launcher.toml");
        std::fs::write(&path, "shutdown_grace_ms = \"soon\"").unwrap();

        let s = LauncherSettings::load_from(&path).unwrap();
        assert_eq!(s, LauncherSettings::default());
    }
}
