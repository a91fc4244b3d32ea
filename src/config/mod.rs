//! Launch configuration: CLI flags plus the environment handed to the backend.
//!
//! Everything here is resolved once at startup and never mutated afterwards.

pub mod settings;

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

use clap::Parser;

pub use settings::LauncherSettings;

/// Credential variable read from the ambient environment and injected into the backend.
pub const API_KEY_VAR: &str = "VENICE_API_KEY";

pub const DEFAULT_PORT: u16 = 8000;

/// Snapshot of the launcher's own environment.
pub type AmbientEnv = BTreeMap<OsString, OsString>;

/// Capture the current process environment without panicking on non-UTF-8 entries.
pub fn ambient_env() -> AmbientEnv {
    std::env::vars_os().collect()
}

/// Command-line interface.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "venice-launcher",
    version,
    about = "Start the Venice AI Images MCP server and keep it supervised"
)]
pub struct Cli {
    /// Port to run the MCP server on
    #[arg(short, long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Venice AI API key (falls back to VENICE_API_KEY)
    #[arg(short = 'k', long = "api-key")]
    pub api_key: Option<String>,
}

/// Where the credential in a [`LaunchConfig`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Flag,
    Environment,
    Missing,
}

/// Resolved, immutable startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub port: u16,
    /// `None` also when the ambient key exists but is not UTF-8; the child
    /// then inherits the raw value.
    pub api_key: Option<String>,
    pub credential_source: CredentialSource,
}

impl LaunchConfig {
    /// Resolve the port and credential from parsed flags, falling back to the
    /// ambient `VENICE_API_KEY`. Never fails; a missing credential only warns.
    pub fn resolve(cli: &Cli, ambient: &AmbientEnv) -> Self {
        let flag_key = cli.api_key.as_deref().filter(|k| !k.is_empty());
        let ambient_raw = ambient
            .get(OsStr::new(API_KEY_VAR))
            .filter(|v| !v.is_empty());

        let (api_key, credential_source) = match (flag_key, ambient_raw) {
            (Some(key), _) => (Some(key.to_string()), CredentialSource::Flag),
            (None, Some(raw)) => (raw.to_str().map(str::to_string), CredentialSource::Environment),
            (None, None) => (None, CredentialSource::Missing),
        };

        match (credential_source, &api_key) {
            (CredentialSource::Flag, _) => tracing::info!("Using provided Venice AI API key"),
            (CredentialSource::Environment, Some(_)) => {
                tracing::info!("Using Venice AI API key from {}", API_KEY_VAR)
            }
            // 자식 환경에는 원래 바이트 그대로 전달됨
            (CredentialSource::Environment, None) => tracing::warn!(
                "{} is not valid UTF-8; passing it to the backend unchanged",
                API_KEY_VAR
            ),
            (CredentialSource::Missing, _) => tracing::warn!(
                "No Venice API key provided. Set with --api-key or {} environment variable",
                API_KEY_VAR
            ),
        }

        Self {
            port: cli.port,
            api_key,
            credential_source,
        }
    }

    /// Parse raw arguments and resolve against the given environment.
    pub fn from_args<I, T>(args: I, ambient: &AmbientEnv) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        Ok(Self::resolve(&cli, ambient))
    }

    pub fn backend_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

// ─── Process Environment ─────────────────────────────────────

/// Environment handed to the backend: the ambient one plus the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnvironment {
    vars: BTreeMap<OsString, OsString>,
}

impl ProcessEnvironment {
    /// Copy `ambient` and overlay `VENICE_API_KEY` when the config carries one.
    pub fn build(ambient: &AmbientEnv, config: &LaunchConfig) -> Self {
        let mut vars = ambient.clone();
        if let Some(key) = &config.api_key {
            vars.insert(OsString::from(API_KEY_VAR), OsString::from(key));
        }
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(pairs: &[(&str, &str)]) -> AmbientEnv {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = LaunchConfig::from_args(["venice-launcher"], &AmbientEnv::new()).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.credential_source, CredentialSource::Missing);
    }

    #[test]
    fn test_short_and_long_flags() {
        let env = AmbientEnv::new();
        let short = LaunchConfig::from_args(["venice-launcher", "-p", "9000", "-k", "abc"], &env).unwrap();
        let long = LaunchConfig::from_args(
            ["venice-launcher", "--port", "9000", "--api-key", "abc"],
            &env,
        )
        .unwrap();
        assert_eq!(short, long);
        assert_eq!(short.port, 9000);
        assert_eq!(short.api_key.as_deref(), Some("abc"));
        assert_eq!(short.credential_source, CredentialSource::Flag);
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(LaunchConfig::from_args(["venice-launcher", "-p", "0"], &AmbientEnv::new()).is_err());
        assert!(LaunchConfig::from_args(["venice-launcher", "-p", "70000"], &AmbientEnv::new()).is_err());
    }

    #[test]
    fn test_help_is_not_a_config() {
        let err = LaunchConfig::from_args(["venice-launcher", "-h"], &AmbientEnv::new()).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_ambient_fallback() {
        let env = env_with(&[(API_KEY_VAR, "from-env")]);
        let cfg = LaunchConfig::from_args(["venice-launcher"], &env).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("from-env"));
        assert_eq!(cfg.credential_source, CredentialSource::Environment);
    }

    #[test]
    fn test_flag_overrides_ambient() {
        let env = env_with(&[(API_KEY_VAR, "from-env")]);
        let cfg = LaunchConfig::from_args(["venice-launcher", "-k", "abc"], &env).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("abc"));

        let child_env = ProcessEnvironment::build(&env, &cfg);
        assert_eq!(child_env.get(API_KEY_VAR), Some(OsStr::new("abc")));
    }

    /// 빈 문자열은 키가 없는 것으로 취급
    #[test]
    fn test_empty_key_counts_as_missing() {
        let env = env_with(&[(API_KEY_VAR, "")]);
        let cfg = LaunchConfig::from_args(["venice-launcher", "--api-key", ""], &env).unwrap();
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.credential_source, CredentialSource::Missing);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_ambient_key_is_passed_through() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(b"key-\xff".to_vec());
        let mut env = AmbientEnv::new();
        env.insert(OsString::from(API_KEY_VAR), raw.clone());

        let cfg = LaunchConfig::from_args(["venice-launcher"], &env).unwrap();
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.credential_source, CredentialSource::Environment);

        let child_env = ProcessEnvironment::build(&env, &cfg);
        assert_eq!(child_env.get(API_KEY_VAR), Some(raw.as_os_str()));
    }

    #[test]
    fn test_environment_copies_ambient() {
        let env = env_with(&[("PATH", "/usr/bin"), ("HOME", "/home/op")]);
        let cfg = LaunchConfig::from_args(["venice-launcher"], &env).unwrap();
        let child_env = ProcessEnvironment::build(&env, &cfg);

        assert_eq!(child_env.len(), 2);
        assert_eq!(child_env.get("PATH"), Some(OsStr::new("/usr/bin")));
        assert!(child_env.get(API_KEY_VAR).is_none());
    }

    #[test]
    fn test_environment_adds_exactly_one_variable() {
        let env = env_with(&[("PATH", "/usr/bin")]);
        let cfg = LaunchConfig::from_args(["venice-launcher", "-k", "abc"], &env).unwrap();
        let child_env = ProcessEnvironment::build(&env, &cfg);

        assert_eq!(child_env.len(), env.len() + 1);
        // ambient snapshot is untouched
        assert!(!env.contains_key(OsStr::new(API_KEY_VAR)));
    }

    #[test]
    fn test_backend_url() {
        let cfg = LaunchConfig::from_args(["venice-launcher", "-p", "8123"], &AmbientEnv::new()).unwrap();
        assert_eq!(cfg.backend_url(), "http://localhost:8123");
    }
}
