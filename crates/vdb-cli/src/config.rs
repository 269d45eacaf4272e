use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vdb_client::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER_URL};

pub const DEFAULT_LOG_DIR: &str = ".vdb/logs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub stall_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub request_timeout: Duration,
    pub stall_timeout: Option<Duration>,
    pub max_iterations: Option<u32>,
    pub log_dir: PathBuf,
    pub log_stdout: bool,
}

impl Settings {
    pub fn resolve(
        overrides: &Overrides,
        file: &FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let server_url = overrides
            .server_url
            .clone()
            .or_else(|| env("VDB_SERVER_URL"))
            .or_else(|| file.server_url.clone())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        let request_timeout = overrides
            .request_timeout_secs
            .or_else(|| env("VDB_REQUEST_TIMEOUT_SECS").and_then(|value| value.trim().parse().ok()))
            .or(file.request_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let stall_timeout = overrides
            .stall_timeout_secs
            .or_else(|| env("VDB_STALL_TIMEOUT_SECS").and_then(|value| value.trim().parse().ok()))
            .or(file.stall_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let log_dir = overrides
            .log_dir
            .clone()
            .or_else(|| env("VDB_LOG_DIR").map(PathBuf::from))
            .or_else(|| file.log_dir.clone().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        let log_stdout = env("VDB_LOG_STDOUT")
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(false);

        Self {
            server_url,
            request_timeout,
            stall_timeout,
            max_iterations: file.max_iterations.filter(|max| *max > 0),
            log_dir,
            log_stdout,
        }
    }
}

pub fn config_path(flag: Option<PathBuf>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Some(path) = env("VDB_CONFIG").filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("vdb").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".vdb/config.toml"))
}

/// A missing file is the empty config.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = Settings::resolve(&Overrides::default(), &FileConfig::default(), env_of(&[]));
        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.stall_timeout, None);
        assert_eq!(settings.log_dir, PathBuf::from(DEFAULT_LOG_DIR));
        assert!(!settings.log_stdout);
    }

    #[test]
    fn flag_beats_env_beats_file() {
        let file = FileConfig {
            server_url: Some("http://file:1".to_string()),
            request_timeout_secs: Some(5),
            stall_timeout_secs: Some(90),
            max_iterations: Some(7),
            log_dir: Some("/var/log/vdb".to_string()),
        };
        let env = env_of(&[
            ("VDB_SERVER_URL", "http://env:2"),
            ("VDB_REQUEST_TIMEOUT_SECS", "12"),
            ("VDB_LOG_STDOUT", "yes"),
        ]);
        let overrides = Overrides {
            server_url: Some("http://flag:3".to_string()),
            ..Overrides::default()
        };
        let settings = Settings::resolve(&overrides, &file, env);
        assert_eq!(settings.server_url, "http://flag:3");
        assert_eq!(settings.request_timeout, Duration::from_secs(12));
        assert_eq!(settings.stall_timeout, Some(Duration::from_secs(90)));
        assert_eq!(settings.max_iterations, Some(7));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/vdb"));
        assert!(settings.log_stdout);
    }

    #[test]
    fn blank_and_invalid_env_values_fall_through() {
        let file = FileConfig {
            request_timeout_secs: Some(8),
            ..FileConfig::default()
        };
        let env = env_of(&[
            ("VDB_SERVER_URL", "  "),
            ("VDB_REQUEST_TIMEOUT_SECS", "soon"),
            ("VDB_STALL_TIMEOUT_SECS", "0"),
        ]);
        let settings = Settings::resolve(&Overrides::default(), &file, env);
        assert_eq!(settings.server_url, DEFAULT_SERVER_URL);
        assert_eq!(settings.request_timeout, Duration::from_secs(8));
        assert_eq!(settings.stall_timeout, None);
    }

    #[test]
    fn config_path_prefers_flag_then_env() {
        let env = env_of(&[("VDB_CONFIG", "/etc/vdb.toml")]);
        assert_eq!(
            config_path(Some(PathBuf::from("local.toml")), &env),
            PathBuf::from("local.toml")
        );
        assert_eq!(config_path(None, &env), PathBuf::from("/etc/vdb.toml"));
        assert!(config_path(None, env_of(&[])).ends_with("config.toml"));
    }

    #[test]
    fn load_config_reads_toml_and_reports_bad_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert_eq!(load_config(&missing).expect("missing"), FileConfig::default());

        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "server_url = \"http://lab:9000\"\nstall_timeout_secs = 120\nmax_iterations = 4\n",
        )
        .expect("write");
        let config = load_config(&path).expect("load");
        assert_eq!(config.server_url.as_deref(), Some("http://lab:9000"));
        assert_eq!(config.stall_timeout_secs, Some(120));
        assert_eq!(config.max_iterations, Some(4));

        fs::write(&path, "server_url = [").expect("write");
        let err = load_config(&path).expect_err("bad toml");
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
