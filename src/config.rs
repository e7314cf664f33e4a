//! Application configuration from the environment

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::engine::{IsolationMode, SandboxConfig};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COURSES_FILE: &str = "courses.json";
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    /// Courses file, relative to `data_dir`
    pub courses_file: String,
    pub max_concurrent_runs: usize,
    pub sandbox: SandboxConfig,
}

impl AppConfig {
    /// Load `.env` (if any), then read configuration from process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut sandbox = match lookup("RUNTIME_CONFIG") {
            Some(path) => {
                info!("Loading runtime configuration from {}", path);
                SandboxConfig::from_file(&path)?
            }
            None => SandboxConfig::embedded()?,
        };

        if let Some(ms) = lookup("EXEC_TIME_LIMIT_MS") {
            sandbox.time_limit_ms = parse_positive(&ms, "EXEC_TIME_LIMIT_MS")?;
        }
        if let Some(mb) = lookup("EXEC_MEMORY_LIMIT_MB") {
            sandbox.memory_limit_mb = parse_positive(&mb, "EXEC_MEMORY_LIMIT_MB")?;
        }
        if let Some(mode) = lookup("SANDBOX_ISOLATION") {
            sandbox.isolation.mode = mode
                .parse::<IsolationMode>()
                .context("SANDBOX_ISOLATION must be \"namespaces\" or \"none\"")?;
        }

        let max_concurrent_runs = match lookup("MAX_CONCURRENT_RUNS") {
            Some(n) => parse_positive(&n, "MAX_CONCURRENT_RUNS")?,
            None => DEFAULT_MAX_CONCURRENT_RUNS,
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            data_dir: lookup("DATA_DIR")
                .unwrap_or_else(|| DEFAULT_DATA_DIR.into())
                .into(),
            courses_file: lookup("COURSES_FILE").unwrap_or_else(|| DEFAULT_COURSES_FILE.into()),
            max_concurrent_runs,
            sandbox,
        })
    }
}

fn parse_positive<T>(value: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got {:?}", key, value))?;
    if parsed <= T::default() {
        anyhow::bail!("{} must be a positive integer, got {:?}", key, value);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:5000");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.courses_file, "courses.json");
        assert_eq!(config.max_concurrent_runs, 4);
        assert_eq!(config.sandbox, SandboxConfig::embedded().unwrap());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("DATA_DIR", "/srv/courses"),
            ("MAX_CONCURRENT_RUNS", "16"),
            ("EXEC_TIME_LIMIT_MS", "2500"),
            ("EXEC_MEMORY_LIMIT_MB", "128"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.data_dir, PathBuf::from("/srv/courses"));
        assert_eq!(config.max_concurrent_runs, 16);
        assert_eq!(config.sandbox.time_limit_ms, 2500);
        assert_eq!(config.sandbox.memory_limit_mb, 128);
        assert_eq!(config.sandbox.isolation.mode, IsolationMode::Namespaces);
    }

    #[test]
    fn test_isolation_override() {
        let config = AppConfig::from_lookup(lookup(&[("SANDBOX_ISOLATION", " None ")])).unwrap();
        assert_eq!(config.sandbox.isolation.mode, IsolationMode::None);

        assert!(AppConfig::from_lookup(lookup(&[("SANDBOX_ISOLATION", "chroot")])).is_err());
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(AppConfig::from_lookup(lookup(&[("MAX_CONCURRENT_RUNS", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("EXEC_TIME_LIMIT_MS", "fast")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("RUNTIME_CONFIG", "/nonexistent.toml")])).is_err());
    }
}
