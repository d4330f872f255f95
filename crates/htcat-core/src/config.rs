//! Optional config from .htcatrc (JSON) merged with env overrides.
//! Precedence: env > rc file > defaults.

use std::env;
use std::path::Path;
use std::time::Duration;

/// Concurrent range requests per download unless configured otherwise.
pub const DEFAULT_PARALLELISM: usize = 5;
/// Upper bound on configured parallelism.
pub const MAX_PARALLELISM: usize = 64;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Optional config from file. Env overrides these.
#[derive(Default)]
pub struct Config {
    pub parallelism: Option<usize>,
}

/// Load config from .htcatrc in dir, then ~/.htcatrc. Missing or invalid
/// file = default.
pub fn load_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    let home = dirs_home();
    let candidates = [
        dir.join(".htcatrc"),
        home.map(|h| h.join(".htcatrc"))
            .unwrap_or_else(|| dir.join(".none")),
    ];
    for path in &candidates {
        if path.is_file() {
            if let Ok(s) = std::fs::read_to_string(path) {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&s) {
                    if let Some(p) = v.get("parallelism").and_then(|x| x.as_u64()) {
                        cfg.parallelism = Some((p as usize).clamp(1, MAX_PARALLELISM));
                    }
                }
            }
            break;
        }
    }
    cfg
}

fn dirs_home() -> Option<std::path::PathBuf> {
    #[cfg(unix)]
    {
        env::var("HOME").ok().map(std::path::PathBuf::from)
    }
    #[cfg(windows)]
    {
        env::var("USERPROFILE").ok().map(std::path::PathBuf::from)
    }
}

fn parallelism_from_env() -> Option<usize> {
    env::var("HTCAT_PARALLELISM")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .map(|n| n.clamp(1, MAX_PARALLELISM))
}

/// Parallelism after applying every layer.
pub fn effective_parallelism(cfg: &Config) -> usize {
    parallelism_from_env()
        .or(cfg.parallelism)
        .unwrap_or(DEFAULT_PARALLELISM)
}

pub fn connect_timeout() -> Duration {
    let ms = env::var("HTCAT_CONNECT_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
    Duration::from_millis(ms)
}

pub fn read_timeout() -> Duration {
    let ms = env::var("HTCAT_READ_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_READ_TIMEOUT_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_rc_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert!(cfg.parallelism.is_none());
    }

    #[test]
    fn test_rc_file_parallelism_clamped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".htcatrc"), r#"{"parallelism": 1000}"#).unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.parallelism, Some(MAX_PARALLELISM));
    }

    #[test]
    fn test_invalid_rc_file_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".htcatrc"), "not json").unwrap();
        let cfg = load_config(dir.path());
        assert!(cfg.parallelism.is_none());
    }

    #[test]
    fn test_effective_parallelism_prefers_file_over_default() {
        let cfg = Config {
            parallelism: Some(9),
        };
        // Env var absent in the test environment unless a caller set it.
        if std::env::var("HTCAT_PARALLELISM").is_err() {
            assert_eq!(effective_parallelism(&cfg), 9);
            assert_eq!(effective_parallelism(&Config::default()), DEFAULT_PARALLELISM);
        }
    }
}
