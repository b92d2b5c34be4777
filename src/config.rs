use std::path::PathBuf;
use std::time::Duration;

use crate::excel::RetryPolicy;

const DEFAULT_DB_FILE: &str = "receipts.db";
const APP_DIR: &str = "receipt-sheets";

/// Runtime settings. Read from the environment (and a `.env` file if present);
/// CLI flags override individual fields.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub retry: RetryPolicy,
}

/// Load `.env` from the working directory; a missing file is fine.
pub fn load_env() {
    let _ = dotenvy::dotenv();
}

impl AppConfig {
    /// Reads the process environment; call [`load_env`] first to pick up `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let defaults = RetryPolicy::default();
        let db_path = lookup("RECEIPT_DB_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);
        let max_attempts = lookup("RECEIPT_APPEND_RETRIES")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_attempts);
        let initial_delay = lookup("RECEIPT_RETRY_DELAY_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_delay);
        AppConfig {
            db_path,
            retry: RetryPolicy {
                max_attempts,
                initial_delay,
            },
        }
    }
}

/// `<data dir>/receipt-sheets/receipts.db`, or the working directory when the
/// platform has no data dir.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR).join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.db_path, default_db_path());
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn overrides() {
        let cfg = config(&[
            ("RECEIPT_DB_PATH", "/var/lib/r.db"),
            ("RECEIPT_APPEND_RETRIES", "5"),
            ("RECEIPT_RETRY_DELAY_MS", "250"),
        ]);
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/r.db"));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn from_env_reads_process_environment() {
        std::env::set_var("RECEIPT_APPEND_RETRIES", "7");
        let cfg = AppConfig::from_env();
        std::env::remove_var("RECEIPT_APPEND_RETRIES");
        assert_eq!(cfg.retry.max_attempts, 7);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config(&[("RECEIPT_APPEND_RETRIES", "0"), ("RECEIPT_RETRY_DELAY_MS", "soon")]);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_delay, Duration::from_secs(1));
    }
}
