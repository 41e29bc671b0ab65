// crates/server/src/config.rs
//! Runtime configuration, read from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8317;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
const DEFAULT_PASS_RETRIES: u32 = 2;
const DEFAULT_PASS_TIMEOUT_SECS: u64 = 300;
const DEFAULT_STALE_AFTER_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Explicit database path; `None` means the platform data directory.
    pub db_path: Option<PathBuf>,
    /// Base URL of the refinement service.
    pub refiner_url: String,
    /// Directory holding original file content, keyed by file id.
    pub content_dir: PathBuf,
    /// Jobs allowed to run passes simultaneously; excess jobs queue.
    pub max_concurrent_jobs: usize,
    /// Retries per pass after the first attempt.
    pub pass_retries: u32,
    /// Wall-clock budget for a single pass attempt.
    pub pass_timeout: Duration,
    /// A processing job untouched for this long is presumed orphaned.
    pub stale_after: Duration,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_var("REDRAFT_PORT")
            .or_else(|| env_var("PORT"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            port,
            db_path: env_var("REDRAFT_DB").map(PathBuf::from),
            refiner_url: env_var("REDRAFT_REFINER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8000".to_string()),
            content_dir: env_var("REDRAFT_CONTENT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("content")),
            max_concurrent_jobs: env_parse("REDRAFT_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)
                .max(1),
            pass_retries: env_parse("REDRAFT_PASS_RETRIES", DEFAULT_PASS_RETRIES),
            pass_timeout: Duration::from_secs(env_parse(
                "REDRAFT_PASS_TIMEOUT_SECS",
                DEFAULT_PASS_TIMEOUT_SECS,
            )),
            stale_after: Duration::from_secs(env_parse(
                "REDRAFT_STALE_AFTER_SECS",
                DEFAULT_STALE_AFTER_SECS,
            )),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: None,
            refiner_url: "http://127.0.0.1:8000".to_string(),
            content_dir: PathBuf::from("content"),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            pass_retries: DEFAULT_PASS_RETRIES,
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
        }
    }
}
