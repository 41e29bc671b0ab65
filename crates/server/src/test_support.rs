// crates/server/src/test_support.rs
//! Shared fixtures for in-crate tests: a scriptable refiner, a static
//! file source, and an `AppState` wired to an in-memory database.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use redraft_db::Database;

use crate::config::Config;
use crate::jobs::{FetchError, FileSource, RefineError, Refiner};
use crate::state::AppState;

enum StubMode {
    /// Succeed immediately, appending a per-pass marker to the content.
    Echo,
    /// Fail transiently `n` times (across all calls), then echo.
    FailTimes(u32),
    /// Every attempt fails transiently.
    AlwaysTransient,
    /// First attempt fails fatally.
    Fatal,
    /// Never resolves; the job sits in `processing`.
    PendingForever,
}

pub struct StubRefiner {
    mode: StubMode,
    calls: AtomicU32,
}

impl StubRefiner {
    pub fn echo() -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::Echo,
            calls: AtomicU32::new(0),
        })
    }

    pub fn fail_times(n: u32) -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::FailTimes(n),
            calls: AtomicU32::new(0),
        })
    }

    pub fn always_transient() -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::AlwaysTransient,
            calls: AtomicU32::new(0),
        })
    }

    pub fn fatal() -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::Fatal,
            calls: AtomicU32::new(0),
        })
    }

    pub fn pending_forever() -> Arc<Self> {
        Arc::new(Self {
            mode: StubMode::PendingForever,
            calls: AtomicU32::new(0),
        })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Refiner for StubRefiner {
    async fn run_pass(
        &self,
        _file_id: &str,
        pass_number: u32,
        content: &str,
        _model: &str,
    ) -> Result<String, RefineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            StubMode::Echo => Ok(format!("{content}\n[refined pass {pass_number}]")),
            StubMode::FailTimes(n) if call < *n => {
                Err(RefineError::Transient(format!("simulated outage {call}")))
            }
            StubMode::FailTimes(_) => Ok(format!("{content}\n[refined pass {pass_number}]")),
            StubMode::AlwaysTransient => {
                Err(RefineError::Transient(format!("simulated outage {call}")))
            }
            StubMode::Fatal => Err(RefineError::Fatal("simulated rejection".to_string())),
            StubMode::PendingForever => {
                futures_util::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }
}

/// File source returning the same original for every file id.
pub struct StaticFileSource;

#[async_trait]
impl FileSource for StaticFileSource {
    async fn fetch_original(&self, _file_id: &str) -> Result<String, FetchError> {
        Ok("First paragraph.\n\nSecond paragraph.\n".to_string())
    }
}

/// File source that fails every fetch, for seeding-failure tests.
pub struct MissingFileSource;

#[async_trait]
impl FileSource for MissingFileSource {
    async fn fetch_original(&self, file_id: &str) -> Result<String, FetchError> {
        Err(FetchError::NotFound(file_id.to_string()))
    }
}

pub fn test_config() -> Config {
    Config {
        pass_retries: 2,
        pass_timeout: Duration::from_secs(30),
        stale_after: Duration::from_secs(60),
        ..Config::default()
    }
}

pub async fn test_state(refiner: Arc<dyn Refiner>) -> Arc<AppState> {
    let db = Database::new_in_memory().await.expect("in-memory DB");
    AppState::new(db, refiner, Arc::new(StaticFileSource), test_config())
}
