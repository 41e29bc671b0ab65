//! Shared fixtures for server integration tests: scripted refiners, a
//! static file source, and polling helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use redraft_db::Database;
use redraft_server::jobs::{FetchError, FileSource, RefineError, Refiner};
use redraft_server::{AppState, Config};
use redraft_types::{Job, JobEvent, JobEventType};

pub const ORIGINAL: &str = "First paragraph.\n\nSecond paragraph.\n";

/// Refiner that succeeds immediately, appending a per-pass marker.
pub struct EchoRefiner {
    pub calls: AtomicU32,
}

impl EchoRefiner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Refiner for EchoRefiner {
    async fn run_pass(
        &self,
        _file_id: &str,
        pass_number: u32,
        content: &str,
        _model: &str,
    ) -> Result<String, RefineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{content}\n[refined pass {pass_number}]"))
    }
}

/// Refiner that fails transiently `fail_first` times, then echoes.
pub struct FlakyRefiner {
    pub fail_first: u32,
    pub calls: AtomicU32,
}

impl FlakyRefiner {
    pub fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Refiner for FlakyRefiner {
    async fn run_pass(
        &self,
        _file_id: &str,
        pass_number: u32,
        content: &str,
        _model: &str,
    ) -> Result<String, RefineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(RefineError::Transient(format!("simulated outage {call}")))
        } else {
            Ok(format!("{content}\n[refined pass {pass_number}]"))
        }
    }
}

/// Refiner whose first call fails fatally.
pub struct FatalRefiner {
    pub calls: AtomicU32,
}

impl FatalRefiner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Refiner for FatalRefiner {
    async fn run_pass(
        &self,
        _file_id: &str,
        _pass_number: u32,
        _content: &str,
        _model: &str,
    ) -> Result<String, RefineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RefineError::Fatal("simulated rejection".to_string()))
    }
}

/// Refiner that blocks each call until the test releases a permit.
pub struct GatedRefiner {
    pub gate: Arc<Semaphore>,
    pub calls: AtomicU32,
}

impl GatedRefiner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Semaphore::new(0)),
            calls: AtomicU32::new(0),
        })
    }

    /// Let one in-flight (or future) call proceed.
    pub fn release_one(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Refiner for GatedRefiner {
    async fn run_pass(
        &self,
        _file_id: &str,
        pass_number: u32,
        content: &str,
        _model: &str,
    ) -> Result<String, RefineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| RefineError::Transient("gate closed".to_string()))?;
        permit.forget();
        Ok(format!("{content}\n[refined pass {pass_number}]"))
    }
}

/// File source returning the same original for every id.
pub struct StaticFileSource;

#[async_trait]
impl FileSource for StaticFileSource {
    async fn fetch_original(&self, _file_id: &str) -> Result<String, FetchError> {
        Ok(ORIGINAL.to_string())
    }
}

/// File source with no files at all.
pub struct EmptyFileSource;

#[async_trait]
impl FileSource for EmptyFileSource {
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

pub async fn state_with(refiner: Arc<dyn Refiner>) -> Arc<AppState> {
    let db = Database::new_in_memory().await.expect("in-memory DB");
    AppState::new(db, refiner, Arc::new(StaticFileSource), test_config())
}

pub fn new_job(file_id: &str, total_passes: u32) -> redraft_types::NewJob {
    redraft_types::NewJob {
        file_id: file_id.to_string(),
        file_name: "draft.md".to_string(),
        total_passes,
        model: "gpt-4".to_string(),
        user_id: None,
        metadata: serde_json::json!({}),
    }
}

/// Poll until the job reaches a terminal status (or panic after 10s).
pub async fn wait_until_terminal(state: &AppState, job_id: &str) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = state.db.get_job(job_id).await.expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("job {job_id} never finished (status {})", job.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until an event of the given type (and pass) is in the log.
pub async fn wait_for_event(
    state: &AppState,
    job_id: &str,
    event_type: JobEventType,
    pass_number: Option<u32>,
) -> JobEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let events = state.db.list_events(job_id, 0).await.expect("event log");
        if let Some(event) = events
            .into_iter()
            .find(|e| e.event_type == event_type && e.pass_number == pass_number)
        {
            return event;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("event {event_type} (pass {pass_number:?}) never appeared for {job_id}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Event types in log order, for whole-lifecycle assertions.
pub fn event_types(events: &[JobEvent]) -> Vec<JobEventType> {
    events.iter().map(|e| e.event_type).collect()
}
