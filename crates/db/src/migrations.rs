/// Inline SQL migrations for the redraft database schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    user_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    current_pass INTEGER NOT NULL DEFAULT 0,
    total_passes INTEGER NOT NULL,
    model TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    completed_at INTEGER,
    error_message TEXT,
    result TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
"#,
    // Migration 2: jobs indexes
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at DESC);
"#,
    // Migration 3: append-only event log
    r#"
CREATE TABLE IF NOT EXISTS job_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    event_type TEXT NOT NULL,
    pass_number INTEGER,
    message TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    sequence INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
"#,
    // The unique index is what turns a crash-recovery double-append into a
    // conflict instead of a silent duplicate sequence.
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_job_events_job_sequence ON job_events(job_id, sequence);
"#,
    // Migration 4: version snapshots, one row per (file, pass)
    r#"
CREATE TABLE IF NOT EXISTS versions (
    file_id TEXT NOT NULL,
    pass_number INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (file_id, pass_number)
);
"#,
    // Migration 5: audit trail for explicitly superseded snapshots
    r#"
CREATE TABLE IF NOT EXISTS version_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id TEXT NOT NULL,
    pass_number INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    replaced_at INTEGER NOT NULL
);
"#,
];
