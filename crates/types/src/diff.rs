// crates/types/src/diff.rs
//! Computed delta between two version snapshots.
//!
//! A `Diff` is a value object: recomputed per request, never stored.

use serde::{Deserialize, Serialize};

/// Classification of one aligned block in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeTag {
    Unchanged,
    Added,
    Removed,
    Modified,
}

/// Unit the content was split on before alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffGranularity {
    /// Blank-line separated paragraph blocks.
    Paragraph,
    /// Individual lines (fallback when no paragraph boundary exists).
    Line,
}

/// One change record in a diff.
///
/// `old_text` is `None` for `added` blocks; `new_text` is `None` for
/// `removed` blocks; both are present (and differ) for `modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffChange {
    pub tag: ChangeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_text: Option<String>,
}

/// Summary counts over a diff's change records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// Structured delta between two recorded passes of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    pub file_id: String,
    pub from_pass: u32,
    pub to_pass: u32,
    pub granularity: DiffGranularity,
    pub changes: Vec<DiffChange>,
    pub stats: DiffStats,
}

impl Diff {
    /// True when every change record is `unchanged`.
    pub fn is_identity(&self) -> bool {
        self.stats.added == 0 && self.stats.removed == 0 && self.stats.modified == 0
    }
}
