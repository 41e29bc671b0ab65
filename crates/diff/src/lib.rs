// crates/diff/src/lib.rs
//! Diff engine for version snapshots.
//!
//! Splits document content into paragraph blocks (blank-line separated),
//! aligns the two block sequences with an LCS diff (`similar`), and emits
//! ordered change records tagged unchanged/added/removed/modified. Content
//! with no paragraph boundary falls back to line granularity.
//!
//! The computation is a pure function of the two content strings: the same
//! input pair always produces a byte-identical `Diff`, so results are safe
//! to cache and stable under test.
//!
//! Blocks carry their trailing separators (newlines and blank lines), so
//! concatenating the `new_text` side of every non-removed record rebuilds
//! the "to" content exactly.

use redraft_types::{ChangeTag, Diff, DiffChange, DiffGranularity, DiffStats};
use similar::{capture_diff_slices, Algorithm, DiffOp};

/// Split content into paragraph blocks.
///
/// Each block is a run of non-blank lines plus every trailing blank line
/// and newline, so `blocks.concat() == content` holds for any input.
pub fn split_paragraphs(content: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut block_start = 0;
    let mut cursor = 0;
    // Tracks whether the current block already contains a non-blank line;
    // blank lines seen after that point close the block.
    let mut in_trailing_blanks = false;

    for line in content.split_inclusive('\n') {
        let is_blank = line.trim().is_empty();
        if is_blank {
            in_trailing_blanks = true;
        } else if in_trailing_blanks {
            blocks.push(&content[block_start..cursor]);
            block_start = cursor;
            in_trailing_blanks = false;
        }
        cursor += line.len();
    }
    if block_start < content.len() {
        blocks.push(&content[block_start..]);
    }
    blocks
}

/// Split content into lines, each keeping its trailing newline.
pub fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

/// Pick the granularity for a content pair: paragraphs when either side
/// has at least one paragraph boundary, lines otherwise.
fn choose_granularity(from: &str, to: &str) -> DiffGranularity {
    if split_paragraphs(from).len() > 1 || split_paragraphs(to).len() > 1 {
        DiffGranularity::Paragraph
    } else {
        DiffGranularity::Line
    }
}

/// Compute the structured delta between two content snapshots.
///
/// `from_pass`/`to_pass` are carried through for the caller; only the two
/// content strings affect the change records.
pub fn compute(file_id: &str, from_pass: u32, to_pass: u32, from: &str, to: &str) -> Diff {
    let granularity = choose_granularity(from, to);
    let (old_blocks, new_blocks) = match granularity {
        DiffGranularity::Paragraph => (split_paragraphs(from), split_paragraphs(to)),
        DiffGranularity::Line => (split_lines(from), split_lines(to)),
    };

    let ops = capture_diff_slices(Algorithm::Myers, &old_blocks, &new_blocks);
    let mut changes = Vec::new();
    let mut stats = DiffStats::default();

    for op in &ops {
        match *op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => {
                for i in 0..len {
                    changes.push(DiffChange {
                        tag: ChangeTag::Unchanged,
                        old_text: Some(old_blocks[old_index + i].to_string()),
                        new_text: Some(new_blocks[new_index + i].to_string()),
                    });
                    stats.unchanged += 1;
                }
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for i in 0..old_len {
                    changes.push(DiffChange {
                        tag: ChangeTag::Removed,
                        old_text: Some(old_blocks[old_index + i].to_string()),
                        new_text: None,
                    });
                    stats.removed += 1;
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for i in 0..new_len {
                    changes.push(DiffChange {
                        tag: ChangeTag::Added,
                        old_text: None,
                        new_text: Some(new_blocks[new_index + i].to_string()),
                    });
                    stats.added += 1;
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                // Pair up blocks positionally as `modified`; the longer
                // side's overhang becomes plain removals/additions.
                let paired = old_len.min(new_len);
                for i in 0..paired {
                    changes.push(DiffChange {
                        tag: ChangeTag::Modified,
                        old_text: Some(old_blocks[old_index + i].to_string()),
                        new_text: Some(new_blocks[new_index + i].to_string()),
                    });
                    stats.modified += 1;
                }
                for i in paired..old_len {
                    changes.push(DiffChange {
                        tag: ChangeTag::Removed,
                        old_text: Some(old_blocks[old_index + i].to_string()),
                        new_text: None,
                    });
                    stats.removed += 1;
                }
                for i in paired..new_len {
                    changes.push(DiffChange {
                        tag: ChangeTag::Added,
                        old_text: None,
                        new_text: Some(new_blocks[new_index + i].to_string()),
                    });
                    stats.added += 1;
                }
            }
        }
    }

    Diff {
        file_id: file_id.to_string(),
        from_pass,
        to_pass,
        granularity,
        changes,
        stats,
    }
}

/// Rebuild the "to" content from a diff's change records.
///
/// Concatenates `new_text` for every unchanged/added/modified record and
/// skips removals. Because blocks carry their separators this reproduces
/// the stored snapshot byte-for-byte.
pub fn reconstruct_to(diff: &Diff) -> String {
    let mut out = String::new();
    for change in &diff.changes {
        if let Some(text) = &change.new_text {
            out.push_str(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TWO_PARAS: &str = "First paragraph line one.\nLine two.\n\nSecond paragraph.\n";

    #[test]
    fn test_split_paragraphs_reassembles() {
        for content in [
            TWO_PARAS,
            "no trailing newline",
            "a\n\n\n\nb\n",
            "\n\nleading blanks\n",
            "",
            "single paragraph\nwith two lines\n",
        ] {
            let blocks = split_paragraphs(content);
            assert_eq!(blocks.concat(), content, "content: {content:?}");
        }
    }

    #[test]
    fn test_split_paragraphs_counts() {
        assert_eq!(split_paragraphs(TWO_PARAS).len(), 2);
        assert_eq!(split_paragraphs("one block\n").len(), 1);
        assert_eq!(split_paragraphs("").len(), 0);
        // Blank lines attach to the preceding block.
        assert_eq!(split_paragraphs("a\n\n\nb\n").len(), 2);
    }

    #[test]
    fn test_identical_content_is_all_unchanged() {
        let diff = compute("f1", 2, 2, TWO_PARAS, TWO_PARAS);
        assert!(diff.is_identity());
        assert_eq!(diff.stats.unchanged, 2);
        assert_eq!(diff.changes.len(), 2);
    }

    #[test]
    fn test_empty_from_is_all_added() {
        let diff = compute("f1", 0, 1, "", TWO_PARAS);
        assert_eq!(diff.stats.added, diff.changes.len());
        assert!(diff.stats.added > 0);
        assert_eq!(diff.stats.removed, 0);
    }

    #[test]
    fn test_empty_to_is_all_removed() {
        let diff = compute("f1", 0, 1, TWO_PARAS, "");
        assert_eq!(diff.stats.removed, diff.changes.len());
        assert_eq!(diff.stats.added, 0);
    }

    #[test]
    fn test_modified_paragraph() {
        let to = "First paragraph line one.\nLine two.\n\nSecond paragraph, revised.\n";
        let diff = compute("f1", 1, 2, TWO_PARAS, to);
        assert_eq!(diff.granularity, DiffGranularity::Paragraph);
        assert_eq!(diff.stats.unchanged, 1);
        assert_eq!(diff.stats.modified, 1);
        let modified = diff
            .changes
            .iter()
            .find(|c| c.tag == ChangeTag::Modified)
            .unwrap();
        assert!(modified.old_text.as_deref().unwrap().contains("Second"));
        assert!(modified.new_text.as_deref().unwrap().contains("revised"));
    }

    #[test]
    fn test_inserted_paragraph() {
        let to = "First paragraph line one.\nLine two.\n\nBrand new middle.\n\nSecond paragraph.\n";
        let diff = compute("f1", 1, 2, TWO_PARAS, to);
        assert_eq!(diff.stats.added, 1);
        assert_eq!(diff.stats.removed, 0);
        assert_eq!(diff.stats.unchanged, 2);
        assert_eq!(reconstruct_to(&diff), to);
    }

    #[test]
    fn test_line_fallback_without_paragraph_boundary() {
        let from = "alpha\nbeta\ngamma\n";
        let to = "alpha\nbeta revised\ngamma\n";
        let diff = compute("f1", 1, 2, from, to);
        assert_eq!(diff.granularity, DiffGranularity::Line);
        assert_eq!(diff.stats.unchanged, 2);
        assert_eq!(diff.stats.modified, 1);
    }

    #[test]
    fn test_reconstruction_round_trip() {
        let cases = [
            (TWO_PARAS, "completely\n\ndifferent\n"),
            ("", TWO_PARAS),
            (TWO_PARAS, ""),
            ("a\nb\nc", "a\nc"),
            ("x\n\n\ny\n", "x\n\ny\nz"),
            (TWO_PARAS, TWO_PARAS),
        ];
        for (from, to) in cases {
            let diff = compute("f1", 0, 1, from, to);
            assert_eq!(reconstruct_to(&diff), to, "from: {from:?} to: {to:?}");
        }
    }

    #[test]
    fn test_deterministic_output() {
        let from = "one\n\ntwo\n\nthree\n";
        let to = "one\n\n2\n\nthree\n\nfour\n";
        let a = serde_json::to_vec(&compute("f1", 1, 2, from, to)).unwrap();
        let b = serde_json::to_vec(&compute("f1", 1, 2, from, to)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stats_match_changes() {
        let diff = compute("f1", 1, 2, TWO_PARAS, "other\n\ncontent\n\nentirely\n");
        let counted = diff.stats.unchanged + diff.stats.added + diff.stats.removed + diff.stats.modified;
        assert_eq!(counted, diff.changes.len());
    }
}
