//! Line-level diff extraction between document versions.

use similar::{ChangeTag, TextDiff};

use crate::models::{ChangeKind, DiffEntry};

/// Hard cap on extracted entries, in diff order.
///
/// Callers must not assume completeness beyond this bound.
pub const MAX_DIFF_ENTRIES: usize = 50;

/// Compute the changed lines between two document versions.
///
/// Entries are ordered by their position in the diff stream; unchanged
/// lines advance the position but produce no entry. Empty inputs yield
/// an empty sequence.
pub fn diff_lines(previous: &str, current: &str) -> Vec<DiffEntry> {
    let diff = TextDiff::from_lines(previous, current);

    let mut entries = Vec::new();
    for (position, change) in diff.iter_all_changes().enumerate() {
        let kind = match change.tag() {
            ChangeTag::Insert => ChangeKind::Addition,
            ChangeTag::Delete => ChangeKind::Deletion,
            ChangeTag::Equal => continue,
        };

        let content = change.value();
        let content = content.strip_suffix('\n').unwrap_or(content);
        let content = content.strip_suffix('\r').unwrap_or(content);

        entries.push(DiffEntry {
            kind,
            content: content.to_string(),
            line: position,
        });

        if entries.len() == MAX_DIFF_ENTRIES {
            break;
        }
    }

    entries
}
