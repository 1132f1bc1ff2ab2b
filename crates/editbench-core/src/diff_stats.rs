//! Edit-size statistics and the score derived from them.
//!
//! [`DiffStats`] is built from a diffstat-style table. Each row names one
//! changed file, its change count and an optional histogram:
//!
//! ```text
//!  src/app.ts   | 3 +++---
//!  src/util.ts  | 1 !
//!  logo.png     | Bin 0 -> 812 bytes
//!  2 files changed, ...
//! ```
//!
//! Parsing never fails. Rows that cannot be understood are skipped, so a
//! garbled table degrades toward a smaller change count instead of aborting
//! the evaluation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Score awarded to an instance that changed nothing.
pub const DEFAULT_SCORE_CEILING: u32 = 300;

/// Change counts for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiffStat {
    pub path: String,
    pub lines_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// Aggregate change counts for one workspace, plus the per-file breakdown.
///
/// The value is immutable once built. `DiffStats::default()` and
/// [`DiffStats::mempty`] are the same zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    files_changed: u32,
    lines_changed: u32,
    files: Vec<FileDiffStat>,
}

/// The two headline numbers of a [`DiffStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiffSummary {
    pub files_changed: u32,
    pub lines_changed: u32,
}

impl DiffStats {
    /// Statistics of an unmodified workspace.
    pub fn mempty() -> Self {
        Self::default()
    }

    /// Parse a diffstat table. Rows are merged per path and sorted by path.
    pub fn from_diffstat(raw: &str) -> Self {
        let mut by_path: BTreeMap<String, FileDiffStat> = BTreeMap::new();

        for line in raw.lines() {
            let row = line.trim();
            if row.is_empty() || is_summary_line(row) {
                continue;
            }
            match parse_row(row) {
                Some(stat) if stat.lines_changed == 0 => {
                    tracing::debug!(path = %stat.path, "skipping diffstat row with no counted lines");
                }
                Some(stat) => match by_path.get_mut(&stat.path) {
                    Some(existing) => {
                        existing.lines_changed = existing.lines_changed.saturating_add(stat.lines_changed);
                        existing.insertions = existing.insertions.saturating_add(stat.insertions);
                        existing.deletions = existing.deletions.saturating_add(stat.deletions);
                    }
                    None => {
                        by_path.insert(stat.path.clone(), stat);
                    }
                },
                None => {
                    tracing::debug!(row, "skipping unrecognised diffstat row");
                }
            }
        }

        let files: Vec<FileDiffStat> = by_path.into_values().collect();
        let lines_changed = files
            .iter()
            .fold(0u32, |total, file| total.saturating_add(file.lines_changed));
        Self {
            files_changed: u32::try_from(files.len()).unwrap_or(u32::MAX),
            lines_changed,
            files,
        }
    }

    pub fn files_changed(&self) -> u32 {
        self.files_changed
    }

    pub fn lines_changed(&self) -> u32 {
        self.lines_changed
    }

    pub fn files(&self) -> &[FileDiffStat] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::mempty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            files_changed: self.files_changed,
            lines_changed: self.lines_changed,
        }
    }

    /// `ceiling - lines_changed`, floored at zero.
    pub fn score(&self, ceiling: u32) -> u32 {
        ceiling.saturating_sub(self.lines_changed)
    }
}

impl fmt::Display for DiffStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.summary().fmt(f)
    }
}

// Smaller edits order first: lines dominate, files break ties.
impl Ord for DiffSummary {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lines_changed
            .cmp(&other.lines_changed)
            .then(self.files_changed.cmp(&other.files_changed))
    }
}

impl PartialOrd for DiffSummary {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} changed, {} {} changed",
            self.files_changed,
            plural(self.files_changed, "file", "files"),
            self.lines_changed,
            plural(self.lines_changed, "line", "lines"),
        )
    }
}

fn plural(n: u32, one: &'static str, many: &'static str) -> &'static str {
    if n == 1 { one } else { many }
}

/// `"3 files changed, 10 insertions(+)"` and friends.
fn is_summary_line(row: &str) -> bool {
    let mut words = row.split_whitespace();
    let starts_with_count = words
        .next()
        .is_some_and(|w| w.chars().all(|c| c.is_ascii_digit()));
    starts_with_count
        && matches!(words.next(), Some("file" | "files"))
        && words.next().is_some_and(|w| w.starts_with("changed"))
}

fn parse_row(row: &str) -> Option<FileDiffStat> {
    let (path, stats) = match row.rfind('|') {
        Some(idx) => (row[..idx].trim(), row[idx + 1..].trim()),
        None => split_unpiped(row)?,
    };
    if path.is_empty() {
        return None;
    }

    let mut tokens = stats.split_whitespace();
    let first = tokens.next()?;
    if first == "Bin" {
        return Some(FileDiffStat {
            path: path.to_string(),
            lines_changed: 1,
            insertions: 0,
            deletions: 0,
        });
    }

    let lines_changed: u32 = first.parse().ok()?;
    let histogram = tokens.next().unwrap_or("");
    if tokens.next().is_some() || !is_histogram(histogram) {
        return None;
    }
    let (insertions, deletions) = histogram.chars().fold((0u32, 0u32), |(ins, del), c| match c {
        '+' => (ins + 1, del),
        '-' => (ins, del + 1),
        _ => (ins + 1, del + 1),
    });

    Some(FileDiffStat {
        path: path.to_string(),
        lines_changed,
        insertions,
        deletions,
    })
}

/// Split `"<path> <count> [<histogram>]"` where the path may contain spaces.
fn split_unpiped(row: &str) -> Option<(&str, &str)> {
    let tokens: Vec<&str> = row.split_whitespace().collect();
    let count_idx = match tokens.as_slice() {
        [.., count, histogram] if is_count(count) && is_histogram(histogram) => tokens.len() - 2,
        [.., count] if is_count(count) => tokens.len() - 1,
        _ => return None,
    };
    if count_idx == 0 {
        return None;
    }
    // Tokens borrow from `row`, so the count's offset locates the split.
    let offset = tokens[count_idx].as_ptr() as usize - row.as_ptr() as usize;
    Some((row[..offset].trim(), &row[offset..]))
}

fn is_count(token: &str) -> bool {
    token.parse::<u32>().is_ok()
}

fn is_histogram(token: &str) -> bool {
    token.chars().all(|c| matches!(c, '+' | '-' | '!'))
}
