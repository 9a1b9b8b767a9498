//! Unified-diff generation and application for text blobs.
//!
//! Generation runs a Myers line diff and emits plain unified hunks.
//! Application re-locates each hunk by matching its old-side lines, so a
//! patch still applies after unrelated leading edits; a context or delete
//! line that cannot be found yields `ChangeConflict`.

use std::fmt::Write;

use similar::{Algorithm, ChangeTag, TextDiff};

use crate::errors::ConfError;

/// Generate a unified diff (hunks only, no file headers) that rewrites
/// `old` into `new`, with `context` lines of context.
pub fn generate(old: &str, new: &str, context: usize) -> String {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old, new);

    let mut out = String::with_capacity(((old.len() + new.len()) / 16).max(256));
    for group in diff.grouped_ops(context) {
        let (first, last) = match (group.first(), group.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => continue,
        };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;
        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            display_start(old_range.start, old_range.len()),
            old_range.len(),
            display_start(new_range.start, new_range.len()),
            new_range.len(),
        );
        for op in &group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Equal => ' ',
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                };
                let line = change.value().trim_end_matches(['\r', '\n']);
                let _ = writeln!(out, "{sign}{line}");
            }
        }
    }
    out
}

/// Unified-diff hunk starts are 1-based, except that a zero-length range
/// names the line before the gap.
fn display_start(start: usize, len: usize) -> usize {
    if len == 0 { start } else { start + 1 }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Delete(String),
    Insert(String),
}

#[derive(Debug, Default)]
struct Hunk {
    old_start: usize,
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// The old-side lines (context and deletions) this hunk must find.
    fn old_side(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(t) | HunkLine::Delete(t) => Some(t.as_str()),
                HunkLine::Insert(_) => None,
            })
            .collect()
    }
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, ConfError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for raw in patch.lines() {
        if let Some(header) = raw.strip_prefix("@@ ") {
            hunks.push(Hunk {
                old_start: parse_old_start(header, raw)?,
                lines: Vec::new(),
            });
            continue;
        }
        let current = match hunks.last_mut() {
            Some(h) => h,
            // File headers and other prose before the first hunk.
            None => continue,
        };
        if let Some(text) = raw.strip_prefix('+') {
            current.lines.push(HunkLine::Insert(text.to_owned()));
        } else if let Some(text) = raw.strip_prefix('-') {
            current.lines.push(HunkLine::Delete(text.to_owned()));
        } else if let Some(text) = raw.strip_prefix(' ') {
            current.lines.push(HunkLine::Context(text.to_owned()));
        } else if raw.is_empty() {
            current.lines.push(HunkLine::Context(String::new()));
        } else if raw.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        } else {
            return Err(ConfError::conflict(format!(
                "malformed unified diff line: `{raw}`"
            )));
        }
    }
    Ok(hunks)
}

/// Extract the old start line from `-a,b +c,d @@`.
fn parse_old_start(header: &str, raw: &str) -> Result<usize, ConfError> {
    let bad = || ConfError::conflict(format!("malformed hunk header: `{raw}`"));
    let old_part = header
        .strip_prefix('-')
        .and_then(|h| h.split_whitespace().next())
        .ok_or_else(bad)?;
    let start = old_part.split(',').next().ok_or_else(bad)?;
    start.parse::<usize>().map_err(|_| bad())
}

/// Apply a unified diff to `old`. The result keeps `\n` line endings; the
/// caller is responsible for sanitization.
pub fn apply(old: &str, patch: &str) -> Result<String, ConfError> {
    let hunks = parse_hunks(patch)?;
    let old_lines: Vec<&str> = split_lines(old);
    let mut out: Vec<String> = Vec::with_capacity(old_lines.len());
    let mut cursor = 0usize;

    for hunk in &hunks {
        let needle = hunk.old_side();
        let pos = if needle.is_empty() {
            // Pure insertion: trust the header, clamped into what is left.
            hunk.old_start.min(old_lines.len()).max(cursor)
        } else {
            find_lines(&old_lines, &needle, cursor).ok_or_else(|| {
                ConfError::conflict(format!(
                    "text patch context does not match at hunk starting `{}`",
                    needle[0]
                ))
            })?
        };
        out.extend(old_lines[cursor..pos].iter().map(|s| s.to_string()));
        for line in &hunk.lines {
            match line {
                HunkLine::Context(t) | HunkLine::Insert(t) => out.push(t.clone()),
                HunkLine::Delete(_) => {}
            }
        }
        cursor = pos + needle.len();
    }

    out.extend(old_lines[cursor..].iter().map(|s| s.to_string()));
    if out.is_empty() {
        return Ok(String::new());
    }
    Ok(out.join("\n") + "\n")
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.lines().collect()
    }
}

/// Find the first occurrence of `needle` in `haystack` at or after `from`.
fn find_lines(haystack: &[&str], needle: &[&str], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&pos| haystack[pos..pos + needle.len()] == *needle)
}

#[cfg(test)]
mod tests {
    use super::{apply, generate};

    /// Generated diffs re-apply to produce the new text.
    #[test]
    fn generate_apply_round_trip() {
        let old = "a\nb\nc\nd\ne\n";
        let new = "a\nB\nc\nd\nE\n";
        let patch = generate(old, new, 3);
        assert!(patch.contains("-b"));
        assert!(patch.contains("+B"));
        assert_eq!(apply(old, &patch).unwrap(), new);
    }

    /// Hunks far apart produce separate groups that all apply.
    #[test]
    fn multiple_hunks() {
        let old: String = (0..40).map(|i| format!("line {i}\n")).collect();
        let new = old.replace("line 3\n", "LINE 3\n").replace("line 36\n", "LINE 36\n");
        let patch = generate(&old, &new, 3);
        assert!(patch.matches("@@").count() >= 4, "expected two hunks: {patch}");
        assert_eq!(apply(&old, &patch).unwrap(), new);
    }

    /// Creating a file from nothing.
    #[test]
    fn from_empty() {
        let patch = generate("", "hello\nworld\n", 3);
        assert_eq!(apply("", &patch).unwrap(), "hello\nworld\n");
    }

    /// Deleting everything.
    #[test]
    fn to_empty() {
        let patch = generate("gone\n", "", 3);
        assert_eq!(apply("gone\n", &patch).unwrap(), "");
    }

    /// Single-line replacement: hello -> world by patch.
    #[test]
    fn hello_world() {
        let patch = generate("hello\n", "world\n", 3);
        assert_eq!(apply("hello\n", &patch).unwrap(), "world\n");
    }

    /// Context drift fails with a conflict instead of corrupting content.
    #[test]
    fn conflict_on_context_mismatch() {
        let patch = generate("a\nb\nc\n", "a\nB\nc\n", 3);
        let err = apply("a\nX\nc\n", &patch).unwrap_err();
        assert!(matches!(err, crate::errors::ConfError::ChangeConflict(_)));
    }

    /// Patches survive unrelated leading insertions.
    #[test]
    fn applies_after_leading_drift() {
        let old = "one\ntwo\nthree\n";
        let patch = generate(old, "one\ntwo\nTHREE\n", 1);
        let drifted = "zero\none\ntwo\nthree\n";
        assert_eq!(apply(drifted, &patch).unwrap(), "zero\none\ntwo\nTHREE\n");
    }

    /// File headers from foreign tools are tolerated.
    #[test]
    fn ignores_file_headers() {
        let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -1,1 +1,1 @@\n-hello\n+world\n";
        assert_eq!(apply("hello\n", patch).unwrap(), "world\n");
    }
}
