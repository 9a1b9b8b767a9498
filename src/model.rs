//! Data model of the repository engine: revisions, authors, entries,
//! changes, and commit metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfError;

/// A revision number of a commit.
///
/// A revision number is an integer which refers to a specific point of
/// repository history. When a repository is created, it starts with an
/// initial commit whose revision is 1. As new commits are added, each commit
/// gets its own revision number, monotonically increasing from the previous
/// commit's revision. i.e. 1, 2, 3, ...
///
/// A revision number can also be non-positive, in which case it is relative
/// to the head of the repository: 0 and -1 both refer to the latest commit,
/// -2 to the commit before the latest commit, and so on. A revision with a
/// non-positive integer is called a 'relative revision'; one with a positive
/// integer is called an 'absolute revision'.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(i64);

impl Revision {
    /// Revision `-1`, also known as `HEAD`.
    pub const HEAD: Revision = Revision(-1);
    /// Revision `1`, also known as `INIT`.
    pub const INIT: Revision = Revision(1);

    /// Create a new instance with the specified revision number.
    pub fn from(i: i64) -> Self {
        Revision(i)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Whether this revision is relative (non-positive).
    pub fn is_relative(&self) -> bool {
        self.0 <= 0
    }

    /// Resolve this revision against a known head revision `head`.
    ///
    /// An absolute revision must lie in `[1, head]`; a relative revision `n`
    /// resolves to `head + n + 1` (with 0 treated as -1) and must resolve to
    /// a positive value. Anything else is `RevisionNotFound`.
    pub fn normalize(&self, head: i64) -> Result<Revision, ConfError> {
        let not_found = ConfError::RevisionNotFound {
            revision: self.0,
            head,
        };
        if self.0 > 0 {
            if self.0 > head {
                return Err(not_found);
            }
            return Ok(*self);
        }
        let n = if self.0 == 0 { -1 } else { self.0 };
        let resolved = head + n + 1;
        if resolved <= 0 {
            return Err(not_found);
        }
        Ok(Revision(resolved))
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered pair of revisions. History and diff queries canonicalize the
/// range internally but preserve the caller's ordering intent for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionRange {
    pub from: Revision,
    pub to: Revision,
}

impl RevisionRange {
    pub fn new(from: Revision, to: Revision) -> Self {
        RevisionRange { from, to }
    }
}

/// The author of a commit, or the creator of a project or repository.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Name of this author.
    pub name: String,
    /// Email of this author.
    pub email: String,
}

impl Author {
    /// Sentinel for commits lacking committer identity.
    pub fn unknown() -> Author {
        Author {
            name: "unknown".to_string(),
            email: "nobody@nowhere".to_string(),
        }
    }

    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Author {
        Author {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// The type of an [`Entry`], derived from the path suffix.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// A UTF-8 encoded JSON file.
    Json,
    /// A UTF-8 encoded text file.
    Text,
    /// A directory.
    Directory,
}

impl EntryType {
    /// Derive the entry type of a file path: `.json` suffix means JSON,
    /// anything else is plain text.
    pub fn from_path(path: &str) -> EntryType {
        if path.to_ascii_lowercase().ends_with(".json") {
            EntryType::Json
        } else {
            EntryType::Text
        }
    }
}

/// The content of an [`Entry`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "type", content = "content")]
pub enum EntryContent {
    /// Content as a JSON value.
    Json(Value),
    /// Content as a string.
    Text(String),
    /// This entry is a directory and carries no content.
    Directory,
}

/// A file or a directory in a repository at a specific revision.
///
/// `content` is `None` when the entry was fetched without content
/// (`FindOptions::fetch_content` set to false).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Absolute path of this entry.
    pub path: String,
    /// Type of this entry.
    pub entry_type: EntryType,
    /// Content of this entry, if fetched.
    pub content: Option<EntryContent>,
    /// Revision this entry was read at.
    pub revision: Revision,
}

/// Markup language of a commit message detail.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Markup {
    #[default]
    Plaintext,
    Markdown,
}

/// Description of a commit: a one-line summary, an optional long-form
/// detail, and the markup the detail is written in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommitMessage {
    /// Summary of this commit.
    pub summary: String,
    /// Detailed description of this commit.
    #[serde(default)]
    pub detail: String,
    /// Markup of the detail.
    #[serde(default)]
    pub markup: Markup,
}

impl CommitMessage {
    pub fn summary_only(summary: impl Into<String>) -> CommitMessage {
        CommitMessage {
            summary: summary.into(),
            detail: String::new(),
            markup: Markup::Plaintext,
        }
    }
}

/// Metadata of a single commit, as returned by history queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Revision of this commit.
    pub revision: Revision,
    /// Author of this commit.
    pub author: Author,
    /// When this commit was made, in seconds since the epoch.
    pub when: i64,
    /// Description of this commit.
    pub message: CommitMessage,
}

/// Typed content of a [`Change`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(tag = "type", content = "content")]
pub enum ChangeContent {
    /// Adds a new JSON file or replaces an existing file with the provided
    /// JSON value.
    UpsertJson(Value),

    /// Adds a new text file or replaces an existing file with the provided
    /// content.
    UpsertText(String),

    /// Removes an existing file or directory.
    Remove,

    /// Renames an existing file or directory to the provided path.
    Rename(String),

    /// Applies a JSON patch to a JSON file, as defined in
    /// [RFC 6902](https://tools.ietf.org/html/rfc6902).
    ApplyJsonPatch(Value),

    /// Applies a textual patch to a text file in
    /// [unified format](https://en.wikipedia.org/wiki/Diff_utility#Unified_format).
    ApplyTextPatch(String),
}

/// A request to mutate one absolute path.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Absolute path of the file change.
    pub path: String,
    /// Content of the file change.
    #[serde(flatten)]
    pub content: ChangeContent,
}

impl Change {
    pub fn upsert_json(path: impl Into<String>, value: Value) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::UpsertJson(value),
        }
    }

    pub fn upsert_text(path: impl Into<String>, text: impl Into<String>) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::UpsertText(text.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::Remove,
        }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Change {
        Change {
            path: from.into(),
            content: ChangeContent::Rename(to.into()),
        }
    }

    pub fn apply_json_patch(path: impl Into<String>, patch: Value) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::ApplyJsonPatch(patch),
        }
    }

    pub fn apply_text_patch(path: impl Into<String>, diff: impl Into<String>) -> Change {
        Change {
            path: path.into(),
            content: ChangeContent::ApplyTextPatch(diff.into()),
        }
    }
}

/// Type of a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryType {
    /// Retrieve the content as it is.
    Identity,
    /// Narrow a JSON document with a JSON pointer (e.g. `/a/b`).
    JsonPointer(String),
}

/// A query on a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub(crate) path: String,
    pub(crate) query_type: QueryType,
}

impl Query {
    fn normalize_path(path: &str) -> String {
        if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        }
    }

    /// Returns a newly-created [`Query`] that retrieves the content as it is.
    /// Returns `None` if `path` is empty.
    pub fn identity(path: &str) -> Option<Query> {
        if path.is_empty() {
            return None;
        }
        Some(Query {
            path: Self::normalize_path(path),
            query_type: QueryType::Identity,
        })
    }

    /// Returns a newly-created [`Query`] that narrows a JSON document with a
    /// JSON pointer. Returns `None` if `path` is empty or does not end with
    /// `.json`.
    pub fn json_pointer(path: &str, pointer: &str) -> Option<Query> {
        if path.is_empty() || !path.to_ascii_lowercase().ends_with(".json") {
            return None;
        }
        Some(Query {
            path: Self::normalize_path(path),
            query_type: QueryType::JsonPointer(pointer.to_owned()),
        })
    }

    /// Target path of this query.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Options for [`find`](crate::repository::Repository::find) queries.
#[derive(Debug, Clone, Copy)]
pub struct FindOptions {
    /// Whether file content is loaded into the returned entries.
    pub fetch_content: bool,
    /// Cap on the number of returned entries.
    pub max_entries: Option<usize>,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            fetch_content: true,
            max_entries: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Absolute revisions pass through normalization unchanged when valid.
    #[test]
    fn normalize_absolute() {
        assert_eq!(
            Revision::from(3).normalize(5).unwrap(),
            Revision::from(3)
        );
        assert!(Revision::from(6).normalize(5).is_err());
    }

    /// 0 and -1 both denote HEAD; -2 is the parent of HEAD.
    #[test]
    fn normalize_relative() {
        assert_eq!(Revision::from(0).normalize(5).unwrap(), Revision::from(5));
        assert_eq!(Revision::HEAD.normalize(5).unwrap(), Revision::from(5));
        assert_eq!(Revision::from(-2).normalize(5).unwrap(), Revision::from(4));
        assert_eq!(Revision::from(-5).normalize(5).unwrap(), Revision::from(1));
        assert!(Revision::from(-6).normalize(5).is_err());
    }

    /// Entry types derive from the path suffix, case-insensitively.
    #[test]
    fn entry_type_from_path() {
        assert_eq!(EntryType::from_path("/a/b.json"), EntryType::Json);
        assert_eq!(EntryType::from_path("/a/B.JSON"), EntryType::Json);
        assert_eq!(EntryType::from_path("/a/b.txt"), EntryType::Text);
        assert_eq!(EntryType::from_path("/a/json"), EntryType::Text);
    }

    /// Changes serialize with the SCREAMING_SNAKE_CASE tagged representation.
    #[test]
    fn change_serialization() {
        let change = Change::upsert_json("/a.json", serde_json::json!({"a": 1}));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": "/a.json",
                "type": "UPSERT_JSON",
                "content": {"a": 1}
            })
        );
    }

    /// Queries reject paths that cannot carry them.
    #[test]
    fn query_constructors() {
        assert!(Query::identity("").is_none());
        assert!(Query::json_pointer("/a.txt", "/x").is_none());
        let q = Query::json_pointer("a.json", "/x").unwrap();
        assert_eq!(q.path(), "/a.json");
    }
}
