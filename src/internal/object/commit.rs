//! The Commit object names one tree, at most one parent commit, and a
//! message. The message is a UTF-8 JSON document carrying the summary,
//! detail, markup, and the revision number, which is how the
//! commit-id index can be rebuilt from the commit log alone.

use std::collections::BTreeMap;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::ConfError,
    hash::{HashKind, ObjectHash},
    internal::object::{signature::Signature, types::ObjectType, ObjectTrait},
    model::{CommitMessage, Markup, Revision},
};

/// The parsed commit message document. Unknown fields written by other
/// engine versions are preserved across a parse/re-emit round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub markup: Markup,
    pub revision: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MessageDoc {
    pub fn new(message: &CommitMessage, revision: Revision) -> MessageDoc {
        MessageDoc {
            summary: message.summary.clone(),
            detail: message.detail.clone(),
            markup: message.markup,
            revision: revision.as_i64(),
            extra: BTreeMap::new(),
        }
    }

    pub fn commit_message(&self) -> CommitMessage {
        CommitMessage {
            summary: self.summary.clone(),
            detail: self.detail.clone(),
            markup: self.markup,
        }
    }
}

/// A commit object. Parents form a linear chain: the initial commit has no
/// parent, every later commit has exactly one.
#[derive(Eq, Debug, Clone)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_id: Option<ObjectHash>,
    pub author: Signature,
    pub message: String,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Commit {
    /// Create a commit with a freshly computed id.
    pub fn build(
        kind: HashKind,
        tree_id: ObjectHash,
        parent_id: Option<ObjectHash>,
        author: Signature,
        doc: &MessageDoc,
    ) -> Result<Commit, ConfError> {
        let message = serde_json::to_string(doc)
            .map_err(|e| ConfError::storage(format!("commit message encoding failed: {e}")))?;
        let mut commit = Commit {
            id: tree_id,
            tree_id,
            parent_id,
            author,
            message,
        };
        commit.id = commit.object_hash(kind)?;
        Ok(commit)
    }

    /// Parse the JSON message document.
    pub fn message_doc(&self) -> Result<MessageDoc, ConfError> {
        serde_json::from_str(&self.message).map_err(|e| {
            ConfError::storage(format!("commit {} has a malformed message: {e}", self.id))
        })
    }

    /// The revision this commit was made at, decoded from the message.
    pub fn decoded_revision(&self) -> Result<Revision, ConfError> {
        Ok(Revision::from(self.message_doc()?.revision))
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, ConfError> {
        let bad = |what: &str| ConfError::storage(format!("commit {hash} is malformed: {what}"));

        let tree_end = data.find_byte(b'\n').ok_or_else(|| bad("no tree line"))?;
        let tree_line = &data[..tree_end];
        let tree_id: ObjectHash = tree_line
            .strip_prefix(b"tree ")
            .and_then(|hex| hex.to_str().ok())
            .and_then(|hex| hex.parse().ok())
            .ok_or_else(|| bad("bad tree line"))?;

        let mut rest = &data[tree_end + 1..];
        let mut parent_id: Option<ObjectHash> = None;
        if rest.starts_with(b"parent ") {
            let end = rest.find_byte(b'\n').ok_or_else(|| bad("no parent end"))?;
            parent_id = Some(
                rest[7..end]
                    .to_str()
                    .ok()
                    .and_then(|hex| hex.parse().ok())
                    .ok_or_else(|| bad("bad parent line"))?,
            );
            rest = &rest[end + 1..];
        }

        if !rest.starts_with(b"author ") {
            return Err(bad("no author line"));
        }
        let author_end = rest.find_byte(b'\n').ok_or_else(|| bad("no author end"))?;
        let author = Signature::from_data(&rest[7..author_end])?;
        rest = &rest[author_end + 1..];

        // A blank line separates the headers from the message.
        let message = rest
            .strip_prefix(b"\n")
            .unwrap_or(rest)
            .to_str()
            .map_err(|_| bad("message is not UTF-8"))?
            .to_owned();

        Ok(Commit {
            id: hash,
            tree_id,
            parent_id,
            author,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn to_data(&self) -> Result<Vec<u8>, ConfError> {
        let mut data = Vec::new();
        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.push(b'\n');
        if let Some(parent) = &self.parent_id {
            data.extend(b"parent ");
            data.extend(parent.to_string().as_bytes());
            data.push(b'\n');
        }
        data.extend(b"author ");
        data.extend(self.author.to_data());
        data.push(b'\n');
        data.push(b'\n');
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}
