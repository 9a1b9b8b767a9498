//! In-memory working tree used by the commit pipeline and preview queries.
//!
//! A working tree is seeded from a base tree, mutated by an ordered sequence
//! of changes, and finally written back out as blobs and trees. Content is
//! held parsed (JSON values, sanitized text) so that redundant upserts are
//! detected on logical equality rather than byte equality.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    errors::ConfError,
    hash::ObjectHash,
    internal::{
        object::{
            blob::Blob,
            tree::{Tree, TreeItem, TreeItemKind},
        },
        store::ObjectStore,
    },
    model::{Change, ChangeContent, EntryContent, EntryType},
    patch,
    sanitize::sanitize_text,
};

/// Parsed content of one file in a working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Json(Value),
    /// Sanitized text.
    Text(String),
}

impl FileContent {
    /// Canonical bytes as stored in a blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FileContent::Json(value) => {
                let mut bytes = value.to_string().into_bytes();
                bytes.push(b'\n');
                bytes
            }
            FileContent::Text(text) => text.clone().into_bytes(),
        }
    }

    pub fn to_entry_content(&self) -> EntryContent {
        match self {
            FileContent::Json(value) => EntryContent::Json(value.clone()),
            FileContent::Text(text) => EntryContent::Text(text.clone()),
        }
    }

    /// Render as text, for content moving to a text path.
    fn to_text(&self) -> String {
        match self {
            FileContent::Json(value) => sanitize_text(&value.to_string()),
            FileContent::Text(text) => text.clone(),
        }
    }
}

/// Parse blob bytes into content according to the path's entry type.
pub fn parse_content(path: &str, bytes: &[u8]) -> Result<FileContent, ConfError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ConfError::storage(format!("blob at `{path}` is not valid UTF-8")))?;
    match EntryType::from_path(path) {
        EntryType::Json => {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                ConfError::storage(format!("blob at `{path}` is not valid JSON: {e}"))
            })?;
            Ok(FileContent::Json(value))
        }
        _ => Ok(FileContent::Text(sanitize_text(text))),
    }
}

/// An in-memory snapshot of one tree, keyed by absolute path.
#[derive(Debug, Clone, Default)]
pub struct WorkingTree {
    files: BTreeMap<String, FileContent>,
}

impl WorkingTree {
    pub fn new() -> WorkingTree {
        WorkingTree::default()
    }

    /// Load every file reachable from `tree_id`.
    pub fn from_tree(store: &ObjectStore, tree_id: &ObjectHash) -> Result<WorkingTree, ConfError> {
        let mut files = BTreeMap::new();
        for (path, blob_id) in flatten_tree(store, tree_id)? {
            let blob = store.get_blob(&blob_id)?;
            files.insert(path.clone(), parse_content(&path, &blob.data)?);
        }
        Ok(WorkingTree { files })
    }

    pub fn files(&self) -> &BTreeMap<String, FileContent> {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&FileContent> {
        self.files.get(path)
    }

    /// Apply changes in order, returning the number of effective edits.
    /// Redundant upserts and no-op patches count zero; failures abort the
    /// whole application.
    pub fn apply(&mut self, changes: &[Change]) -> Result<usize, ConfError> {
        let mut edits = 0;
        for change in changes {
            if self.apply_one(change)? {
                edits += 1;
            }
        }
        Ok(edits)
    }

    fn apply_one(&mut self, change: &Change) -> Result<bool, ConfError> {
        let path = change.path.as_str();
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(ConfError::conflict(format!(
                "`{path}` is not an absolute file path"
            )));
        }
        match &change.content {
            ChangeContent::UpsertJson(value) => {
                if EntryType::from_path(path) != EntryType::Json {
                    return Err(ConfError::conflict(format!(
                        "cannot store JSON at non-JSON path `{path}`"
                    )));
                }
                Ok(self.put(path, FileContent::Json(value.clone())))
            }
            ChangeContent::UpsertText(text) => {
                let content = self.text_content_for(path, text)?;
                Ok(self.put(path, content))
            }
            ChangeContent::Remove => self.remove(path),
            ChangeContent::Rename(to) => self.rename(path, to),
            ChangeContent::ApplyJsonPatch(ops) => {
                if EntryType::from_path(path) != EntryType::Json {
                    return Err(ConfError::conflict(format!(
                        "cannot apply a JSON patch to non-JSON path `{path}`"
                    )));
                }
                let old = match self.files.get(path) {
                    Some(FileContent::Json(value)) => value.clone(),
                    Some(FileContent::Text(_)) | None => Value::Null,
                };
                let new = patch::json::apply(&old, ops)?;
                if new == old {
                    return Ok(false);
                }
                Ok(self.put(path, FileContent::Json(new)))
            }
            ChangeContent::ApplyTextPatch(diff) => {
                let old = match self.files.get(path) {
                    Some(content) => content.to_text(),
                    None => String::new(),
                };
                let patched = patch::text::apply(&old, diff)?;
                let content = self.text_content_for(path, &patched)?;
                if self.files.get(path).is_none()
                    && matches!(&content, FileContent::Text(t) if t.is_empty())
                {
                    return Ok(false);
                }
                Ok(self.put(path, content))
            }
        }
    }

    /// Build content for text arriving at `path`, honoring the suffix-derived
    /// entry type: text stored at a JSON path must parse as JSON.
    fn text_content_for(&self, path: &str, text: &str) -> Result<FileContent, ConfError> {
        match EntryType::from_path(path) {
            EntryType::Json => {
                let value: Value = serde_json::from_str(text).map_err(|e| {
                    ConfError::conflict(format!("text for JSON path `{path}` does not parse: {e}"))
                })?;
                Ok(FileContent::Json(value))
            }
            _ => Ok(FileContent::Text(sanitize_text(text))),
        }
    }

    /// Insert content, reporting whether anything actually changed.
    fn put(&mut self, path: &str, content: FileContent) -> bool {
        if self.files.get(path) == Some(&content) {
            return false;
        }
        self.files.insert(path.to_owned(), content);
        true
    }

    fn remove(&mut self, path: &str) -> Result<bool, ConfError> {
        if self.files.remove(path).is_some() {
            return Ok(true);
        }
        let prefix = format!("{path}/");
        let under: Vec<String> = self
            .files
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if under.is_empty() {
            return Err(ConfError::conflict(format!(
                "cannot remove non-existent entry `{path}`"
            )));
        }
        for key in under {
            self.files.remove(&key);
        }
        Ok(true)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<bool, ConfError> {
        if !to.starts_with('/') || to.ends_with('/') {
            return Err(ConfError::conflict(format!(
                "`{to}` is not an absolute rename target"
            )));
        }
        let target_prefix = format!("{to}/");
        let target_occupied = self.files.contains_key(to)
            || self
                .files
                .range(target_prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&target_prefix))
                .next()
                .is_some();

        if let Some(content) = self.files.get(from).cloned() {
            if target_occupied {
                return Err(ConfError::conflict(format!(
                    "rename target `{to}` already exists"
                )));
            }
            let converted = self.convert_for_path(to, content)?;
            self.files.remove(from);
            self.files.insert(to.to_owned(), converted);
            return Ok(true);
        }

        let source_prefix = format!("{from}/");
        let moved: Vec<String> = self
            .files
            .range(source_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&source_prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if moved.is_empty() {
            return Err(ConfError::conflict(format!(
                "cannot rename non-existent entry `{from}`"
            )));
        }
        if target_occupied {
            return Err(ConfError::conflict(format!(
                "rename target `{to}` already exists"
            )));
        }
        for key in moved {
            let new_key = format!("{to}{}", &key[from.len()..]);
            let content = self
                .files
                .remove(&key)
                .ok_or_else(|| ConfError::storage("working tree entry vanished during rename"))?;
            self.files.insert(new_key, content);
        }
        Ok(true)
    }

    /// Re-type content crossing a suffix boundary on rename.
    fn convert_for_path(&self, path: &str, content: FileContent) -> Result<FileContent, ConfError> {
        match (EntryType::from_path(path), content) {
            (EntryType::Json, FileContent::Json(value)) => Ok(FileContent::Json(value)),
            (EntryType::Json, FileContent::Text(text)) => {
                let value: Value = serde_json::from_str(&text).map_err(|e| {
                    ConfError::conflict(format!(
                        "renamed content for JSON path `{path}` does not parse: {e}"
                    ))
                })?;
                Ok(FileContent::Json(value))
            }
            (_, content) => Ok(FileContent::Text(content.to_text())),
        }
    }

    /// Write all blobs and trees, returning the root tree id. Equal logical
    /// states always produce the same root id.
    pub fn write_tree(&self, store: &ObjectStore) -> Result<ObjectHash, ConfError> {
        #[derive(Default)]
        struct DirNode<'a> {
            files: BTreeMap<&'a str, &'a FileContent>,
            dirs: BTreeMap<&'a str, DirNode<'a>>,
        }

        fn write_dir(store: &ObjectStore, node: &DirNode) -> Result<ObjectHash, ConfError> {
            let mut items = Vec::new();
            for (name, child) in &node.dirs {
                items.push(TreeItem {
                    kind: TreeItemKind::Tree,
                    id: write_dir(store, child)?,
                    name: (*name).to_owned(),
                });
            }
            for (name, content) in &node.files {
                let blob = Blob {
                    id: ObjectHash::digest(store.hash_kind(), b""),
                    data: content.to_bytes(),
                };
                items.push(TreeItem {
                    kind: TreeItemKind::Blob,
                    id: store.put_object(&blob)?,
                    name: (*name).to_owned(),
                });
            }
            let tree = Tree::from_items(items, ObjectHash::digest(store.hash_kind(), b""));
            store.put_object(&tree)
        }

        let mut root = DirNode::default();
        for (path, content) in &self.files {
            let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            let file_name = match segments.pop() {
                Some(name) => name,
                None => continue,
            };
            let mut node = &mut root;
            for segment in segments {
                node = node.dirs.entry(segment).or_default();
            }
            node.files.insert(file_name, content);
        }
        write_dir(store, &root)
    }
}

/// Kind of a single tree-diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Add,
    Delete,
    Modify,
}

/// One changed path between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDiffEntry {
    pub path: String,
    pub kind: DiffKind,
    pub old: Option<ObjectHash>,
    pub new: Option<ObjectHash>,
}

/// Flatten a stored tree into absolute path → blob id.
pub fn flatten_tree(
    store: &ObjectStore,
    tree_id: &ObjectHash,
) -> Result<BTreeMap<String, ObjectHash>, ConfError> {
    fn walk(
        store: &ObjectStore,
        tree_id: &ObjectHash,
        prefix: &str,
        out: &mut BTreeMap<String, ObjectHash>,
    ) -> Result<(), ConfError> {
        let tree = store.get_tree(tree_id)?;
        for item in &tree.items {
            let path = format!("{prefix}/{}", item.name);
            match item.kind {
                TreeItemKind::Blob => {
                    out.insert(path, item.id);
                }
                TreeItemKind::Tree => walk(store, &item.id, &path, out)?,
            }
        }
        Ok(())
    }

    let mut out = BTreeMap::new();
    walk(store, tree_id, "", &mut out)?;
    Ok(out)
}

/// Compute the per-path differences between two stored trees, sorted by
/// path.
pub fn diff_trees(
    store: &ObjectStore,
    old_tree: &ObjectHash,
    new_tree: &ObjectHash,
) -> Result<Vec<TreeDiffEntry>, ConfError> {
    if old_tree == new_tree {
        return Ok(Vec::new());
    }
    let old = flatten_tree(store, old_tree)?;
    let new = flatten_tree(store, new_tree)?;
    let mut out = Vec::new();
    for (path, old_id) in &old {
        match new.get(path) {
            None => out.push(TreeDiffEntry {
                path: path.clone(),
                kind: DiffKind::Delete,
                old: Some(*old_id),
                new: None,
            }),
            Some(new_id) if new_id != old_id => out.push(TreeDiffEntry {
                path: path.clone(),
                kind: DiffKind::Modify,
                old: Some(*old_id),
                new: Some(*new_id),
            }),
            Some(_) => {}
        }
    }
    for (path, new_id) in &new {
        if !old.contains_key(path) {
            out.push(TreeDiffEntry {
                path: path.clone(),
                kind: DiffKind::Add,
                old: None,
                new: Some(*new_id),
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}
