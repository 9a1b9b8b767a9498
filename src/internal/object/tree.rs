//! The Tree object maps names to blobs and subtrees, reflecting one
//! directory of the repository at a point in time. Trees hold only regular
//! file blobs and subtrees; there are no modes, symlinks, or hidden-file
//! semantics.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::{
    errors::ConfError,
    hash::ObjectHash,
    internal::object::{types::ObjectType, ObjectTrait},
};

/// The kind of a single tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TreeItemKind {
    Blob,
    Tree,
}

impl TreeItemKind {
    const fn as_str(&self) -> &'static str {
        match self {
            TreeItemKind::Blob => "blob",
            TreeItemKind::Tree => "tree",
        }
    }
}

/// One named entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeItem {
    pub kind: TreeItemKind,
    pub id: ObjectHash,
    pub name: String,
}

/// A directory object. Items are kept sorted by name so that equal
/// directory states always serialize to the same bytes and id.
#[derive(Eq, Debug, Clone)]
pub struct Tree {
    pub id: ObjectHash,
    pub items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Tree {
    /// Build a tree from unsorted items; `id` is left zeroed until the tree
    /// is written to a store.
    pub fn from_items(mut items: Vec<TreeItem>, placeholder: ObjectHash) -> Tree {
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Tree {
            id: placeholder,
            items,
        }
    }

    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ObjectTrait for Tree {
    /// Each line is `<kind> <hex-id> <name>`; names may contain spaces but
    /// never `/` or newlines.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, ConfError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| ConfError::storage("tree object is not valid UTF-8"))?;
        let mut items = Vec::new();
        for line in text.lines() {
            let bad = || ConfError::storage(format!("`{line}` is not a valid tree item"));
            let (kind_str, rest) = line.split_once(' ').ok_or_else(bad)?;
            let (id_str, name) = rest.split_once(' ').ok_or_else(bad)?;
            let kind = match kind_str {
                "blob" => TreeItemKind::Blob,
                "tree" => TreeItemKind::Tree,
                _ => return Err(bad()),
            };
            if name.is_empty() || name.contains('/') {
                return Err(bad());
            }
            let id = ObjectHash::from_str(id_str).map_err(|_| bad())?;
            items.push(TreeItem {
                kind,
                id,
                name: name.to_owned(),
            });
        }
        Ok(Tree { id: hash, items })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn to_data(&self) -> Result<Vec<u8>, ConfError> {
        let mut out = String::new();
        for item in &self.items {
            let _ = writeln!(out, "{} {} {}", item.kind.as_str(), item.id, item.name);
        }
        Ok(out.into_bytes())
    }
}
