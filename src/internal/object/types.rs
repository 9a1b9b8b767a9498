//! Object type tags for the content-addressed store.

use std::fmt::Display;

use crate::errors::ConfError;

/// The type of an object in the store. Trees reference blobs and subtrees;
/// commits reference one tree and at most one parent commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
}

impl ObjectType {
    /// Lowercase tag used in object framing and on-disk headers.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
        }
    }

    /// Parse an object tag.
    pub fn from_str(s: &str) -> Result<ObjectType, ConfError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            other => Err(ConfError::storage(format!(
                "`{other}` is not a valid object type"
            ))),
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectType;

    #[test]
    fn round_trip_tags() {
        for ty in [ObjectType::Blob, ObjectType::Tree, ObjectType::Commit] {
            assert_eq!(ObjectType::from_str(ty.as_str()).unwrap(), ty);
        }
        assert!(ObjectType::from_str("tag").is_err());
    }
}
