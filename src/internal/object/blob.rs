//! The Blob object holds the raw content of one file. Text blobs are stored
//! sanitized; JSON blobs are stored in canonical serialization, so blob ids
//! are stable for equal logical content.

use crate::{
    errors::ConfError,
    hash::ObjectHash,
    internal::object::{types::ObjectType, ObjectTrait},
};

/// A file content object.
#[derive(Eq, Debug, Clone)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Blob {
    /// Content as UTF-8, failing with `Storage` on invalid bytes; blobs are
    /// always written from strings, so a failure means on-disk corruption.
    pub fn text(&self) -> Result<String, ConfError> {
        String::from_utf8(self.data.clone())
            .map_err(|_| ConfError::storage(format!("blob {} is not valid UTF-8", self.id)))
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, ConfError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn to_data(&self) -> Result<Vec<u8>, ConfError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashKind;

    #[test]
    fn blob_hash_is_stable() {
        let blob = Blob::from_bytes(b"hello\n", ObjectHash::digest(HashKind::Sha1, b""))
            .unwrap();
        let a = blob.object_hash(HashKind::Sha1).unwrap();
        let b = blob.object_hash(HashKind::Sha1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let blob = Blob {
            id: ObjectHash::digest(HashKind::Sha1, b"x"),
            data: vec![0xff, 0xfe],
        };
        assert!(blob.text().is_err());
    }
}
