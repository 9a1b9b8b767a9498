//! Object model definitions for blobs, trees, and commits, plus the trait
//! that lets the store create strongly typed values from raw bytes.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tree;
pub mod types;

use crate::{
    errors::ConfError,
    hash::{HashKind, ObjectHash},
    internal::object::types::ObjectType,
};

/// Common interface for all object types stored in the content-addressed
/// store.
pub trait ObjectTrait: Send + Sync {
    /// Creates a new object from a byte payload and its already-computed id.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, ConfError>
    where
        Self: Sized;

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    /// Serializes the object payload (the bytes that are framed and hashed).
    fn to_data(&self) -> Result<Vec<u8>, ConfError>;

    /// Computes the object id from the serialized payload.
    fn object_hash(&self, kind: HashKind) -> Result<ObjectHash, ConfError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(kind, self.get_type(), &data))
    }
}
