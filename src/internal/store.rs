//! Content-addressed object store with atomic ref updates.
//!
//! Objects are zlib-deflated `<type> <len>\0<payload>` files named by their
//! id. Two on-disk layouts exist: V0 keeps all objects in one flat
//! directory, V1 fans out on the first two hex digits. The layout and hash
//! kind live in the repository config file and are detected at open.
//!
//! Refs only ever move forward: an update must name the expected current
//! value (`None` for a brand-new ref), and any other observed state is a
//! fatal `Storage` error. Writes are serialized by the commit pipeline's
//! exclusive lock; concurrent readers are safe.

use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    errors::ConfError,
    hash::{HashKind, ObjectHash},
    internal::object::{
        blob::Blob, commit::Commit, tree::Tree, types::ObjectType, ObjectTrait,
    },
};

/// Name of the repository config file.
pub const CONFIG_FILE: &str = "confstore.json";
/// The single branch every repository history lives on.
pub const MAIN_REF: &str = "refs/heads/main";
const HEAD_FILE: &str = "HEAD";

/// On-disk layout version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// Flat `objects/<hex>` layout.
    V0,
    /// Fan-out `objects/<2-hex>/<rest>` layout.
    V1,
}

impl FormatVersion {
    fn as_u32(&self) -> u32 {
        match self {
            FormatVersion::V0 => 0,
            FormatVersion::V1 => 1,
        }
    }

    fn from_u32(v: u32) -> Result<FormatVersion, ConfError> {
        match v {
            0 => Ok(FormatVersion::V0),
            1 => Ok(FormatVersion::V1),
            other => Err(ConfError::storage(format!(
                "unknown repository format version {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreConfig {
    format_version: u32,
    hash: HashKind,
}

/// A content-addressed store rooted at one repository directory.
#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
    format: FormatVersion,
    kind: HashKind,
}

impl ObjectStore {
    /// Initialize a fresh store: object and ref directories, config file,
    /// and a HEAD pointing at the main branch.
    pub fn init(root: &Path, format: FormatVersion, kind: HashKind) -> Result<ObjectStore, ConfError> {
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("refs/heads"))?;
        let config = StoreConfig {
            format_version: format.as_u32(),
            hash: kind,
        };
        let encoded = serde_json::to_vec_pretty(&config)
            .map_err(|e| ConfError::storage(format!("config encoding failed: {e}")))?;
        write_atomic(root, &root.join(CONFIG_FILE), &encoded)?;
        write_atomic(root, &root.join(HEAD_FILE), format!("ref: {MAIN_REF}\n").as_bytes())?;
        Ok(ObjectStore {
            root: root.to_path_buf(),
            format,
            kind,
        })
    }

    /// Open an existing store, detecting format version and hash kind.
    pub fn open(root: &Path) -> Result<ObjectStore, ConfError> {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(ConfError::RepositoryNotFound(root.display().to_string()));
        }
        let raw = fs::read(&config_path)?;
        let config: StoreConfig = serde_json::from_slice(&raw)
            .map_err(|e| ConfError::storage(format!("config parse failed: {e}")))?;
        Ok(ObjectStore {
            root: root.to_path_buf(),
            format: FormatVersion::from_u32(config.format_version)?,
            kind: config.hash,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn hash_kind(&self) -> HashKind {
        self.kind
    }

    fn object_path(&self, id: &ObjectHash) -> PathBuf {
        let hex = id.to_string();
        match self.format {
            FormatVersion::V0 => self.root.join("objects").join(hex),
            FormatVersion::V1 => self.root.join("objects").join(&hex[..2]).join(&hex[2..]),
        }
    }

    /// Store a framed, deflated payload; returns its id. Writing an object
    /// that already exists is a no-op.
    pub fn put(&self, object_type: ObjectType, payload: &[u8]) -> Result<ObjectHash, ConfError> {
        let id = ObjectHash::from_type_and_data(self.kind, object_type, payload);
        let path = self.object_path(&id);
        if path.is_file() {
            return Ok(id);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut framed = Vec::with_capacity(payload.len() + 16);
        framed.extend(object_type.as_str().as_bytes());
        framed.push(b' ');
        framed.extend(payload.len().to_string().as_bytes());
        framed.push(b'\x00');
        framed.extend(payload);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&framed)?;
        let compressed = encoder.finish()?;
        write_atomic(&self.root, &path, &compressed)?;
        debug!(id = %id, ty = %object_type, bytes = payload.len(), "object written");
        Ok(id)
    }

    /// Store a typed object.
    pub fn put_object<T: ObjectTrait>(&self, object: &T) -> Result<ObjectHash, ConfError> {
        self.put(object.get_type(), &object.to_data()?)
    }

    /// Load and unframe an object's payload.
    pub fn get(&self, id: &ObjectHash) -> Result<(ObjectType, Vec<u8>), ConfError> {
        let path = self.object_path(id);
        let compressed = fs::read(&path)
            .map_err(|_| ConfError::storage(format!("object {id} is missing")))?;
        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut framed = Vec::new();
        decoder
            .read_to_end(&mut framed)
            .map_err(|e| ConfError::storage(format!("object {id} is corrupt: {e}")))?;
        let nul = framed
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| ConfError::storage(format!("object {id} lacks a header")))?;
        let header = std::str::from_utf8(&framed[..nul])
            .map_err(|_| ConfError::storage(format!("object {id} has a bad header")))?;
        let (type_str, len_str) = header
            .split_once(' ')
            .ok_or_else(|| ConfError::storage(format!("object {id} has a bad header")))?;
        let object_type = ObjectType::from_str(type_str)?;
        let payload = framed[nul + 1..].to_vec();
        let declared: usize = len_str
            .parse()
            .map_err(|_| ConfError::storage(format!("object {id} has a bad length")))?;
        if declared != payload.len() {
            return Err(ConfError::storage(format!(
                "object {id} length mismatch: header says {declared}, payload is {}",
                payload.len()
            )));
        }
        Ok((object_type, payload))
    }

    pub fn has(&self, id: &ObjectHash) -> bool {
        self.object_path(id).is_file()
    }

    fn get_typed<T: ObjectTrait>(&self, id: &ObjectHash, expected: ObjectType) -> Result<T, ConfError> {
        let (object_type, payload) = self.get(id)?;
        if object_type != expected {
            return Err(ConfError::storage(format!(
                "object {id} is a {object_type}, expected {expected}"
            )));
        }
        T::from_bytes(&payload, *id)
    }

    pub fn get_blob(&self, id: &ObjectHash) -> Result<Blob, ConfError> {
        self.get_typed(id, ObjectType::Blob)
    }

    pub fn get_tree(&self, id: &ObjectHash) -> Result<Tree, ConfError> {
        self.get_typed(id, ObjectType::Tree)
    }

    pub fn get_commit(&self, id: &ObjectHash) -> Result<Commit, ConfError> {
        self.get_typed(id, ObjectType::Commit)
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Read a ref, returning `None` when it does not exist yet.
    pub fn read_ref(&self, name: &str) -> Result<Option<ObjectHash>, ConfError> {
        let path = self.ref_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let id = ObjectHash::from_str(raw.trim())
            .map_err(|e| ConfError::storage(format!("ref `{name}` is corrupt: {e}")))?;
        Ok(Some(id))
    }

    /// Move a ref forward. `expected` is the value the caller observed:
    /// `None` creates the ref, `Some` fast-forwards it. Any other current
    /// state is a fatal storage error, never a silent overwrite.
    pub fn update_ref(
        &self,
        name: &str,
        new_id: &ObjectHash,
        expected: Option<&ObjectHash>,
    ) -> Result<(), ConfError> {
        let current = self.read_ref(name)?;
        if current.as_ref() != expected {
            return Err(ConfError::storage(format!(
                "unexpected state of ref `{name}`: found {:?}, expected {:?}",
                current.map(|h| h.to_string()),
                expected.map(|h| h.to_string()),
            )));
        }
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.root, &path, format!("{new_id}\n").as_bytes())?;
        debug!(name, id = %new_id, "ref updated");
        Ok(())
    }

    /// Resolve the HEAD symref to the commit id of the current branch, if
    /// any commit exists yet.
    pub fn head_id(&self) -> Result<Option<ObjectHash>, ConfError> {
        let raw = fs::read_to_string(self.root.join(HEAD_FILE))
            .map_err(|_| ConfError::storage("HEAD file is missing"))?;
        let target = raw
            .trim()
            .strip_prefix("ref: ")
            .ok_or_else(|| ConfError::storage("HEAD is not a symref"))?;
        self.read_ref(target)
    }
}

/// Write via a temp file in the same filesystem, then rename into place.
fn write_atomic(root: &Path, path: &Path, bytes: &[u8]) -> Result<(), ConfError> {
    let mut tmp = tempfile::NamedTempFile::new_in(root)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .map_err(|e| ConfError::storage(format!("rename into `{}` failed: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(format: FormatVersion) -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::init(dir.path(), format, HashKind::Sha1).unwrap();
        (dir, store)
    }

    /// Objects round-trip through both layouts.
    #[test]
    fn put_get_round_trip() {
        for format in [FormatVersion::V0, FormatVersion::V1] {
            let (_dir, store) = fresh(format);
            let id = store.put(ObjectType::Blob, b"hello\n").unwrap();
            let (ty, payload) = store.get(&id).unwrap();
            assert_eq!(ty, ObjectType::Blob);
            assert_eq!(payload, b"hello\n");
            assert!(store.has(&id));
        }
    }

    /// Reopening detects the written format version.
    #[test]
    fn open_detects_format() {
        let (dir, _) = fresh(FormatVersion::V1);
        let store = ObjectStore::open(dir.path()).unwrap();
        assert_eq!(store.format(), FormatVersion::V1);
        assert_eq!(store.hash_kind(), HashKind::Sha1);
    }

    /// Opening a directory with no config is RepositoryNotFound.
    #[test]
    fn open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ObjectStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, ConfError::RepositoryNotFound(_)));
    }

    /// An unknown format version must not open.
    #[test]
    fn open_unknown_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        ObjectStore::init(dir.path(), FormatVersion::V0, HashKind::Sha1).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            br#"{"format_version": 9, "hash": "sha1"}"#,
        )
        .unwrap();
        let err = ObjectStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, ConfError::Storage(_)));
    }

    /// Ref updates are compare-and-set: NEW, FAST_FORWARD, nothing else.
    #[test]
    fn ref_update_discipline() {
        let (_dir, store) = fresh(FormatVersion::V0);
        let a = store.put(ObjectType::Blob, b"a").unwrap();
        let b = store.put(ObjectType::Blob, b"b").unwrap();

        assert_eq!(store.read_ref(MAIN_REF).unwrap(), None);
        store.update_ref(MAIN_REF, &a, None).unwrap();
        assert_eq!(store.read_ref(MAIN_REF).unwrap(), Some(a));

        // Stale expectation is a fatal storage error.
        assert!(store.update_ref(MAIN_REF, &b, None).is_err());
        store.update_ref(MAIN_REF, &b, Some(&a)).unwrap();
        assert_eq!(store.head_id().unwrap(), Some(b));
    }

    /// Typed reads verify the stored object type.
    #[test]
    fn typed_read_checks_type() {
        let (_dir, store) = fresh(FormatVersion::V0);
        let id = store.put(ObjectType::Blob, b"x").unwrap();
        assert!(store.get_tree(&id).is_err());
        assert!(store.get_blob(&id).is_ok());
    }
}
