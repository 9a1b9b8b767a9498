//! The commit-id index: a dense, append-only mapping from revision to
//! commit id.
//!
//! The on-disk form is a headerless file of fixed-width records; revision
//! `r` lives at offset `(r - 1) * K` where `K` is the id size, so lookup is
//! O(1). The index is the authoritative revision→commit source during
//! normal operation; the commit log is consulted only to rebuild it after
//! corruption or version skew.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    errors::ConfError,
    hash::{HashKind, ObjectHash},
    internal::store::ObjectStore,
};

/// File name of the index inside a repository directory.
pub const INDEX_FILE: &str = "commit_ids.idx";

/// Dense revision → commit-id mapping, mirrored in memory for lookups and
/// appended to disk on every put.
#[derive(Debug)]
pub struct CommitIdIndex {
    path: PathBuf,
    kind: HashKind,
    ids: Vec<ObjectHash>,
    file: Option<File>,
}

impl CommitIdIndex {
    /// Open (or create) the index file and load all records.
    pub fn open(path: &Path, kind: HashKind) -> Result<CommitIdIndex, ConfError> {
        let record = kind.size();
        let raw = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if raw.len() % record != 0 {
            return Err(ConfError::storage(format!(
                "commit-id index `{}` is torn: {} bytes with {record}-byte records",
                path.display(),
                raw.len()
            )));
        }
        let ids = raw
            .chunks_exact(record)
            .map(|chunk| {
                ObjectHash::from_bytes(kind, chunk)
                    .map_err(|e| ConfError::storage(format!("commit-id index record: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(CommitIdIndex {
            path: path.to_path_buf(),
            kind,
            ids,
            file: Some(file),
        })
    }

    /// The highest indexed revision; 0 when empty.
    pub fn head(&self) -> i64 {
        self.ids.len() as i64
    }

    /// Look up the commit id of revision `r`. A miss inside `[1, head]`
    /// never happens in a healthy repository, so it reports as `Storage`.
    pub fn get(&self, revision: i64) -> Result<ObjectHash, ConfError> {
        if revision < 1 {
            return Err(ConfError::storage(format!(
                "commit-id index queried for revision {revision}"
            )));
        }
        self.ids
            .get(revision as usize - 1)
            .copied()
            .ok_or_else(|| {
                ConfError::storage(format!(
                    "commit-id index has no record for revision {revision} (head {})",
                    self.head()
                ))
            })
    }

    /// Append the record for revision `r`, which must be exactly `head + 1`.
    pub fn put(&mut self, revision: i64, id: ObjectHash) -> Result<(), ConfError> {
        if revision != self.head() + 1 {
            return Err(ConfError::storage(format!(
                "commit-id index append out of order: got {revision}, expected {}",
                self.head() + 1
            )));
        }
        let file = self
            .file
            .as_mut()
            .ok_or(ConfError::ShuttingDown)?;
        file.write_all(id.as_ref())?;
        file.flush()?;
        self.ids.push(id);
        Ok(())
    }

    /// Rebuild the index by scanning the commit graph from the head ref,
    /// decoding the revision out of each commit message. Replaces the file
    /// atomically and returns the fresh index.
    pub fn rebuild(
        path: &Path,
        kind: HashKind,
        store: &ObjectStore,
    ) -> Result<CommitIdIndex, ConfError> {
        warn!(path = %path.display(), "rebuilding commit-id index from the commit log");
        let mut records: Vec<(i64, ObjectHash)> = Vec::new();
        let mut cursor = store.head_id()?;
        while let Some(id) = cursor {
            let commit = store.get_commit(&id)?;
            records.push((commit.decoded_revision()?.as_i64(), id));
            cursor = commit.parent_id;
        }
        records.reverse();

        let mut ids = Vec::with_capacity(records.len());
        for (expected, (revision, id)) in records.into_iter().enumerate() {
            if revision != expected as i64 + 1 {
                return Err(ConfError::storage(format!(
                    "commit log is not a linear chain: found revision {revision} at position {}",
                    expected + 1
                )));
            }
            ids.push(id);
        }

        let mut bytes = Vec::with_capacity(ids.len() * kind.size());
        for id in &ids {
            bytes.extend_from_slice(id.as_ref());
        }
        let dir = path
            .parent()
            .ok_or_else(|| ConfError::storage("index path has no parent directory"))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(path)
            .map_err(|e| ConfError::storage(format!("index rename failed: {e}")))?;
        debug!(records = ids.len(), "commit-id index rebuilt");

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(CommitIdIndex {
            path: path.to_path_buf(),
            kind,
            ids,
            file: Some(file),
        })
    }

    /// Release the file handle; later appends fail.
    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hash_kind(&self) -> HashKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(n: u8) -> ObjectHash {
        ObjectHash::digest(HashKind::Sha1, &[n])
    }

    /// Appends persist and reload in order.
    #[test]
    fn append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        {
            let mut index = CommitIdIndex::open(&path, HashKind::Sha1).unwrap();
            index.put(1, id_of(1)).unwrap();
            index.put(2, id_of(2)).unwrap();
            assert_eq!(index.head(), 2);
        }
        let index = CommitIdIndex::open(&path, HashKind::Sha1).unwrap();
        assert_eq!(index.head(), 2);
        assert_eq!(index.get(1).unwrap(), id_of(1));
        assert_eq!(index.get(2).unwrap(), id_of(2));
    }

    /// Out-of-order appends are rejected.
    #[test]
    fn append_only_discipline() {
        let dir = tempfile::tempdir().unwrap();
        let mut index =
            CommitIdIndex::open(&dir.path().join(INDEX_FILE), HashKind::Sha1).unwrap();
        assert!(index.put(2, id_of(2)).is_err());
        index.put(1, id_of(1)).unwrap();
        assert!(index.put(3, id_of(3)).is_err());
        assert!(index.put(1, id_of(1)).is_err());
    }

    /// Missing records report as storage errors.
    #[test]
    fn missing_record_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = CommitIdIndex::open(&dir.path().join(INDEX_FILE), HashKind::Sha1).unwrap();
        assert!(matches!(index.get(1), Err(ConfError::Storage(_))));
        assert!(matches!(index.get(0), Err(ConfError::Storage(_))));
    }

    /// A torn file fails to open (the repository will rebuild it).
    #[test]
    fn torn_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        std::fs::write(&path, [0u8; 7]).unwrap();
        assert!(CommitIdIndex::open(&path, HashKind::Sha1).is_err());
    }
}
