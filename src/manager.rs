//! Project-level repository management: create, open, remove, unremove,
//! list, and clone repositories under one project directory.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    cache::DiffCache,
    errors::ConfError,
    hash::HashKind,
    internal::store::{FormatVersion, CONFIG_FILE},
    model::{Author, Change, EntryContent, FindOptions, Revision},
    repository::Repository,
};

/// Suffix marking a removed repository directory; `unremove` strips it.
const REMOVED_SUFFIX: &str = ".removed";

/// How many commits a clone replays per metadata batch.
const CLONE_BATCH: usize = 16;

/// Construction hooks for a manager: creation author, on-disk format, an
/// optional shared diff cache, and the graceful-shutdown window.
#[derive(Clone)]
pub struct ManagerOptions {
    pub creation_author: Author,
    pub format: FormatVersion,
    pub hash_kind: HashKind,
    pub cache: Option<Arc<DiffCache>>,
    pub graceful_shutdown: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            creation_author: Author::unknown(),
            format: FormatVersion::V1,
            hash_kind: HashKind::Sha1,
            cache: None,
            graceful_shutdown: Duration::from_secs(10),
        }
    }
}

/// Manages the repositories of one project, each in its own subdirectory.
pub struct RepositoryManager {
    project: String,
    root: PathBuf,
    options: ManagerOptions,
    open: Mutex<HashMap<String, Repository>>,
}

impl RepositoryManager {
    /// Create a manager over `root`, creating the project directory if
    /// needed.
    pub fn new(project: &str, root: &Path, options: ManagerOptions) -> Result<RepositoryManager, ConfError> {
        std::fs::create_dir_all(root)?;
        Ok(RepositoryManager {
            project: project.to_owned(),
            root: root.to_path_buf(),
            options,
            open: Mutex::new(HashMap::new()),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn validate_name(name: &str) -> Result<(), ConfError> {
        let ok = !name.is_empty()
            && !name.starts_with('.')
            && !name.ends_with(REMOVED_SUFFIX)
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if ok {
            Ok(())
        } else {
            Err(ConfError::storage(format!(
                "`{name}` is not a valid repository name"
            )))
        }
    }

    fn dir_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whether a live (non-removed) repository of this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.dir_of(name).join(CONFIG_FILE).is_file()
    }

    /// Create a repository with an empty initial commit.
    pub async fn create(&self, name: &str, when: DateTime<Utc>) -> Result<Repository, ConfError> {
        let author = self.options.creation_author.clone();
        self.create_with(name, when, &author, &[]).await
    }

    async fn create_with(
        &self,
        name: &str,
        when: DateTime<Utc>,
        author: &Author,
        initial_changes: &[Change],
    ) -> Result<Repository, ConfError> {
        Self::validate_name(name)?;
        let dir = self.dir_of(name);
        if dir.exists() {
            return Err(ConfError::storage(format!(
                "repository `{name}` already exists in project `{}`",
                self.project
            )));
        }
        let repository = Repository::create(
            &self.project,
            name,
            &dir,
            self.options.format,
            self.options.hash_kind,
            author,
            when,
            initial_changes,
            self.options.cache.clone(),
        )?;
        self.open
            .lock()
            .unwrap()
            .insert(name.to_owned(), repository.clone());
        Ok(repository)
    }

    /// Open a repository, reusing the live handle when one exists.
    pub async fn open(&self, name: &str) -> Result<Repository, ConfError> {
        Self::validate_name(name)?;
        if let Some(found) = self.open.lock().unwrap().get(name) {
            return Ok(found.clone());
        }
        let repository = Repository::open(
            &self.project,
            name,
            &self.dir_of(name),
            self.options.cache.clone(),
        )?;
        self.open
            .lock()
            .unwrap()
            .insert(name.to_owned(), repository.clone());
        Ok(repository)
    }

    /// List live repository names, sorted.
    pub fn list(&self) -> Result<Vec<String>, ConfError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(REMOVED_SUFFIX) {
                continue;
            }
            if entry.path().join(CONFIG_FILE).is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a repository: close it within the graceful-shutdown window
    /// and rename its directory to a tombstone.
    pub async fn remove(&self, name: &str) -> Result<(), ConfError> {
        Self::validate_name(name)?;
        let handle = self.open.lock().unwrap().remove(name);
        if let Some(repository) = handle {
            repository
                .close_within(self.options.graceful_shutdown)
                .await?;
        }
        let dir = self.dir_of(name);
        if !dir.join(CONFIG_FILE).is_file() {
            return Err(ConfError::RepositoryNotFound(dir.display().to_string()));
        }
        std::fs::rename(&dir, self.root.join(format!("{name}{REMOVED_SUFFIX}")))?;
        info!(project = %self.project, name, "repository removed");
        Ok(())
    }

    /// Restore a removed repository.
    pub async fn unremove(&self, name: &str) -> Result<Repository, ConfError> {
        Self::validate_name(name)?;
        let tombstone = self.root.join(format!("{name}{REMOVED_SUFFIX}"));
        if !tombstone.is_dir() {
            return Err(ConfError::RepositoryNotFound(
                tombstone.display().to_string(),
            ));
        }
        let dir = self.dir_of(name);
        if dir.exists() {
            return Err(ConfError::storage(format!(
                "cannot unremove `{name}`: a live repository is in the way"
            )));
        }
        std::fs::rename(&tombstone, &dir)?;
        info!(project = %self.project, name, "repository unremoved");
        self.open(name).await
    }

    /// Close every open repository within the graceful-shutdown window.
    pub async fn close_all(&self) -> Result<(), ConfError> {
        let drained: Vec<Repository> = {
            let mut open = self.open.lock().unwrap();
            open.drain().map(|(_, repo)| repo).collect()
        };
        for repository in drained {
            repository
                .close_within(self.options.graceful_shutdown)
                .await?;
        }
        Ok(())
    }

    /// Clone `source` into a new repository named `name`, replaying every
    /// commit with its original author, timestamp, and message. Commit
    /// metadata is fetched in batches. Empty commits, normally rejected,
    /// are replayed as-is to preserve historical holes.
    pub async fn clone_repository(
        &self,
        source: &Repository,
        name: &str,
    ) -> Result<Repository, ConfError> {
        let head = source.head_revision().as_i64();
        let initial = source.commit_batch(Revision::INIT, 1).await?;
        let initial = initial
            .first()
            .ok_or_else(|| ConfError::storage("source repository has no initial commit"))?;

        // Seed the destination with the source's revision-1 state so the
        // replayed diffs apply onto identical bases.
        let seed = source
            .find(Revision::INIT, "/**", FindOptions::default())
            .await?
            .into_values()
            .filter_map(|entry| match entry.content {
                Some(EntryContent::Json(value)) => Some(Change::upsert_json(entry.path, value)),
                Some(EntryContent::Text(text)) => Some(Change::upsert_text(entry.path, text)),
                _ => None,
            })
            .collect::<Vec<_>>();
        let destination = self
            .create_with(name, timestamp_of(initial.when)?, &initial.author, &seed)
            .await?;

        let mut next = 2;
        while next <= head {
            let count = CLONE_BATCH.min((head - next + 1) as usize);
            let batch = source.commit_batch(Revision::from(next), count).await?;
            if batch.is_empty() {
                return Err(ConfError::storage("clone replay ran out of commits early"));
            }
            for info in &batch {
                let revision = info.revision.as_i64();
                let changes = source
                    .diff(Revision::from(revision - 1), info.revision, "/**")
                    .await?
                    .into_values()
                    .collect::<Vec<_>>();
                destination
                    .commit(
                        Revision::from(revision - 1),
                        timestamp_of(info.when)?,
                        info.author.clone(),
                        info.message.clone(),
                        changes,
                        true,
                    )
                    .await?;
            }
            next += batch.len() as i64;
        }
        info!(
            project = %self.project,
            source = source.name(),
            name,
            commits = head,
            "repository cloned"
        );
        Ok(destination)
    }
}

fn timestamp_of(seconds: i64) -> Result<DateTime<Utc>, ConfError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ConfError::storage(format!("timestamp {seconds} is out of range")))
}
