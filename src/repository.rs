//! The repository: lifecycle, the commit pipeline, and the query engine.
//!
//! One repository is an independent, linearly versioned store. All mutation
//! funnels through the exclusive write half of a per-repository RwLock;
//! queries run under the shared half. Watcher notification happens strictly
//! after the write lock is released, because a completed watcher may call
//! straight back into the repository.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    cache::DiffCache,
    errors::ConfError,
    hash::{HashKind, ObjectHash},
    internal::{
        index::{CommitIdIndex, INDEX_FILE},
        object::{
            commit::{Commit, MessageDoc},
            signature::Signature,
            tree::TreeItemKind,
        },
        store::{FormatVersion, ObjectStore, MAIN_REF},
        worktree::{diff_trees, flatten_tree, parse_content, FileContent, TreeDiffEntry, WorkingTree},
    },
    model::{
        Author, Change, ChangeContent, CommitInfo, CommitMessage, Entry, EntryContent, EntryType,
        FindOptions, Query, QueryType, Revision, RevisionRange,
    },
    patch,
    pattern::PathPattern,
    watch::{WatchSignal, WatcherRegistry},
};

/// Summary of the commit every repository is born with.
pub const INITIAL_COMMIT_SUMMARY: &str = "Create a new repository";

struct RepoInner {
    project: String,
    name: String,
    store: Arc<ObjectStore>,
    index: Mutex<CommitIdIndex>,
    /// Published head revision; readers that observed `r` here see all
    /// state at and below `r`.
    head: AtomicI64,
    /// Many readers, one writer (the commit pipeline and close).
    lock: RwLock<()>,
    watchers: WatcherRegistry,
    closed: AtomicBool,
    cache: Option<Arc<DiffCache>>,
}

/// Handle to one repository. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepoInner>,
}

impl Repository {
    /// Create a repository at `dir`, writing the initial commit (revision 1,
    /// empty tree unless `initial_changes` are given). A failure removes the
    /// partially-created directory.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        project: &str,
        name: &str,
        dir: &Path,
        format: FormatVersion,
        kind: HashKind,
        author: &Author,
        when: DateTime<Utc>,
        initial_changes: &[Change],
        cache: Option<Arc<DiffCache>>,
    ) -> Result<Repository, ConfError> {
        let created = Self::try_create(
            project,
            name,
            dir,
            format,
            kind,
            author,
            when,
            initial_changes,
            cache,
        );
        if created.is_err() {
            let _ = std::fs::remove_dir_all(dir);
        }
        created
    }

    #[allow(clippy::too_many_arguments)]
    fn try_create(
        project: &str,
        name: &str,
        dir: &Path,
        format: FormatVersion,
        kind: HashKind,
        author: &Author,
        when: DateTime<Utc>,
        initial_changes: &[Change],
        cache: Option<Arc<DiffCache>>,
    ) -> Result<Repository, ConfError> {
        let store = ObjectStore::init(dir, format, kind)?;
        let mut worktree = WorkingTree::new();
        worktree.apply(initial_changes)?;
        let tree_id = worktree.write_tree(&store)?;
        let signature = Signature::new(author, when.timestamp());
        let doc = MessageDoc::new(
            &CommitMessage::summary_only(INITIAL_COMMIT_SUMMARY),
            Revision::INIT,
        );
        let commit = Commit::build(kind, tree_id, None, signature, &doc)?;
        store.put_object(&commit)?;
        let mut index = CommitIdIndex::open(&dir.join(INDEX_FILE), kind)?;
        index.put(1, commit.id)?;
        store.update_ref(MAIN_REF, &commit.id, None)?;
        info!(project, name, dir = %dir.display(), "repository created");
        Ok(Repository {
            inner: Arc::new(RepoInner {
                project: project.to_owned(),
                name: name.to_owned(),
                store: Arc::new(store),
                index: Mutex::new(index),
                head: AtomicI64::new(1),
                lock: RwLock::new(()),
                watchers: WatcherRegistry::new(),
                closed: AtomicBool::new(false),
                cache,
            }),
        })
    }

    /// Open a repository at `dir`, detecting its format version and
    /// validating the head against the commit-id index. An inconsistent or
    /// unreadable index is rebuilt from the commit log.
    pub fn open(
        project: &str,
        name: &str,
        dir: &Path,
        cache: Option<Arc<DiffCache>>,
    ) -> Result<Repository, ConfError> {
        let store = ObjectStore::open(dir)?;
        let kind = store.hash_kind();
        let head_id = store
            .head_id()?
            .ok_or_else(|| ConfError::storage("repository has no head commit"))?;
        let head_revision = store.get_commit(&head_id)?.decoded_revision()?.as_i64();
        if head_revision < 1 {
            return Err(ConfError::storage(format!(
                "head commit decodes to revision {head_revision}"
            )));
        }

        let index_path = dir.join(INDEX_FILE);
        let index = match CommitIdIndex::open(&index_path, kind) {
            Ok(index)
                if index.head() == head_revision
                    && index.get(head_revision).ok() == Some(head_id) =>
            {
                index
            }
            _ => CommitIdIndex::rebuild(&index_path, kind, &store)?,
        };

        info!(project, name, head = head_revision, "repository opened");
        Ok(Repository {
            inner: Arc::new(RepoInner {
                project: project.to_owned(),
                name: name.to_owned(),
                store: Arc::new(store),
                index: Mutex::new(index),
                head: AtomicI64::new(head_revision),
                lock: RwLock::new(()),
                watchers: WatcherRegistry::new(),
                closed: AtomicBool::new(false),
                cache,
            }),
        })
    }

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current head revision.
    pub fn head_revision(&self) -> Revision {
        Revision::from(self.head())
    }

    fn head(&self) -> i64 {
        self.inner.head.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), ConfError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ConfError::ShuttingDown);
        }
        Ok(())
    }

    /// Close the repository: reject new operations, drain in-flight ones,
    /// release the index, and fail all pending watchers. Idempotent.
    pub async fn close(&self) -> Result<(), ConfError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let guard = self.inner.lock.write().await;
        self.inner.index.lock().unwrap().close();
        drop(guard);
        self.inner.watchers.shutdown();
        info!(
            project = %self.inner.project,
            name = %self.inner.name,
            "repository closed"
        );
        Ok(())
    }

    /// Close with a graceful-shutdown window; draining longer than the
    /// window yields `Timeout`.
    pub async fn close_within(&self, window: Duration) -> Result<(), ConfError> {
        tokio::time::timeout(window, self.close())
            .await
            .map_err(|_| ConfError::Timeout)?
    }

    /// Resolve a possibly relative revision against the current head.
    pub async fn normalize(&self, revision: Revision) -> Result<Revision, ConfError> {
        self.ensure_open()?;
        revision.normalize(self.head())
    }

    /// Resolve both ends of a range against the current head.
    pub async fn normalize_range(
        &self,
        from: Revision,
        to: Revision,
    ) -> Result<RevisionRange, ConfError> {
        self.ensure_open()?;
        let head = self.head();
        Ok(RevisionRange::new(
            from.normalize(head)?,
            to.normalize(head)?,
        ))
    }

    fn commit_id_at(&self, revision: i64) -> Result<ObjectHash, ConfError> {
        self.inner.index.lock().unwrap().get(revision)
    }

    fn commit_at(&self, revision: i64) -> Result<Commit, ConfError> {
        let id = self.commit_id_at(revision)?;
        self.inner.store.get_commit(&id)
    }

    fn tree_id_at(&self, revision: i64) -> Result<ObjectHash, ConfError> {
        Ok(self.commit_at(revision)?.tree_id)
    }

    /// Diff two trees, going through the shared cache when one is wired in.
    fn cached_diff(
        &self,
        old_tree: ObjectHash,
        new_tree: ObjectHash,
    ) -> Result<Arc<Vec<TreeDiffEntry>>, ConfError> {
        match &self.inner.cache {
            Some(cache) => cache.get_or_compute(old_tree, new_tree, || {
                diff_trees(&self.inner.store, &old_tree, &new_tree)
            }),
            None => Ok(Arc::new(diff_trees(
                &self.inner.store,
                &old_tree,
                &new_tree,
            )?)),
        }
    }

    // ------------------------------------------------------------------
    // Commit pipeline
    // ------------------------------------------------------------------

    /// Apply `changes` on top of `base` and commit the result.
    ///
    /// `base` must normalize to the current head, otherwise the commit is
    /// stale and fails with `ChangeConflict`. A commit whose resulting tree
    /// equals the head tree fails with `RedundantChange` unless
    /// `allow_empty` is set. Timestamps are truncated to whole seconds.
    pub async fn commit(
        &self,
        base: Revision,
        when: DateTime<Utc>,
        author: Author,
        message: CommitMessage,
        changes: Vec<Change>,
        allow_empty: bool,
    ) -> Result<Revision, ConfError> {
        self.ensure_open()?;
        let guard = self.inner.lock.write().await;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ConfError::ShuttingDown);
        }

        let head = self.head();
        let base = base.normalize(head)?;
        if base.as_i64() != head {
            return Err(ConfError::conflict(format!(
                "base revision {base} is stale: head is {head}"
            )));
        }
        let next = head + 1;
        let head_commit_id = self.commit_id_at(head)?;

        let store = self.inner.store.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            build_commit(
                &store,
                head_commit_id,
                next,
                when,
                &author,
                &message,
                &changes,
                allow_empty,
            )
        })
        .await
        .map_err(|e| ConfError::storage(format!("commit worker failed: {e}")))??;

        self.inner.index.lock().unwrap().put(next, outcome.commit_id)?;
        // Any non-new/non-fast-forward result inside update_ref is fatal.
        self.inner
            .store
            .update_ref(MAIN_REF, &outcome.commit_id, Some(&head_commit_id))?;
        self.inner.head.store(next, Ordering::Release);
        debug!(
            project = %self.inner.project,
            name = %self.inner.name,
            revision = next,
            changed = outcome.changed_paths.len(),
            "commit applied"
        );
        drop(guard);

        // Outside the lock: a notified watcher may immediately re-enter.
        self.inner
            .watchers
            .notify(Revision::from(next), &outcome.changed_paths);
        Ok(Revision::from(next))
    }

    // ------------------------------------------------------------------
    // Query engine
    // ------------------------------------------------------------------

    /// Find entries at `revision` matching `pattern`, in tree-walk order.
    /// An absolute revision beyond the head yields an empty result, so a
    /// speculative reader sees "nothing yet" instead of an error.
    pub async fn find(
        &self,
        revision: Revision,
        pattern: &str,
        options: FindOptions,
    ) -> Result<BTreeMap<String, Entry>, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let head = self.head();
        if revision.as_i64() > head {
            return Ok(BTreeMap::new());
        }
        let revision = revision.normalize(head)?;
        let compiled = PathPattern::compile(pattern);
        let tree_id = self.tree_id_at(revision.as_i64())?;
        self.collect_entries(&tree_id, &compiled, revision, &options)
    }

    fn collect_entries(
        &self,
        tree_id: &ObjectHash,
        pattern: &PathPattern,
        revision: Revision,
        options: &FindOptions,
    ) -> Result<BTreeMap<String, Entry>, ConfError> {
        fn walk(
            store: &ObjectStore,
            tree_id: &ObjectHash,
            dir: &str,
            pattern: &PathPattern,
            revision: Revision,
            options: &FindOptions,
            out: &mut BTreeMap<String, Entry>,
        ) -> Result<bool, ConfError> {
            let below_cap = |out: &BTreeMap<String, Entry>| match options.max_entries {
                Some(cap) => out.len() < cap,
                None => true,
            };
            let tree = store.get_tree(tree_id)?;
            for item in &tree.items {
                if !below_cap(out) {
                    return Ok(false);
                }
                let path = format!("{dir}/{}", item.name);
                match item.kind {
                    TreeItemKind::Blob => {
                        if pattern.matches(&path) {
                            let content = if options.fetch_content {
                                let blob = store.get_blob(&item.id)?;
                                Some(parse_content(&path, &blob.data)?.to_entry_content())
                            } else {
                                None
                            };
                            out.insert(
                                path.clone(),
                                Entry {
                                    path,
                                    entry_type: EntryType::from_path(&item.name),
                                    content,
                                    revision,
                                },
                            );
                        }
                    }
                    TreeItemKind::Tree => {
                        if pattern.matches(&path) {
                            out.insert(
                                path.clone(),
                                Entry {
                                    path: path.clone(),
                                    entry_type: EntryType::Directory,
                                    content: Some(EntryContent::Directory),
                                    revision,
                                },
                            );
                        }
                        if pattern.matches_under(&path)
                            && !walk(store, &item.id, &path, pattern, revision, options, out)?
                        {
                            return Ok(false);
                        }
                    }
                }
            }
            Ok(true)
        }

        let mut out = BTreeMap::new();
        walk(
            &self.inner.store,
            tree_id,
            "",
            pattern,
            revision,
            options,
            &mut out,
        )?;
        Ok(out)
    }

    /// Fetch a single file, optionally narrowed by a JSON pointer.
    pub async fn get_file(&self, revision: Revision, query: &Query) -> Result<Entry, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let revision = revision.normalize(self.head())?;
        let tree_id = self.tree_id_at(revision.as_i64())?;
        let not_found = || ConfError::EntryNotFound {
            revision: revision.as_i64(),
            path: query.path.clone(),
        };

        let blob_id = self.blob_at(&tree_id, &query.path)?.ok_or_else(not_found)?;
        let blob = self.inner.store.get_blob(&blob_id)?;
        let content = parse_content(&query.path, &blob.data)?;
        let narrowed = match (&query.query_type, content) {
            (QueryType::Identity, content) => content.to_entry_content(),
            (QueryType::JsonPointer(pointer), FileContent::Json(value)) => {
                let found = value.pointer(pointer).cloned().ok_or_else(not_found)?;
                EntryContent::Json(found)
            }
            (QueryType::JsonPointer(_), FileContent::Text(_)) => {
                return Err(ConfError::conflict(format!(
                    "JSON query on non-JSON entry `{}`",
                    query.path
                )));
            }
        };
        Ok(Entry {
            path: query.path.clone(),
            entry_type: EntryType::from_path(&query.path),
            content: Some(narrowed),
            revision,
        })
    }

    /// Whether a file exists at `revision`.
    pub async fn exists(&self, revision: Revision, path: &str) -> Result<bool, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let revision = revision.normalize(self.head())?;
        let tree_id = self.tree_id_at(revision.as_i64())?;
        Ok(self.blob_at(&tree_id, path)?.is_some())
    }

    /// Resolve the blob at an absolute path by walking tree segments.
    fn blob_at(&self, tree_id: &ObjectHash, path: &str) -> Result<Option<ObjectHash>, ConfError> {
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        let mut current = *tree_id;
        while let Some(segment) = segments.next() {
            let tree = self.inner.store.get_tree(&current)?;
            let item = match tree.find(segment) {
                Some(item) => item,
                None => return Ok(None),
            };
            match (item.kind, segments.peek().is_some()) {
                (TreeItemKind::Blob, false) => return Ok(Some(item.id)),
                (TreeItemKind::Tree, true) => current = item.id,
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Commit history between two revisions, newest first unless the caller
    /// asked ascending. Commits that touch no path matching `pattern` are
    /// skipped. `max_commits` of 0 means no cap.
    pub async fn history(
        &self,
        from: Revision,
        to: Revision,
        pattern: &str,
        max_commits: usize,
    ) -> Result<Vec<CommitInfo>, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let head = self.head();
        let from = from.normalize(head)?;
        let to = to.normalize(head)?;
        let descending = from >= to;
        let (hi, lo) = if descending {
            (from.as_i64(), to.as_i64())
        } else {
            (to.as_i64(), from.as_i64())
        };
        let cap = if max_commits == 0 {
            usize::MAX
        } else {
            max_commits
        };
        let compiled = PathPattern::compile(pattern);

        let mut result = Vec::new();
        let mut revision = hi;
        while revision >= lo && result.len() < cap {
            let commit = self.commit_at(revision)?;
            let matched = if revision == 1 {
                flatten_tree(&self.inner.store, &commit.tree_id)?
                    .keys()
                    .any(|p| compiled.matches(p))
            } else {
                let parent_tree = self.tree_id_at(revision - 1)?;
                self.cached_diff(parent_tree, commit.tree_id)?
                    .iter()
                    .any(|e| compiled.matches(&e.path))
            };
            if matched {
                result.push(commit_info(Revision::from(revision), &commit)?);
            }
            revision -= 1;
        }

        // The initial commit's tree is usually empty, so it never carries a
        // diff; surface it for match-everything patterns anyway.
        if lo == 1
            && revision == 0
            && result.len() < cap
            && compiled.has_double_star()
            && !result.iter().any(|c| c.revision == Revision::INIT)
        {
            let initial = self.commit_at(1)?;
            if flatten_tree(&self.inner.store, &initial.tree_id)?.is_empty() {
                result.push(commit_info(Revision::INIT, &initial)?);
            }
        }

        if !descending {
            result.reverse();
        }
        Ok(result)
    }

    /// The changes that turn `from` into `to`, filtered by `pattern` and
    /// keyed by path.
    pub async fn diff(
        &self,
        from: Revision,
        to: Revision,
        pattern: &str,
    ) -> Result<BTreeMap<String, Change>, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let head = self.head();
        let from = from.normalize(head)?.as_i64();
        let to = to.normalize(head)?.as_i64();
        let (lo, hi) = (from.min(to), from.max(to));
        if lo == hi {
            return Ok(BTreeMap::new());
        }
        let compiled = PathPattern::compile(pattern);
        let old_tree = self.tree_id_at(lo)?;
        let new_tree = self.tree_id_at(hi)?;
        let entries = self.cached_diff(old_tree, new_tree)?;
        self.translate_diff(&entries, &compiled)
    }

    fn translate_diff(
        &self,
        entries: &[TreeDiffEntry],
        pattern: &PathPattern,
    ) -> Result<BTreeMap<String, Change>, ConfError> {
        let mut out = BTreeMap::new();
        for entry in entries {
            if !pattern.matches(&entry.path) {
                continue;
            }
            let old = self.load_content(&entry.path, entry.old.as_ref())?;
            let new = self.load_content(&entry.path, entry.new.as_ref())?;
            if let Some(change) = change_between(&entry.path, old.as_ref(), new.as_ref()) {
                if out.insert(entry.path.clone(), change).is_some() {
                    // Two diff entries for one path would corrupt the map.
                    return Err(ConfError::storage(format!(
                        "duplicate diff entry for `{}`",
                        entry.path
                    )));
                }
            }
        }
        Ok(out)
    }

    fn load_content(
        &self,
        path: &str,
        blob_id: Option<&ObjectHash>,
    ) -> Result<Option<FileContent>, ConfError> {
        match blob_id {
            Some(id) => {
                let blob = self.inner.store.get_blob(id)?;
                Ok(Some(parse_content(path, &blob.data)?))
            }
            None => Ok(None),
        }
    }

    /// The changes `changes` would produce against `base`, without
    /// committing anything. Empty when they would be redundant.
    pub async fn preview_diff(
        &self,
        base: Revision,
        changes: Vec<Change>,
    ) -> Result<BTreeMap<String, Change>, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let base = base.normalize(self.head())?;
        let tree_id = self.tree_id_at(base.as_i64())?;
        let store = self.inner.store.clone();
        let (before, after, edits) = tokio::task::spawn_blocking(move || {
            let mut worktree = WorkingTree::from_tree(&store, &tree_id)?;
            let before = worktree.files().clone();
            let edits = worktree.apply(&changes)?;
            Ok::<_, ConfError>((before, worktree.files().clone(), edits))
        })
        .await
        .map_err(|e| ConfError::storage(format!("preview worker failed: {e}")))??;

        if edits == 0 {
            return Ok(BTreeMap::new());
        }
        let mut out = BTreeMap::new();
        for (path, old) in &before {
            if let Some(change) = change_between(path, Some(old), after.get(path)) {
                out.insert(path.clone(), change);
            }
        }
        for (path, new) in &after {
            if !before.contains_key(path) {
                if let Some(change) = change_between(path, None, Some(new)) {
                    out.insert(path.clone(), change);
                }
            }
        }
        Ok(out)
    }

    /// The latest revision whose commits touched a path matching `pattern`,
    /// or `None` when `last_known` is already up to date.
    pub async fn find_latest_revision(
        &self,
        last_known: Revision,
        pattern: &str,
    ) -> Result<Option<Revision>, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let last = last_known.normalize(self.head())?;
        self.scan_latest(last, &PathPattern::compile(pattern))
    }

    /// Callers hold (at least) the read lock and pass a normalized
    /// revision.
    fn scan_latest(
        &self,
        last: Revision,
        pattern: &PathPattern,
    ) -> Result<Option<Revision>, ConfError> {
        let head = self.head();
        if last.as_i64() == head {
            return Ok(None);
        }
        let head_tree = self.tree_id_at(head)?;
        if last == Revision::INIT {
            // Fast path: anything at head matching the pattern is newer
            // than the (empty) initial tree.
            let any = flatten_tree(&self.inner.store, &head_tree)?
                .keys()
                .any(|p| pattern.matches(p));
            return Ok(any.then(|| Revision::from(head)));
        }
        let last_tree = self.tree_id_at(last.as_i64())?;
        let any = self
            .cached_diff(last_tree, head_tree)?
            .iter()
            .any(|e| pattern.matches(&e.path));
        Ok(any.then(|| Revision::from(head)))
    }

    /// Long-poll for a commit that touches a path matching `pattern` after
    /// `last_known`. Resolves to `None` on timeout and fails with
    /// `ShuttingDown` when the repository closes first.
    ///
    /// Registration double-checks `find_latest_revision` under the read
    /// lock, so a commit landing between the caller's last read and this
    /// call is reported immediately rather than missed.
    pub async fn watch(
        &self,
        last_known: Revision,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Option<Revision>, ConfError> {
        self.ensure_open()?;
        let compiled = PathPattern::compile(pattern);
        let receiver = {
            let _read = self.inner.lock.read().await;
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(ConfError::ShuttingDown);
            }
            let last = last_known.normalize(self.head())?;
            if let Some(found) = self.scan_latest(last, &compiled)? {
                return Ok(Some(found));
            }
            self.inner.watchers.register(last, compiled)
        };

        match tokio::time::timeout(timeout, receiver).await {
            Err(_) => Ok(None),
            Ok(Ok(WatchSignal::Matched(revision))) => Ok(Some(revision)),
            Ok(Ok(WatchSignal::Shutdown)) | Ok(Err(_)) => Err(ConfError::ShuttingDown),
        }
    }

    /// Commit metadata for up to `count` consecutive revisions starting at
    /// `start`, fetched under one lock acquisition. Clone replay walks the
    /// source history through this in batches.
    pub async fn commit_batch(
        &self,
        start: Revision,
        count: usize,
    ) -> Result<Vec<CommitInfo>, ConfError> {
        self.ensure_open()?;
        let _read = self.inner.lock.read().await;
        let head = self.head();
        let mut revision = start.normalize(head)?.as_i64();
        let mut out = Vec::with_capacity(count);
        while revision <= head && out.len() < count {
            out.push(commit_info(Revision::from(revision), &self.commit_at(revision)?)?);
            revision += 1;
        }
        Ok(out)
    }

    /// Number of watchers currently pending, for instrumentation.
    pub fn pending_watchers(&self) -> usize {
        self.inner.watchers.len()
    }
}

struct CommitOutcome {
    commit_id: ObjectHash,
    changed_paths: Vec<String>,
}

/// The blocking half of the commit pipeline: seed the working tree, apply
/// changes, write tree and commit objects.
#[allow(clippy::too_many_arguments)]
fn build_commit(
    store: &ObjectStore,
    head_commit_id: ObjectHash,
    next: i64,
    when: DateTime<Utc>,
    author: &Author,
    message: &CommitMessage,
    changes: &[Change],
    allow_empty: bool,
) -> Result<CommitOutcome, ConfError> {
    let head_commit = store.get_commit(&head_commit_id)?;
    let mut worktree = WorkingTree::from_tree(store, &head_commit.tree_id)?;
    worktree.apply(changes)?;
    let new_tree = worktree.write_tree(store)?;
    if new_tree == head_commit.tree_id && !allow_empty {
        return Err(ConfError::RedundantChange);
    }

    let signature = Signature::new(author, when.timestamp());
    let doc = MessageDoc::new(message, Revision::from(next));
    let commit = Commit::build(
        store.hash_kind(),
        new_tree,
        Some(head_commit_id),
        signature,
        &doc,
    )?;
    store.put_object(&commit)?;

    let changed_paths = diff_trees(store, &head_commit.tree_id, &new_tree)?
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    Ok(CommitOutcome {
        commit_id: commit.id,
        changed_paths,
    })
}

fn commit_info(revision: Revision, commit: &Commit) -> Result<CommitInfo, ConfError> {
    let doc = commit.message_doc()?;
    Ok(CommitInfo {
        revision,
        author: commit.author.author(),
        when: commit.author.timestamp,
        message: doc.commit_message(),
    })
}

/// Translate one changed path into the logical change that produces it:
/// additions become upserts, removals become removes, and modifications
/// become patches on the same path.
fn change_between(
    path: &str,
    old: Option<&FileContent>,
    new: Option<&FileContent>,
) -> Option<Change> {
    match (old, new) {
        (None, Some(FileContent::Json(value))) => {
            Some(Change::upsert_json(path, value.clone()))
        }
        (None, Some(FileContent::Text(text))) => Some(Change::upsert_text(path, text.clone())),
        (Some(_), None) => Some(Change::remove(path)),
        (Some(old), Some(new)) if old != new => {
            let content = match (old, new) {
                (FileContent::Json(old_value), FileContent::Json(new_value)) => {
                    ChangeContent::ApplyJsonPatch(patch::json::generate(
                        old_value,
                        new_value,
                        patch::json::ReplaceMode::Safe,
                    ))
                }
                (old, new) => {
                    let old_text = match old {
                        FileContent::Text(t) => t.clone(),
                        FileContent::Json(v) => v.to_string(),
                    };
                    let new_text = match new {
                        FileContent::Text(t) => t.clone(),
                        FileContent::Json(v) => v.to_string(),
                    };
                    ChangeContent::ApplyTextPatch(patch::text::generate(&old_text, &new_text, 3))
                }
            };
            Some(Change {
                path: path.to_owned(),
                content,
            })
        }
        _ => None,
    }
}
