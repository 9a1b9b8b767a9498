//! End-to-end tests of long-poll watch semantics: liveness, soundness,
//! the registration double-check, cancellation, and shutdown.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;

use confstore::{
    model::{Author, Change, CommitMessage, EntryContent, FindOptions, Revision},
    repository::Repository,
    ConfError, ManagerOptions, RepositoryManager,
};

fn ts(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap()
}

async fn fresh() -> (tempfile::TempDir, RepositoryManager, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let manager = RepositoryManager::new("proj", dir.path(), ManagerOptions::default()).unwrap();
    let repo = manager.create("watched", ts(1_700_000_000)).await.unwrap();
    (dir, manager, repo)
}

async fn push(repo: &Repository, base: i64, changes: Vec<Change>) -> Revision {
    repo.commit(
        Revision::from(base),
        ts(1_700_000_000 + base),
        Author::new("w", "w@example.com"),
        CommitMessage::summary_only("watch test commit"),
        changes,
        false,
    )
    .await
    .unwrap()
}

/// Wait until the repository has a pending watcher, so a racing commit
/// cannot land before registration.
async fn registered(repo: &Repository) {
    for _ in 0..100 {
        if repo.pending_watchers() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("watcher never registered");
}

#[tokio::test]
async fn watch_completes_on_matching_commit() {
    let (_dir, _manager, repo) = fresh().await;

    let watcher = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.watch(Revision::from(1), "/**", Duration::from_secs(3))
                .await
        })
    };
    registered(&repo).await;

    push(
        &repo,
        1,
        vec![Change::upsert_json("/test/test3.json", json!([42]))],
    )
    .await;

    let completed = watcher.await.unwrap().unwrap();
    assert_eq!(completed, Some(Revision::from(2)));

    let entries = repo
        .find(Revision::from(2), "/test/**", FindOptions::default())
        .await
        .unwrap();
    assert_eq!(
        entries["/test/test3.json"].content,
        Some(EntryContent::Json(json!([42])))
    );
}

#[tokio::test]
async fn irrelevant_changes_do_not_complete_watchers() {
    let (_dir, _manager, repo) = fresh().await;

    let watcher = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.watch(
                Revision::from(1),
                "/test/test4.json",
                Duration::from_secs(3),
            )
            .await
        })
    };
    registered(&repo).await;

    // A commit touching a different path must leave the watcher pending.
    push(
        &repo,
        1,
        vec![Change::upsert_json("/test/test3.json", json!({ "a": 1 }))],
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!watcher.is_finished());

    // The matching path completes it with the new head.
    push(
        &repo,
        2,
        vec![Change::upsert_json("/test/test4.json", json!({ "b": 2 }))],
    )
    .await;
    let completed = watcher.await.unwrap().unwrap();
    assert_eq!(completed, Some(Revision::from(3)));
}

#[tokio::test]
async fn watch_times_out_to_none() {
    let (_dir, _manager, repo) = fresh().await;
    let result = repo
        .watch(Revision::HEAD, "/**", Duration::from_millis(150))
        .await
        .unwrap();
    assert_eq!(result, None);
    // The timed-out waiter is pruned on the next notification.
    push(&repo, 1, vec![Change::upsert_text("/unrelated/file.txt", "x")]).await;
    assert_eq!(repo.pending_watchers(), 0);
}

#[tokio::test]
async fn double_check_catches_commits_between_read_and_watch() {
    let (_dir, _manager, repo) = fresh().await;

    // The caller read at revision 1; a matching commit lands before the
    // watch call. Registration must report it instead of blocking.
    push(
        &repo,
        1,
        vec![Change::upsert_json("/conf.json", json!({ "fresh": true }))],
    )
    .await;

    let started = Instant::now();
    let result = repo
        .watch(Revision::from(1), "/**", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(result, Some(Revision::from(2)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(repo.pending_watchers(), 0);
}

#[tokio::test]
async fn watch_accepts_relative_revisions() {
    let (_dir, _manager, repo) = fresh().await;

    let watcher = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.watch(Revision::HEAD, "/**", Duration::from_secs(3)).await
        })
    };
    registered(&repo).await;

    push(&repo, 1, vec![Change::upsert_text("/a.txt", "a")]).await;
    assert_eq!(watcher.await.unwrap().unwrap(), Some(Revision::from(2)));
}

#[tokio::test]
async fn cancelled_watchers_are_pruned() {
    let (_dir, _manager, repo) = fresh().await;

    let watcher = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.watch(Revision::from(1), "/never/matches.txt", Duration::from_secs(60))
                .await
        })
    };
    registered(&repo).await;
    watcher.abort();
    let _ = watcher.await;

    // The dropped receiver is swept on the next notification pass.
    push(&repo, 1, vec![Change::upsert_text("/other.txt", "x")]).await;
    assert_eq!(repo.pending_watchers(), 0);
}

#[tokio::test]
async fn shutdown_fails_pending_watchers() {
    let (_dir, _manager, repo) = fresh().await;

    let watcher = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.watch(Revision::from(1), "/**", Duration::from_secs(60)).await
        })
    };
    registered(&repo).await;

    let started = Instant::now();
    repo.close_within(Duration::from_secs(10)).await.unwrap();
    let result = watcher.await.unwrap();
    assert!(matches!(result, Err(ConfError::ShuttingDown)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn watch_soundness_only_matching_revisions() {
    let (_dir, _manager, repo) = fresh().await;

    let watcher = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.watch(Revision::from(1), "/wanted/**", Duration::from_secs(5))
                .await
        })
    };
    registered(&repo).await;

    push(&repo, 1, vec![Change::upsert_text("/noise/1.txt", "n")]).await;
    push(&repo, 2, vec![Change::upsert_text("/noise/2.txt", "n")]).await;
    push(&repo, 3, vec![Change::upsert_text("/wanted/3.txt", "w")]).await;

    // The watcher completes with the revision whose commit touched the
    // pattern, never one of the noise revisions.
    let completed = watcher.await.unwrap().unwrap();
    assert_eq!(completed, Some(Revision::from(4)));
}
