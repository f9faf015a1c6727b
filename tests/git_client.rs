use std::fs;
use std::path::Path;

use git2::build::RepoBuilder;
use git2::Repository;
use tempfile::TempDir;

use vault_backup::error::SetupError;
use vault_backup::git_client::GitClient;
use vault_backup::vcs::{ChangeKind, VersionControlClient};

fn configure_identity(repo: &Repository) {
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Vault Tester").unwrap();
    config.set_str("user.email", "tester@example.com").unwrap();
}

fn init_repo(dir: &Path) -> Repository {
    let repo = Repository::init(dir).unwrap();
    configure_identity(&repo);
    repo
}

fn head_message(dir: &Path) -> String {
    let repo = Repository::open(dir).unwrap();
    let commit = repo.head().unwrap().peel_to_commit().unwrap();
    commit.message().unwrap().to_string()
}

/// A working repo with one pushed commit, its bare remote, and the branch name.
async fn published_repo() -> (TempDir, TempDir, GitClient, String) {
    let remote = tempfile::tempdir().unwrap();
    Repository::init_bare(remote.path()).unwrap();

    let work = tempfile::tempdir().unwrap();
    let repo = init_repo(work.path());
    repo.remote("origin", remote.path().to_str().unwrap()).unwrap();

    fs::write(work.path().join("index.md"), "# notes\n").unwrap();
    let client = GitClient::open(work.path()).unwrap();
    client.add(".").await.unwrap();
    client.commit("initial").await.unwrap();
    let branch = client.current_branch().await.unwrap();
    client.push("origin", &branch).await.unwrap();

    (remote, work, client, branch)
}

fn clone_of(remote: &Path, branch: &str) -> (TempDir, GitClient) {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepoBuilder::new()
        .branch(branch)
        .clone(remote.to_str().unwrap(), dir.path())
        .unwrap();
    configure_identity(&repo);
    let client = GitClient::open(dir.path()).unwrap();
    (dir, client)
}

#[tokio::test]
async fn status_add_and_commit_cover_every_kind_of_change() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    fs::write(dir.path().join("a.md"), "a").unwrap();
    fs::create_dir(dir.path().join("daily")).unwrap();
    fs::write(dir.path().join("daily").join("b.md"), "b").unwrap();

    let client = GitClient::open(dir.path()).unwrap();
    let changes = client.status().await.unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.changes.iter().all(|c| c.kind == ChangeKind::Added));

    client.add(".").await.unwrap();
    client.commit("first").await.unwrap();
    assert!(client.status().await.unwrap().is_empty());

    fs::write(dir.path().join("a.md"), "changed").unwrap();
    fs::remove_file(dir.path().join("daily").join("b.md")).unwrap();
    let changes = client.status().await.unwrap();
    let mut kinds: Vec<_> = changes.changes.iter().map(|c| c.kind).collect();
    kinds.sort_by_key(|k| format!("{k:?}"));
    assert_eq!(kinds, vec![ChangeKind::Deleted, ChangeKind::Modified]);

    client.add(".").await.unwrap();
    client.commit("second").await.unwrap();
    assert!(client.status().await.unwrap().is_empty());
    assert_eq!(head_message(dir.path()), "second");
}

#[tokio::test]
async fn open_finds_repository_from_subdirectory() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    fs::create_dir(dir.path().join("nested")).unwrap();

    let client = GitClient::open(dir.path().join("nested")).unwrap();
    assert_eq!(
        client.workdir().canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[test]
fn open_rejects_bare_repository() {
    let dir = tempfile::tempdir().unwrap();
    Repository::init_bare(dir.path()).unwrap();
    let err = GitClient::open(dir.path()).unwrap_err();
    assert!(matches!(err, SetupError::BareRepository { .. }));
}

#[tokio::test]
async fn remote_url_is_absent_for_unknown_remote() {
    let (remote, _work, client, _) = published_repo().await;
    let url = client.remote_url("origin").await.unwrap();
    assert_eq!(url.as_deref(), remote.path().to_str());
    assert_eq!(client.remote_url("upstream").await.unwrap(), None);
}

#[tokio::test]
async fn pull_fast_forwards_and_counts_files() {
    let (remote, work, client, branch) = published_repo().await;
    let (other, other_client) = clone_of(remote.path(), &branch);

    fs::write(other.path().join("todo.md"), "- [ ] water plants\n").unwrap();
    fs::write(other.path().join("index.md"), "# notes\n\nupdated\n").unwrap();
    other_client.add(".").await.unwrap();
    other_client.commit("from elsewhere").await.unwrap();
    other_client.push("origin", &branch).await.unwrap();

    let summary = client.pull(Some("origin"), Some(&branch)).await.unwrap();
    assert_eq!(summary.files_updated, 2);
    assert!(work.path().join("todo.md").exists());
    assert_eq!(head_message(work.path()), "from elsewhere");
    assert!(client.status().await.unwrap().is_empty());

    let again = client.pull(None, None).await.unwrap();
    assert_eq!(again.files_updated, 0);
}

#[tokio::test]
async fn pull_merges_diverged_history() {
    let (remote, work, client, branch) = published_repo().await;
    let (other, other_client) = clone_of(remote.path(), &branch);

    fs::write(other.path().join("theirs.md"), "theirs").unwrap();
    other_client.add(".").await.unwrap();
    other_client.commit("theirs").await.unwrap();
    other_client.push("origin", &branch).await.unwrap();

    fs::write(work.path().join("ours.md"), "ours").unwrap();
    client.add(".").await.unwrap();
    client.commit("ours").await.unwrap();

    let summary = client.pull(Some("origin"), Some(&branch)).await.unwrap();
    assert_eq!(summary.files_updated, 1);
    assert!(work.path().join("theirs.md").exists());
    assert!(work.path().join("ours.md").exists());

    let repo = Repository::open(work.path()).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.parent_count(), 2);

    // the merge can now be pushed
    client.push("origin", &branch).await.unwrap();
}

#[tokio::test]
async fn pull_refuses_branch_other_than_head() {
    let (remote, work, client, branch) = published_repo().await;
    let (other, other_client) = clone_of(remote.path(), &branch);

    fs::write(other.path().join("theirs.md"), "theirs").unwrap();
    other_client.add(".").await.unwrap();
    other_client.commit("theirs").await.unwrap();
    other_client.push("origin", &branch).await.unwrap();

    let before = {
        let repo = Repository::open(work.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("drafts", &head, false).unwrap();
        head.id()
    };
    client.checkout("drafts").await.unwrap();

    assert!(client.pull(Some("origin"), Some(&branch)).await.is_err());
    assert!(!work.path().join("theirs.md").exists());
    assert_eq!(client.current_branch().await.unwrap(), "drafts");

    let repo = Repository::open(work.path()).unwrap();
    let stale = repo.find_reference(&format!("refs/heads/{branch}")).unwrap();
    assert_eq!(stale.target(), Some(before));
}

#[tokio::test]
async fn push_rejected_when_remote_is_ahead() {
    let (remote, work, client, branch) = published_repo().await;
    let (other, other_client) = clone_of(remote.path(), &branch);

    fs::write(other.path().join("theirs.md"), "theirs").unwrap();
    other_client.add(".").await.unwrap();
    other_client.commit("theirs").await.unwrap();
    other_client.push("origin", &branch).await.unwrap();

    fs::write(work.path().join("ours.md"), "ours").unwrap();
    client.add(".").await.unwrap();
    client.commit("ours").await.unwrap();

    assert!(client.push("origin", &branch).await.is_err());
}

#[tokio::test]
async fn branches_can_be_listed_and_switched() {
    let (_remote, work, client, branch) = published_repo().await;
    {
        let repo = Repository::open(work.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("drafts", &head, false).unwrap();
    }

    let branches = client.list_branches().await.unwrap();
    assert_eq!(branches.current, branch);
    assert!(branches.all.contains(&"drafts".to_string()));

    client.checkout("drafts").await.unwrap();
    assert_eq!(client.current_branch().await.unwrap(), "drafts");

    assert!(client.checkout("no-such-branch").await.is_err());
}
