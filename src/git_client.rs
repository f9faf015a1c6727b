use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::build::CheckoutBuilder;
use git2::{
    AnnotatedCommit, BranchType, Commit, Cred, CredentialType, ErrorCode, FetchOptions,
    IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature, Status, StatusOptions,
    Tree,
};
use tracing::debug;

use crate::error::{Operation, OperationError, SetupError};
use crate::vcs::{BranchList, ChangeKind, ChangeSet, FileChange, PullSummary, VersionControlClient};

pub const DEFAULT_REMOTE: &str = "origin";

const MAX_CREDENTIAL_ATTEMPTS: u8 = 3;

/// [`VersionControlClient`] over libgit2.
///
/// libgit2 is blocking and `Repository` is not `Sync`, so every call reopens
/// the repository on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct GitClient {
    workdir: PathBuf,
}

impl GitClient {
    /// Finds the repository containing `path`. The repository must have a
    /// working directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let repo = Repository::discover(path).map_err(|e| SetupError::RepositoryNotFound {
            path: path.to_path_buf(),
            reason: e.message().to_string(),
        })?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| SetupError::BareRepository {
                path: path.to_path_buf(),
            })?
            .to_path_buf();

        debug!(workdir = %workdir.display(), "opened repository");
        Ok(Self { workdir })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn with_repo<T, F>(&self, op: Operation, f: F) -> Result<T, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T, git2::Error> + Send + 'static,
    {
        let workdir = self.workdir.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&workdir)?;
            f(&repo)
        })
        .await
        .map_err(|e| OperationError::new(op, e))?
        .map_err(|e| OperationError::new(op, e.message()))
    }
}

#[async_trait]
impl VersionControlClient for GitClient {
    async fn status(&self) -> Result<ChangeSet, OperationError> {
        self.with_repo(Operation::Status, |repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false)
                .include_unmodified(false);

            let statuses = repo.statuses(Some(&mut opts))?;
            let changes = statuses
                .iter()
                .filter_map(|entry| {
                    let kind = change_kind(entry.status())?;
                    let path = String::from_utf8_lossy(entry.path_bytes()).into_owned();
                    Some(FileChange::new(path, kind))
                })
                .collect();
            Ok(ChangeSet::new(changes))
        })
        .await
    }

    async fn add(&self, pattern: &str) -> Result<(), OperationError> {
        let pattern = pattern.to_owned();
        self.with_repo(Operation::Add, move |repo| {
            let mut index = repo.index()?;
            index.add_all([pattern.as_str()], IndexAddOption::DEFAULT, None)?;
            // add_all skips removed files; update_all stages the deletions
            index.update_all([pattern.as_str()], None)?;
            index.write()
        })
        .await
    }

    async fn commit(&self, message: &str) -> Result<(), OperationError> {
        let message = message.to_owned();
        self.with_repo(Operation::Commit, move |repo| {
            let signature = signature(repo)?;
            let tree_id = repo.index()?.write_tree()?;
            let tree = repo.find_tree(tree_id)?;
            let parent = head_commit(repo)?;
            let parents: Vec<&Commit> = parent.iter().collect();

            let oid = repo.commit(
                Some("HEAD"),
                &signature,
                &signature,
                &message,
                &tree,
                &parents,
            )?;
            debug!(commit = %oid, "created commit");
            Ok(())
        })
        .await
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), OperationError> {
        let remote_name = remote.to_owned();
        let branch = branch.to_owned();
        self.with_repo(Operation::Push, move |repo| {
            let mut remote = repo.find_remote(&remote_name)?;
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

            let mut rejected = None;
            {
                let mut callbacks = remote_callbacks();
                callbacks.push_update_reference(|refname, status| {
                    if let Some(msg) = status {
                        rejected = Some(format!("{refname} rejected by remote: {msg}"));
                    }
                    Ok(())
                });
                let mut opts = PushOptions::new();
                opts.remote_callbacks(callbacks);
                remote.push(&[refspec.as_str()], Some(&mut opts))?;
            }

            match rejected {
                Some(msg) => Err(git2::Error::from_str(&msg)),
                None => Ok(()),
            }
        })
        .await
    }

    async fn pull(
        &self,
        remote: Option<&str>,
        branch: Option<&str>,
    ) -> Result<PullSummary, OperationError> {
        let remote_name = remote.unwrap_or(DEFAULT_REMOTE).to_owned();
        let branch = branch.map(str::to_owned);
        self.with_repo(Operation::Pull, move |repo| {
            let branch = match branch {
                Some(branch) => branch,
                None => head_branch(repo)?,
            };
            // integrating into a branch other than HEAD would check its tree
            // out over the current branch's working directory
            let checked_out = head_branch(repo)?;
            if checked_out != branch {
                return Err(git2::Error::from_str(&format!(
                    "cannot pull into '{branch}' while '{checked_out}' is checked out"
                )));
            }

            let mut remote = repo.find_remote(&remote_name)?;
            let mut opts = FetchOptions::new();
            opts.remote_callbacks(remote_callbacks());
            remote.fetch(&[branch.as_str()], Some(&mut opts), None)?;

            let fetch_head = repo.find_reference("FETCH_HEAD")?;
            let incoming = repo.reference_to_annotated_commit(&fetch_head)?;
            let files_updated = integrate(repo, &remote_name, &branch, &incoming)?;
            Ok(PullSummary { files_updated })
        })
        .await
    }

    async fn current_branch(&self) -> Result<String, OperationError> {
        self.with_repo(Operation::Branch, |repo| head_branch(repo))
            .await
    }

    async fn list_branches(&self) -> Result<BranchList, OperationError> {
        self.with_repo(Operation::Branch, |repo| {
            let current = head_branch(repo)?;
            let mut all = Vec::new();
            for item in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = item?;
                if let Some(name) = branch.name()? {
                    all.push(name.to_string());
                }
            }
            all.sort();
            Ok(BranchList { current, all })
        })
        .await
    }

    async fn checkout(&self, branch: &str) -> Result<(), OperationError> {
        let name = branch.to_owned();
        self.with_repo(Operation::Checkout, move |repo| {
            let branch = repo.find_branch(&name, BranchType::Local)?;
            let refname = branch
                .get()
                .name()
                .ok_or_else(|| git2::Error::from_str("branch name is not valid UTF-8"))?
                .to_string();
            let target = branch.get().peel_to_commit()?;

            repo.checkout_tree(target.as_object(), Some(CheckoutBuilder::new().safe()))?;
            repo.set_head(&refname)
        })
        .await
    }

    async fn remote_url(&self, remote: &str) -> Result<Option<String>, OperationError> {
        let name = remote.to_owned();
        self.with_repo(Operation::Remote, move |repo| match repo.find_remote(&name) {
            Ok(remote) => Ok(remote.url().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }
}

fn change_kind(status: Status) -> Option<ChangeKind> {
    if status.is_wt_new() || status.is_index_new() {
        Some(ChangeKind::Added)
    } else if status.is_wt_deleted() || status.is_index_deleted() {
        Some(ChangeKind::Deleted)
    } else if status.is_wt_renamed() || status.is_index_renamed() {
        Some(ChangeKind::Renamed)
    } else if status.is_wt_modified()
        || status.is_index_modified()
        || status.is_wt_typechange()
        || status.is_index_typechange()
        || status.is_conflicted()
    {
        Some(ChangeKind::Modified)
    } else {
        None
    }
}

/// The configured git identity, or a fixed one when the user has none.
fn signature(repo: &Repository) -> Result<Signature<'static>, git2::Error> {
    repo.signature()
        .or_else(|_| Signature::now("vault-backup", "vault-backup@localhost"))
}

/// `None` on an unborn branch.
fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, git2::Error> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn head_branch(repo: &Repository) -> Result<String, git2::Error> {
    match repo.head() {
        Ok(head) => head
            .shorthand()
            .map(str::to_string)
            .ok_or_else(|| git2::Error::from_str("HEAD is not valid UTF-8")),
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            head.symbolic_target()
                .and_then(|target| target.strip_prefix("refs/heads/"))
                .map(str::to_string)
                .ok_or_else(|| git2::Error::from_str("HEAD does not point at a branch"))
        }
        Err(e) => Err(e),
    }
}

fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u8;
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            return Cred::credential_helper(&config, url, username);
        }
        Cred::default()
    });
    callbacks
}

/// Moves the local branch onto the fetched commit and returns the number of
/// files that changed in the working directory.
fn integrate(
    repo: &Repository,
    remote: &str,
    branch: &str,
    incoming: &AnnotatedCommit,
) -> Result<usize, git2::Error> {
    let (analysis, _) = repo.merge_analysis(&[incoming])?;
    if analysis.is_up_to_date() {
        return Ok(0);
    }

    let refname = format!("refs/heads/{branch}");
    let theirs = repo.find_commit(incoming.id())?;
    let their_tree = theirs.tree()?;

    let ours = match head_commit(repo)? {
        Some(commit) => commit,
        None => {
            repo.checkout_tree(their_tree.as_object(), Some(CheckoutBuilder::new().safe()))?;
            repo.reference(&refname, theirs.id(), true, "pull: initial")?;
            repo.set_head(&refname)?;
            return files_between(repo, None, &their_tree);
        }
    };
    let our_tree = ours.tree()?;

    if analysis.is_fast_forward() {
        repo.checkout_tree(their_tree.as_object(), Some(CheckoutBuilder::new().safe()))?;
        repo.find_reference(&refname)?
            .set_target(theirs.id(), "pull: fast-forward")?;
        return files_between(repo, Some(&our_tree), &their_tree);
    }

    let mut index = repo.merge_commits(&ours, &theirs, None)?;
    if index.has_conflicts() {
        return Err(git2::Error::from_str(
            "local and remote changes conflict; resolve the merge manually",
        ));
    }
    let merged_id = index.write_tree_to(repo)?;
    let merged = repo.find_tree(merged_id)?;
    repo.checkout_tree(merged.as_object(), Some(CheckoutBuilder::new().safe()))?;

    let signature = signature(repo)?;
    let message = format!("Merge branch '{branch}' of {remote}");
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &message,
        &merged,
        &[&ours, &theirs],
    )?;
    files_between(repo, Some(&our_tree), &merged)
}

fn files_between(repo: &Repository, old: Option<&Tree>, new: &Tree) -> Result<usize, git2::Error> {
    let diff = repo.diff_tree_to_tree(old, Some(new), None)?;
    Ok(diff.deltas().len())
}
