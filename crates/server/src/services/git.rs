//! Minimal version-control plumbing over libgit2: open or initialise a
//! repository, stage and unstage working-tree files, snapshot the index into a
//! tree and commit it on top of `HEAD`.
//!
//! Every call is blocking; callers run them on the blocking thread pool.

use std::path::Path;

use git2::{ErrorClass, ErrorCode, Oid, Repository, ResetType, Signature, Sort};
use thiserror::Error;

/// A libgit2 failure: its last error message plus the classification it
/// reported. Never retried at this layer.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GitError {
    pub message: String,
    pub class: ErrorClass,
    pub code: ErrorCode,
}

impl From<git2::Error> for GitError {
    fn from(e: git2::Error) -> Self {
        Self {
            message: e.message().to_string(),
            class: e.class(),
            code: e.code(),
        }
    }
}

pub type GitResult<T> = Result<T, GitError>;

pub struct GitRepository {
    repo: Repository,
}

impl GitRepository {
    /// Create a new repository with a working tree rooted at `path`.
    pub fn init(path: &Path) -> GitResult<Self> {
        let repo = Repository::init(path)?;
        Ok(Self { repo })
    }

    /// Open the repository rooted at `path`; fails when there is none.
    pub fn open(path: &Path) -> GitResult<Self> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    pub fn index(&self) -> GitResult<GitIndex> {
        Ok(GitIndex {
            index: self.repo.index()?,
        })
    }

    /// The commit `HEAD` points at, or `None` on an unborn branch.
    fn head_commit(&self) -> GitResult<Option<git2::Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commit the current index on the primary branch. The previous `HEAD`
    /// commit, if any, becomes the single parent; history stays linear.
    pub fn commit(&self, author_name: &str, author_email: &str, message: &str) -> GitResult<Oid> {
        let tree_id = self.index()?.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = Signature::now(author_name, author_email)?;

        let parent = self.head_commit()?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;
        Ok(oid)
    }

    /// Commit ids reachable from `HEAD`, newest first.
    pub fn revisions(&self) -> GitResult<Vec<String>> {
        if self.head_commit()?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = self.repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push_head()?;

        let mut revisions = Vec::new();
        for oid in walk {
            revisions.push(oid?.to_string());
        }
        Ok(revisions)
    }

    /// Throw away staged and working-tree changes to tracked files, returning
    /// both to the last commit. No-op on an unborn branch.
    pub fn reset_to_head(&self) -> GitResult<()> {
        if let Some(head) = self.head_commit()? {
            self.repo.reset(head.as_object(), ResetType::Hard, None)?;
        }
        Ok(())
    }
}

pub struct GitIndex {
    index: git2::Index,
}

impl GitIndex {
    /// Stage a working-tree file, persisting the index immediately.
    pub fn add(&mut self, filename: &str) -> GitResult<()> {
        self.index.add_path(Path::new(filename))?;
        self.index.write()?;
        Ok(())
    }

    /// Unstage a file, persisting the index immediately.
    pub fn remove(&mut self, filename: &str) -> GitResult<()> {
        self.index.remove_path(Path::new(filename))?;
        self.index.write()?;
        Ok(())
    }

    /// Snapshot the index into a tree object.
    pub fn write_tree(&mut self) -> GitResult<Oid> {
        Ok(self.index.write_tree()?)
    }
}
