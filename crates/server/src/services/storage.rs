// Snippet content storage: one git repository per snippet, fanned out as
// <git_root>/<first two id chars>/<rest of id>/

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::git::{GitError, GitRepository};
use crate::db::models::SnippetFile;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("Missing content for file '{0}'")]
    MissingContent(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Identity recorded on commits.
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Exclusive access to one snippet repository. Dropping it releases the lock
/// and forgets the snippet's entry once nobody else holds or waits on it.
pub struct RepoLock {
    guard: Option<OwnedMutexGuard<()>>,
    id: String,
    locks: LockMap,
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

#[derive(Clone)]
pub struct StorageService {
    base_path: PathBuf,
    locks: LockMap,
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn init(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.base_path).map_err(io_error(&self.base_path))
    }

    pub fn repo_path(&self, id: &str) -> PathBuf {
        let split = id.len().min(2);
        let (head, tail) = id.split_at(split);
        self.base_path.join(head).join(tail)
    }

    /// Serialise writers of one snippet repository. The guard must be held for
    /// the whole working-tree + index + commit sequence.
    pub async fn lock(&self, id: &str) -> RepoLock {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        RepoLock {
            guard: Some(lock.lock_owned().await),
            id: id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn write_file(root: &Path, file: &SnippetFile) -> Result<(), StorageError> {
        let path = root.join(&file.filename);
        std::fs::write(&path, &file.contents).map_err(io_error(&path))
    }

    /// Materialise `files` into a new repository and record the initial
    /// commit. A failure removes whatever was created on disk.
    pub fn create_repo(
        &self,
        id: &str,
        author: &Author,
        files: &[SnippetFile],
    ) -> Result<(), StorageError> {
        let root = self.repo_path(id);
        let result = self.populate_repo(&root, author, files);
        if result.is_err() {
            self.remove_dir(&root);
        }
        result
    }

    fn populate_repo(
        &self,
        root: &Path,
        author: &Author,
        files: &[SnippetFile],
    ) -> Result<(), StorageError> {
        std::fs::create_dir_all(root).map_err(io_error(root))?;
        let repo = GitRepository::init(root)?;
        let mut index = repo.index()?;

        for file in files {
            Self::write_file(root, file)?;
            index.add(&file.filename)?;
        }

        repo.commit(&author.name, &author.email, "")?;
        Ok(())
    }

    /// Remove every old file from the working tree and index, add every new
    /// file and commit once.
    pub fn replace_files(
        &self,
        id: &str,
        author: &Author,
        old_files: &[String],
        new_files: &[SnippetFile],
    ) -> Result<(), StorageError> {
        let root = self.repo_path(id);
        let repo = GitRepository::open(&root)?;
        let mut index = repo.index()?;

        for filename in old_files {
            let path = root.join(filename);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path)(e)),
            }
            index.remove(filename)?;
        }

        for file in new_files {
            Self::write_file(&root, file)?;
            index.add(&file.filename)?;
        }

        repo.commit(&author.name, &author.email, "")?;
        Ok(())
    }

    /// Undo an interrupted `replace_files`: reset index and tracked files to
    /// the last commit and delete the `introduced` files it may have written.
    pub fn restore_head(&self, id: &str, introduced: &[String]) -> Result<(), StorageError> {
        let root = self.repo_path(id);
        let repo = GitRepository::open(&root)?;
        repo.reset_to_head()?;

        for filename in introduced {
            let path = root.join(filename);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path)(e)),
            }
        }
        Ok(())
    }

    /// Fill in `contents` of each file from the working tree. A file missing on
    /// disk is an error, never an empty file.
    pub fn read_files(
        &self,
        id: &str,
        mut files: Vec<SnippetFile>,
    ) -> Result<Vec<SnippetFile>, StorageError> {
        let root = self.repo_path(id);
        for file in &mut files {
            let path = root.join(&file.filename);
            file.contents = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => StorageError::MissingContent(file.filename.clone()),
                _ => io_error(&path)(e),
            })?;
        }
        Ok(files)
    }

    pub fn revisions(&self, id: &str) -> Result<Vec<String>, StorageError> {
        let repo = GitRepository::open(&self.repo_path(id))?;
        Ok(repo.revisions()?)
    }

    pub fn delete_repo(&self, id: &str) -> Result<(), StorageError> {
        let root = self.repo_path(id);
        match std::fs::remove_dir_all(&root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&root)(e)),
        }
    }

    fn remove_dir(&self, root: &Path) {
        if let Err(e) = std::fs::remove_dir_all(root) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {e}", root.display());
            }
        }
    }
}
