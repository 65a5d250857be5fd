// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./file_system_test.rs"]
mod tests;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;

//
// FileSystem
//

/// File access relative to the SDK directory, so components never see absolute paths and tests
/// can swap the backing store.
#[async_trait]
pub trait FileSystem: Send + Sync {
  async fn exists(&self, path: &Path) -> anyhow::Result<bool>;

  /// Lists the names (not paths) of the regular files directly inside `directory`, sorted.
  async fn list_files(&self, directory: &Path) -> anyhow::Result<Vec<String>>;

  async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

  /// Writes the file durably: the data is synced before this returns.
  async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()>;

  /// Replaces `to` with `from`. On the same filesystem this is atomic.
  async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

  /// Deletes the file if it exists.
  async fn delete_file(&self, path: &Path) -> anyhow::Result<()>;

  /// Creates the directory and any missing parents.
  async fn create_dir(&self, path: &Path) -> anyhow::Result<()>;
}

// A missing file counts as success for deletes and as `false` for existence checks.
fn ignore_not_found<T>(result: std::io::Result<T>, missing: T) -> std::io::Result<T> {
  match result {
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(missing),
    other => other,
  }
}

//
// RealFileSystem
//

/// Delegates to `tokio::fs`, resolving every path against the SDK directory.
pub struct RealFileSystem {
  directory: PathBuf,
}

impl RealFileSystem {
  #[must_use]
  pub const fn new(directory: PathBuf) -> Self {
    Self { directory }
  }

  fn resolve(&self, path: &Path) -> PathBuf {
    self.directory.join(path)
  }
}

#[async_trait]
impl FileSystem for RealFileSystem {
  async fn exists(&self, path: &Path) -> anyhow::Result<bool> {
    let metadata = tokio::fs::metadata(self.resolve(path)).await.map(|_| true);
    Ok(ignore_not_found(metadata, false)?)
  }

  async fn list_files(&self, directory: &Path) -> anyhow::Result<Vec<String>> {
    let directory = self.resolve(directory);
    let mut entries = tokio::fs::read_dir(&directory)
      .await
      .with_context(|| format!("failed to list {}", directory.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
      if entry.file_type().await?.is_file() {
        files.push(entry.file_name().to_string_lossy().into_owned());
      }
    }
    files.sort();
    Ok(files)
  }

  async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
    let path = self.resolve(path);
    tokio::fs::read(&path)
      .await
      .with_context(|| format!("failed to read {}", path.display()))
  }

  async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let path = self.resolve(path);
    let mut file = tokio::fs::File::create(&path)
      .await
      .with_context(|| format!("failed to create {}", path.display()))?;
    file
      .write_all(data)
      .await
      .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all().await?;
    Ok(())
  }

  async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
    tokio::fs::rename(self.resolve(from), self.resolve(to))
      .await
      .with_context(|| format!("failed to rename {} to {}", from.display(), to.display()))
  }

  async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
    Ok(ignore_not_found(
      tokio::fs::remove_file(self.resolve(path)).await,
      (),
    )?)
  }

  async fn create_dir(&self, path: &Path) -> anyhow::Result<()> {
    Ok(tokio::fs::create_dir_all(self.resolve(path)).await?)
  }
}

//
// TestFileSystem
//

/// A `RealFileSystem` over a temporary directory that can simulate a full disk or a single failed
/// write.
pub struct TestFileSystem {
  directory: tempfile::TempDir,
  inner: RealFileSystem,
  pub disk_full: AtomicBool,
  fail_next_write: Mutex<Option<String>>,
}

impl TestFileSystem {
  pub fn new() -> anyhow::Result<Self> {
    let directory = tempfile::tempdir()?;
    let inner = RealFileSystem::new(directory.path().to_path_buf());
    Ok(Self {
      directory,
      inner,
      disk_full: AtomicBool::new(false),
      fail_next_write: Mutex::new(None),
    })
  }

  /// Fails the next write to a file with this name, in any directory.
  pub fn fail_next_write(&self, file_name: &str) {
    *self.fail_next_write.lock() = Some(file_name.to_string());
  }

  /// All files under the root keyed by their relative path.
  pub fn files(&self) -> anyhow::Result<HashMap<String, Vec<u8>>> {
    let root = self.directory.path();
    let mut files = HashMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(directory) = pending.pop() {
      for entry in std::fs::read_dir(&directory)? {
        let path = entry?.path();
        if path.is_dir() {
          pending.push(path);
        } else {
          let relative = path.strip_prefix(root)?.to_string_lossy().into_owned();
          files.insert(relative, std::fs::read(&path)?);
        }
      }
    }
    Ok(files)
  }
}

#[async_trait]
impl FileSystem for TestFileSystem {
  async fn exists(&self, path: &Path) -> anyhow::Result<bool> {
    self.inner.exists(path).await
  }

  async fn list_files(&self, directory: &Path) -> anyhow::Result<Vec<String>> {
    self.inner.list_files(directory).await
  }

  async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
    self.inner.read_file(path).await
  }

  async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if self.disk_full.load(Ordering::Relaxed) {
      anyhow::bail!("disk full");
    }
    {
      let mut fail_next_write = self.fail_next_write.lock();
      let file_name = path.file_name().and_then(|name| name.to_str());
      if file_name.is_some() && fail_next_write.as_deref() == file_name {
        *fail_next_write = None;
        anyhow::bail!("injected write failure: {}", path.display());
      }
    }
    self.inner.write_file(path, data).await
  }

  async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
    self.inner.rename(from, to).await
  }

  async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
    self.inner.delete_file(path).await
  }

  async fn create_dir(&self, path: &Path) -> anyhow::Result<()> {
    self.inner.create_dir(path).await
  }
}
