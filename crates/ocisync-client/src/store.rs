//! Content-addressed blob store on the local filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::digest::{Digest, Hasher};
use crate::{Error, Result};

/// Blobs keyed by digest.
///
/// Structure:
/// ```text
/// <root>/
/// ├── blobs/
/// │   └── sha256/
/// │       └── abc123...   # committed content, hashes to its name
/// └── staging/
///     └── <uuid>          # in-flight writes, never read back
/// ```
///
/// Writes land in `staging/` and are renamed into `blobs/` only after their
/// digest has been verified, so a blob path either does not exist or holds
/// complete, correct content.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Staging files left by an interrupted run are removed, so a store
    /// root must not be opened by two processes at once. Clones of the
    /// returned handle share it safely.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        for dir in [store.blobs_dir(), store.staging_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::storage(&dir, e))?;
        }
        store.clear_staging().await?;
        Ok(store)
    }

    async fn clear_staging(&self) -> Result<()> {
        let dir = self.staging_dir();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| Error::storage(&dir, e))?;
        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(&dir, e))?
        {
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::storage(path, e)),
            }
        }
        if removed > 0 {
            debug!(removed, "cleared stale staging files");
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Final location of a blob.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir()
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    pub async fn exists(&self, digest: &Digest) -> Result<bool> {
        let path = self.blob_path(digest);
        fs::try_exists(&path)
            .await
            .map_err(|e| Error::storage(path, e))
    }

    pub async fn read(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{digest} in local store")))
            }
            Err(e) => Err(Error::storage(path, e)),
        }
    }

    /// Start a staged write for `digest`.
    pub async fn begin_write(&self, digest: &Digest, expected_size: u64) -> Result<BlobWriter> {
        let staging_path = self
            .staging_dir()
            .join(uuid::Uuid::new_v4().simple().to_string());
        let file = File::create(&staging_path)
            .await
            .map_err(|e| Error::storage(&staging_path, e))?;
        trace!(%digest, path = %staging_path.display(), "staging blob");

        Ok(BlobWriter {
            digest: digest.clone(),
            expected_size,
            final_path: self.blob_path(digest),
            staging_path,
            file: Some(file),
            hasher: Some(Hasher::new(digest.algorithm())),
            written: 0,
            finished: false,
        })
    }

    /// Stage, verify and commit `bytes` in one go.
    pub async fn put(&self, digest: &Digest, bytes: &[u8]) -> Result<()> {
        let mut writer = self.begin_write(digest, bytes.len() as u64).await?;
        writer.write(bytes).await?;
        writer.commit().await
    }
}

/// Scoped write into the staging area.
///
/// Dropping a writer without committing discards the staged data.
pub struct BlobWriter {
    digest: Digest,
    expected_size: u64,
    staging_path: PathBuf,
    final_path: PathBuf,
    file: Option<File>,
    hasher: Option<Hasher>,
    written: u64,
    finished: bool,
}

impl BlobWriter {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::storage(&self.staging_path, ErrorKind::BrokenPipe.into()))?;
        if self.written + chunk.len() as u64 > self.expected_size {
            return Err(Error::digest_mismatch(
                self.digest.to_string(),
                format!("more than {} bytes", self.expected_size),
            ));
        }
        file.write_all(chunk)
            .await
            .map_err(|e| Error::storage(&self.staging_path, e))?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Verify the staged content and move it into its final slot.
    ///
    /// On mismatch the staged data is discarded and
    /// [`Error::DigestMismatch`] is returned.
    pub async fn commit(mut self) -> Result<()> {
        let result = self.try_commit().await;
        if result.is_err()
            && let Err(e) = self.abort().await
        {
            warn!(digest = %self.digest, error = %e, "failed to discard staged blob");
        }
        result
    }

    async fn try_commit(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::storage(&self.staging_path, ErrorKind::BrokenPipe.into()))?;
        file.flush()
            .await
            .map_err(|e| Error::storage(&self.staging_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage(&self.staging_path, e))?;
        drop(file);

        if self.written != self.expected_size {
            return Err(Error::digest_mismatch(
                self.digest.to_string(),
                format!("{} bytes (expected {})", self.written, self.expected_size),
            ));
        }
        let actual = self
            .hasher
            .take()
            .map(Hasher::finish)
            .ok_or_else(|| Error::storage(&self.staging_path, ErrorKind::BrokenPipe.into()))?;
        if actual != self.digest {
            return Err(Error::digest_mismatch(
                self.digest.to_string(),
                actual.to_string(),
            ));
        }

        if let Some(parent) = self.final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(parent, e))?;
        }
        // Renaming over an existing entry is fine: same digest, same bytes.
        fs::rename(&self.staging_path, &self.final_path)
            .await
            .map_err(|e| Error::storage(&self.final_path, e))?;
        self.finished = true;

        debug!(digest = %self.digest, size = self.written, "committed blob");
        Ok(())
    }

    /// Discard the staged data. Safe to call more than once.
    pub async fn abort(&mut self) -> Result<()> {
        self.file = None;
        self.hasher = None;
        if self.finished {
            return Ok(());
        }
        match fs::remove_file(&self.staging_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(&self.staging_path, e)),
        }
        self.finished = true;
        trace!(digest = %self.digest, "aborted staged blob");
        Ok(())
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.file = None;
        if let Err(e) = std::fs::remove_file(&self.staging_path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.staging_path.display(), error = %e, "failed to remove staged blob");
        }
    }
}
