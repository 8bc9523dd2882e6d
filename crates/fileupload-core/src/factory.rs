//! Item construction and the memory/disk storage decision.
//!
//! [`ItemFactory`] hands out an [`ItemWriter`] per part. The writer buffers
//! in memory until the part grows past the threshold, then moves what it has
//! into a temporary file and keeps appending there.

use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, UploadError};
use crate::item::{ItemStorage, SpooledItem};

const SPOOL_FILE_PREFIX: &str = "upload_";
const SPOOL_FILE_SUFFIX: &str = ".tmp";

/// Where spooled items go and when items start spooling.
#[derive(Debug)]
struct SpoolPolicy {
    threshold: u64,
    /// Configured directory, if it exists (or could be created) and is writable.
    primary: Option<PathBuf>,
    /// Platform temp directory.
    fallback: PathBuf,
}

impl SpoolPolicy {
    fn create_spool_file(&self) -> Result<NamedTempFile> {
        let mut tried = Vec::with_capacity(2);
        let mut last_err = None;

        for dir in self.primary.iter().chain(std::iter::once(&self.fallback)) {
            match tempfile::Builder::new()
                .prefix(SPOOL_FILE_PREFIX)
                .suffix(SPOOL_FILE_SUFFIX)
                .tempfile_in(dir)
            {
                Ok(file) => {
                    debug!(path = %file.path().display(), "created spool file");
                    return Ok(file);
                }
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "cannot create spool file");
                    tried.push(dir.clone());
                    last_err = Some(err);
                }
            }
        }

        Err(UploadError::StorageUnavailable {
            tried,
            source: last_err
                .unwrap_or_else(|| std::io::Error::other("no spool directory configured")),
        })
    }
}

/// Builds [`SpooledItem`]s with a fixed memory threshold and spool directory.
#[derive(Debug, Clone)]
pub struct ItemFactory {
    policy: Arc<SpoolPolicy>,
}

impl ItemFactory {
    /// Create a factory.
    ///
    /// `spool_dir` is created if missing. When it is absent, cannot be
    /// created, or is not writable, spooled items go to the platform temp
    /// directory instead.
    #[must_use]
    pub fn new(threshold: u64, spool_dir: Option<&Path>) -> Self {
        Self::with_fallback_dir(threshold, spool_dir, std::env::temp_dir())
    }

    /// Like [`ItemFactory::new`], with an explicit fallback directory in
    /// place of the platform temp directory.
    #[must_use]
    pub fn with_fallback_dir(
        threshold: u64,
        spool_dir: Option<&Path>,
        fallback: impl Into<PathBuf>,
    ) -> Self {
        let primary = spool_dir.and_then(usable_spool_dir);
        Self {
            policy: Arc::new(SpoolPolicy {
                threshold,
                primary,
                fallback: fallback.into(),
            }),
        }
    }

    /// The memory threshold in bytes.
    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.policy.threshold
    }

    /// The directory spool files are created in first.
    #[must_use]
    pub fn spool_dir(&self) -> &Path {
        self.policy
            .primary
            .as_deref()
            .unwrap_or(&self.policy.fallback)
    }

    /// Start a new item. Bytes are fed through the returned writer.
    #[must_use]
    pub fn create(
        &self,
        field_name: impl Into<String>,
        file_name: Option<String>,
        content_type: Option<String>,
    ) -> ItemWriter {
        ItemWriter {
            field_name: field_name.into(),
            file_name,
            content_type,
            headers: HashMap::new(),
            policy: Arc::clone(&self.policy),
            size: 0,
            storage: WriterStorage::InMemory(Vec::new()),
        }
    }
}

fn usable_spool_dir(dir: &Path) -> Option<PathBuf> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        debug!(dir = %dir.display(), error = %err, "spool directory unavailable, using temp dir");
        return None;
    }
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => Some(dir.to_path_buf()),
        Ok(_) => {
            debug!(dir = %dir.display(), "spool directory not writable, using temp dir");
            None
        }
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "spool directory unavailable, using temp dir");
            None
        }
    }
}

#[derive(Debug)]
enum WriterStorage {
    InMemory(Vec<u8>),
    Spooling(BufWriter<NamedTempFile>),
}

/// An item being written. Finish it to get the immutable [`SpooledItem`].
///
/// Dropping an unfinished writer deletes any spool file it created.
#[derive(Debug)]
pub struct ItemWriter {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    headers: HashMap<String, String>,
    policy: Arc<SpoolPolicy>,
    size: u64,
    storage: WriterStorage,
}

impl ItemWriter {
    /// Attach the part's headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// The form field being written.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Bytes written so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true once the item has moved to a spool file.
    #[must_use]
    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, WriterStorage::Spooling(_))
    }

    /// Append a chunk, spooling to disk once the threshold is crossed.
    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let next_size = self
            .size
            .saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));

        match &mut self.storage {
            WriterStorage::InMemory(data) => {
                if next_size > self.policy.threshold {
                    let file = self.policy.create_spool_file()?;
                    let path = file.path().to_path_buf();
                    let mut writer = BufWriter::new(file);
                    writer
                        .write_all(data)
                        .and_then(|()| writer.write_all(chunk))
                        .map_err(|e| write_failed(&path, e))?;
                    debug!(
                        field = %self.field_name,
                        size = next_size,
                        threshold = self.policy.threshold,
                        "spooling item to disk"
                    );
                    self.storage = WriterStorage::Spooling(writer);
                } else {
                    data.extend_from_slice(chunk);
                }
            }
            WriterStorage::Spooling(writer) => {
                writer.write_all(chunk).map_err(|e| {
                    let path = writer.get_ref().path().to_path_buf();
                    write_failed(&path, e)
                })?;
            }
        }

        self.size = next_size;
        Ok(())
    }

    /// Complete the item. The spool file, if any, is flushed and closed.
    pub fn finish(self) -> Result<SpooledItem> {
        let storage = match self.storage {
            WriterStorage::InMemory(data) => ItemStorage::InMemory(data),
            WriterStorage::Spooling(writer) => {
                let file = writer.into_inner().map_err(|e| {
                    let (err, writer) = e.into_parts();
                    write_failed(writer.get_ref().path(), err)
                })?;
                ItemStorage::TemporaryFile {
                    path: file.into_temp_path(),
                    len: self.size,
                }
            }
        };

        Ok(SpooledItem::new(
            self.field_name,
            self.file_name,
            self.content_type,
            self.headers,
            storage,
        ))
    }
}

fn write_failed(path: &Path, source: std::io::Error) -> UploadError {
    UploadError::StorageUnavailable {
        tried: vec![path.parent().unwrap_or(path).to_path_buf()],
        source,
    }
}
