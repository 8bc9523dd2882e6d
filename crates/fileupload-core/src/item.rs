//! Uploaded items.
//!
//! A [`SpooledItem`] is one part of a parsed multipart body. Its bytes live
//! either in memory or in a temporary file; which one is decided while the
//! part is written (see [`ItemFactory`](crate::ItemFactory)) and never
//! changes afterwards. Readers only ever see a size and a byte source.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Take};
use std::path::Path;

use tempfile::TempPath;

use crate::error::{Result, UploadError};

/// Backing storage of a finished item.
#[derive(Debug)]
pub(crate) enum ItemStorage {
    InMemory(Vec<u8>),
    TemporaryFile { path: TempPath, len: u64 },
    Disposed,
}

/// A single uploaded form field or file.
#[derive(Debug)]
pub struct SpooledItem {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    headers: HashMap<String, String>,
    storage: ItemStorage,
}

impl SpooledItem {
    pub(crate) fn new(
        field_name: String,
        file_name: Option<String>,
        content_type: Option<String>,
        headers: HashMap<String, String>,
        storage: ItemStorage,
    ) -> Self {
        Self {
            field_name,
            file_name,
            content_type,
            headers,
            storage,
        }
    }

    /// The form field this item came from.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The client-supplied filename, absent for plain form fields.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The part's Content-Type, if it declared one.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// A part header by (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All part headers, keyed by lower-cased name.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns true if this item is a plain form field rather than a file.
    #[must_use]
    pub fn is_form_field(&self) -> bool {
        self.file_name.is_none()
    }

    /// Size of the item in bytes. Zero once disposed.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.storage {
            ItemStorage::InMemory(data) => u64::try_from(data.len()).unwrap_or(u64::MAX),
            ItemStorage::TemporaryFile { len, .. } => *len,
            ItemStorage::Disposed => 0,
        }
    }

    /// Returns true when the item's bytes are held in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, ItemStorage::InMemory(_))
    }

    /// Returns true when the item's bytes were spooled to a temporary file.
    #[must_use]
    pub fn is_spooled(&self) -> bool {
        matches!(self.storage, ItemStorage::TemporaryFile { .. })
    }

    /// Returns true once the backing storage has been released.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self.storage, ItemStorage::Disposed)
    }

    /// Path of the temporary file backing this item, if it was spooled.
    #[must_use]
    pub fn spooled_path(&self) -> Option<&Path> {
        match &self.storage {
            ItemStorage::TemporaryFile { path, .. } => Some(&**path),
            _ => None,
        }
    }

    /// Open a reader over the item's content.
    ///
    /// Spooled items are read through a fresh file handle bounded by the
    /// recorded size; a file that turns out shorter simply ends early.
    pub fn open(&self) -> Result<ItemReader<'_>> {
        match &self.storage {
            ItemStorage::InMemory(data) => Ok(ItemReader::Memory(Cursor::new(data.as_slice()))),
            ItemStorage::TemporaryFile { path, len } => {
                let file = File::open(path).map_err(|e| UploadError::read_io(&self.field_name, e))?;
                Ok(ItemReader::File(file.take(*len)))
            }
            ItemStorage::Disposed => Err(UploadError::ReadFailure {
                field: self.field_name.clone(),
                detail: "item has been disposed".to_string(),
                source: None,
            }),
        }
    }

    /// Read the full content into a new buffer.
    ///
    /// Fails with [`UploadError::ReadFailure`] on I/O errors or when a buffer
    /// of the item's size cannot be allocated.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let mut reader = self.open()?;
        let capacity = usize::try_from(self.size()).map_err(|_| self.out_of_memory())?;

        let mut out = Vec::new();
        out.try_reserve_exact(capacity)
            .map_err(|_| self.out_of_memory())?;
        reader
            .read_to_end(&mut out)
            .map_err(|e| UploadError::read_io(&self.field_name, e))?;
        Ok(out)
    }

    /// Read the content as UTF-8 text, replacing invalid sequences.
    pub fn text(&self) -> Result<String> {
        let bytes = self.bytes()?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }

    /// Release the backing storage: delete the temporary file or free the
    /// buffer. Calling it again is a no-op.
    pub fn dispose(&mut self) -> std::io::Result<()> {
        match std::mem::replace(&mut self.storage, ItemStorage::Disposed) {
            ItemStorage::TemporaryFile { path, .. } => match path.close() {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            },
            ItemStorage::InMemory(_) | ItemStorage::Disposed => Ok(()),
        }
    }

    fn out_of_memory(&self) -> UploadError {
        UploadError::ReadFailure {
            field: self.field_name.clone(),
            detail: format!("cannot allocate {} bytes", self.size()),
            source: None,
        }
    }
}

/// Reader over a [`SpooledItem`]'s content.
#[derive(Debug)]
pub enum ItemReader<'a> {
    /// Reading from the in-memory buffer.
    Memory(Cursor<&'a [u8]>),
    /// Reading from the spool file.
    File(Take<File>),
}

impl Read for ItemReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::File(file) => file.read(buf),
        }
    }
}
