//! Per-request registry of uploaded items.
//!
//! An [`UploadSession`] owns the items parsed from one request and releases
//! their storage exactly once: on [`UploadSession::cleanup`], before a
//! re-load, or when the session is dropped.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::{PreferenceSource, UploadConfig};
use crate::error::{MalformedUpload, Result, UploadError};
use crate::factory::ItemFactory;
use crate::item::SpooledItem;
use crate::parser::{UploadParser, parse_boundary};
use crate::request::RequestSource;

/// Uploaded items of one request, in the order they appeared in the body.
#[derive(Debug, Default)]
pub struct UploadSession {
    items: Vec<SpooledItem>,
}

impl UploadSession {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `request` using limits read from `prefs`.
    ///
    /// Missing or unparsable preferences fall back to the defaults in
    /// [`crate::config`].
    pub fn load(
        &mut self,
        request: &mut (impl RequestSource + ?Sized),
        prefs: &(impl PreferenceSource + ?Sized),
    ) -> Result<()> {
        self.load_with_config(request, &UploadConfig::from_preferences(prefs))
    }

    /// Parse `request` with explicit limits.
    pub fn load_with(
        &mut self,
        request: &mut (impl RequestSource + ?Sized),
        max_total_size: u64,
        memory_threshold: u64,
        spool_dir: Option<&Path>,
    ) -> Result<()> {
        let mut config = UploadConfig::new()
            .max_total_size(max_total_size)
            .memory_threshold(memory_threshold);
        if let Some(dir) = spool_dir {
            config = config.spool_directory(dir);
        }
        self.load_with_config(request, &config)
    }

    /// Parse `request` with `config`, replacing any items already held.
    ///
    /// Previous items are disposed before parsing starts. On error the
    /// session is left empty.
    pub fn load_with_config(
        &mut self,
        request: &mut (impl RequestSource + ?Sized),
        config: &UploadConfig,
    ) -> Result<()> {
        self.cleanup();

        let content_type = request
            .content_type()
            .ok_or(MalformedUpload::MissingContentType)?;
        let boundary = parse_boundary(content_type)?;

        let max = config.get_max_total_size();
        if let Some(declared) = request.content_length().filter(|&len| len > max) {
            return Err(UploadError::SizeLimitExceeded {
                size: declared,
                max,
            });
        }

        let factory = ItemFactory::with_fallback_dir(
            config.get_memory_threshold(),
            config.get_spool_directory(),
            config.get_fallback_directory(),
        );
        let parser = UploadParser::new(&boundary, max);
        let items = parser.parse(request.body(), &factory)?;

        debug!(
            items = items.len(),
            spooled = items.iter().filter(|item| item.is_spooled()).count(),
            "loaded upload items"
        );
        self.items = items;
        Ok(())
    }

    /// All items, in parse order.
    #[must_use]
    pub fn items(&self) -> &[SpooledItem] {
        &self.items
    }

    /// Field name of every item, duplicates included, in parse order.
    #[must_use]
    pub fn item_names(&self) -> Vec<&str> {
        self.items.iter().map(SpooledItem::field_name).collect()
    }

    /// First item with the given field name.
    #[must_use]
    pub fn find(&self, field_name: &str) -> Option<&SpooledItem> {
        self.items
            .iter()
            .find(|item| item.field_name() == field_name)
    }

    /// Client filename of the first item with the given field name.
    #[must_use]
    pub fn file_name(&self, field_name: &str) -> Option<&str> {
        self.find(field_name).and_then(SpooledItem::file_name)
    }

    /// Full content of the first item with the given field name.
    pub fn bytes(&self, field_name: &str) -> Result<Option<Vec<u8>>> {
        self.find(field_name).map(SpooledItem::bytes).transpose()
    }

    /// Content of the first item with the given field name, as text.
    pub fn text(&self, field_name: &str) -> Result<Option<String>> {
        self.find(field_name).map(SpooledItem::text).transpose()
    }

    /// Number of items held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no items are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Dispose every item and clear the registry.
    ///
    /// A failure to dispose one item is logged and the rest are still
    /// disposed. Calling this on an empty session does nothing.
    pub fn cleanup(&mut self) {
        for mut item in self.items.drain(..) {
            if let Err(err) = item.dispose() {
                warn!(
                    field = item.field_name(),
                    error = %err,
                    "failed to clean up uploaded item"
                );
            }
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
