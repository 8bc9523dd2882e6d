//! Request-scoped multipart file uploads.
//!
//! Parse a multipart request once per request, look items up by field name,
//! and have every spooled temporary file removed when the request ends.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fileupload::prelude::*;
//!
//! fn handle(body: &[u8]) -> Result<String, UploadError> {
//!     let ctx = RequestContext::new(1, Arc::new(NoPreferences));
//!     let mut request = MultipartRequest::new("multipart/form-data; boundary=X", body);
//!     ctx.load_uploads(&mut request)?;
//!
//!     let uploads = ctx.uploads();
//!     let title = uploads.text("title")?.unwrap_or_default();
//!     Ok(title)
//!     // `ctx` drops here and removes any spooled files.
//! }
//! ```
//!
//! # Crate Structure
//!
//! - [`fileupload_core`]: parser, items, session, request context

#![forbid(unsafe_code)]

// Re-export crates
pub use fileupload_core as core;

// Re-export commonly used types
pub use fileupload_core::{
    ItemFactory, ItemReader, ItemWriter, MalformedUpload, MultipartRequest, NoPreferences,
    PreferenceSource, RequestContext, RequestSource, SpooledItem, UploadConfig, UploadError,
    UploadParser, UploadSession, parse_boundary,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        MultipartRequest, NoPreferences, PreferenceSource, RequestContext, RequestSource,
        SpooledItem, UploadConfig, UploadError, UploadSession,
    };
}

/// Configuration keys and defaults.
pub mod config {
    pub use fileupload_core::config::*;
}
