//! Request-scoped upload state.
//!
//! [`RequestContext`] is created by the server for each request and handed
//! down the handler chain. It owns that request's [`UploadSession`] and runs
//! end-of-request hooks, so spooled files are released whether the handler
//! returned normally, returned an error, or unwound.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::{PreferenceSource, UploadConfig};
use crate::error::Result;
use crate::request::RequestSource;
use crate::session::UploadSession;

type CleanupFn = Box<dyn FnOnce() + Send>;

/// Per-request owner of upload state.
pub struct RequestContext {
    /// Unique request identifier for tracing.
    request_id: u64,
    /// Where upload limits are read from.
    preferences: Arc<dyn PreferenceSource + Send + Sync>,
    uploads: Mutex<UploadSession>,
    /// Hooks run at end of request, LIFO.
    cleanup_stack: Mutex<Vec<CleanupFn>>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("uploads", &self.uploads.lock().len())
            .field("cleanup_hooks", &self.cleanup_stack.lock().len())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Creates a context for one request.
    #[must_use]
    pub fn new(request_id: u64, preferences: Arc<dyn PreferenceSource + Send + Sync>) -> Self {
        Self {
            request_id,
            preferences,
            uploads: Mutex::new(UploadSession::new()),
            cleanup_stack: Mutex::new(Vec::new()),
        }
    }

    /// Returns the unique request identifier.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// The upload limits this request's preferences resolve to.
    #[must_use]
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig::from_preferences(&*self.preferences)
    }

    /// Parse the request's multipart body into this request's session,
    /// with limits taken from the preferences.
    pub fn load_uploads(&self, request: &mut (impl RequestSource + ?Sized)) -> Result<()> {
        let config = self.upload_config();
        self.uploads.lock().load_with_config(request, &config)
    }

    /// Parse the request's multipart body with explicit limits.
    pub fn load_uploads_with(
        &self,
        request: &mut (impl RequestSource + ?Sized),
        max_total_size: u64,
        memory_threshold: u64,
        spool_dir: Option<&Path>,
    ) -> Result<()> {
        self.uploads
            .lock()
            .load_with(request, max_total_size, memory_threshold, spool_dir)
    }

    /// Access this request's uploaded items.
    pub fn uploads(&self) -> MutexGuard<'_, UploadSession> {
        self.uploads.lock()
    }

    /// Register a function to run when the request ends.
    ///
    /// Hooks run in reverse registration order, before uploads are cleaned up.
    pub fn register_cleanup(&self, hook: impl FnOnce() + Send + 'static) {
        self.cleanup_stack.lock().push(Box::new(hook));
    }

    /// End-of-request hook: run registered cleanups, then dispose every
    /// uploaded item. Safe to call more than once.
    pub fn finish(&self) {
        let hooks = std::mem::take(&mut *self.cleanup_stack.lock());
        for hook in hooks.into_iter().rev() {
            hook();
        }

        let mut uploads = self.uploads.lock();
        if !uploads.is_empty() {
            debug!(request_id = self.request_id, items = uploads.len(), "cleaning up uploads");
        }
        uploads.cleanup();
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.finish();
    }
}
