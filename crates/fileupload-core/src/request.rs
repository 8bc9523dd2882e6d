//! The request side of an upload: body stream plus the headers the parser
//! needs.

use std::io::Read;

/// Something that can hand over a multipart request body.
pub trait RequestSource {
    /// The request's `Content-Type` header, if present.
    fn content_type(&self) -> Option<&str>;

    /// The declared `Content-Length`, if known.
    fn content_length(&self) -> Option<u64> {
        None
    }

    /// The raw body stream.
    fn body(&mut self) -> &mut dyn Read;
}

/// A plain [`RequestSource`] built from header values and a reader.
#[derive(Debug)]
pub struct MultipartRequest<R> {
    content_type: String,
    content_length: Option<u64>,
    body: R,
}

impl<R: Read> MultipartRequest<R> {
    /// Create a request with the given Content-Type and body.
    #[must_use]
    pub fn new(content_type: impl Into<String>, body: R) -> Self {
        Self {
            content_type: content_type.into(),
            content_length: None,
            body,
        }
    }

    /// Set the declared Content-Length.
    #[must_use]
    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }

    /// Consume the request, returning the body reader.
    pub fn into_body(self) -> R {
        self.body
    }
}

impl<R: Read> RequestSource for MultipartRequest<R> {
    fn content_type(&self) -> Option<&str> {
        Some(self.content_type.as_str())
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn body(&mut self) -> &mut dyn Read {
        &mut self.body
    }
}
