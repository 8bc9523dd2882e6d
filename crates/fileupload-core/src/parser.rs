//! Streaming multipart parser.
//!
//! Reads a `multipart/*` body from any [`Read`], splits it on the boundary
//! and feeds each part through an [`ItemWriter`] so large parts never sit
//! in memory. The whole body is counted against an aggregate ceiling.

use std::collections::HashMap;
use std::io::Read;

use memchr::memmem;
use tracing::{trace, warn};

use crate::error::{MalformedUpload, Result, UploadError};
use crate::factory::{ItemFactory, ItemWriter};
use crate::item::SpooledItem;

/// Default number of bytes requested from the body per read.
pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// Largest header block accepted for a single part.
pub const MAX_HEADER_BLOCK: usize = 10 * 1024;

/// RFC 2046 recommends multipart boundary length <= 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// Parse boundary from Content-Type header.
///
/// Content-Type format: `multipart/form-data; boundary=----WebKitFormBoundary...`
/// Any `multipart/*` subtype is accepted.
pub fn parse_boundary(content_type: &str) -> Result<String, MalformedUpload> {
    let content_type = content_type.trim();
    let main = content_type.split(';').next().unwrap_or("").trim();
    let is_multipart = main
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart/"));
    if !is_multipart {
        return Err(MalformedUpload::NotMultipart {
            content_type: content_type.to_string(),
        });
    }

    for part in content_type.split(';').skip(1) {
        let part = part.trim();
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        if k.trim().eq_ignore_ascii_case("boundary") {
            let boundary = v.trim();
            let boundary = boundary.trim_matches('"').trim_matches('\'');
            if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
                return Err(MalformedUpload::InvalidBoundary);
            }
            return Ok(boundary.to_string());
        }
    }

    Err(MalformedUpload::MissingBoundary)
}

/// Multipart parser (boundary-based, streaming).
#[derive(Debug)]
pub struct UploadParser {
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    max_total_size: u64,
    read_chunk: usize,
}

enum State {
    Preamble,
    Headers,
    Body(ItemWriter),
    Done,
}

enum Step {
    Continue,
    NeedMore,
    Done,
}

impl UploadParser {
    /// Create a parser for `boundary` that rejects bodies larger than
    /// `max_total_size` bytes.
    #[must_use]
    pub fn new(boundary: &str, max_total_size: u64) -> Self {
        Self {
            delimiter: format!("\r\n--{boundary}").into_bytes(),
            max_total_size,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }

    /// Set how many bytes are requested from the body per read.
    #[must_use]
    pub fn read_chunk(mut self, size: usize) -> Self {
        self.read_chunk = size.max(1);
        self
    }

    /// The aggregate ceiling in bytes.
    #[must_use]
    pub fn max_total_size(&self) -> u64 {
        self.max_total_size
    }

    /// Parse every part of `body`, in order.
    ///
    /// On any error the items produced so far are disposed before the error
    /// is returned.
    pub fn parse<R: Read>(&self, body: R, factory: &ItemFactory) -> Result<Vec<SpooledItem>> {
        let mut items = Vec::new();
        match self.parse_into(body, factory, &mut items) {
            Ok(()) => Ok(items),
            Err(err) => {
                dispose_all(&mut items);
                Err(err)
            }
        }
    }

    fn parse_into<R: Read>(
        &self,
        mut body: R,
        factory: &ItemFactory,
        items: &mut Vec<SpooledItem>,
    ) -> Result<()> {
        let finder = memmem::Finder::new(&self.delimiter);
        // A leading CRLF lets the opening boundary match like any other delimiter.
        let mut buffer = Vec::with_capacity(self.read_chunk + self.delimiter.len() + 2);
        buffer.extend_from_slice(b"\r\n");

        let mut state = State::Preamble;
        let mut total: u64 = 0;
        let mut eof = false;

        loop {
            let (next, step) = self.step(state, &mut buffer, eof, &finder, factory, items)?;
            state = next;
            match step {
                Step::Continue => {}
                Step::Done => return Ok(()),
                Step::NeedMore => {
                    if eof {
                        return Err(MalformedUpload::UnexpectedEof.into());
                    }
                    let read = fill_buffer(&mut body, &mut buffer, self.read_chunk)?;
                    if read == 0 {
                        eof = true;
                        continue;
                    }
                    total = total.saturating_add(u64::try_from(read).unwrap_or(u64::MAX));
                    if total > self.max_total_size {
                        return Err(UploadError::SizeLimitExceeded {
                            size: total,
                            max: self.max_total_size,
                        });
                    }
                }
            }
        }
    }

    fn step(
        &self,
        state: State,
        buffer: &mut Vec<u8>,
        eof: bool,
        finder: &memmem::Finder<'_>,
        factory: &ItemFactory,
        items: &mut Vec<SpooledItem>,
    ) -> Result<(State, Step)> {
        let delimiter_len = self.delimiter.len();

        match state {
            State::Done => Ok((State::Done, Step::Done)),

            State::Preamble => match self.find_delimiter(buffer, finder) {
                Delimiter::Found { at, last } => {
                    buffer.drain(..at + delimiter_len + 2);
                    if last {
                        Ok((State::Done, Step::Done))
                    } else {
                        Ok((State::Headers, Step::Continue))
                    }
                }
                Delimiter::Partial { at } => {
                    buffer.drain(..at);
                    Ok((State::Preamble, Step::NeedMore))
                }
                Delimiter::NotFound { safe } => {
                    if eof {
                        return Err(MalformedUpload::InvalidFormat {
                            detail: "opening boundary not found",
                        }
                        .into());
                    }
                    buffer.drain(..safe);
                    Ok((State::Preamble, Step::NeedMore))
                }
            },

            State::Headers => {
                let header_end = if buffer.starts_with(b"\r\n") {
                    Some(2)
                } else {
                    memmem::find(buffer, b"\r\n\r\n").map(|i| i + 4)
                };
                let Some(header_end) = header_end else {
                    if buffer.len() > MAX_HEADER_BLOCK {
                        return Err(MalformedUpload::HeadersTooLarge {
                            max: MAX_HEADER_BLOCK,
                        }
                        .into());
                    }
                    return Ok((State::Headers, Step::NeedMore));
                };
                if header_end > MAX_HEADER_BLOCK {
                    return Err(MalformedUpload::HeadersTooLarge {
                        max: MAX_HEADER_BLOCK,
                    }
                    .into());
                }

                let headers = parse_part_headers(&buffer[..header_end])?;
                let content_disp = headers
                    .get("content-disposition")
                    .ok_or(MalformedUpload::MissingContentDisposition)?;
                let (name, filename) = parse_content_disposition(content_disp)?;
                let content_type = headers.get("content-type").cloned();
                buffer.drain(..header_end);

                let writer = factory
                    .create(name, filename, content_type)
                    .with_headers(headers);
                Ok((State::Body(writer), Step::Continue))
            }

            State::Body(mut writer) => match self.find_delimiter(buffer, finder) {
                Delimiter::Found { at, last } => {
                    writer.write(&buffer[..at])?;
                    let item = writer.finish()?;
                    trace!(
                        field = item.field_name(),
                        size = item.size(),
                        spooled = item.is_spooled(),
                        "parsed upload part"
                    );
                    items.push(item);
                    buffer.drain(..at + delimiter_len + 2);
                    if last {
                        Ok((State::Done, Step::Done))
                    } else {
                        Ok((State::Headers, Step::Continue))
                    }
                }
                Delimiter::Partial { at } => {
                    writer.write(&buffer[..at])?;
                    buffer.drain(..at);
                    Ok((State::Body(writer), Step::NeedMore))
                }
                Delimiter::NotFound { safe } => {
                    writer.write(&buffer[..safe])?;
                    buffer.drain(..safe);
                    Ok((State::Body(writer), Step::NeedMore))
                }
            },
        }
    }

    /// Locate the next real delimiter: `\r\n--boundary` followed by `\r\n`
    /// (another part) or `--` (close delimiter).
    fn find_delimiter(&self, buffer: &[u8], finder: &memmem::Finder<'_>) -> Delimiter {
        let delimiter_len = self.delimiter.len();
        let mut from = 0;

        while let Some(offset) = finder.find(&buffer[from..]) {
            let at = from + offset;
            let after = at + delimiter_len;
            if after + 2 > buffer.len() {
                return Delimiter::Partial { at };
            }
            match &buffer[after..after + 2] {
                b"\r\n" => return Delimiter::Found { at, last: false },
                b"--" => return Delimiter::Found { at, last: true },
                // Boundary-like text inside part data.
                _ => from = at + 1,
            }
        }

        // Anything that could still be the start of a split delimiter stays buffered.
        let safe = buffer
            .len()
            .saturating_sub(delimiter_len - 1)
            .max(from.min(buffer.len()));
        Delimiter::NotFound { safe }
    }
}

enum Delimiter {
    /// A complete delimiter starts at `at`.
    Found { at: usize, last: bool },
    /// A delimiter starts at `at` but its suffix has not arrived yet.
    Partial { at: usize },
    /// No delimiter; `..safe` cannot be part of one.
    NotFound { safe: usize },
}

fn fill_buffer<R: Read>(body: &mut R, buffer: &mut Vec<u8>, chunk: usize) -> Result<usize> {
    let start = buffer.len();
    buffer.resize(start + chunk, 0);
    loop {
        match body.read(&mut buffer[start..]) {
            Ok(read) => {
                buffer.truncate(start + read);
                return Ok(read);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                buffer.truncate(start);
                return Err(MalformedUpload::Io(err).into());
            }
        }
    }
}

fn dispose_all(items: &mut Vec<SpooledItem>) {
    for mut item in items.drain(..) {
        if let Err(err) = item.dispose() {
            warn!(field = item.field_name(), error = %err, "failed to dispose partial upload item");
        }
    }
}

/// Parse a part's header block (including the terminating blank line).
///
/// Names are lower-cased; folded continuation lines are joined to the
/// previous header.
fn parse_part_headers(block: &[u8]) -> Result<HashMap<String, String>, MalformedUpload> {
    let text = std::str::from_utf8(block).map_err(|_| MalformedUpload::InvalidPartHeaders {
        detail: "invalid UTF-8 in header".to_string(),
    })?;

    let mut headers: HashMap<String, String> = HashMap::new();
    let mut last: Option<String> = None;

    for line in text.split("\r\n").filter(|line| !line.is_empty()) {
        if line.starts_with([' ', '\t']) {
            let Some(value) = last.as_ref().and_then(|name| headers.get_mut(name)) else {
                return Err(MalformedUpload::InvalidPartHeaders {
                    detail: "continuation line without a header".to_string(),
                });
            };
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(MalformedUpload::InvalidPartHeaders {
                detail: format!("header line without colon: {line}"),
            });
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(MalformedUpload::InvalidPartHeaders {
                detail: "empty header name".to_string(),
            });
        }
        headers.insert(name.clone(), value.trim().to_string());
        last = Some(name);
    }

    Ok(headers)
}

/// Parse Content-Disposition header value.
///
/// Format: `form-data; name="field"; filename="file.txt"`
///
/// A part without a `name` parameter rejects the whole body rather than
/// being skipped.
fn parse_content_disposition(value: &str) -> Result<(String, Option<String>), MalformedUpload> {
    let mut name = None;
    let mut filename = None;

    for part in split_params(value) {
        let part = part.trim();
        if let Some((key, raw_value)) = part.split_once('=') {
            let key = key.trim();
            if key.eq_ignore_ascii_case("name") {
                name = Some(unquote(raw_value));
            } else if key.eq_ignore_ascii_case("filename") {
                filename = Some(unquote(raw_value));
            }
        }
    }

    let name = name.ok_or_else(|| MalformedUpload::InvalidContentDisposition {
        detail: "missing name parameter".to_string(),
    })?;

    Ok((name, filename))
}

/// Split on `;` outside double quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"")
    } else {
        s.to_string()
    }
}
