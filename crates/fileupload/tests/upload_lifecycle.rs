//! End-to-end tests for loading, reading, and releasing request uploads.
//!
//! Covers:
//! - mixed memory/disk items from one body
//! - the aggregate size ceiling
//! - re-loading and repeated cleanup
//! - preferences from JSON and a custom request source
//! - end-of-request cleanup through `RequestContext`

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fileupload::prelude::*;
use fileupload::{ItemFactory, MalformedUpload};

const BOUNDARY: &str = "XyZ123";

fn content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

struct Part<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    data: Vec<u8>,
}

fn field<'a>(name: &'a str, value: &str) -> Part<'a> {
    Part {
        name,
        filename: None,
        content_type: None,
        data: value.as_bytes().to_vec(),
    }
}

fn file<'a>(name: &'a str, filename: &'a str, data: Vec<u8>) -> Part<'a> {
    Part {
        name,
        filename: Some(filename),
        content_type: Some("application/octet-stream"),
        data,
    }
}

fn build_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(ct) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap()).collect()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

// ============================================================================
// LOAD AND READ
// ============================================================================

#[test]
fn test_avatar_and_title_split_between_disk_and_memory() {
    let dir = tempfile::tempdir().unwrap();
    let avatar = pattern(150_000);
    let body = build_body(&[file("avatar", "me.png", avatar.clone()), field("title", "Hello")]);

    let mut session = UploadSession::new();
    session
        .load_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            10_000_000,
            100_000,
            Some(dir.path()),
        )
        .unwrap();

    assert_eq!(session.item_names(), vec!["avatar", "title"]);

    let item = session.find("avatar").unwrap();
    assert!(item.is_spooled());
    assert_eq!(item.size(), 150_000);
    assert_eq!(item.file_name(), Some("me.png"));
    assert_eq!(item.content_type(), Some("application/octet-stream"));
    assert_eq!(session.bytes("avatar").unwrap().unwrap(), avatar);

    let title = session.find("title").unwrap();
    assert!(title.is_in_memory());
    assert!(title.is_form_field());
    assert_eq!(session.text("title").unwrap().as_deref(), Some("Hello"));

    let spool_path = item.spooled_path().unwrap().to_path_buf();
    assert!(spool_path.starts_with(dir.path()));
    assert!(spool_path.exists());

    session.cleanup();
    assert!(!spool_path.exists());
    assert!(session.is_empty());
}

#[test]
fn test_threshold_straddle() {
    let dir = tempfile::tempdir().unwrap();
    let body = build_body(&[
        file("below", "a", pattern(99)),
        file("at", "b", pattern(100)),
        file("above", "c", pattern(101)),
    ]);

    let mut session = UploadSession::new();
    session
        .load_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            1_000_000,
            100,
            Some(dir.path()),
        )
        .unwrap();

    assert!(session.find("below").unwrap().is_in_memory());
    assert!(session.find("at").unwrap().is_in_memory());
    assert!(session.find("above").unwrap().is_spooled());
    assert_eq!(files_in(dir.path()).len(), 1);
}

#[test]
fn test_streamed_read_matches_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(5_000);
    let body = build_body(&[file("doc", "doc.bin", data.clone()), field("note", "hi")]);

    let mut session = UploadSession::new();
    session
        .load_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            1_000_000,
            1_024,
            Some(dir.path()),
        )
        .unwrap();

    for name in ["doc", "note"] {
        let item = session.find(name).unwrap();
        let mut streamed = Vec::new();
        item.open().unwrap().read_to_end(&mut streamed).unwrap();
        assert_eq!(streamed, item.bytes().unwrap());
    }
    assert_eq!(session.bytes("doc").unwrap().unwrap(), data);
}

#[test]
fn test_empty_file_part_is_kept() {
    let body = build_body(&[file("empty", "nothing.txt", Vec::new())]);

    let mut session = UploadSession::new();
    session
        .load(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            &NoPreferences,
        )
        .unwrap();

    let item = session.find("empty").unwrap();
    assert_eq!(item.size(), 0);
    assert!(item.is_in_memory());
    assert_eq!(item.file_name(), Some("nothing.txt"));
}

// ============================================================================
// LIMITS AND ERRORS
// ============================================================================

#[test]
fn test_body_over_ceiling_is_rejected_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let body = build_body(&[file("avatar", "me.png", pattern(150_000)), field("title", "Hello")]);

    let mut session = UploadSession::new();
    let err = session
        .load_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            100_000,
            100_000,
            Some(dir.path()),
        )
        .unwrap_err();

    assert!(matches!(err, UploadError::SizeLimitExceeded { max: 100_000, .. }));
    assert_eq!(err.status_code(), 413);
    assert!(session.is_empty());
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_missing_boundary_is_malformed() {
    let mut session = UploadSession::new();
    let err = session
        .load(
            &mut MultipartRequest::new("multipart/form-data", &b""[..]),
            &NoPreferences,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Malformed(MalformedUpload::MissingBoundary)
    ));
    assert!(err.is_client_error());
}

#[test]
fn test_truncated_body_removes_partial_spool_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut body = build_body(&[file("big", "big.bin", pattern(4_096))]);
    body.truncate(2_048);

    let mut session = UploadSession::new();
    let err = session
        .load_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            1_000_000,
            512,
            Some(dir.path()),
        )
        .unwrap_err();

    assert!(matches!(err, UploadError::Malformed(_)));
    assert!(files_in(dir.path()).is_empty());
}

// ============================================================================
// RE-LOAD AND CLEANUP
// ============================================================================

#[test]
fn test_reload_disposes_previous_items() {
    let dir = tempfile::tempdir().unwrap();
    let first = build_body(&[file("a", "a.bin", pattern(2_000))]);
    let second = build_body(&[file("b", "b.bin", pattern(3_000))]);

    let mut session = UploadSession::new();
    session
        .load_with(
            &mut MultipartRequest::new(content_type(), first.as_slice()),
            1_000_000,
            1_000,
            Some(dir.path()),
        )
        .unwrap();
    let old_path = session.find("a").unwrap().spooled_path().unwrap().to_path_buf();

    session
        .load_with(
            &mut MultipartRequest::new(content_type(), second.as_slice()),
            1_000_000,
            1_000,
            Some(dir.path()),
        )
        .unwrap();

    assert!(!old_path.exists());
    assert_eq!(session.item_names(), vec!["b"]);
    assert_eq!(files_in(dir.path()).len(), 1);
}

#[test]
fn test_cleanup_twice_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let body = build_body(&[file("a", "a.bin", pattern(2_000)), field("t", "x")]);

    let mut session = UploadSession::new();
    session
        .load_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            1_000_000,
            1_000,
            Some(dir.path()),
        )
        .unwrap();

    session.cleanup();
    session.cleanup();
    assert!(session.is_empty());
    assert!(files_in(dir.path()).is_empty());
}

// ============================================================================
// PREFERENCES AND REQUEST SOURCES
// ============================================================================

#[test]
fn test_json_preferences_drive_limits() {
    let dir = tempfile::tempdir().unwrap();
    let prefs = serde_json::json!({
        "upload_maxsize": 50_000,
        "upload_sizethreshold": "10",
        "upload_tempdir": dir.path().display().to_string(),
    });

    let config = UploadConfig::from_preferences(&prefs);
    assert_eq!(config.get_max_total_size(), 50_000);
    assert_eq!(config.get_memory_threshold(), 10);
    assert_eq!(config.get_spool_directory(), Some(dir.path()));

    let body = build_body(&[file("f", "f.txt", b"twenty bytes of data".to_vec())]);
    let mut session = UploadSession::new();
    session
        .load(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            &prefs,
        )
        .unwrap();
    assert!(session.find("f").unwrap().is_spooled());
    assert_eq!(files_in(dir.path()).len(), 1);
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: UploadConfig = serde_json::from_str(r#"{"memory_threshold": 42}"#).unwrap();
    assert_eq!(config.get_memory_threshold(), 42);
    assert_eq!(
        config.get_max_total_size(),
        fileupload::config::DEFAULT_MAX_TOTAL_SIZE
    );
    assert!(config.get_spool_directory().is_none());
}

/// A request whose headers live in a list, as a server might hold them.
struct HeaderListRequest {
    headers: Vec<(String, String)>,
    body: std::io::Cursor<Vec<u8>>,
}

impl RequestSource for HeaderListRequest {
    fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    fn content_length(&self) -> Option<u64> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse().ok())
    }

    fn body(&mut self) -> &mut dyn Read {
        &mut self.body
    }
}

#[test]
fn test_custom_request_source() {
    let body = build_body(&[field("name", "value")]);
    let mut request = HeaderListRequest {
        headers: vec![
            ("Content-Type".to_string(), content_type()),
            ("Content-Length".to_string(), body.len().to_string()),
        ],
        body: std::io::Cursor::new(body),
    };

    let mut session = UploadSession::new();
    session.load(&mut request, &NoPreferences).unwrap();
    assert_eq!(session.text("name").unwrap().as_deref(), Some("value"));
}

// ============================================================================
// REQUEST CONTEXT
// ============================================================================

#[test]
fn test_request_context_releases_files_at_end_of_request() {
    let dir = tempfile::tempdir().unwrap();
    let body = build_body(&[file("avatar", "me.png", pattern(150_000)), field("title", "Hello")]);

    {
        let ctx = RequestContext::new(42, Arc::new(NoPreferences));
        ctx.load_uploads_with(
            &mut MultipartRequest::new(content_type(), body.as_slice()),
            10_000_000,
            100_000,
            Some(dir.path()),
        )
        .unwrap();
        assert_eq!(ctx.uploads().text("title").unwrap().as_deref(), Some("Hello"));
        assert_eq!(files_in(dir.path()).len(), 1);
    }

    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_factory_is_usable_directly() {
    let dir = tempfile::tempdir().unwrap();
    let factory = ItemFactory::new(8, Some(dir.path()));
    let mut writer = factory.create("upload", Some("x.bin".to_string()), None);
    writer.write(b"0123456789").unwrap();
    let item = writer.finish().unwrap();

    assert!(item.is_spooled());
    assert_eq!(item.bytes().unwrap(), b"0123456789");
    drop(item);
    assert!(files_in(dir.path()).is_empty());
}
