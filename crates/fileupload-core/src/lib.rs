//! Core types for request-scoped multipart uploads.
//!
//! This crate provides the building blocks:
//! - [`UploadParser`] streaming a `multipart/*` body into items
//! - [`ItemFactory`] deciding per item between memory and a spool file
//! - [`SpooledItem`] exposing an item's metadata and bytes
//! - [`UploadSession`] holding one request's items and releasing them
//! - [`RequestContext`] owning the session for the lifetime of a request
//!
//! # Design Principles
//!
//! - Items never exceed the memory threshold in RAM; larger ones stream to disk
//! - The whole body is bounded by an aggregate ceiling
//! - Every spool file is owned by a value that deletes it on drop
//! - Parsing is synchronous and reads from any [`std::io::Read`]

#![forbid(unsafe_code)]

pub mod config;
mod context;
pub mod error;
mod factory;
mod item;
pub mod parser;
mod request;
mod session;

pub use config::{
    DEFAULT_MAX_TOTAL_SIZE, DEFAULT_MEMORY_THRESHOLD, NoPreferences, PreferenceSource,
    UPLOAD_MAXSIZE_PARAMETER, UPLOAD_SIZETHRESHOLD_PARAMETER, UPLOAD_TEMPDIR_PARAMETER,
    UploadConfig,
};
pub use context::RequestContext;
pub use error::{MalformedUpload, Result, UploadError};
pub use factory::{ItemFactory, ItemWriter};
pub use item::{ItemReader, SpooledItem};
pub use parser::{DEFAULT_READ_CHUNK, MAX_HEADER_BLOCK, UploadParser, parse_boundary};
pub use request::{MultipartRequest, RequestSource};
pub use session::UploadSession;
