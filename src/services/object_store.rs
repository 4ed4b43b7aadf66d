//! Object store abstraction.
//!
//! Image payloads live in a remote keyed binary store (S3 in production, a
//! local directory for development). Every backend hands out a *locator*: a
//! fully-qualified URL whose path is the percent-encoded object key. The
//! metadata store keeps only that locator, so [`LocatorBase::key_of`] must be
//! the exact inverse of [`LocatorBase::locate`].

use async_trait::async_trait;
use axum::http::Uri;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{io, pin::Pin};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("locator `{0}` does not address an object in this store")]
    InvalidLocator(String),
    #[error("object store request failed: {0}")]
    Remote(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A readable object positioned at its first byte.
pub struct ObjectBody {
    /// Content type declared when the object was written, if the store kept one.
    pub content_type: Option<String>,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

/// Keyed binary store used for image payloads.
///
/// Implementations do not retry; a failed remote call is reported once and
/// the caller decides what to do with it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key` and return the locator for the new object.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<String>;

    /// Open the object stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<ObjectBody>;

    /// Remove the object stored under `key`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Recover the object key from a locator previously returned by `put`.
    fn key_from_locator(&self, locator: &str) -> StorageResult<String>;
}

/// Build the object key for a fresh upload: `<namespace>/<unix-millis>-<name>`.
pub fn object_key(namespace: &str, file_name: &str, now: DateTime<Utc>) -> String {
    format!("{}/{}-{}", namespace, now.timestamp_millis(), file_name)
}

/// Base URL that locators of one store share.
///
/// `base` may carry a path (path-style S3 endpoints put the bucket there);
/// that path is stripped again when a key is recovered from a locator.
#[derive(Debug, Clone)]
pub struct LocatorBase {
    base: String,
    path_prefix: String,
}

impl LocatorBase {
    pub fn new(base: &str) -> StorageResult<Self> {
        let base = base.trim_end_matches('/').to_string();
        let uri = base
            .parse::<Uri>()
            .map_err(|_| StorageError::InvalidLocator(base.clone()))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(StorageError::InvalidLocator(base));
        }
        let path_prefix = uri.path().trim_matches('/').to_string();
        Ok(Self { base, path_prefix })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Locator for `key`.
    pub fn locate(&self, key: &str) -> String {
        format!("{}/{}", self.base, encode_key(key))
    }

    /// Parse `locator` as a URL, drop the leading `/` (and the base path, if
    /// any) from its path, then percent-decode what remains.
    pub fn key_of(&self, locator: &str) -> StorageResult<String> {
        let invalid = || StorageError::InvalidLocator(locator.to_string());
        let uri = locator.parse::<Uri>().map_err(|_| invalid())?;
        let path = uri.path();
        let mut rest = path.strip_prefix('/').unwrap_or(path);
        if !self.path_prefix.is_empty() {
            rest = rest
                .strip_prefix(self.path_prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
                .ok_or_else(invalid)?;
        }
        let key = decode_key(rest).ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }
        Ok(key)
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Percent-encode every byte of `key` outside the RFC 3986 unreserved set,
/// keeping `/` so the key's segments stay visible in the URL path.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(HEX[usize::from(b >> 4)] as char);
                out.push(HEX[usize::from(b & 0x0f)] as char);
            }
        }
    }
    out
}

/// Inverse of [`encode_key`]. Returns `None` for a malformed escape or a
/// byte sequence that is not UTF-8.
pub fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_value(*bytes.get(i + 1)?)?;
            let lo = hex_value(*bytes.get(i + 2)?)?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
