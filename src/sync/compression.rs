//! Gzip encoding for uploads.
//!
//! Output is deterministic: the gzip header carries no file name and a zero
//! mtime, and the level is fixed, so the same input always produces the same
//! bytes and therefore the same ETag.

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::io::Write;

/// Content types gzipped when compression is enabled.
pub const DEFAULT_GZIP_CONTENT_TYPES: &[&str] = &[
    "text/css",
    "text/html",
    "application/javascript",
    "application/x-javascript",
    "application/xml",
    // Equivalents some type tables prefer
    "text/javascript",
    "text/xml",
];

/// Value of the Content-Encoding header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
        }
    }
}

/// Decides which uploads are compressed and compresses them.
#[derive(Debug, Clone)]
pub struct ContentEncoder {
    enabled: bool,
    content_types: Vec<String>,
}

impl Default for ContentEncoder {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ContentEncoder {
    /// Encoder with the default content-type allow-list.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            content_types: DEFAULT_GZIP_CONTENT_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }

    /// Encoder with a custom allow-list.
    pub fn with_content_types<I, S>(enabled: bool, content_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled,
            content_types: content_types
                .into_iter()
                .map(|t| t.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn content_types(&self) -> &[String] {
        &self.content_types
    }

    /// Whether a file of `content_type` should be gzipped.
    ///
    /// Unknown types are never compressed.
    pub fn should_compress(&self, content_type: Option<&str>) -> bool {
        should_compress(content_type, self.enabled, &self.content_types)
    }

    /// Gzip `data`.
    pub fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        gzip(data)
    }
}

/// Allow-list check shared by [`ContentEncoder::should_compress`].
pub fn should_compress<S: AsRef<str>>(
    content_type: Option<&str>,
    enabled: bool,
    allowed: &[S],
) -> bool {
    if !enabled {
        return false;
    }
    match content_type {
        Some(ct) if !ct.is_empty() => allowed
            .iter()
            .any(|allowed| allowed.as_ref().eq_ignore_ascii_case(ct)),
        _ => false,
    }
}

/// Deterministic gzip of `data` at the best compression level.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let output = Vec::with_capacity(data.len() / 2 + 32);
    let mut encoder: GzEncoder<Vec<u8>> = GzBuilder::new()
        .mtime(0)
        .write(output, Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}
