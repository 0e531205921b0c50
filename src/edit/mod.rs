pub mod catalog;
pub mod selection;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocator {
    Memory { digest: String },
    Remote(Url),
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { digest } => write!(f, "memory:sha256:{digest}"),
            Self::Remote(url) => f.write_str(url.as_str()),
        }
    }
}

/// Immutable image payload passed between pipeline steps. Cloning shares the bytes.
#[derive(Clone)]
pub struct EditableImage {
    bytes: Arc<[u8]>,
    format: ImageFormat,
    digest: String,
    locator: ImageLocator,
}

impl EditableImage {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, EditableImageError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(EditableImageError::Empty);
        }
        let format =
            image::guess_format(bytes.as_slice()).map_err(EditableImageError::UnknownFormat)?;
        let digest = sha256_hex(bytes.as_slice());
        Ok(Self {
            locator: ImageLocator::Memory {
                digest: digest.clone(),
            },
            bytes: Arc::from(bytes),
            format,
            digest,
        })
    }

    pub fn with_remote_locator(mut self, url: Url) -> Self {
        self.locator = ImageLocator::Remote(url);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn media_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("bin")
    }

    pub fn digest(&self) -> &str {
        self.digest.as_str()
    }

    pub fn locator(&self) -> &ImageLocator {
        &self.locator
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            locator: self.locator.to_string(),
            digest: self.digest.clone(),
            media_type: self.media_type().to_string(),
            byte_len: self.len(),
        }
    }
}

impl PartialEq for EditableImage {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.locator == other.locator
    }
}

impl fmt::Debug for EditableImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditableImage")
            .field("locator", &self.locator)
            .field("format", &self.format)
            .field("byte_len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub locator: String,
    pub digest: String,
    pub media_type: String,
    pub byte_len: usize,
}

#[derive(Debug, Error)]
pub enum EditableImageError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not a recognized image format: {0}")]
    UnknownFormat(#[source] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub category: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl EditOperation {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

pub fn normalize_category(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

#[cfg(test)]
pub(crate) fn png_bytes(tag: &str) -> Vec<u8> {
    let mut out = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
    out.extend_from_slice(tag.as_bytes());
    out
}
