//! Content keys for guidance text
//!
//! The key is the SHA-256 of the normalized text. It names the artifact file
//! on disk, so it must stay stable across releases.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Hex length of a content key
pub const KEY_LEN: usize = 64;

/// Stable identity of a piece of guidance text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Hex digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct a key from a stored hex digest
    ///
    /// Returns `None` unless `s` is exactly 64 lowercase hex characters.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize guidance text before hashing
///
/// Trims the ends and collapses every whitespace run to a single space.
/// Case is kept as written.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive the content key for `text`
#[must_use]
pub fn derive_key(text: &str) -> ContentKey {
    let digest = Sha256::digest(normalize(text).as_bytes());
    ContentKey(hex::encode(digest))
}

/// Non-empty text to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidanceText {
    text: String,
    key: ContentKey,
}

impl GuidanceText {
    /// Wrap guidance text, rejecting blank input
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyText` if nothing but whitespace remains
    pub fn new(text: &str) -> Result<Self> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(Error::EmptyText);
        }
        let key = derive_key(&text);
        Ok(Self { text, key })
    }

    /// Compose a spoken message from a summary and its recommendations
    ///
    /// Each part becomes its own sentence so the voice pauses between them.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyText` if every part is blank
    pub fn from_summary<S: AsRef<str>>(summary: &str, recommendations: &[S]) -> Result<Self> {
        let sentences: Vec<String> = std::iter::once(summary)
            .chain(recommendations.iter().map(AsRef::as_ref))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.ends_with(['.', '!', '?']) {
                    s.to_string()
                } else {
                    format!("{s}.")
                }
            })
            .collect();
        Self::new(&sentences.join(" "))
    }

    /// Normalized text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Content key of the normalized text
    #[must_use]
    pub const fn key(&self) -> &ContentKey {
        &self.key
    }
}
