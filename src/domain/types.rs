//! Core value types shared across the rendition pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifies a content item in the host's content graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A media type such as `image/png`. Compared case-sensitively; the host is
/// expected to hand us already-normalised values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A content class of an item (its type or one of its aspects in the host's
/// model). Opaque to this crate; only compared against the prevention
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentClass(String);

impl ContentClass {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The content-addressing token of an item's current content, as produced by
/// the content graph. Never dereferenced here, only fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentToken(String);

impl ContentToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Short token derived from a [`ContentToken`], used to detect whether
/// content changed between a rendition request and its completion.
///
/// Transform completions may arrive in any order, long after the request, so
/// equality of fingerprints is the sole mechanism deciding whether a result
/// still applies. [`Fingerprint::ABSENT`] stands for "the item had no
/// content"; [`Fingerprint::from_token`] never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub const ABSENT: Fingerprint = Fingerprint(0);

    pub fn from_token(token: &ContentToken) -> Self {
        let digest = Sha256::digest(token.as_str().as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let value = u64::from_le_bytes(raw);
        // Zero is reserved for ABSENT.
        Self(value.max(1))
    }

    pub fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Maximum source size a transformer accepts for a given media type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    Unlimited,
    Bytes(u64),
}

impl SizeLimit {
    /// Sentinel used by configuration records: a negative byte count means
    /// unlimited.
    pub fn from_config_bytes(bytes: i64) -> Self {
        if bytes < 0 {
            Self::Unlimited
        } else {
            Self::Bytes(bytes as u64)
        }
    }

    /// Whether a source of `size` bytes is within this limit. The bound is
    /// exclusive: a source exactly at the limit is rejected.
    pub fn permits(&self, size: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Bytes(max) => size < *max,
        }
    }

    /// The more restrictive of two limits. Unlimited stages of a pipeline do
    /// not constrain the chain.
    pub fn most_restrictive(self, other: SizeLimit) -> SizeLimit {
        match (self, other) {
            (Self::Unlimited, other) => other,
            (this, Self::Unlimited) => this,
            (Self::Bytes(a), Self::Bytes(b)) => Self::Bytes(a.min(b)),
        }
    }
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Bytes(bytes) => write!(f, "{bytes} bytes"),
        }
    }
}
