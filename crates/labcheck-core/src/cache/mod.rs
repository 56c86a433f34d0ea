//! Result cache: passing check results keyed by content fingerprint.
//!
//! A fingerprint hashes `(exercise id, content version, check name)`, so a
//! content change is a cache miss by construction and no explicit
//! invalidation exists.

pub mod fs;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::TestResult;

pub use fs::FsResultCache;

/// SHA-256 cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(exercise_id: &str, content_version: &str, check_name: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [exercise_id, content_version, check_name] {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex().chars().take(12).collect::<String>())
    }
}

impl FromStr for Fingerprint {
    type Err = CacheError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CacheError::InvalidFingerprint(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(CacheError::InvalidFingerprint(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// One persisted cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fingerprint: String,
    pub result: TestResult,
    pub stored_at: DateTime<Utc>,
}

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Unreadable entry; callers treat it as a miss.
    #[error("corrupt cache entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid fingerprint hex: {0}")]
    InvalidFingerprint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".labcheck/cache"),
        }
    }
}

/// Fingerprint-keyed store for passing results.
pub trait ResultCache: Send + Sync {
    /// Look up a stored result. Corrupt entries are discarded and reported
    /// as a miss.
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry>;

    /// Store `result` if it passed. Returns whether anything was written.
    fn store(&self, fingerprint: &Fingerprint, result: &TestResult) -> Result<bool>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
