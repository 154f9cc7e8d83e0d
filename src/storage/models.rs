//! Data models for stored indexes.
//!
//! This module defines the structures persisted per repository:
//! - `IndexRecord`: metadata and the skip manifest
//! - `IndexPayload`: the trigram postings
//! - `SkippedFile` / `SkipReason`: why a file is absent from the postings

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StorageError;
use crate::Result;

/// Current on-disk format version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// A contiguous 3-byte window of file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Trigram(pub [u8; 3]);

impl Trigram {
    /// Build a trigram from the first three bytes of a slice.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, c, ..] => Some(Self([*a, *b, *c])),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }

    /// Lowercase hex encoding, used as the JSON key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }

    /// Parse the hex encoding produced by [`Trigram::to_hex`].
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 6 || !s.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
        Some(Self([byte(0)?, byte(2)?, byte(4)?]))
    }
}

impl From<&[u8; 3]> for Trigram {
    fn from(bytes: &[u8; 3]) -> Self {
        Self(*bytes)
    }
}

impl fmt::Display for Trigram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for Trigram {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Trigram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TrigramVisitor;

        impl Visitor<'_> for TrigramVisitor {
            type Value = Trigram;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a six-digit hex trigram")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Trigram, E> {
                Trigram::from_hex(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(TrigramVisitor)
    }
}

/// One occurrence of a trigram: file index into `IndexPayload::files` and
/// byte offset within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Occurrence {
    pub file: u32,
    pub offset: u32,
}

/// Which configured maximum a file exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Limit {
    FileSize,
    TrigramCount,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSize => f.write_str("file size"),
            Self::TrigramCount => f.write_str("trigram count"),
        }
    }
}

/// Why a file was left out of the postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    /// A size or trigram limit was exceeded.
    LimitExceeded { limit: Limit, actual: u64, max: u64 },
    /// Content looks binary.
    Binary,
    /// The file could not be read.
    Unreadable { error: String },
}

impl SkipReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::LimitExceeded {
                limit: Limit::FileSize,
                ..
            } => "file_size",
            Self::LimitExceeded {
                limit: Limit::TrigramCount,
                ..
            } => "trigram_count",
            Self::Binary => "binary",
            Self::Unreadable { .. } => "unreadable",
        }
    }
}

/// A file absent from the postings, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub reason: SkipReason,
}

/// Metadata describing one published index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    /// Owning repository id.
    pub repo_id: String,

    pub format_version: u32,

    /// When the build that produced this record started.
    pub indexed_at: DateTime<Utc>,

    /// Fingerprint of the declaration this index was built from.
    pub config_fingerprint: String,

    pub file_count: usize,
    pub trigram_count: usize,
    pub posting_count: usize,

    /// blake3 of the encoded payload. Set by the index store on write.
    #[serde(default)]
    pub payload_checksum: String,

    /// Files left out of the postings.
    pub skipped: Vec<SkippedFile>,

    /// Directory of the generation this record was read from.
    #[serde(skip)]
    pub location: Option<PathBuf>,
}

impl IndexRecord {
    /// Create a record for a freshly built payload.
    #[must_use]
    pub fn new(
        repo_id: impl Into<String>,
        indexed_at: DateTime<Utc>,
        config_fingerprint: impl Into<String>,
        payload: &IndexPayload,
        skipped: Vec<SkippedFile>,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            format_version: INDEX_FORMAT_VERSION,
            indexed_at,
            config_fingerprint: config_fingerprint.into(),
            file_count: payload.files.len(),
            trigram_count: payload.trigram_count(),
            posting_count: payload.posting_count(),
            payload_checksum: String::new(),
            skipped,
            location: None,
        }
    }

    /// Encode as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StorageError::Serialization(e.to_string()).into())
    }
}

/// Trigram postings for one repository.
///
/// Posting lists are ordered by file (in path order) and then by offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPayload {
    /// Indexed files, sorted, relative to the repository root.
    pub files: Vec<String>,

    /// Trigram to ordered occurrences.
    pub postings: BTreeMap<Trigram, Vec<Occurrence>>,
}

impl IndexPayload {
    /// Number of distinct trigrams.
    #[must_use]
    pub fn trigram_count(&self) -> usize {
        self.postings.len()
    }

    /// Total number of occurrences across all trigrams.
    #[must_use]
    pub fn posting_count(&self) -> usize {
        self.postings.values().map(Vec::len).sum()
    }

    /// Occurrences of a trigram.
    #[must_use]
    pub fn occurrences(&self, trigram: &Trigram) -> &[Occurrence] {
        self.postings.get(trigram).map_or(&[], Vec::as_slice)
    }

    /// Occurrences of a trigram resolved to file paths.
    #[must_use]
    pub fn lookup(&self, trigram: &[u8; 3]) -> Vec<(&str, u32)> {
        self.occurrences(&Trigram::from(trigram))
            .iter()
            .filter_map(|occ| {
                self.files
                    .get(occ.file as usize)
                    .map(|path| (path.as_str(), occ.offset))
            })
            .collect()
    }

    /// Offsets of a trigram within one file.
    #[must_use]
    pub fn offsets_in(&self, trigram: &[u8; 3], path: &str) -> Vec<u32> {
        self.lookup(trigram)
            .into_iter()
            .filter(|(p, _)| *p == path)
            .map(|(_, offset)| offset)
            .collect()
    }

    /// Encode as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::Serialization(e.to_string()).into())
    }
}

/// blake3 hex digest of encoded bytes.
#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> IndexPayload {
        let mut postings = BTreeMap::new();
        postings.insert(
            Trigram(*b"abc"),
            vec![
                Occurrence { file: 0, offset: 0 },
                Occurrence { file: 0, offset: 3 },
                Occurrence { file: 1, offset: 7 },
            ],
        );
        postings.insert(Trigram(*b"bca"), vec![Occurrence { file: 0, offset: 1 }]);
        IndexPayload {
            files: vec!["a.txt".to_string(), "b.txt".to_string()],
            postings,
        }
    }

    #[test]
    fn test_trigram_hex() {
        let t = Trigram(*b"abc");
        assert_eq!(t.to_hex(), "616263");
        assert_eq!(Trigram::from_hex("616263"), Some(t));
        assert_eq!(Trigram::from_hex("61626"), None);
        assert_eq!(Trigram::from_hex("zz6263"), None);
    }

    #[test]
    fn test_trigram_display() {
        assert_eq!(Trigram(*b"a b").to_string(), "a b");
        assert_eq!(Trigram([b'a', b'\n', 0xff]).to_string(), "a\\x0a\\xff");
    }

    #[test]
    fn test_trigram_from_slice() {
        assert_eq!(Trigram::from_slice(b"abcd"), Some(Trigram(*b"abc")));
        assert_eq!(Trigram::from_slice(b"ab"), None);
    }

    #[test]
    fn test_payload_lookup() {
        let payload = sample_payload();
        assert_eq!(payload.lookup(b"abc"), vec![("a.txt", 0), ("a.txt", 3), ("b.txt", 7)]);
        assert_eq!(payload.offsets_in(b"abc", "a.txt"), vec![0, 3]);
        assert!(payload.lookup(b"zzz").is_empty());
        assert_eq!(payload.trigram_count(), 2);
        assert_eq!(payload.posting_count(), 4);
    }

    #[test]
    fn test_payload_json_uses_hex_keys() {
        let payload = sample_payload();
        let value: serde_json::Value = serde_json::from_slice(&payload.encode().unwrap()).unwrap();
        assert!(value["postings"]["616263"].is_array());

        let decoded: IndexPayload = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_skip_reason_serialization() {
        let skipped = SkippedFile {
            path: "a.txt".to_string(),
            reason: SkipReason::LimitExceeded {
                limit: Limit::TrigramCount,
                actual: 3,
                max: 2,
            },
        };
        let value = serde_json::to_value(&skipped).unwrap();
        assert_eq!(value["reason"]["kind"], "limitExceeded");
        assert_eq!(value["reason"]["limit"], "trigramCount");
        assert_eq!(skipped.reason.label(), "trigram_count");
    }

    #[test]
    fn test_record_new_counts() {
        let payload = sample_payload();
        let record = IndexRecord::new("r1", Utc::now(), "fp", &payload, Vec::new());
        assert_eq!(record.format_version, INDEX_FORMAT_VERSION);
        assert_eq!(record.file_count, 2);
        assert_eq!(record.trigram_count, 2);
        assert_eq!(record.posting_count, 4);
        assert!(record.payload_checksum.is_empty());
    }

    #[test]
    fn test_checksum_stable() {
        assert_eq!(checksum(b"abc"), checksum(b"abc"));
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
        assert_eq!(checksum(b"abc").len(), 64);
    }
}
