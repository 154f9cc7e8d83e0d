//! Trigram extraction.

use std::collections::HashMap;

use crate::storage::Trigram;

/// Trigram occurrences within a single file, offsets ascending.
#[derive(Debug, Default)]
pub struct FileTrigrams {
    occurrences: HashMap<Trigram, Vec<u32>>,
}

impl FileTrigrams {
    /// Number of distinct trigrams.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.occurrences.len()
    }

    /// Offsets of a trigram.
    #[must_use]
    pub fn offsets(&self, trigram: &[u8; 3]) -> &[u32] {
        self.occurrences
            .get(&Trigram::from(trigram))
            .map_or(&[], Vec::as_slice)
    }

    /// Consume into `(trigram, offsets)` pairs.
    pub fn into_postings(self) -> impl Iterator<Item = (Trigram, Vec<u32>)> {
        self.occurrences.into_iter()
    }
}

/// Extract every overlapping 3-byte window of `content`.
///
/// Content shorter than three bytes has no trigrams. Callers keep content
/// within `u32` range (enforced by the file size limit).
#[must_use]
pub fn extract_trigrams(content: &[u8]) -> FileTrigrams {
    let mut occurrences: HashMap<Trigram, Vec<u32>> = HashMap::new();

    for (offset, window) in content.windows(3).enumerate() {
        if let Some(trigram) = Trigram::from_slice(window) {
            #[allow(clippy::cast_possible_truncation)]
            occurrences.entry(trigram).or_default().push(offset as u32);
        }
    }

    FileTrigrams { occurrences }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_abcabc() {
        let trigrams = extract_trigrams(b"abcabc");
        assert_eq!(trigrams.distinct(), 3);
        assert_eq!(trigrams.offsets(b"abc"), &[0, 3]);
        assert_eq!(trigrams.offsets(b"bca"), &[1]);
        assert_eq!(trigrams.offsets(b"cab"), &[2]);
    }

    #[test]
    fn test_extract_short_content() {
        assert_eq!(extract_trigrams(b"").distinct(), 0);
        assert_eq!(extract_trigrams(b"ab").distinct(), 0);
        assert_eq!(extract_trigrams(b"abc").distinct(), 1);
    }

    #[test]
    fn test_extract_repeated_byte() {
        let trigrams = extract_trigrams(b"aaaaa");
        assert_eq!(trigrams.distinct(), 1);
        assert_eq!(trigrams.offsets(b"aaa"), &[0, 1, 2]);
    }

    #[test]
    fn test_extract_multibyte_utf8_is_bytewise() {
        // "é" is two bytes; windows straddle character boundaries.
        let trigrams = extract_trigrams("aé".as_bytes());
        assert_eq!(trigrams.distinct(), 1);
        assert_eq!(trigrams.offsets(&[b'a', 0xc3, 0xa9]), &[0]);
    }
}
