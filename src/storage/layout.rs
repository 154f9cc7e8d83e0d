//! On-disk naming for the index store.
//!
//! ```text
//! <index_path>/
//!   .staging/<uuid>/          in-progress writes and deletes
//!   <slot>/
//!     CURRENT                 generation number of the published index
//!     gen-000007/
//!       record.json
//!       postings.json
//! ```

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;

pub const CURRENT_FILE: &str = "CURRENT";
pub const RECORD_FILE: &str = "record.json";
pub const PAYLOAD_FILE: &str = "postings.json";
pub const STAGING_DIR: &str = ".staging";

const GENERATION_PREFIX: &str = "gen-";

/// Escape a repository id into a single path component.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is reversible and never yields a leading `.`.
#[must_use]
pub fn slot_name(repo_id: &str) -> String {
    let mut name = String::with_capacity(repo_id.len());
    for &b in repo_id.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            name.push(b as char);
        } else {
            let _ = write!(name, "%{b:02X}");
        }
    }
    name
}

/// Reverse [`slot_name`].
#[must_use]
pub fn repo_id_from_slot(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Directory name of a generation.
#[must_use]
pub fn generation_dir(generation: u64) -> String {
    format!("{GENERATION_PREFIX}{generation:06}")
}

/// Parse a generation directory name.
#[must_use]
pub fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// Write a file and fsync it before returning.
pub fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
