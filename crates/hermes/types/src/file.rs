//! File identity.
//!
//! A probe file is fully described by its id and size: its contents are the
//! first `size` bytes of a pseudo-random stream seeded by the id, and its
//! canonical name embeds the SHA-1 of those contents. Reading an object back
//! and hashing it is therefore enough to detect corruption, and a name alone
//! tells which id it belongs to.

use std::fmt;
use std::io::{self, Read};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{TypesError, TypesResult};

/// Lowest valid data file id.
pub const MIN_FILE_ID: u8 = 1;

/// Highest valid data file id.
pub const MAX_FILE_ID: u8 = 50;

/// Last id of the persistent (never deleted) range.
pub const MAX_PERSISTENT_FILE_ID: u8 = 10;

/// First id that may be deleted.
pub const MIN_CHURN_FILE_ID: u8 = 11;

/// Upper bound on the size of a probe file.
pub const MAX_FILE_SIZE_BYTES: usize = 1000;

/// Prefix shared by every object Hermes owns.
pub const FILE_NAME_PREFIX: &str = "Hermes_";

/// Prefix of the journal object.
pub const JOURNAL_NAME_PREFIX: &str = "Hermes_Journal_";

const SHA1_HEX_LEN: usize = 40;
const STREAM_BLOCK_LEN: usize = 64;

/// Identifier of a probe data file, always in `[1, 50]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct FileId(u8);

impl FileId {
    /// The lowest id, first in the persistent set.
    pub const FIRST: FileId = FileId(MIN_FILE_ID);

    /// Validate a raw id.
    pub fn new(id: i64) -> TypesResult<Self> {
        if id < MIN_FILE_ID as i64 || id > MAX_FILE_ID as i64 {
            return Err(TypesError::InvalidFileId(id));
        }
        Ok(Self(id as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Persistent files are created once and never deleted.
    pub fn is_persistent(self) -> bool {
        self.0 <= MAX_PERSISTENT_FILE_ID
    }

    /// Churn files may be deleted and recreated.
    pub fn is_churn(self) -> bool {
        self.0 >= MIN_CHURN_FILE_ID
    }

    /// Listing prefix that matches every object carrying this id, e.g. `Hermes_03_`.
    pub fn prefix(self) -> String {
        format!("{}{:02}_", FILE_NAME_PREFIX, self.0)
    }

    /// All valid ids in ascending order.
    pub fn all() -> impl Iterator<Item = FileId> {
        (MIN_FILE_ID..=MAX_FILE_ID).map(FileId)
    }

    /// Ids `1..=10`.
    pub fn persistent() -> impl Iterator<Item = FileId> {
        (MIN_FILE_ID..=MAX_PERSISTENT_FILE_ID).map(FileId)
    }

    /// Ids `11..=50`.
    pub fn churn() -> impl Iterator<Item = FileId> {
        (MIN_CHURN_FILE_ID..=MAX_FILE_ID).map(FileId)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl TryFrom<i64> for FileId {
    type Error = TypesError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<i32> for FileId {
    type Error = TypesError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value as i64)
    }
}

impl From<FileId> for i64 {
    fn from(id: FileId) -> Self {
        id.0 as i64
    }
}

impl From<FileId> for i32 {
    fn from(id: FileId) -> Self {
        id.0 as i32
    }
}

/// A probe file: `size` bytes of the stream seeded by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomFile {
    id: FileId,
    size: usize,
    checksum: [u8; 20],
}

impl RandomFile {
    /// Build a file from raw inputs, rejecting ids outside `[1, 50]` and
    /// sizes outside `(0, 1000]`.
    pub fn new(id: i64, size: usize) -> TypesResult<Self> {
        Self::with_id(FileId::new(id)?, size)
    }

    pub fn with_id(id: FileId, size: usize) -> TypesResult<Self> {
        if size == 0 || size > MAX_FILE_SIZE_BYTES {
            return Err(TypesError::InvalidFileSize(size));
        }

        let mut hasher = Sha1::new();
        let mut reader = RandomFileReader::new(id, size);
        let mut buf = [0u8; STREAM_BLOCK_LEN];
        loop {
            let n = reader.fill(&mut buf);
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let mut checksum = [0u8; 20];
        checksum.copy_from_slice(&hasher.finalize());

        Ok(Self { id, size, checksum })
    }

    /// Rebuild the file a canonical name refers to.
    ///
    /// The name carries the id and checksum but not the size, so each size in
    /// `(0, 1000]` is tried against the checksum. Returns `None` when the name
    /// is not canonical or no prefix of the stream matches.
    pub fn from_name(name: &str) -> Option<Self> {
        let (id, checksum_hex) = parse_file_name(name)?;
        let mut want = [0u8; 20];
        hex::decode_to_slice(checksum_hex, &mut want).ok()?;

        let mut reader = RandomFileReader::new(id, MAX_FILE_SIZE_BYTES);
        let mut hasher = Sha1::new();
        let mut byte = [0u8; 1];
        for size in 1..=MAX_FILE_SIZE_BYTES {
            reader.fill(&mut byte);
            hasher.update(byte);
            if hasher.clone().finalize().as_slice() == want {
                return Some(Self {
                    id,
                    size,
                    checksum: want,
                });
            }
        }
        None
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// A fresh cursor over the contents; every call restarts from byte zero.
    pub fn reader(&self) -> RandomFileReader {
        RandomFileReader::new(self.id, self.size)
    }

    /// SHA-1 over the full contents.
    pub fn checksum(&self) -> [u8; 20] {
        self.checksum
    }

    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }

    /// Canonical object name `Hermes_<DD>_<hex-sha1>`.
    pub fn name(&self) -> String {
        format!("{}{}", self.id.prefix(), self.checksum_hex())
    }

    /// Materialise the contents in memory.
    pub fn contents(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size];
        let mut reader = self.reader();
        let mut filled = 0;
        while filled < out.len() {
            filled += reader.fill(&mut out[filled..]);
        }
        out
    }
}

/// Cursor over a [`RandomFile`]'s contents.
///
/// The stream is produced in fixed 64-byte blocks, so the bytes a caller sees
/// do not depend on the sizes of the buffers it reads into.
pub struct RandomFileReader {
    rng: ChaCha8Rng,
    block: [u8; STREAM_BLOCK_LEN],
    block_pos: usize,
    remaining: usize,
}

impl RandomFileReader {
    fn new(id: FileId, size: usize) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(id.get() as u64),
            block: [0u8; STREAM_BLOCK_LEN],
            block_pos: STREAM_BLOCK_LEN,
            remaining: size,
        }
    }

    /// Bytes left before EOF.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Copy up to `buf.len()` bytes; returns 0 only at EOF (or for an empty buffer).
    pub fn fill(&mut self, buf: &mut [u8]) -> usize {
        let want = buf.len().min(self.remaining);
        let mut written = 0;
        while written < want {
            if self.block_pos == STREAM_BLOCK_LEN {
                self.rng.fill_bytes(&mut self.block);
                self.block_pos = 0;
            }
            let n = (want - written).min(STREAM_BLOCK_LEN - self.block_pos);
            buf[written..written + n]
                .copy_from_slice(&self.block[self.block_pos..self.block_pos + n]);
            self.block_pos += n;
            written += n;
        }
        self.remaining -= written;
        written
    }
}

impl Read for RandomFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fill(buf))
    }
}

/// Split a canonical data file name into its id and checksum suffix.
///
/// Returns `None` for the journal object and for anything Hermes did not name.
pub fn parse_file_name(name: &str) -> Option<(FileId, &str)> {
    let rest = name.strip_prefix(FILE_NAME_PREFIX)?;
    let (digits, checksum) = rest.split_once('_')?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !is_sha1_hex(checksum) {
        return None;
    }
    let id = FileId::new(digits.parse::<i64>().ok()?).ok()?;
    Some((id, checksum))
}

/// Journal object name for a payload checksum.
pub fn journal_name(checksum_hex: &str) -> String {
    format!("{}{}", JOURNAL_NAME_PREFIX, checksum_hex)
}

/// Checksum suffix of a journal object name.
pub fn parse_journal_name(name: &str) -> Option<&str> {
    name.strip_prefix(JOURNAL_NAME_PREFIX)
        .filter(|checksum| is_sha1_hex(checksum))
}

fn is_sha1_hex(s: &str) -> bool {
    s.len() == SHA1_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_out_of_range_inputs() {
        assert_eq!(RandomFile::new(0, 10), Err(TypesError::InvalidFileId(0)));
        assert_eq!(RandomFile::new(51, 10), Err(TypesError::InvalidFileId(51)));
        assert_eq!(RandomFile::new(3, 0), Err(TypesError::InvalidFileSize(0)));
        assert_eq!(
            RandomFile::new(3, 1001),
            Err(TypesError::InvalidFileSize(1001))
        );
        assert!(RandomFile::new(1, 1).is_ok());
        assert!(RandomFile::new(50, 1000).is_ok());
    }

    #[test]
    fn test_reader_stops_at_size() {
        let file = RandomFile::new(7, 130).unwrap();
        let mut reader = file.reader();
        let mut buf = vec![0u8; 4096];
        assert_eq!(reader.read(&mut buf).unwrap(), 130);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_is_restartable() {
        let file = RandomFile::new(12, 500).unwrap();
        assert_eq!(file.contents(), file.contents());

        let mut first = Vec::new();
        file.reader().read_to_end(&mut first).unwrap();
        assert_eq!(first, file.contents());
    }

    #[test]
    fn test_prefix_of_larger_file() {
        let small = RandomFile::new(4, 100).unwrap();
        let large = RandomFile::new(4, 1000).unwrap();
        assert_eq!(small.contents(), large.contents()[..100].to_vec());
        assert_ne!(small.checksum(), large.checksum());
    }

    #[test]
    fn test_distinct_ids_produce_distinct_streams() {
        let a = RandomFile::new(1, 64).unwrap();
        let b = RandomFile::new(2, 64).unwrap();
        assert_ne!(a.contents(), b.contents());
    }

    #[test]
    fn test_name_layout() {
        let file = RandomFile::new(3, 100).unwrap();
        let name = file.name();
        assert!(name.starts_with("Hermes_03_"));
        assert_eq!(name.len(), "Hermes_03_".len() + 40);

        let (id, checksum) = parse_file_name(&name).unwrap();
        assert_eq!(id, file.id());
        assert_eq!(checksum, file.checksum_hex());

        let digest = Sha1::digest(file.contents());
        assert_eq!(digest.as_slice(), &file.checksum()[..]);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        assert!(parse_file_name(&format!("Hermes_Journal_{hash}")).is_none());
        assert!(parse_file_name(&format!("Hermes_3_{hash}")).is_none());
        assert!(parse_file_name(&format!("Hermes_00_{hash}")).is_none());
        assert!(parse_file_name(&format!("Hermes_51_{hash}")).is_none());
        assert!(parse_file_name("Hermes_03_ABC").is_none());
        assert!(parse_file_name(&format!("Other_03_{hash}")).is_none());

        assert_eq!(parse_journal_name(&journal_name(hash)), Some(hash));
        assert!(parse_journal_name("Hermes_Journal_xyz").is_none());
    }

    #[test]
    fn test_from_name_recovers_size() {
        for (id, size) in [(7, 1), (7, 100), (33, 1000)] {
            let file = RandomFile::new(id, size).unwrap();
            assert_eq!(RandomFile::from_name(&file.name()), Some(file));
        }

        let bogus = format!("Hermes_07_{}", "0".repeat(40));
        assert!(RandomFile::from_name(&bogus).is_none());
        assert!(RandomFile::from_name("Hermes_Journal_x").is_none());
    }

    #[test]
    fn test_id_ranges() {
        assert_eq!(FileId::persistent().count(), 10);
        assert_eq!(FileId::churn().count(), 40);
        assert!(FileId::new(10).unwrap().is_persistent());
        assert!(!FileId::new(10).unwrap().is_churn());
        assert!(FileId::new(11).unwrap().is_churn());
        assert_eq!(FileId::new(7).unwrap().prefix(), "Hermes_07_");
    }

    proptest! {
        #[test]
        fn prop_chunked_reads_match_contents(
            id in 1i64..=50,
            size in 1usize..=1000,
            chunk in 1usize..=97,
        ) {
            let file = RandomFile::new(id, size).unwrap();
            let mut reader = file.reader();
            let mut collected = Vec::new();
            let mut buf = vec![0u8; chunk];
            loop {
                let n = reader.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                prop_assert!(n <= chunk);
                collected.extend_from_slice(&buf[..n]);
            }
            prop_assert_eq!(collected, file.contents());
        }

        #[test]
        fn prop_name_identifies_file(id in 1i64..=50, size in 1usize..=1000) {
            let file = RandomFile::new(id, size).unwrap();
            let name = file.name();
            let (parsed_id, checksum) = parse_file_name(&name).unwrap();
            prop_assert_eq!(parsed_id.get() as i64, id);
            prop_assert_eq!(checksum, hex::encode(Sha1::digest(file.contents())));
        }
    }
}
