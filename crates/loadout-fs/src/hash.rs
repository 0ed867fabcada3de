//! xxHash3 content hashing
//!
//! All file identities in the synchronizer are 64-bit xxHash3 digests. Files
//! are hashed by streaming, never by trusting timestamps.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::{Error, Result};

const READ_BUFFER: usize = 64 * 1024;

/// Byte length of a file.
pub type Size = u64;

/// 64-bit xxHash3 digest, displayed as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub u64);

impl Hash {
    /// Reserved for "no content".
    pub const ZERO: Hash = Hash(0);

    pub fn of(bytes: &[u8]) -> Self {
        hash_bytes(bytes)
    }

    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    /// First two hex digits, used to shard stores on disk.
    pub fn shard(self) -> String {
        format!("{:02x}", self.0 >> 56)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Hash {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        u64::from_str_radix(s.trim_start_matches("0x"), 16).map(Hash)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash {
    Hash(xxh3_64(bytes))
}

/// Stream a file through xxHash3, returning its hash and size.
pub fn hash_file(path: &Path) -> Result<(Hash, Size)> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    hash_reader(&mut file).map_err(|e| Error::io(path, e))
}

pub fn hash_reader(reader: &mut impl Read) -> std::io::Result<(Hash, Size)> {
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut size: Size = 0;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as Size;
    }
    Ok((Hash(hasher.digest()), size))
}
