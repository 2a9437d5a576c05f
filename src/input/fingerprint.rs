// SPDX-License-Identifier: Apache-2.0

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A fingerprint identifies a file by the first N bytes of its content.
/// This allows tracking files even if they are renamed or moved.
///
/// A fingerprint shorter than the configured size is incomplete: the file had fewer
/// bytes when it was taken, and a later fingerprint of the same file starts with it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Read up to `size` bytes from the start of the file.
    pub fn new(file: &mut File, size: usize) -> io::Result<Self> {
        file.seek(SeekFrom::Start(0))?;

        let mut first_bytes = Vec::with_capacity(size);
        file.take(size as u64).read_to_end(&mut first_bytes)?;

        Ok(Self { first_bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { first_bytes: bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// Whether `other` is a prefix of this fingerprint. This is how a growing file is
    /// recognized: its fingerprint extends the one taken while it was smaller.
    pub fn starts_with(&self, other: &Fingerprint) -> bool {
        // Empty fingerprints never match
        if other.is_empty() {
            return false;
        }
        self.first_bytes.starts_with(&other.first_bytes)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Shows the length and a short printable preview, e.g. `42b:"2024-01-01 ..."`
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 16;
        let preview: String = self.first_bytes[..self.len().min(PREVIEW)]
            .iter()
            .map(|&b| match b {
                0x20..=0x7e => b as char,
                _ => '.',
            })
            .collect();
        let ellipsis = if self.len() > PREVIEW { "..." } else { "" };
        write!(f, "{}b:\"{}{}\"", self.len(), preview, ellipsis)
    }
}

// Stored as base64 so checkpoint files stay valid JSON whatever the file contents
impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.first_bytes))
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Self::from_bytes)
            .map_err(serde::de::Error::custom)
    }
}
