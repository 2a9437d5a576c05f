// SPDX-License-Identifier: Apache-2.0

//! Text encodings for log files.
//!
//! Record boundaries are found in the raw byte stream (so byte offsets stay exact) using
//! the newline sequence of the configured encoding. Completed records are then decoded
//! to UTF-8 before they are matched against multi-line patterns or emitted.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

/// Name that disables decoding entirely: bytes are passed through untouched.
pub const NOP_ENCODING: &str = "nop";

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw bytes, no decoding
    Nop,
    /// Any encoding known to `encoding_rs`
    Text(&'static encoding_rs::Encoding),
}

impl Encoding {
    /// Look up an encoding by name. Names are matched case-insensitively and an empty
    /// name means UTF-8.
    pub fn lookup(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(Encoding::Text(encoding_rs::UTF_8));
        }
        if trimmed.eq_ignore_ascii_case(NOP_ENCODING) {
            return Ok(Encoding::Nop);
        }
        encoding_rs::Encoding::for_label(trimmed.as_bytes())
            .map(Encoding::Text)
            .ok_or_else(|| Error::UnsupportedEncoding(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Nop => NOP_ENCODING,
            Encoding::Text(enc) => enc.name(),
        }
    }

    /// Width in bytes of one code unit. Newlines and truncation points are aligned to it.
    pub fn unit_width(&self) -> usize {
        match self {
            Encoding::Text(enc) if is_utf16(enc) => 2,
            _ => 1,
        }
    }

    fn newline(&self) -> &'static [u8] {
        match self {
            Encoding::Text(enc) if *enc == encoding_rs::UTF_16LE => b"\n\0",
            Encoding::Text(enc) if *enc == encoding_rs::UTF_16BE => b"\0\n",
            _ => b"\n",
        }
    }

    fn carriage_return(&self) -> &'static [u8] {
        match self {
            Encoding::Text(enc) if *enc == encoding_rs::UTF_16LE => b"\r\0",
            Encoding::Text(enc) if *enc == encoding_rs::UTF_16BE => b"\0\r",
            _ => b"\r",
        }
    }

    /// Find the first newline in `data`. Returns the index where the newline starts and
    /// the index just past it.
    pub fn find_newline(&self, data: &[u8]) -> Option<(usize, usize)> {
        let newline = self.newline();
        let start = match self.unit_width() {
            1 => data.iter().position(|&b| b == newline[0]),
            width => data
                .chunks_exact(width)
                .position(|unit| unit == newline)
                .map(|i| i * width),
        }?;
        Some((start, start + newline.len()))
    }

    /// Strip one trailing newline and a carriage return before it.
    pub fn trim_line_ending<'a>(&self, mut data: &'a [u8]) -> &'a [u8] {
        if let Some(stripped) = data.strip_suffix(self.newline()) {
            data = stripped;
        }
        data.strip_suffix(self.carriage_return()).unwrap_or(data)
    }

    /// Round `len` down to a code unit boundary.
    pub fn align(&self, len: usize) -> usize {
        len - len % self.unit_width()
    }

    /// Decode raw bytes to UTF-8. Malformed sequences become U+FFFD.
    pub fn decode<'a>(&self, raw: &'a [u8]) -> Cow<'a, [u8]> {
        match self {
            Encoding::Nop => Cow::Borrowed(raw),
            Encoding::Text(enc) => match enc.decode_without_bom_handling(raw) {
                (Cow::Borrowed(s), _) => Cow::Borrowed(s.as_bytes()),
                (Cow::Owned(s), _) => Cow::Owned(s.into_bytes()),
            },
        }
    }
}

fn is_utf16(enc: &encoding_rs::Encoding) -> bool {
    enc == encoding_rs::UTF_16LE || enc == encoding_rs::UTF_16BE
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Text(encoding_rs::UTF_8)
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoding({})", self.name())
    }
}
