//! Content identifiers and their canonical hex form.
//!
//! A [`ContentIdentifier`] is the 256-bit fingerprint of an object's bytes.
//! Its external form is 64 lowercase hex characters; decoding accepts
//! either case but nothing else.
//!
//! The fingerprint function itself is a black box to the rest of the crate.
//! [`Fingerprinter`] exposes it through the incremental
//! `new` / `update` / `finalize` contract, backed by SHA-256.

use crate::constants::IDENTIFIER_LEN;
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Encodes `bytes` as lowercase hex, two characters per byte.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decodes exactly `N` bytes from a hex string.
///
/// # Errors
///
/// [`Error::InvalidFormat`] if the string has odd length, the wrong length
/// for `N` bytes, or any character outside `[0-9a-fA-F]`.
pub fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N]> {
    if s.len() % 2 != 0 {
        return Err(Error::InvalidFormat(format!(
            "hex string has odd length {}",
            s.len()
        )));
    }
    if s.len() != N * 2 {
        return Err(Error::InvalidFormat(format!(
            "hex string has length {}, expected {}",
            s.len(),
            N * 2
        )));
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out)
        .map_err(|e| Error::InvalidFormat(format!("invalid hex string: {e}")))?;
    Ok(out)
}

/// 256-bit content fingerprint used as a write-once store key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentIdentifier([u8; IDENTIFIER_LEN]);

impl ContentIdentifier {
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    /// Fingerprints an in-memory object.
    pub fn of(data: &[u8]) -> Self {
        let mut fp = Fingerprinter::new();
        fp.update(data);
        fp.finalize()
    }

    /// Fingerprints everything readable from `reader`.
    pub fn of_reader(reader: &mut impl Read) -> io::Result<Self> {
        let mut fp = Fingerprinter::new();
        io::copy(reader, &mut fp)?;
        Ok(fp.finalize())
    }

    /// Canonical 64-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        decode_hex(s).map(Self)
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentIdentifier({})", self.to_hex())
    }
}

impl FromStr for ContentIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<[u8; IDENTIFIER_LEN]> for ContentIdentifier {
    fn from(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }
}

/// Incremental content fingerprint.
#[derive(Clone, Default)]
pub struct Fingerprinter {
    hasher: Sha256,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> ContentIdentifier {
        ContentIdentifier(self.hasher.finalize().into())
    }
}

impl io::Write for Fingerprinter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_lowercase_fixed_width() {
        let hex = encode_hex(&[0xAB; IDENTIFIER_LEN]);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn test_decode_accepts_mixed_case() {
        let bytes: [u8; 2] = decode_hex("aBcD").unwrap();
        assert_eq!(bytes, [0xab, 0xcd]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert!(decode_hex::<2>("abc").is_err());
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut fp = Fingerprinter::new();
        fp.update(b"hello ");
        fp.update(b"world");
        assert_eq!(fp.finalize(), ContentIdentifier::of(b"hello world"));
    }
}
