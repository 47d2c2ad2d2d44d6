//! Double-SHA256 and hash helpers.

use sha2::{Digest, Sha256};

/// Internal byte order is little-endian; hex display is byte-reversed,
/// matching the convention block explorers use.
pub type Hash256 = [u8; 32];

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

#[derive(Debug, Eq, PartialEq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "expected 64 hex characters"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

fn hex_nibble(byte: u8) -> Result<u8, HexError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(HexError::InvalidHex),
    }
}

pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim().as_bytes();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    let mut bytes = [0u8; 32];
    for (byte_out, pair) in bytes.iter_mut().zip(hex.chunks_exact(2)) {
        *byte_out = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_empty_input() {
        assert_eq!(
            hash256_to_hex(&sha256d(b"")),
            // Reversed display of the well-known double-SHA256 of "".
            "56944c5d3f98413ef45cf54545538103cc9f298e0575820ad3591376e2e0f65d"
        );
    }

    #[test]
    fn hex_round_trip() {
        let hex = "e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468";
        let hash = hash256_from_hex(hex).unwrap();
        assert_eq!(hash256_to_hex(&hash), hex);
        assert_eq!(hash[31], 0xe3);
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert_eq!(hash256_from_hex("abcd"), Err(HexError::InvalidLength));
        let bad = "zz".repeat(32);
        assert_eq!(hash256_from_hex(&bad), Err(HexError::InvalidHex));
    }

    #[test]
    fn hex_rejects_non_ascii_without_panicking() {
        // ÿ is two bytes in UTF-8, so the byte length lands on 64 while
        // every digit position is misaligned.
        let wide = "ÿ".repeat(32);
        assert_eq!(wide.len(), 64);
        assert_eq!(hash256_from_hex(&wide), Err(HexError::InvalidHex));
    }
}
