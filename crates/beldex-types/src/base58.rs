//! CryptoNote Base58 encoding.
//!
//! Data is split into 8-byte blocks, each encoding to exactly 11 characters;
//! a trailing partial block uses the size table below. This is not
//! Bitcoin's Base58Check.

use crate::constants::CHECKSUM_SIZE;
use crate::keccak256;
use thiserror::Error;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const FULL_BLOCK_SIZE: usize = 8;
const FULL_ENCODED_BLOCK_SIZE: usize = 11;

/// Encoded length for a block of `n` bytes.
const ENCODED_BLOCK_SIZES: [usize; 9] = [0, 2, 3, 5, 6, 7, 9, 10, 11];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Base58Error {
    #[error("invalid character '{0}' at position {1}")]
    InvalidCharacter(char, usize),

    #[error("invalid encoded length {0}")]
    InvalidLength(usize),

    #[error("numeric overflow in block {0}")]
    Overflow(usize),

    #[error("payload too short ({0} bytes)")]
    TooShort(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("varint incomplete or too long")]
    Varint,
}

fn digit(ch: u8) -> Option<u64> {
    ALPHABET.iter().position(|&c| c == ch).map(|p| p as u64)
}

fn decoded_block_size(encoded_len: usize) -> Option<usize> {
    ENCODED_BLOCK_SIZES.iter().position(|&n| n == encoded_len)
}

fn encode_block(block: &[u8], out: &mut String) {
    let size = ENCODED_BLOCK_SIZES[block.len()];
    let mut num = block.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    let mut chars = vec![ALPHABET[0]; size];
    let mut i = size;
    while num > 0 {
        i -= 1;
        chars[i] = ALPHABET[(num % 58) as usize];
        num /= 58;
    }
    out.extend(chars.into_iter().map(char::from));
}

fn decode_block(block: &[u8], index: usize, out: &mut Vec<u8>) -> Result<(), Base58Error> {
    let size = decoded_block_size(block.len()).ok_or(Base58Error::InvalidLength(block.len()))?;
    let mut num: u128 = 0;
    for (pos, &ch) in block.iter().enumerate() {
        let d = digit(ch).ok_or(Base58Error::InvalidCharacter(ch as char, index * 11 + pos))?;
        num = num * 58 + d as u128;
    }
    if size < FULL_BLOCK_SIZE && num >= 1u128 << (8 * size) || num > u64::MAX as u128 {
        return Err(Base58Error::Overflow(index));
    }
    let bytes = (num as u64).to_be_bytes();
    out.extend_from_slice(&bytes[FULL_BLOCK_SIZE - size..]);
    Ok(())
}

/// Encode binary data.
pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() / FULL_BLOCK_SIZE * FULL_ENCODED_BLOCK_SIZE + 11);
    for block in data.chunks(FULL_BLOCK_SIZE) {
        encode_block(block, &mut out);
    }
    out
}

/// Decode a Base58 string.
pub fn decode(encoded: &str) -> Result<Vec<u8>, Base58Error> {
    let bytes = encoded.as_bytes();
    if decoded_block_size(bytes.len() % FULL_ENCODED_BLOCK_SIZE).is_none() {
        return Err(Base58Error::InvalidLength(bytes.len()));
    }
    let mut out = Vec::with_capacity(bytes.len() / FULL_ENCODED_BLOCK_SIZE * FULL_BLOCK_SIZE + 8);
    for (i, block) in bytes.chunks(FULL_ENCODED_BLOCK_SIZE).enumerate() {
        decode_block(block, i, &mut out)?;
    }
    Ok(out)
}

/// Append a LEB128 varint.
pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Read a varint from the start of `data`. Returns (value, bytes read).
pub fn read_varint(data: &[u8]) -> Result<(u64, usize), Base58Error> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(10) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Base58Error::Varint)
}

/// Encode `tag || data || checksum`.
pub fn encode_check(tag: u64, data: &[u8]) -> String {
    let mut payload = Vec::with_capacity(data.len() + 10 + CHECKSUM_SIZE);
    write_varint(tag, &mut payload);
    payload.extend_from_slice(data);
    let checksum = keccak256(&payload);
    payload.extend_from_slice(&checksum[..CHECKSUM_SIZE]);
    encode(&payload)
}

/// Decode and verify a checksummed payload, returning (tag, data).
pub fn decode_check(encoded: &str) -> Result<(u64, Vec<u8>), Base58Error> {
    let decoded = decode(encoded)?;
    if decoded.len() <= CHECKSUM_SIZE {
        return Err(Base58Error::TooShort(decoded.len()));
    }
    let (payload, checksum) = decoded.split_at(decoded.len() - CHECKSUM_SIZE);
    if keccak256(payload)[..CHECKSUM_SIZE] != *checksum {
        return Err(Base58Error::ChecksumMismatch);
    }
    let (tag, read) = read_varint(payload)?;
    Ok((tag, payload[read..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode(&[0u8; 8]), "11111111111");
        assert_eq!(encode(&[0xff]), "5Q");
        assert_eq!(decode("5Q").unwrap(), vec![0xff]);
    }

    #[test]
    fn test_partial_block_lengths() {
        for len in 0..40usize {
            let data: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let encoded = encode(&data);
            assert_eq!(decode(&encoded).unwrap(), data, "len {}", len);
        }
    }

    #[test]
    fn test_invalid_character() {
        assert!(matches!(decode("0OIl"), Err(Base58Error::InvalidLength(_)) | Err(Base58Error::InvalidCharacter(..))));
        assert!(matches!(decode("1O"), Err(Base58Error::InvalidCharacter('O', 1))));
    }

    #[test]
    fn test_overflow_detected() {
        // "zz" decodes to 57*58+57 = 3363 which does not fit in one byte.
        assert_eq!(decode("zz"), Err(Base58Error::Overflow(0)));
    }

    #[test]
    fn test_varint() {
        for v in [0u64, 1, 127, 128, 300, 0x3f36, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(v, &mut buf);
            assert_eq!(read_varint(&buf).unwrap(), (v, buf.len()));
        }
        assert_eq!(read_varint(&[0x80]), Err(Base58Error::Varint));
    }

    #[test]
    fn test_checksum_mismatch() {
        let encoded = encode_check(0xd1, &[0xab; 64]);
        let (tag, data) = decode_check(&encoded).unwrap();
        assert_eq!(tag, 0xd1);
        assert_eq!(data, vec![0xab; 64]);

        let mut corrupted = encoded.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == b'2' { b'3' } else { b'2' };
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(decode_check(&corrupted).is_err());
    }
}
