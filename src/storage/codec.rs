//! Binary framing for key-value log records.
//!
//! Every record is framed as:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! preceded in each file by a magic header. The CRC detects torn or
//! corrupted tails so replay can stop at the last intact record.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current framing version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying fleetfacts store files.
pub const MAGIC: [u8; 4] = *b"FFKV";

/// Records larger than this are rejected as corrupt length prefixes.
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Serializes a record to its framed byte form.
pub fn encode<T: Serialize>(record: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(record)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "record exceeds u32 length"))?;

    let mut framed = Vec::with_capacity(1 + 4 + data.len() + 4);
    framed.push(CODEC_VERSION);
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&data);
    framed.extend_from_slice(&crc.to_le_bytes());
    Ok(framed)
}

/// Reads one framed record, verifying version, length and checksum.
///
/// # Errors
///
/// Fails on an unsupported version byte, an implausible length prefix, a
/// checksum mismatch, or a short read (torn tail).
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported record version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("record size {len} exceeds maximum {MAX_RECORD_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Header length in bytes.
pub const HEADER_LEN: u64 = 5;

/// Reads and validates the file header, returning the version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_roundtrip() {
        let record = ("machine-1".to_string(), 42u64);
        let framed = encode(&record).unwrap();

        let mut cursor = Cursor::new(framed);
        let decoded: (String, u64) = decode(&mut cursor).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_detects_corruption() {
        let mut framed = encode(&"payload".to_string()).unwrap();
        // Flip a bit in the data section.
        framed[7] ^= 0x01;

        let mut cursor = Cursor::new(framed);
        let result: IoResult<String> = decode(&mut cursor);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_oversized_length_prefix() {
        let mut framed = vec![CODEC_VERSION];
        framed.extend_from_slice(&(100_000_000u32).to_le_bytes());

        let mut cursor = Cursor::new(framed);
        let result: IoResult<String> = decode(&mut cursor);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_torn_tail_is_unexpected_eof() {
        let framed = encode(&"payload".to_string()).unwrap();
        let torn = &framed[..framed.len() - 3];

        let mut cursor = Cursor::new(torn);
        let result: IoResult<String> = decode(&mut cursor);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buffer = Vec::new();
        write_header(&mut buffer).unwrap();
        assert_eq!(buffer.len() as u64, HEADER_LEN);

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_header(&mut cursor).unwrap(), CODEC_VERSION);
    }

    #[test]
    fn test_header_rejects_foreign_magic() {
        let mut cursor = Cursor::new(b"JUNK\x01".to_vec());
        assert!(read_header(&mut cursor).is_err());
    }
}
