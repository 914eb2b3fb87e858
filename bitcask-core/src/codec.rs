//! Binary record (entry) format: encode/decode one record and compute/verify its CRC.
//!
//! Layout (29-byte header, little-endian, packed):
//!
//! ```text
//! offset  size  field
//! 0       4     crc32_ieee(header[4..29] || key || value)
//! 4       8     position    (informational; zero is acceptable)
//! 12      8     timestamp
//! 20      4     keySize
//! 24      4     valueSize
//! 28      1     flag        (0 = live, 1 = tombstone)
//! 29      kS    key
//! 29+kS   vS    value       (omitted when flag == TOMBSTONE_FLAG)
//! ```
//!
//! CRC is computed exactly once, over `header[4..29] || key || value`, at both encode and
//! decode time.

use std::convert::TryInto;

pub const HEADER_SIZE: usize = 29;
pub const LIVE_FLAG: u8 = 0;
pub const TOMBSTONE_FLAG: u8 = 1;

/// Decoded fixed-size header of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub crc: u32,
    pub position: u64,
    pub timestamp: u64,
    pub key_size: u32,
    pub value_size: u32,
    pub flag: u8,
}

impl Header {
    pub fn is_tombstone(&self) -> bool {
        self.flag == TOMBSTONE_FLAG
    }

    /// Size of the payload region on disk (key plus, for live entries, value).
    pub fn payload_len(&self) -> usize {
        self.key_size as usize + self.value_size as usize
    }

    /// Total on-disk size of the entry this header describes.
    pub fn entry_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// The 25 header bytes that participate in the CRC (everything after the crc field
    /// itself), reconstructed from the decoded fields rather than kept around as a slice.
    fn tail_bytes(&self) -> [u8; HEADER_SIZE - 4] {
        let mut tail = [0u8; HEADER_SIZE - 4];
        tail[0..8].copy_from_slice(&self.position.to_le_bytes());
        tail[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        tail[16..20].copy_from_slice(&self.key_size.to_le_bytes());
        tail[20..24].copy_from_slice(&self.value_size.to_le_bytes());
        tail[24] = self.flag;
        tail
    }
}

/// A single decoded record: header, key, and (for live entries) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub header: Header,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    /// Builds a live entry (flag = 0) ready to encode.
    pub fn new_live(key: Vec<u8>, value: Vec<u8>, timestamp: u64) -> Self {
        let header = Header {
            crc: 0,
            position: 0,
            timestamp,
            key_size: key.len() as u32,
            value_size: value.len() as u32,
            flag: LIVE_FLAG,
        };
        Entry { header, key, value }
    }

    /// Builds a tombstone entry (flag = 1, no value bytes on disk) ready to encode.
    pub fn new_tombstone(key: Vec<u8>, timestamp: u64) -> Self {
        let header = Header {
            crc: 0,
            position: 0,
            timestamp,
            key_size: key.len() as u32,
            value_size: 0,
            flag: TOMBSTONE_FLAG,
        };
        Entry {
            header,
            key,
            value: Vec::new(),
        }
    }

    /// Total on-disk size this entry will occupy once encoded.
    pub fn size(&self) -> usize {
        self.header.entry_len()
    }

    /// Encodes this entry into a freshly allocated, exactly-sized buffer.
    pub fn encode(&self) -> Vec<u8> {
        let is_tombstone = self.header.is_tombstone();
        let value_bytes: &[u8] = if is_tombstone { &[] } else { &self.value };
        let mut buf = vec![0u8; HEADER_SIZE + self.key.len() + value_bytes.len()];

        buf[4..12].copy_from_slice(&self.header.position.to_le_bytes());
        buf[12..20].copy_from_slice(&self.header.timestamp.to_le_bytes());
        buf[20..24].copy_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf[24..28].copy_from_slice(&(value_bytes.len() as u32).to_le_bytes());
        buf[28] = self.header.flag;
        buf[HEADER_SIZE..HEADER_SIZE + self.key.len()].copy_from_slice(&self.key);
        buf[HEADER_SIZE + self.key.len()..].copy_from_slice(value_bytes);

        let crc = crc_of(&buf[4..HEADER_SIZE], &self.key, value_bytes);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());
        buf
    }
}

/// Decodes the fixed 29-byte header from the start of `buf`.
///
/// `buf` must contain at least `HEADER_SIZE` bytes; only the first `HEADER_SIZE` are read.
pub fn decode_header(buf: &[u8]) -> Header {
    Header {
        crc: u32::from_le_bytes(buf[0..4].try_into().expect("4-byte slice")),
        position: u64::from_le_bytes(buf[4..12].try_into().expect("8-byte slice")),
        timestamp: u64::from_le_bytes(buf[12..20].try_into().expect("8-byte slice")),
        key_size: u32::from_le_bytes(buf[20..24].try_into().expect("4-byte slice")),
        value_size: u32::from_le_bytes(buf[24..28].try_into().expect("4-byte slice")),
        flag: buf[28],
    }
}

/// Splits the payload region following a header into `(key, value)`. `buf` must be exactly
/// `header.payload_len()` bytes. `value` is empty when the header marks a tombstone, even if
/// `value_size` was nonzero (tombstones never carry value bytes on disk).
pub fn decode_payload(header: &Header, buf: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let key_size = header.key_size as usize;
    let key = buf[0..key_size].to_vec();
    let value = if header.is_tombstone() {
        Vec::new()
    } else {
        buf[key_size..key_size + header.value_size as usize].to_vec()
    };
    (key, value)
}

/// Computes the CRC over `header_tail || key || value` in a single pass.
pub fn crc_of(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut buf = Vec::with_capacity(header_tail.len() + key.len() + value.len());
    buf.extend_from_slice(header_tail);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    crc32(&buf)
}

/// Recomputes the CRC for a decoded header/key/value triple and compares it against
/// `header.crc`. Returns the mismatching computed value on failure so the caller can
/// report both sides.
pub fn verify_crc(header: &Header, key: &[u8], value: &[u8]) -> Result<(), u32> {
    let value_for_crc: &[u8] = if header.is_tombstone() { &[] } else { value };
    let actual = crc_of(&header.tail_bytes(), key, value_for_crc);
    if actual == header.crc {
        Ok(())
    } else {
        Err(actual)
    }
}

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut j = 0;
        while j < 8 {
            if c & 1 == 1 {
                c = 0xEDB8_8320 ^ (c >> 1);
            } else {
                c >>= 1;
            }
            j += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = build_crc32_table();

/// CRC-32 (IEEE polynomial), computed from a const-evaluated lookup table rather than an
/// external crate.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = CRC32_TABLE[idx] ^ (crc >> 8);
    }
    !crc
}
