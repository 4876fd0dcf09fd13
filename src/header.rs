//! uSWID container header.
//!
//! ```text
//! offset size field
//! +0     16   magic
//! +16    1    header version (2)
//! +17    2    header length, little-endian (24)
//! +19    4    payload length, little-endian
//! +23    1    flags (bit 0: payload is zlib compressed)
//! +24    ..   payload
//! ```
//!
//! The container is usually embedded in a larger image, so it is found by
//! scanning for the magic rather than expected at offset 0.

use tracing::debug;

use crate::error::UswidError;

/// uSWID magic signature
pub const USWID_MAGIC: [u8; 16] = [
    0x53, 0x42, 0x4F, 0x4D, 0xD6, 0xBA, 0x2E, 0xAC, 0xA3, 0xE6, 0x7A, 0x52, 0xAA, 0xEE, 0x3B, 0xAF,
];

/// The only header version understood
pub const HEADER_VERSION: u8 = 2;

/// Header size in bytes
pub const HEADER_LEN: usize = 24;

/// Header flags
pub mod flags {
    /// Payload is a zlib (RFC 1950) stream
    pub const COMPRESS_ZLIB: u8 = 0x01;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UswidHeader {
    pub version: u8,
    /// Declared header length. Kept for forward extension, not validated.
    pub header_len: u16,
    pub payload_len: u32,
    pub flags: u8,
}

impl UswidHeader {
    pub fn new(payload_len: u32, compressed: bool) -> Self {
        Self {
            version: HEADER_VERSION,
            header_len: HEADER_LEN as u16,
            payload_len,
            flags: if compressed { flags::COMPRESS_ZLIB } else { 0 },
        }
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flags & flags::COMPRESS_ZLIB != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..16].copy_from_slice(&USWID_MAGIC);
        bytes[16] = self.version;
        bytes[17..19].copy_from_slice(&self.header_len.to_le_bytes());
        bytes[19..23].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes[23] = self.flags;
        bytes
    }

    /// Parse a header from the start of `bytes`, which must begin with the
    /// magic.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, UswidError> {
        if bytes.len() < HEADER_LEN {
            return Err(UswidError::TruncatedContainer {
                offset: 0,
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }
        if bytes[0..16] != USWID_MAGIC {
            return Err(UswidError::MagicNotFound);
        }

        let version = bytes[16];
        if version != HEADER_VERSION {
            return Err(UswidError::UnsupportedHeaderVersion(version));
        }

        Ok(Self {
            version,
            header_len: u16::from_le_bytes([bytes[17], bytes[18]]),
            payload_len: u32::from_le_bytes([bytes[19], bytes[20], bytes[21], bytes[22]]),
            flags: bytes[23],
        })
    }
}

/// A container found inside a larger blob
#[derive(Debug, Clone, Copy)]
pub struct LocatedContainer<'a> {
    /// Offset of the first magic byte within the blob
    pub offset: usize,
    pub header: UswidHeader,
    /// Exactly `header.payload_len` bytes
    pub payload: &'a [u8],
}

/// Offset of the first occurrence of the magic in `blob`.
pub fn find_magic(blob: &[u8]) -> Option<usize> {
    blob.windows(USWID_MAGIC.len())
        .position(|window| window == USWID_MAGIC)
}

/// Locate the first uSWID container in `blob` and slice out its payload.
pub fn locate(blob: &[u8]) -> Result<LocatedContainer<'_>, UswidError> {
    let offset = find_magic(blob).ok_or(UswidError::MagicNotFound)?;
    let header = UswidHeader::from_bytes(&blob[offset..]).map_err(|err| match err {
        UswidError::TruncatedContainer { .. } => UswidError::TruncatedContainer {
            offset,
            needed: offset + HEADER_LEN,
            available: blob.len(),
        },
        other => other,
    })?;

    let start = offset + HEADER_LEN;
    let end = start + header.payload_len as usize;
    if end > blob.len() {
        return Err(UswidError::TruncatedContainer {
            offset,
            needed: end,
            available: blob.len(),
        });
    }

    debug!(
        offset,
        payload_len = header.payload_len,
        compressed = header.is_compressed(),
        "found uSWID container"
    );
    Ok(LocatedContainer {
        offset,
        header,
        payload: &blob[start..end],
    })
}

/// Prefix `payload` with a uSWID header.
pub fn encode(payload: &[u8], compressed: bool) -> Result<Vec<u8>, UswidError> {
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| UswidError::PayloadTooLarge(payload.len()))?;
    let header = UswidHeader::new(payload_len, compressed);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
