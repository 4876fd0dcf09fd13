//! Record stream: CoSWID tags concatenated back to back with no framing,
//! optionally zlib compressed as a whole.

use std::io::{Read, Write};

use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use minicbor::Decoder;
use tracing::debug;

use crate::cbor;
use crate::error::UswidError;
use crate::identity::SoftwareIdentity;

/// Concatenate the CBOR encoding of every tag, then optionally deflate the
/// whole stream.
pub fn encode(records: &[SoftwareIdentity], compress: bool) -> Result<Vec<u8>, UswidError> {
    let mut stream = Vec::new();
    for record in records {
        stream.extend_from_slice(&cbor::encode_identity(record)?);
    }
    if !compress {
        return Ok(stream);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&stream).map_err(UswidError::Compression)?;
    let compressed = encoder.finish().map_err(UswidError::Compression)?;
    debug!(
        raw = stream.len(),
        compressed = compressed.len(),
        "zlib compressed record stream"
    );
    Ok(compressed)
}

/// Decode the tags of a container payload.
///
/// `payload_len` is authoritative: only that many bytes of `payload` are
/// looked at, whatever follows them. When `compressed`, those bytes must be
/// one complete zlib stream, and the tags are read until the inflated data
/// is exhausted.
pub fn decode(
    payload: &[u8],
    payload_len: usize,
    compressed: bool,
) -> Result<Vec<SoftwareIdentity>, UswidError> {
    if payload.len() < payload_len {
        return Err(UswidError::ShortPayload {
            declared: payload_len,
            consumed: payload.len(),
        });
    }
    let bounded = &payload[..payload_len];
    if !compressed {
        return decode_records(bounded);
    }

    let mut decoder = ZlibDecoder::new(bounded);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(UswidError::Compression)?;
    let consumed = decoder.total_in() as usize;
    if consumed != payload_len {
        return Err(UswidError::ShortPayload {
            declared: payload_len,
            consumed,
        });
    }
    debug!(compressed = payload_len, inflated = inflated.len(), "inflated record stream");
    decode_records(&inflated)
}

/// Decode a bare record stream such as a `.cbor` file, inflating it first
/// if it is a zlib stream.
///
/// Some map headers (`0xa8`, `0xb8`) also form a valid zlib CMF/FLG pair
/// with the byte after them, so a stream that merely looks compressed is
/// first tried as plain CBOR.
pub fn decode_raw(bytes: &[u8]) -> Result<Vec<SoftwareIdentity>, UswidError> {
    if !looks_like_zlib(bytes) {
        return decode(bytes, bytes.len(), false);
    }
    match decode(bytes, bytes.len(), false) {
        Ok(records) => Ok(records),
        Err(plain) => {
            debug!(error = %plain, "not a plain record stream, inflating");
            decode(bytes, bytes.len(), true)
        }
    }
}

fn looks_like_zlib(bytes: &[u8]) -> bool {
    match bytes {
        [cmf, flg, ..] => {
            *cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

fn decode_records(stream: &[u8]) -> Result<Vec<SoftwareIdentity>, UswidError> {
    let mut records = Vec::new();
    let mut decoder = Decoder::new(stream);
    while decoder.position() < stream.len() {
        let offset = decoder.position();
        let record = cbor::decode_identity(&mut decoder)
            .map_err(|source| UswidError::RecordDecode { offset, source })?;
        debug!(
            offset,
            len = decoder.position() - offset,
            tag_id = %record.tag_id,
            "decoded CoSWID tag"
        );
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{generate_tag_id, SoftwareMeta};

    fn records() -> Vec<SoftwareIdentity> {
        ["alpha", "beta", "gamma"]
            .iter()
            .map(|name| {
                let mut id = SoftwareIdentity::new(generate_tag_id(name), *name);
                id.software_version = Some("1.0".to_string());
                id.add_software_meta(SoftwareMeta::with_summary(format!("{} component", name)));
                id
            })
            .collect()
    }

    #[test]
    fn test_stream_is_plain_concatenation() {
        let recs = records();
        let stream = encode(&recs, false).unwrap();
        let expected: Vec<u8> = recs
            .iter()
            .flat_map(|r| cbor::encode_identity(r).unwrap())
            .collect();
        assert_eq!(stream, expected);
    }

    #[test]
    fn test_roundtrip_uncompressed_and_compressed() {
        let recs = records();
        for compress in [false, true] {
            let stream = encode(&recs, compress).unwrap();
            assert_eq!(decode(&stream, stream.len(), compress).unwrap(), recs);
        }
    }

    #[test]
    fn test_trailing_bytes_beyond_length_are_ignored() {
        let recs = records();
        let mut stream = encode(&recs[..1], false).unwrap();
        let len = stream.len();
        // Something that would decode as another tag if it were looked at
        stream.extend(cbor::encode_identity(&recs[1]).unwrap());
        assert_eq!(decode(&stream, len, false).unwrap(), recs[..1].to_vec());
    }

    #[test]
    fn test_payload_shorter_than_declared() {
        let stream = encode(&records(), false).unwrap();
        let err = decode(&stream, stream.len() + 4, false).unwrap_err();
        assert!(matches!(err, UswidError::ShortPayload { declared, consumed }
            if declared == stream.len() + 4 && consumed == stream.len()));
    }

    #[test]
    fn test_zlib_stream_ending_early_is_short_payload() {
        let mut stream = encode(&records(), true).unwrap();
        let zlib_len = stream.len();
        stream.extend_from_slice(&[0u8; 5]);
        let err = decode(&stream, stream.len(), true).unwrap_err();
        assert!(matches!(err, UswidError::ShortPayload { declared, consumed }
            if declared == zlib_len + 5 && consumed == zlib_len));
    }

    #[test]
    fn test_corrupt_zlib_is_compression_error() {
        let garbage = [0x78, 0x9c, 0xff, 0xff, 0xff, 0xff];
        let err = decode(&garbage, garbage.len(), true).unwrap_err();
        assert!(matches!(err, UswidError::Compression(_)));
    }

    #[test]
    fn test_cut_record_is_decode_error() {
        let stream = encode(&records(), false).unwrap();
        let err = decode(&stream, stream.len() - 2, false).unwrap_err();
        assert!(matches!(err, UswidError::RecordDecode { offset, .. } if offset > 0));
    }

    #[test]
    fn test_decode_raw_sniffs_compression() {
        let recs = records();
        let plain = encode(&recs, false).unwrap();
        let packed = encode(&recs, true).unwrap();
        assert!(!looks_like_zlib(&plain));
        assert!(looks_like_zlib(&packed));
        assert_eq!(decode_raw(&plain).unwrap(), recs);
        assert_eq!(decode_raw(&packed).unwrap(), recs);

        // map(8) whose first key is the private-use key -20: `a8 33` is also
        // a valid zlib header
        let mut record = Vec::new();
        let mut enc = minicbor::Encoder::new(&mut record);
        enc.map(8).unwrap();
        enc.i64(-20).unwrap().str("vendor").unwrap();
        enc.u64(0).unwrap().str("tag").unwrap();
        enc.u64(1).unwrap().str("name").unwrap();
        enc.u64(8).unwrap().bool(true).unwrap();
        enc.u64(9).unwrap().bool(true).unwrap();
        enc.u64(11).unwrap().bool(true).unwrap();
        enc.u64(12).unwrap().u64(1).unwrap();
        enc.u64(13).unwrap().str("1.0").unwrap();
        assert_eq!(&record[..2], &[0xa8, 0x33]);
        assert!(looks_like_zlib(&record));

        let decoded = decode_raw(&record).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].software_name, "name");
        assert!(decoded[0].supplemental);
    }

    #[test]
    fn test_empty_stream() {
        assert!(decode(&[], 0, false).unwrap().is_empty());
        assert!(encode(&[], false).unwrap().is_empty());
    }
}
