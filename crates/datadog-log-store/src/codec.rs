// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary frame codec for records and journal tombstones.
//!
//! Every frame embeds its own length and a CRC32 of its body, so frames can be
//! concatenated on disk (the journal) or on the wire (batch bodies) and split
//! again later.
//!
//! # Frame layout
//!
//! All integers are little endian.
//!
//! ```text
//! [4 bytes: body_len][body_len bytes: body][4 bytes: crc32(body)]
//!
//! record body:    [1: kind=1][8: sequence][8: timestamp_ms][1: state][payload...]
//! tombstone body: [1: kind=2][8: sequence]
//! ```
//!
//! Decoding never panics: any byte sequence yields either a frame or a
//! [`DecodeError`].

use thiserror::Error;

use crate::record::{DeliveryState, Record};

/// Largest payload a single record may carry.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

const LEN_PREFIX_BYTES: usize = 4;
const CRC_BYTES: usize = 4;
const KIND_RECORD: u8 = 1;
const KIND_TOMBSTONE: u8 = 2;
const RECORD_HEADER_BYTES: usize = 1 + 8 + 8 + 1;
const TOMBSTONE_BODY_BYTES: usize = 1 + 8;
const MAX_BODY_BYTES: usize = RECORD_HEADER_BYTES + MAX_PAYLOAD_BYTES;

/// Errors returned when a byte sequence is not a valid frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("frame checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum { stored: u32, computed: u32 },

    #[error("declared frame body of {0} bytes exceeds the maximum frame size")]
    LengthOverflow(usize),

    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("unknown delivery state {0}")]
    UnknownState(u8),

    #[error("malformed frame body: {0}")]
    Malformed(&'static str),

    #[error("expected a record frame, found a tombstone")]
    NotARecord,

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// A decoded journal frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Record(Record),
    /// Marks the record with this sequence number as purged.
    Tombstone(u64),
}

/// Encodes a record as a standalone frame.
#[must_use]
pub fn encode(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(record));
    encode_record_into(record, &mut buf);
    buf
}

/// Decodes exactly one record frame. Trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<Record, DecodeError> {
    let (frame, used) = decode_frame(bytes)?;
    if used != bytes.len() {
        return Err(DecodeError::TrailingBytes(bytes.len() - used));
    }
    match frame {
        Frame::Record(record) => Ok(record),
        Frame::Tombstone(_) => Err(DecodeError::NotARecord),
    }
}

/// Number of bytes [`encode`] produces for `record`.
#[must_use]
pub fn encoded_len(record: &Record) -> usize {
    LEN_PREFIX_BYTES + RECORD_HEADER_BYTES + record.payload.len() + CRC_BYTES
}

/// Number of bytes a tombstone frame occupies.
#[must_use]
pub const fn tombstone_len() -> usize {
    LEN_PREFIX_BYTES + TOMBSTONE_BODY_BYTES + CRC_BYTES
}

/// Appends the frame for `record` to `buf`.
pub fn encode_record_into(record: &Record, buf: &mut Vec<u8>) {
    let body_start = buf.len() + LEN_PREFIX_BYTES;
    let body_len = RECORD_HEADER_BYTES + record.payload.len();
    // Payloads are bounded by MAX_PAYLOAD_BYTES, far below u32::MAX.
    buf.extend_from_slice(&(body_len as u32).to_le_bytes());
    buf.push(KIND_RECORD);
    buf.extend_from_slice(&record.sequence.to_le_bytes());
    buf.extend_from_slice(&record.timestamp_ms.to_le_bytes());
    buf.push(record.state.to_byte());
    buf.extend_from_slice(&record.payload);
    let crc = crc32fast::hash(&buf[body_start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Appends a tombstone frame for `sequence` to `buf`.
pub fn encode_tombstone_into(sequence: u64, buf: &mut Vec<u8>) {
    let body_start = buf.len() + LEN_PREFIX_BYTES;
    buf.extend_from_slice(&(TOMBSTONE_BODY_BYTES as u32).to_le_bytes());
    buf.push(KIND_TOMBSTONE);
    buf.extend_from_slice(&sequence.to_le_bytes());
    let crc = crc32fast::hash(&buf[body_start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Decodes the first frame in `bytes`, returning it with the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), DecodeError> {
    let body_len = read_body_len(bytes)?;
    let total = LEN_PREFIX_BYTES + body_len + CRC_BYTES;
    if bytes.len() < total {
        return Err(DecodeError::Truncated {
            needed: total,
            available: bytes.len(),
        });
    }

    let body = &bytes[LEN_PREFIX_BYTES..LEN_PREFIX_BYTES + body_len];
    let stored = read_u32(&bytes[LEN_PREFIX_BYTES + body_len..total]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(DecodeError::Checksum { stored, computed });
    }

    Ok((decode_body(body)?, total))
}

fn read_body_len(bytes: &[u8]) -> Result<usize, DecodeError> {
    if bytes.len() < LEN_PREFIX_BYTES {
        return Err(DecodeError::Truncated {
            needed: LEN_PREFIX_BYTES,
            available: bytes.len(),
        });
    }
    let body_len = read_u32(&bytes[..LEN_PREFIX_BYTES]) as usize;
    if body_len > MAX_BODY_BYTES {
        return Err(DecodeError::LengthOverflow(body_len));
    }
    Ok(body_len)
}

fn decode_body(body: &[u8]) -> Result<Frame, DecodeError> {
    let Some(&kind) = body.first() else {
        return Err(DecodeError::Malformed("empty body"));
    };

    match kind {
        KIND_RECORD => {
            if body.len() < RECORD_HEADER_BYTES {
                return Err(DecodeError::Malformed("record header too short"));
            }
            let sequence = read_u64(&body[1..9]);
            let timestamp_ms = read_u64(&body[9..17]);
            let state =
                DeliveryState::from_byte(body[17]).ok_or(DecodeError::UnknownState(body[17]))?;
            Ok(Frame::Record(Record {
                sequence,
                payload: body[RECORD_HEADER_BYTES..].to_vec(),
                timestamp_ms,
                state,
            }))
        }
        KIND_TOMBSTONE => {
            if body.len() != TOMBSTONE_BODY_BYTES {
                return Err(DecodeError::Malformed("tombstone body has the wrong length"));
            }
            Ok(Frame::Tombstone(read_u64(&body[1..9])))
        }
        other => Err(DecodeError::UnknownKind(other)),
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// A region that could not be decoded. Reading resumed at the next offset
/// holding a valid frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptFrame {
    /// Offset of the frame's length prefix in the buffer.
    pub offset: usize,
    /// Number of bytes skipped.
    pub len: usize,
    pub error: DecodeError,
}

/// Iterates over a buffer of concatenated frames.
///
/// A frame that fails to decode is yielded as `Err(CorruptFrame)` covering
/// the bytes up to the next offset where a frame decodes with a valid
/// checksum. When its declared extent ends on such a frame, that is where
/// reading resumes; otherwise the buffer is scanned byte by byte. Reading
/// stops only when no valid frame follows the damage (a torn tail), and
/// [`FrameReader::valid_len`] then reports where the readable prefix ends.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> FrameReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        FrameReader {
            buf,
            offset: 0,
            done: false,
        }
    }

    /// Offset just past the last frame consumed, corrupt regions included.
    #[must_use]
    pub fn valid_len(&self) -> usize {
        self.offset
    }

    fn decodes_at(&self, offset: usize) -> bool {
        decode_frame(&self.buf[offset..]).is_ok()
    }

    /// First offset at or after `from` where a frame decodes.
    fn resync(&self, from: usize) -> Option<usize> {
        (from..self.buf.len()).find(|&offset| self.decodes_at(offset))
    }
}

impl Iterator for FrameReader<'_> {
    type Item = Result<Frame, CorruptFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.buf.len() {
            return None;
        }

        let rest = &self.buf[self.offset..];
        let error = match decode_frame(rest) {
            Ok((frame, used)) => {
                self.offset += used;
                return Some(Ok(frame));
            }
            Err(error) => error,
        };

        // Only trust the length prefix when it fits the buffer and points
        // at a frame boundary.
        let declared_end = match error {
            DecodeError::Truncated { .. } | DecodeError::LengthOverflow(_) => None,
            _ => read_body_len(rest)
                .ok()
                .map(|body_len| self.offset + LEN_PREFIX_BYTES + body_len + CRC_BYTES)
                .filter(|&end| end <= self.buf.len()),
        };
        let next = match declared_end {
            Some(end) if end == self.buf.len() || self.decodes_at(end) => Some(end),
            _ => self.resync(self.offset + 1),
        };

        let Some(next) = next else {
            self.done = true;
            return None;
        };
        let corrupt = CorruptFrame {
            offset: self.offset,
            len: next - self.offset,
            error,
        };
        self.offset = next;
        Some(Err(corrupt))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(sequence: u64, payload: &[u8]) -> Record {
        Record {
            sequence,
            payload: payload.to_vec(),
            timestamp_ms: 1_700_000_000_000,
            state: DeliveryState::Pending,
        }
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let original = record(1, b"");
        let bytes = encode(&original);

        assert_eq!(bytes.len(), encoded_len(&original));
        assert_eq!(decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_round_trip_max_payload() {
        let original = record(u64::MAX, &vec![0xAB; MAX_PAYLOAD_BYTES]);
        let bytes = encode(&original);

        assert_eq!(decode(&bytes).unwrap(), original);
    }

    #[test]
    fn test_round_trip_every_state() {
        for state in [
            DeliveryState::Pending,
            DeliveryState::InFlight,
            DeliveryState::Delivered,
            DeliveryState::FailedPermanent,
        ] {
            let original = Record {
                state,
                ..record(9, b"state")
            };
            assert_eq!(decode(&encode(&original)).unwrap(), original);
        }
    }

    #[test]
    fn test_decode_empty_input_is_truncated() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::Truncated {
                needed: 4,
                available: 0
            })
        );
    }

    #[test]
    fn test_decode_truncated_body() {
        let bytes = encode(&record(3, b"payload"));

        let result = decode(&bytes[..bytes.len() - 1]);

        assert!(matches!(result, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_decode_flipped_payload_bit_fails_checksum() {
        let mut bytes = encode(&record(3, b"payload"));
        let last_payload_byte = bytes.len() - CRC_BYTES - 1;
        bytes[last_payload_byte] ^= 0x01;

        assert!(matches!(decode(&bytes), Err(DecodeError::Checksum { .. })));
    }

    #[test]
    fn test_decode_length_overflow() {
        let bytes = u32::MAX.to_le_bytes();

        assert_eq!(
            decode(&bytes),
            Err(DecodeError::LengthOverflow(u32::MAX as usize))
        );
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode(&record(3, b"payload"));
        bytes.extend_from_slice(b"xx");

        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes(2)));
    }

    #[test]
    fn test_decode_tombstone_is_not_a_record() {
        let mut bytes = Vec::new();
        encode_tombstone_into(5, &mut bytes);

        assert_eq!(bytes.len(), tombstone_len());
        assert_eq!(decode(&bytes), Err(DecodeError::NotARecord));
        assert_eq!(decode_frame(&bytes).unwrap(), (Frame::Tombstone(5), bytes.len()));
    }

    #[test]
    fn test_decode_unknown_state() {
        let mut bytes = encode(&record(3, b"x"));
        // state byte sits right after kind, sequence and timestamp
        bytes[LEN_PREFIX_BYTES + 17] = 99;
        let body_end = bytes.len() - CRC_BYTES;
        let crc = crc32fast::hash(&bytes[LEN_PREFIX_BYTES..body_end]);
        bytes[body_end..].copy_from_slice(&crc.to_le_bytes());

        assert_eq!(decode(&bytes), Err(DecodeError::UnknownState(99)));
    }

    #[test]
    fn test_frame_reader_splits_concatenated_frames() {
        let mut buf = Vec::new();
        encode_record_into(&record(1, b"a"), &mut buf);
        encode_tombstone_into(1, &mut buf);
        encode_record_into(&record(2, b"bb"), &mut buf);

        let frames: Vec<_> = FrameReader::new(&buf).map(Result::unwrap).collect();

        assert_eq!(
            frames,
            vec![
                Frame::Record(record(1, b"a")),
                Frame::Tombstone(1),
                Frame::Record(record(2, b"bb")),
            ]
        );
    }

    #[test]
    fn test_frame_reader_skips_corrupt_frame() {
        let mut buf = Vec::new();
        encode_record_into(&record(1, b"first"), &mut buf);
        let corrupt_at = buf.len();
        encode_record_into(&record(2, b"second"), &mut buf);
        encode_record_into(&record(3, b"third"), &mut buf);
        buf[corrupt_at + LEN_PREFIX_BYTES + RECORD_HEADER_BYTES] ^= 0xFF;

        let mut reader = FrameReader::new(&buf);
        let items: Vec<_> = reader.by_ref().collect();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(Frame::Record(record(1, b"first"))));
        let corrupt = items[1].clone().unwrap_err();
        assert_eq!(corrupt.offset, corrupt_at);
        assert!(matches!(corrupt.error, DecodeError::Checksum { .. }));
        assert_eq!(items[2], Ok(Frame::Record(record(3, b"third"))));
        assert_eq!(reader.valid_len(), buf.len());
    }

    #[test]
    fn test_frame_reader_stops_at_torn_tail() {
        let mut buf = Vec::new();
        encode_record_into(&record(1, b"complete"), &mut buf);
        let complete_len = buf.len();
        encode_record_into(&record(2, b"torn"), &mut buf);
        buf.truncate(buf.len() - 3);

        let mut reader = FrameReader::new(&buf);
        let frames: Vec<_> = reader.by_ref().collect();

        assert_eq!(frames, vec![Ok(Frame::Record(record(1, b"complete")))]);
        assert_eq!(reader.valid_len(), complete_len);
    }

    #[test]
    fn test_frame_reader_resyncs_after_damaged_length_prefix() {
        let mut buf = Vec::new();
        encode_record_into(&record(0, b"zero"), &mut buf);
        let second_at = buf.len();
        encode_record_into(&record(1, b"one"), &mut buf);
        encode_record_into(&record(2, b"two"), &mut buf);
        buf[2] ^= 0x01;

        let mut reader = FrameReader::new(&buf);
        let items: Vec<_> = reader.by_ref().collect();

        assert_eq!(items.len(), 3);
        let corrupt = items[0].clone().unwrap_err();
        assert_eq!(corrupt.offset, 0);
        assert_eq!(corrupt.len, second_at);
        assert_eq!(items[1], Ok(Frame::Record(record(1, b"one"))));
        assert_eq!(items[2], Ok(Frame::Record(record(2, b"two"))));
        assert_eq!(reader.valid_len(), buf.len());
    }

    #[test]
    fn test_frame_reader_skips_partial_frame_followed_by_frames() {
        let mut buf = Vec::new();
        encode_record_into(&record(0, b"a"), &mut buf);
        let partial_at = buf.len();
        let partial = encode(&record(1, b"lost"));
        buf.extend_from_slice(&partial[..10]);
        let resumed_at = buf.len();
        encode_record_into(&record(2, b"b"), &mut buf);
        encode_record_into(&record(3, b"c"), &mut buf);

        let items: Vec<_> = FrameReader::new(&buf).collect();

        assert_eq!(items.len(), 4);
        let corrupt = items[1].clone().unwrap_err();
        assert_eq!(corrupt.offset, partial_at);
        assert_eq!(corrupt.len, resumed_at - partial_at);
        assert_eq!(items[2], Ok(Frame::Record(record(2, b"b"))));
        assert_eq!(items[3], Ok(Frame::Record(record(3, b"c"))));
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            sequence in any::<u64>(),
            timestamp_ms in any::<u64>(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let original = Record {
                sequence,
                payload,
                timestamp_ms,
                state: DeliveryState::Pending,
            };
            prop_assert_eq!(decode(&encode(&original)).unwrap(), original);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&bytes);
            let _ = FrameReader::new(&bytes).count();
        }
    }
}
