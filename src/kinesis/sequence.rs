//! Sequence Number Codec
//!
//! Every record carries a sequence number: a packed big integer, rendered
//! to clients as a decimal numeral (56 digits for standard records). The
//! packing is a 46-hex-digit value, fields high to low:
//!
//! ```text
//! ┌────────┬─────────┬──────────────────┬────────────┬──────────┬────────────────┬────────────┐
//! │ marker │ version │ shardCreateTime  │ shardIndex │ reserved │ sequenceIndex  │ writeTime  │
//! │ 1 hex  │ 1 hex   │ 9 hex (seconds)  │ 4 hex      │ 6 hex    │ 16 hex (u64)   │ 9 hex (s)  │
//! └────────┴─────────┴──────────────────┴────────────┴──────────┴────────────────┴────────────┘
//! ```
//!
//! The leading marker digit `7` keeps every encoded value in
//! [10^55, 10^56), so the decimal rendering is always exactly 56 digits.
//! The sequence index sits above the write time, which gives the ordering
//! guarantee: two numbers minted in the same shard with the same creation
//! time compare by sequence index alone, regardless of write time.
//!
//! Version 2 is standard. Version 0 is accepted for backwards
//! compatibility. Version 1 decodes cleanly but any validation against a
//! shard must surface as an opaque internal failure - that is observed
//! behavior of the service being emulated and is replicated deliberately.

use num_bigint::BigUint;

/// Leading hex digit of every encoded sequence number.
const MARKER: u8 = 0x7;

/// Total hex digits in the packed representation (23 bytes).
pub const SEQ_HEX_DIGITS: usize = 46;

/// Decimal digits of a rendered sequence number.
pub const SEQ_DECIMAL_DIGITS: usize = 56;

/// The standard encoding version.
pub const SEQ_VERSION: u8 = 2;

/// The version with the known validation defect: decodes fine, validates
/// as an internal failure.
pub const SEQ_VERSION_QUIRK: u8 = 1;

const MAX_TIME_SECS: u64 = (1 << 36) - 1; // 9 hex digits
const MAX_SHARD_INDEX: u32 = 0xFFFF; // 4 hex digits

/// Decoded sequence number fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber {
    pub version: u8,
    pub shard_create_secs: u64,
    pub shard_index: u32,
    pub seq_index: u64,
    pub write_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceDecodeError {
    /// Not a decimal integer, out of magnitude range, or bad field content.
    Malformed,
    /// The version tag is not one this codec knows.
    UnsupportedVersion(u8),
}

impl std::fmt::Display for SequenceDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceDecodeError::Malformed => write!(f, "malformed sequence number"),
            SequenceDecodeError::UnsupportedVersion(v) => {
                write!(f, "unsupported sequence number version: {}", v)
            }
        }
    }
}

impl std::error::Error for SequenceDecodeError {}

impl SequenceNumber {
    pub fn new(shard_create_secs: u64, shard_index: u32, seq_index: u64, write_secs: u64) -> Self {
        SequenceNumber {
            version: SEQ_VERSION,
            shard_create_secs,
            shard_index,
            seq_index,
            write_secs,
        }
    }

    /// The starting sequence number of a shard: index 0, write time equal
    /// to the shard's creation time.
    pub fn shard_start(shard_create_secs: u64, shard_index: u32) -> Self {
        SequenceNumber::new(shard_create_secs, shard_index, 0, shard_create_secs)
    }

    /// The ending sequence number minted when a shard is closed: the
    /// maximum possible index, making the shard permanently terminal
    /// within its counter group.
    pub fn shard_end(shard_create_secs: u64, shard_index: u32, now_secs: u64) -> Self {
        SequenceNumber::new(shard_create_secs, shard_index, u64::MAX, now_secs)
    }

    /// Render as the decimal numeral string handed to clients.
    pub fn encode(&self) -> String {
        debug_assert!(self.shard_create_secs <= MAX_TIME_SECS);
        debug_assert!(self.write_secs <= MAX_TIME_SECS);
        debug_assert!(self.shard_index <= MAX_SHARD_INDEX);
        let hex = format!(
            "{:x}{:x}{:09x}{:04x}{:06x}{:016x}{:09x}",
            MARKER, self.version, self.shard_create_secs, self.shard_index, 0, self.seq_index,
            self.write_secs
        );
        debug_assert_eq!(hex.len(), SEQ_HEX_DIGITS);
        BigUint::parse_bytes(hex.as_bytes(), 16)
            .expect("packed hex is always a valid integer")
            .to_string()
    }

    /// The packed big-endian byte form, used as the ordered record key
    /// suffix. 23 bytes.
    pub fn to_key_bytes(&self) -> [u8; 23] {
        let value = BigUint::parse_bytes(self.encode().as_bytes(), 10)
            .expect("encoded form is always decimal");
        let raw = value.to_bytes_be();
        let mut out = [0u8; 23];
        out[23 - raw.len()..].copy_from_slice(&raw);
        out
    }

    /// Decode a decimal numeral string back into fields.
    pub fn decode(s: &str) -> Result<Self, SequenceDecodeError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SequenceDecodeError::Malformed);
        }
        let value = BigUint::parse_bytes(s.as_bytes(), 10).ok_or(SequenceDecodeError::Malformed)?;
        let hex = value.to_str_radix(16);
        if hex.len() > SEQ_HEX_DIGITS {
            return Err(SequenceDecodeError::Malformed);
        }
        let hex = format!("{:0>width$}", hex, width = SEQ_HEX_DIGITS);
        Self::decode_hex(&hex)
    }

    /// Decode from the 23-byte big-endian key form.
    pub fn decode_key_bytes(bytes: &[u8]) -> Result<Self, SequenceDecodeError> {
        if bytes.len() != 23 {
            return Err(SequenceDecodeError::Malformed);
        }
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self::decode_hex(&hex)
    }

    fn decode_hex(hex: &str) -> Result<Self, SequenceDecodeError> {
        debug_assert_eq!(hex.len(), SEQ_HEX_DIGITS);
        let field = |range: std::ops::Range<usize>| -> Result<u64, SequenceDecodeError> {
            u64::from_str_radix(&hex[range], 16).map_err(|_| SequenceDecodeError::Malformed)
        };
        let marker = field(0..1)? as u8;
        if marker != MARKER {
            return Err(SequenceDecodeError::Malformed);
        }
        let version = field(1..2)? as u8;
        if version > SEQ_VERSION {
            return Err(SequenceDecodeError::UnsupportedVersion(version));
        }
        let shard_create_secs = field(2..11)?;
        let shard_index = field(11..15)? as u32;
        let reserved = field(15..21)?;
        if reserved != 0 {
            return Err(SequenceDecodeError::Malformed);
        }
        let seq_index = u64::from_str_radix(&hex[21..37], 16)
            .map_err(|_| SequenceDecodeError::Malformed)?;
        let write_secs = field(37..46)?;
        Ok(SequenceNumber {
            version,
            shard_create_secs,
            shard_index,
            seq_index,
            write_secs,
        })
    }
}

/// Numeric successor of an encoded sequence number.
pub fn successor(sequence_number: &str) -> String {
    match BigUint::parse_bytes(sequence_number.as_bytes(), 10) {
        Some(v) => (v + 1u8).to_string(),
        None => sequence_number.to_string(),
    }
}

/// Numeric comparison of two encoded sequence numbers.
pub fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    let pa = BigUint::parse_bytes(a.as_bytes(), 10);
    let pb = BigUint::parse_bytes(b.as_bytes(), 10);
    pa.cmp(&pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SequenceNumber {
        SequenceNumber::new(1_499_763_126, 3, 42, 1_499_764_000)
    }

    #[test]
    fn test_round_trip_all_fields() {
        for version in [0u8, 1, 2] {
            for (create, ix, seq, write) in [
                (0u64, 0u32, 0u64, 0u64),
                (1_499_763_126, 3, 42, 1_499_764_000),
                (MAX_TIME_SECS, MAX_SHARD_INDEX, u64::MAX, MAX_TIME_SECS),
            ] {
                let sn = SequenceNumber {
                    version,
                    shard_create_secs: create,
                    shard_index: ix,
                    seq_index: seq,
                    write_secs: write,
                };
                assert_eq!(SequenceNumber::decode(&sn.encode()).unwrap(), sn);
            }
        }
    }

    #[test]
    fn test_standard_width_is_56_decimal_digits() {
        assert_eq!(sample().encode().len(), SEQ_DECIMAL_DIGITS);
        assert_eq!(
            SequenceNumber::shard_start(0, 0).encode().len(),
            SEQ_DECIMAL_DIGITS
        );
        assert_eq!(
            SequenceNumber::shard_end(MAX_TIME_SECS, MAX_SHARD_INDEX, MAX_TIME_SECS)
                .encode()
                .len(),
            SEQ_DECIMAL_DIGITS
        );
    }

    #[test]
    fn test_ordering_by_seq_index_beats_write_time() {
        // Same shard, same creation time: higher index sorts larger even
        // with an earlier write time.
        let lo = SequenceNumber::new(1_000_000, 0, 5, 2_000_000);
        let hi = SequenceNumber::new(1_000_000, 0, 6, 1_000_000);
        assert_eq!(compare(&hi.encode(), &lo.encode()), std::cmp::Ordering::Greater);
    }

    #[test]
    fn test_key_bytes_order_matches_numeric_order() {
        let a = SequenceNumber::new(1_000_000, 0, 1, 1_000_000);
        let b = SequenceNumber::new(1_000_000, 0, 2, 1_000_000);
        assert!(a.to_key_bytes() < b.to_key_bytes());
        assert_eq!(
            SequenceNumber::decode_key_bytes(&a.to_key_bytes()).unwrap(),
            a
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for bad in ["", "abc", "-1", "12 34", "99999999999999999999999999999999999999999999999999999999999"] {
            assert_eq!(
                SequenceNumber::decode(bad),
                Err(SequenceDecodeError::Malformed),
                "expected Malformed for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_decode_rejects_wrong_marker() {
        // A full-width number whose top hex digit is not the marker.
        let hex = format!("f{}8", "0".repeat(SEQ_HEX_DIGITS - 2));
        let other = BigUint::parse_bytes(hex.as_bytes(), 16).unwrap().to_string();
        assert_eq!(
            SequenceNumber::decode(&other),
            Err(SequenceDecodeError::Malformed)
        );
    }

    #[test]
    fn test_unsupported_version_is_distinguishable() {
        // Re-pack the sample with version 5
        let sn = sample();
        let hex = format!(
            "{:x}{:x}{:09x}{:04x}{:06x}{:016x}{:09x}",
            MARKER, 5, sn.shard_create_secs, sn.shard_index, 0, sn.seq_index, sn.write_secs
        );
        let decimal = BigUint::parse_bytes(hex.as_bytes(), 16).unwrap().to_string();
        assert_eq!(
            SequenceNumber::decode(&decimal),
            Err(SequenceDecodeError::UnsupportedVersion(5))
        );
    }

    #[test]
    fn test_quirk_version_decodes_cleanly() {
        let sn = SequenceNumber {
            version: SEQ_VERSION_QUIRK,
            ..sample()
        };
        let decoded = SequenceNumber::decode(&sn.encode()).unwrap();
        assert_eq!(decoded.version, SEQ_VERSION_QUIRK);
    }

    #[test]
    fn test_shard_end_is_terminal() {
        let end = SequenceNumber::shard_end(1_000_000, 2, 1_000_500);
        assert_eq!(end.seq_index, u64::MAX);
        let record = SequenceNumber::new(1_000_000, 2, u64::MAX - 1, 9_000_000);
        assert_eq!(
            compare(&end.encode(), &record.encode()),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn test_successor() {
        let s = sample().encode();
        let next = successor(&s);
        assert_eq!(compare(&next, &s), std::cmp::Ordering::Greater);
        let a = BigUint::parse_bytes(s.as_bytes(), 10).unwrap();
        let b = BigUint::parse_bytes(next.as_bytes(), 10).unwrap();
        assert_eq!(b - a, BigUint::from(1u8));
    }
}
