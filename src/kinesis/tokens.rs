//! Opaque Cursor Tokens
//!
//! Shard iterators and ListShards NextTokens are encrypted, base64-coded
//! blobs. Clients treat them as opaque; the service round-trips them.
//!
//! ## Token Layout
//!
//! ```text
//! base64( magic (8 bytes) ‖ nonce (12 bytes) ‖ AES-256-GCM ciphertext )
//! ```
//!
//! Iterator plaintext is five '/'-joined fields
//! (`mintMillis/streamName/shardId/sequenceNumber/region`); none of the
//! fields can contain '/'. NextToken plaintext is three fields
//! (`mintMillis/streamName/shardId`).
//!
//! The key is fixed: tokens only need to be opaque and tamper-evident,
//! not secret, and a fixed key keeps tokens valid across restarts the way
//! the emulated service's are within their validity window.
//!
//! Decode validates, in order: canonical base64, length bounds, magic,
//! decryption, field count, a mint time strictly in the past, shard-id
//! shape, stream-name shape. Every one of those failures collapses into
//! the same generic invalid-token error so callers cannot probe which
//! check failed. Expiry (five minutes) is reported separately.

use crate::kinesis::clock;
use crate::kinesis::error::ITERATOR_TTL_MILLIS;
use crate::kinesis::types::{is_valid_stream_name, parse_shard_id};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

const ITERATOR_MAGIC: [u8; 8] = *b"KSITER01";
const NEXT_TOKEN_MAGIC: [u8; 8] = *b"KSTOKN01";

const TOKEN_KEY: [u8; 32] = *b"kinesis-sim-shard-iterator-key!!";

const NONCE_LEN: usize = 12;
const MIN_TOKEN_BYTES: usize = 8 + NONCE_LEN + 16;
const MAX_TOKEN_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Any structural failure; deliberately carries no detail.
    Invalid,
    /// Structurally valid but minted more than the tolerated delay ago.
    Expired { mint_millis: u64, now_millis: u64 },
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Invalid => write!(f, "invalid token"),
            TokenError::Expired { .. } => write!(f, "expired token"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Decoded shard-iterator contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorPayload {
    pub mint_millis: u64,
    pub stream_name: String,
    pub shard_id: String,
    pub sequence_number: String,
}

fn cipher() -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&TOKEN_KEY))
}

fn seal(magic: &[u8; 8], plaintext: &str) -> String {
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher()
        .encrypt(nonce, plaintext.as_bytes())
        .expect("AES-GCM encryption of an in-memory buffer cannot fail");
    let mut out = Vec::with_capacity(8 + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(magic);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    BASE64.encode(out)
}

fn open(magic: &[u8; 8], token: &str) -> Result<String, TokenError> {
    let bytes = BASE64.decode(token).map_err(|_| TokenError::Invalid)?;
    // Canonical form only: re-encoding must reproduce the input exactly
    if BASE64.encode(&bytes) != token {
        return Err(TokenError::Invalid);
    }
    if bytes.len() < MIN_TOKEN_BYTES || bytes.len() > MAX_TOKEN_BYTES {
        return Err(TokenError::Invalid);
    }
    if &bytes[..8] != magic {
        return Err(TokenError::Invalid);
    }
    let nonce = Nonce::from_slice(&bytes[8..8 + NONCE_LEN]);
    let plaintext = cipher()
        .decrypt(nonce, &bytes[8 + NONCE_LEN..])
        .map_err(|_| TokenError::Invalid)?;
    String::from_utf8(plaintext).map_err(|_| TokenError::Invalid)
}

fn parse_mint_millis(field: &str, now_millis: u64) -> Result<u64, TokenError> {
    let mint: u64 = field.parse().map_err(|_| TokenError::Invalid)?;
    // Strictly in the past, and no earlier than the epoch start
    if mint == 0 || mint >= now_millis {
        return Err(TokenError::Invalid);
    }
    Ok(mint)
}

/// Build a shard iterator for the given read position.
pub fn encode_iterator(
    stream_name: &str,
    shard_id: &str,
    sequence_number: &str,
    region: &str,
) -> String {
    let plaintext = format!(
        "{}/{}/{}/{}/{}",
        clock::now_millis(),
        stream_name,
        shard_id,
        sequence_number,
        region
    );
    seal(&ITERATOR_MAGIC, &plaintext)
}

/// Validate and decode a shard iterator.
pub fn decode_iterator(token: &str, now_millis: u64) -> Result<IteratorPayload, TokenError> {
    let plaintext = open(&ITERATOR_MAGIC, token)?;
    let fields: Vec<&str> = plaintext.split('/').collect();
    if fields.len() != 5 {
        return Err(TokenError::Invalid);
    }
    let mint_millis = parse_mint_millis(fields[0], now_millis)?;
    let shard_id = fields[2];
    if parse_shard_id(shard_id).is_none() {
        return Err(TokenError::Invalid);
    }
    let stream_name = fields[1];
    if !is_valid_stream_name(stream_name) {
        return Err(TokenError::Invalid);
    }
    if now_millis.saturating_sub(mint_millis) > ITERATOR_TTL_MILLIS {
        return Err(TokenError::Expired {
            mint_millis,
            now_millis,
        });
    }
    Ok(IteratorPayload {
        mint_millis,
        stream_name: stream_name.to_string(),
        shard_id: shard_id.to_string(),
        sequence_number: fields[3].to_string(),
    })
}

/// Build a ListShards pagination token positioned after `shard_id`.
pub fn encode_next_token(stream_name: &str, shard_id: &str) -> String {
    let plaintext = format!("{}/{}/{}", clock::now_millis(), stream_name, shard_id);
    seal(&NEXT_TOKEN_MAGIC, &plaintext)
}

/// Validate and decode a ListShards token into (stream name, last shard id).
pub fn decode_next_token(token: &str, now_millis: u64) -> Result<(String, String), TokenError> {
    let plaintext = open(&NEXT_TOKEN_MAGIC, token)?;
    let fields: Vec<&str> = plaintext.split('/').collect();
    if fields.len() != 3 {
        return Err(TokenError::Invalid);
    }
    let mint_millis = parse_mint_millis(fields[0], now_millis)?;
    if !is_valid_stream_name(fields[1]) || parse_shard_id(fields[2]).is_none() {
        return Err(TokenError::Invalid);
    }
    if now_millis.saturating_sub(mint_millis) > ITERATOR_TTL_MILLIS {
        return Err(TokenError::Expired {
            mint_millis,
            now_millis,
        });
    }
    Ok((fields[1].to_string(), fields[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQ: &str = "0";

    #[test]
    fn test_iterator_round_trip() {
        let token = encode_iterator("my-stream", "shardId-000000000003", SEQ, "us-east-1");
        let payload = decode_iterator(&token, clock::now_millis() + 1).unwrap();
        assert_eq!(payload.stream_name, "my-stream");
        assert_eq!(payload.shard_id, "shardId-000000000003");
        assert_eq!(payload.sequence_number, SEQ);
    }

    #[test]
    fn test_tokens_are_opaque_and_fresh() {
        let a = encode_iterator("s", "shardId-000000000000", SEQ, "us-east-1");
        let b = encode_iterator("s", "shardId-000000000000", SEQ, "us-east-1");
        // Random nonces: two mints of the same position differ
        assert_ne!(a, b);
        assert!(!a.contains("s/"));
    }

    #[test]
    fn test_garbage_tokens_are_invalid() {
        let now = clock::now_millis();
        for bad in ["", "!!!", "aGVsbG8=", &"A".repeat(2048)] {
            assert_eq!(decode_iterator(bad, now), Err(TokenError::Invalid));
        }
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let token = encode_iterator("s", "shardId-000000000000", SEQ, "us-east-1");
        let mut bytes = BASE64.decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = BASE64.encode(&bytes);
        assert_eq!(
            decode_iterator(&tampered, clock::now_millis()),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_non_canonical_base64_is_invalid() {
        let token = encode_iterator("s", "shardId-000000000000", SEQ, "us-east-1");
        let padded = format!("{}\n", token);
        assert_eq!(
            decode_iterator(&padded, clock::now_millis()),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_wrong_magic_is_invalid() {
        // A NextToken is not a shard iterator
        let token = encode_next_token("s", "shardId-000000000000");
        assert_eq!(
            decode_iterator(&token, clock::now_millis()),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_expired_iterator_is_distinguished() {
        let token = encode_iterator("s", "shardId-000000000000", SEQ, "us-east-1");
        let later = clock::now_millis() + ITERATOR_TTL_MILLIS + 10_000;
        match decode_iterator(&token, later) {
            Err(TokenError::Expired { now_millis, .. }) => assert_eq!(now_millis, later),
            other => panic!("expected Expired, got {:?}", other),
        }
    }

    #[test]
    fn test_future_mint_time_is_invalid() {
        let token = encode_iterator("s", "shardId-000000000000", SEQ, "us-east-1");
        // "now" before the mint time: the iterator claims to be from the future
        assert_eq!(decode_iterator(&token, 1), Err(TokenError::Invalid));
    }

    #[test]
    fn test_next_token_round_trip_and_expiry() {
        let token = encode_next_token("my-stream", "shardId-000000000007");
        let (stream, shard) = decode_next_token(&token, clock::now_millis() + 1).unwrap();
        assert_eq!(stream, "my-stream");
        assert_eq!(shard, "shardId-000000000007");

        let later = clock::now_millis() + ITERATOR_TTL_MILLIS + 1_000;
        assert!(matches!(
            decode_next_token(&token, later),
            Err(TokenError::Expired { .. })
        ));
    }
}
