//! Core types shared by the trie, the versioned store and the oracle.
//!
//! Every fixed-width byte string that crosses a process boundary (digests,
//! keys, addresses) is rendered as `0x`-prefixed lowercase hex.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Digest width in bytes (BLAKE3).
pub const HASH_LEN: usize = 32;

/// Account address width in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Encoded width of a [`ReputationValue`].
pub const VALUE_LEN: usize = 64;

/// Trie depth, one level per key bit.
pub const KEY_BITS: usize = HASH_LEN * 8;

const KEY_DOMAIN: &[u8] = b"repmine/key/v1";

/// Monotonic version number assigned by the versioned store.
pub type VersionId = u64;

/// Position of an entry in the external change log.
pub type SequenceNumber = u64;

/// Errors raised when parsing hex-encoded fixed-width values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseHexError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Errors raised when decoding a persisted value record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("value record must be 64 bytes, got {0}")]
    WrongLength(usize),

    #[error("amount field is not a valid 128-bit two's complement extension")]
    AmountOutOfRange,

    #[error("insertion index does not fit in 64 bits")]
    IndexOutOfRange,
}

macro_rules! hex_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width in bytes.
            pub const LEN: usize = $len;

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Copy from a slice, checking the width.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseHexError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| ParseHexError::WrongLength {
                    expected: $len,
                    actual: bytes.len(),
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                let bytes = hex::decode(raw).map_err(|e| ParseHexError::InvalidHex(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(
    /// A 32-byte BLAKE3 digest (trie node digest or published root).
    Digest,
    HASH_LEN
);

hex_newtype!(
    /// A trie key: the BLAKE3 hash of an (organization, skill, participant) triple.
    Key,
    HASH_LEN
);

hex_newtype!(
    /// A 20-byte account address.
    Address,
    ADDRESS_LEN
);

impl Digest {
    /// Digest of an empty subtree.
    pub const EMPTY: Digest = Digest([0u8; HASH_LEN]);

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl Address {
    /// The zero address, used as the participant of organization-wide totals.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);
}

impl Key {
    /// Derive the trie key for a reputation triple.
    pub fn derive(organization: &Address, skill_id: u64, participant: &Address) -> Self {
        let mut skill = [0u8; 32];
        skill[24..].copy_from_slice(&skill_id.to_be_bytes());

        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(&organization.0);
        hasher.update(&skill);
        hasher.update(&participant.0);
        Key(*hasher.finalize().as_bytes())
    }

    /// Bit at trie level `level`, counted from the most significant bit.
    pub fn bit(&self, level: usize) -> bool {
        bit_at(&self.0, level)
    }
}

pub(crate) fn bit_at(bytes: &[u8; HASH_LEN], level: usize) -> bool {
    (bytes[level / 8] >> (7 - (level % 8))) & 1 == 1
}

/// The record stored at each trie leaf.
///
/// Encoded as 64 bytes: the amount as a 32-byte big-endian two's complement
/// integer, followed by the insertion index as a 32-byte big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReputationValue {
    /// Reputation amount.
    pub amount: i128,
    /// Position in first-insertion order; dense over `0..key_count`.
    pub index: u64,
}

impl ReputationValue {
    pub fn new(amount: i128, index: u64) -> Self {
        Self { amount, index }
    }

    pub fn to_bytes(&self) -> [u8; VALUE_LEN] {
        let mut out = [0u8; VALUE_LEN];
        let fill = if self.amount < 0 { 0xff } else { 0x00 };
        out[..16].fill(fill);
        out[16..32].copy_from_slice(&self.amount.to_be_bytes());
        out[56..64].copy_from_slice(&self.index.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        if bytes.len() != VALUE_LEN {
            return Err(ValueError::WrongLength(bytes.len()));
        }

        let mut amount_bytes = [0u8; 16];
        amount_bytes.copy_from_slice(&bytes[16..32]);
        let amount = i128::from_be_bytes(amount_bytes);
        let fill = if amount < 0 { 0xff } else { 0x00 };
        if bytes[..16].iter().any(|b| *b != fill) {
            return Err(ValueError::AmountOutOfRange);
        }

        if bytes[32..56].iter().any(|b| *b != 0) {
            return Err(ValueError::IndexOutOfRange);
        }
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&bytes[56..64]);

        Ok(Self {
            amount,
            index: u64::from_be_bytes(index_bytes),
        })
    }

    /// Amount rendered in decimal, the form handed to oracle callers.
    pub fn amount_string(&self) -> String {
        self.amount.to_string()
    }
}

impl Serialize for ReputationValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes())))
    }
}

impl<'de> Deserialize<'de> for ReputationValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(raw).map_err(serde::de::Error::custom)?;
        ReputationValue::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Selects which committed version a read is served from.
///
/// Current and historical reads share one code path; `Latest` is resolved to
/// the head version at the moment of the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    At(VersionId),
}

impl From<VersionId> for VersionSelector {
    fn from(version: VersionId) -> Self {
        VersionSelector::At(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; ADDRESS_LEN])
    }

    #[test]
    fn test_digest_hex_roundtrip() {
        let digest = Digest([0xab; HASH_LEN]);
        let text = digest.to_string();
        assert!(text.starts_with("0xabab"));
        assert_eq!(text.parse::<Digest>().unwrap(), digest);
    }

    #[test]
    fn test_address_parse_accepts_mixed_case() {
        let parsed: Address = "0xAbCdEf0000000000000000000000000000000001".parse().unwrap();
        assert_eq!(parsed.0[0], 0xab);
        assert_eq!(parsed.0[19], 0x01);
    }

    #[test]
    fn test_address_parse_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            ParseHexError::WrongLength {
                expected: ADDRESS_LEN,
                actual: 2
            }
        );
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_key_derivation_depends_on_every_component() {
        let base = Key::derive(&addr(1), 7, &addr(2));
        assert_eq!(base, Key::derive(&addr(1), 7, &addr(2)));
        assert_ne!(base, Key::derive(&addr(3), 7, &addr(2)));
        assert_ne!(base, Key::derive(&addr(1), 8, &addr(2)));
        assert_ne!(base, Key::derive(&addr(1), 7, &addr(4)));
    }

    #[test]
    fn test_key_bits_msb_first() {
        let mut raw = [0u8; HASH_LEN];
        raw[0] = 0b1000_0000;
        raw[31] = 0b0000_0001;
        let key = Key(raw);
        assert!(key.bit(0));
        assert!(!key.bit(1));
        assert!(key.bit(255));
        assert!(!key.bit(254));
    }

    #[test]
    fn test_value_encoding_layout() {
        let value = ReputationValue::new(100, 3);
        let bytes = value.to_bytes();
        assert_eq!(bytes[31], 100);
        assert_eq!(bytes[63], 3);
        assert_eq!(ReputationValue::from_bytes(&bytes).unwrap(), value);

        let negative = ReputationValue::new(-1, 0);
        let bytes = negative.to_bytes();
        assert!(bytes[..32].iter().all(|b| *b == 0xff));
        assert_eq!(ReputationValue::from_bytes(&bytes).unwrap(), negative);
    }

    #[test]
    fn test_value_decoding_rejects_malformed_records() {
        assert_eq!(
            ReputationValue::from_bytes(&[0u8; 10]),
            Err(ValueError::WrongLength(10))
        );

        let mut bytes = ReputationValue::new(5, 0).to_bytes();
        bytes[0] = 1;
        assert_eq!(
            ReputationValue::from_bytes(&bytes),
            Err(ValueError::AmountOutOfRange)
        );

        let mut bytes = ReputationValue::new(5, 0).to_bytes();
        bytes[40] = 1;
        assert_eq!(
            ReputationValue::from_bytes(&bytes),
            Err(ValueError::IndexOutOfRange)
        );
    }

    #[test]
    fn test_value_serializes_as_record_hex() {
        let json = serde_json::to_string(&ReputationValue::new(100, 1)).unwrap();
        assert_eq!(json.len(), 2 + 2 + VALUE_LEN * 2);
        assert!(json.ends_with("01\""));
        let back: ReputationValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReputationValue::new(100, 1));
    }

    #[test]
    fn test_serde_uses_hex_strings() {
        let digest = Digest([1u8; HASH_LEN]);
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
