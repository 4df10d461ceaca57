use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// A 32-byte hash, used for block hashes, previous-hashes and merkle roots.
///
/// Mirrors the teacher's `Buf32`/`L1BlockId` wrapper-newtype pattern: a
/// fixed-size array dressed up with hex (de)serialization instead of a raw
/// `String`, so equality/ordering/hashing stay cheap and typed.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct BlockHash32(pub [u8; 32]);

impl BlockHash32 {
    pub const ZERO: BlockHash32 = BlockHash32([0u8; 32]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 32 {
            return None;
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for BlockHash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for BlockHash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for BlockHash32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }
}

impl From<bitcoin::BlockHash> for BlockHash32 {
    fn from(value: bitcoin::BlockHash) -> Self {
        use bitcoin::hashes::Hash;
        Self(*value.as_raw_hash().as_byte_array())
    }
}

impl From<BlockHash32> for bitcoin::BlockHash {
    fn from(value: BlockHash32) -> Self {
        bitcoin::BlockHash::from_byte_array(value.0)
    }
}

impl Serialize for BlockHash32 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockHash32 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let h = BlockHash32([7u8; 32]);
        let s = h.to_string();
        let back: BlockHash32 = s.parse().unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn json_round_trip() {
        let h = BlockHash32([9u8; 32]);
        let json = serde_json::to_string(&h).unwrap();
        let back: BlockHash32 = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
