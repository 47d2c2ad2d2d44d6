//! Transaction outpoint: the universal key for spendable-output lookups.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub const fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    /// The coinbase marker: zero hash, max index.
    pub fn null() -> Self {
        Self {
            txid: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.txid == [0u8; 32]
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.txid);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { txid, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    #[test]
    fn null_round_trip() {
        let outpoint = OutPoint::null();
        assert!(outpoint.is_null());
        let bytes = encode(&outpoint);
        assert_eq!(bytes.len(), 36);
        assert_eq!(decode::<OutPoint>(&bytes).unwrap(), outpoint);
    }

    #[test]
    fn ordering_is_txid_then_index() {
        let a = OutPoint::new([1u8; 32], 5);
        let b = OutPoint::new([1u8; 32], 6);
        let c = OutPoint::new([2u8; 32], 0);
        assert!(a < b);
        assert!(b < c);
    }
}
