//! Transaction types and serialization.

use crate::encoding::{encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{sha256d, Hash256};
use crate::outpoint::OutPoint;

/// Inputs carrying this sequence value opt out of locktime entirely.
pub const SEQUENCE_FINAL: u32 = u32::MAX;
/// When set, the sequence number does not encode a relative locktime.
pub const SEQUENCE_LOCK_TIME_DISABLE_FLAG: u32 = 1 << 31;
/// When set, the relative locktime is measured in 512-second units
/// rather than blocks.
pub const SEQUENCE_LOCK_TIME_TYPE_FLAG: u32 = 1 << 22;
/// Bits of the sequence number that carry the relative locktime value.
pub const SEQUENCE_LOCK_TIME_MASK: u32 = 0x0000_ffff;
/// Shift converting a masked sequence value to seconds (x << 9 == x * 512).
pub const SEQUENCE_SECONDS_SHIFT: u32 = 9;

pub const fn sequence_disables_lock_time(sequence: u32) -> bool {
    sequence & SEQUENCE_LOCK_TIME_DISABLE_FLAG != 0
}

pub const fn sequence_is_seconds(sequence: u32) -> bool {
    sequence & SEQUENCE_LOCK_TIME_TYPE_FLAG != 0
}

pub const fn sequence_value(sequence: u32) -> u32 {
    sequence & SEQUENCE_LOCK_TIME_MASK
}

pub const fn sequence_seconds(sequence: u32) -> u64 {
    (sequence_value(sequence) as u64) << SEQUENCE_SECONDS_SHIFT
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub unlocking_script: Vec<u8>,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.unlocking_script);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let unlocking_script = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            unlocking_script,
            sequence,
        })
    }
}

/// Marker byte introducing a cash-token prefix inside the wire-level
/// locking script field.
pub const TOKEN_PREFIX_MARKER: u8 = 0xef;

const TOKEN_BITFIELD_RESERVED: u8 = 0x80;
const TOKEN_BITFIELD_HAS_COMMITMENT: u8 = 0x40;
const TOKEN_BITFIELD_HAS_NFT: u8 = 0x20;
const TOKEN_BITFIELD_HAS_AMOUNT: u8 = 0x10;

/// An output. On the wire the token prefix (when present) and the
/// locking script share one variable-length field; in memory they are
/// kept separate so validation can ask "does this output carry token
/// data" without re-parsing. The prefix bytes, marker included, are
/// otherwise opaque to this crate.
#[derive(Clone, Debug, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub locking_script: Vec<u8>,
    pub token_prefix: Option<Vec<u8>>,
}

impl TxOut {
    pub fn has_token_data(&self) -> bool {
        self.token_prefix.is_some()
    }
}

/// Length of the token prefix at the start of `blob`, validating just
/// enough structure to find where the locking script begins.
fn token_prefix_len(blob: &[u8]) -> Result<usize, DecodeError> {
    let mut decoder = Decoder::new(blob);
    let marker = decoder.read_u8()?;
    if marker != TOKEN_PREFIX_MARKER {
        return Err(DecodeError::InvalidData("missing token prefix marker"));
    }
    let _category = decoder.read_hash_le()?;
    let bitfield = decoder.read_u8()?;
    if bitfield & TOKEN_BITFIELD_RESERVED != 0 {
        return Err(DecodeError::InvalidData("reserved token bitfield bit set"));
    }
    let capability = bitfield & 0x0f;
    if capability > 2 {
        return Err(DecodeError::InvalidData("unknown token capability"));
    }
    if capability != 0 && bitfield & TOKEN_BITFIELD_HAS_NFT == 0 {
        return Err(DecodeError::InvalidData("capability without nft flag"));
    }
    if bitfield & TOKEN_BITFIELD_HAS_COMMITMENT != 0 {
        if bitfield & TOKEN_BITFIELD_HAS_NFT == 0 {
            return Err(DecodeError::InvalidData("commitment without nft flag"));
        }
        let commitment = decoder.read_var_bytes()?;
        if commitment.is_empty() {
            return Err(DecodeError::InvalidData("empty token commitment"));
        }
    }
    if bitfield & TOKEN_BITFIELD_HAS_AMOUNT != 0 {
        let amount = decoder.read_varint()?;
        if amount == 0 {
            return Err(DecodeError::InvalidData("zero token amount"));
        }
    } else if bitfield & TOKEN_BITFIELD_HAS_NFT == 0 {
        return Err(DecodeError::InvalidData("token prefix without payload"));
    }
    Ok(blob.len() - decoder.remaining())
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        match &self.token_prefix {
            Some(prefix) => {
                encoder.write_varint((prefix.len() + self.locking_script.len()) as u64);
                encoder.write_bytes(prefix);
                encoder.write_bytes(&self.locking_script);
            }
            None => encoder.write_var_bytes(&self.locking_script),
        }
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let blob = decoder.read_var_bytes()?;
        if blob.first() == Some(&TOKEN_PREFIX_MARKER) {
            let prefix_len = token_prefix_len(&blob)?;
            Ok(Self {
                value,
                locking_script: blob[prefix_len..].to_vec(),
                token_prefix: Some(blob[..prefix_len].to_vec()),
            })
        } else {
            Ok(Self {
                value,
                locking_script: blob,
                token_prefix: None,
            })
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&encode(self))
    }

    pub fn serialized_size(&self) -> usize {
        encode(self).len()
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn all_inputs_final(&self) -> bool {
        self.inputs
            .iter()
            .all(|input| input.sequence == SEQUENCE_FINAL)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let input_count = decoder.read_varint()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            inputs.push(TxIn::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_varint()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            outputs.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}
