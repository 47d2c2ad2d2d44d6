//! UTXO set persistence backed by the storage trait.

use cashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use cashd_primitives::hash::Hash256;
use cashd_primitives::outpoint::OutPoint;
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const OUTPOINT_KEY_LEN: usize = 36;

const UTXO_ENTRY_VERSION: u8 = 1;
const FLAG_COINBASE: u8 = 1 << 0;
const FLAG_TOKEN_DATA: u8 = 1 << 1;

/// A spendable output record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub value: i64,
    pub locking_script: Vec<u8>,
    /// Height of the block that mined this output.
    pub height: u32,
    pub is_coinbase: bool,
    pub has_token_data: bool,
}

impl UtxoEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(UTXO_ENTRY_VERSION);
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.locking_script);
        encoder.write_u32_le(self.height);
        let mut flags = 0u8;
        if self.is_coinbase {
            flags |= FLAG_COINBASE;
        }
        if self.has_token_data {
            flags |= FLAG_TOKEN_DATA;
        }
        encoder.write_u8(flags);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != UTXO_ENTRY_VERSION {
            return Err(DecodeError::InvalidData("unsupported utxo entry version"));
        }
        let value = decoder.read_i64_le()?;
        let locking_script = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let flags = decoder.read_u8()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            locking_script,
            height,
            is_coinbase: flags & FLAG_COINBASE != 0,
            has_token_data: flags & FLAG_TOKEN_DATA != 0,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.txid);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OUTPOINT_KEY_LEN {
            return None;
        }
        let mut out = [0u8; OUTPOINT_KEY_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// The persistent output set plus the txid-to-height side table.
pub struct UtxoSet<S> {
    store: S,
}

impl<S> UtxoSet<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> UtxoSet<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(Column::Utxo, key.as_bytes())? {
            Some(bytes) => Ok(Some(
                UtxoEntry::decode(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn stage_put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, entry: &UtxoEntry) {
        let key = OutPointKey::new(outpoint);
        batch.put(Column::Utxo, key.as_bytes(), entry.encode());
    }

    pub fn stage_delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        let key = OutPointKey::new(outpoint);
        batch.delete(Column::Utxo, key.as_bytes());
    }

    pub fn mined_height(&self, txid: &Hash256) -> Result<Option<u32>, StoreError> {
        match self.store.get(Column::TxHeight, txid.as_slice())? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Backend("malformed tx height record".into()))?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn stage_mined_height(&self, batch: &mut WriteBatch, txid: &Hash256, height: u32) {
        batch.put(Column::TxHeight, txid.as_slice(), height.to_le_bytes());
    }

    pub fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.store.write_batch(batch)
    }
}
