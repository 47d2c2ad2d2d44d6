//! Forward-loading UTXO view used during block validation.
//!
//! Loading is two-phase: `begin_load` collects the outpoints a candidate
//! block needs (rejecting in-block double spends), `resolve` batch-reads
//! them from the backing set. Outputs the set does not know yet land in
//! a missing list rather than failing the block: the parent block may
//! still be mid-validation, so the caller retries with `finish_load`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use cashd_consensus::UpgradeSchedule;
use cashd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use cashd_primitives::hash::Hash256;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::Transaction;
use cashd_storage::{KeyValueStore, StoreError, WriteBatch};

use crate::chain::HeaderView;
use crate::utxo::{UtxoEntry, UtxoSet};

/// Two early-chain coinbase transactions were mined twice before
/// duplicate transaction hashes were forbidden (BIP-30). Spends of these
/// hashes must be tolerated by the duplicate detector, not rejected.
///
/// Bytes are internal (reversed) order; displayed hex:
/// e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468
/// (heights 91722 and 91880) and
/// d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599
/// (heights 91812 and 91842).
pub const ALLOWED_DUPLICATE_TX_HASHES: [Hash256; 2] = [
    [
        0x68, 0xb4, 0x5f, 0x58, 0xb6, 0x74, 0xe9, 0x4e, 0xb8, 0x81, 0xcd, 0x67, 0xb0, 0x4c, 0x2c,
        0xba, 0x07, 0xfe, 0x55, 0x52, 0xdb, 0xf1, 0xd5, 0x38, 0x56, 0x37, 0xb0, 0xd4, 0x07, 0x3d,
        0xbf, 0xe3,
    ],
    [
        0x99, 0x85, 0xd8, 0x29, 0x54, 0xe1, 0x0f, 0x22, 0x33, 0xa0, 0x89, 0x05, 0xdc, 0x7b, 0x49,
        0x0e, 0xb4, 0x44, 0x66, 0x0c, 0x87, 0x59, 0xe3, 0x24, 0xc7, 0xdf, 0xa3, 0xd2, 0x87, 0x79,
        0xd2, 0xd5,
    ],
];

pub fn is_allowed_duplicate_tx_hash(txid: &Hash256) -> bool {
    ALLOWED_DUPLICATE_TX_HASHES.contains(txid)
}

#[derive(Debug)]
pub enum ViewError {
    /// Two inputs of the candidate block spend the same outpoint.
    DoubleSpend(OutPoint),
    /// A spent output could not be located while applying a block.
    MissingSpentOutput(OutPoint),
    Store(StoreError),
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::DoubleSpend(outpoint) => write!(
                f,
                "output {}:{} spent twice within one block",
                cashd_primitives::hash::hash256_to_hex(&outpoint.txid),
                outpoint.index
            ),
            ViewError::MissingSpentOutput(outpoint) => write!(
                f,
                "spent output {}:{} not found",
                cashd_primitives::hash::hash256_to_hex(&outpoint.txid),
                outpoint.index
            ),
            ViewError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ViewError {}

impl From<StoreError> for ViewError {
    fn from(err: StoreError) -> Self {
        ViewError::Store(err)
    }
}

/// Record of one spent output, kept so a block can be unwound.
#[derive(Clone, Debug, PartialEq)]
pub struct SpentOutput {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

const BLOCK_UNDO_VERSION: u8 = 1;

/// Everything needed to invert one block's effect on the output set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockUndo {
    pub spent: Vec<SpentOutput>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.spent.len() as u32);
        for spent in &self.spent {
            spent.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&spent.entry.encode());
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let count = decoder.read_u32_le()? as usize;
        let mut spent = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let entry_bytes = decoder.read_var_bytes()?;
            let entry = UtxoEntry::decode(&entry_bytes)
                .map_err(|_| DecodeError::InvalidData("invalid utxo entry in undo"))?;
            spent.push(SpentOutput { outpoint, entry });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { spent })
    }
}

/// Not safe for concurrent mutation: load/apply/clear must be serialized
/// per validation attempt. Point queries are safe to share across
/// validation workers once loading is done.
pub struct UtxoView<S> {
    utxo_set: UtxoSet<S>,
    schedule: UpgradeSchedule,
    loaded: HashMap<OutPoint, UtxoEntry>,
    mined_heights: HashMap<Hash256, u32>,
    missing: BTreeSet<OutPoint>,
    forged: HashSet<OutPoint>,
}

impl<S: KeyValueStore> UtxoView<S> {
    pub fn new(store: S, schedule: UpgradeSchedule) -> Self {
        Self {
            utxo_set: UtxoSet::new(store),
            schedule,
            loaded: HashMap::new(),
            mined_heights: HashMap::new(),
            missing: BTreeSet::new(),
            forged: HashSet::new(),
        }
    }

    /// Collects the outpoints the candidate block spends, excluding
    /// outputs the block itself creates. Rejects in-block double spends
    /// unless the spent hash is one of the tolerated early duplicates.
    pub fn begin_load(&self, transactions: &[Transaction]) -> Result<Vec<OutPoint>, ViewError> {
        let created: HashSet<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        let mut required = Vec::new();
        let mut seen: HashSet<OutPoint> = HashSet::new();

        for transaction in transactions {
            if transaction.is_coinbase() {
                continue;
            }
            for input in &transaction.inputs {
                if !seen.insert(input.prevout) {
                    if is_allowed_duplicate_tx_hash(&input.prevout.txid) {
                        continue;
                    }
                    return Err(ViewError::DoubleSpend(input.prevout));
                }
                if created.contains(&input.prevout.txid) {
                    continue;
                }
                required.push(input.prevout);
            }
        }
        Ok(required)
    }

    /// Batch-resolves outpoints from the backing set, returning the ones
    /// still unknown. Resolved token-carrying outputs minted before the
    /// token activation are flagged as forgeries; token outputs whose
    /// owning block is not yet indexed stay missing and are retried.
    pub fn resolve(
        &mut self,
        chain: &impl HeaderView,
        outpoints: &[OutPoint],
    ) -> Result<Vec<OutPoint>, ViewError> {
        let mut still_missing = Vec::new();
        for outpoint in outpoints {
            let Some(entry) = self.utxo_set.get(outpoint)? else {
                self.missing.insert(*outpoint);
                still_missing.push(*outpoint);
                continue;
            };
            if entry.has_token_data {
                match chain.median_time_past(entry.height as u64) {
                    Some(median_time) => {
                        if !self.schedule.are_cash_tokens_enabled(median_time) {
                            self.forged.insert(*outpoint);
                        }
                    }
                    None => {
                        // Owning block not indexed yet; forgery can not
                        // be decided, so defer with the missing set.
                        self.missing.insert(*outpoint);
                        still_missing.push(*outpoint);
                        continue;
                    }
                }
            }
            self.mined_heights.insert(outpoint.txid, entry.height);
            self.loaded.insert(*outpoint, entry);
            self.missing.remove(outpoint);
        }
        if !still_missing.is_empty() {
            cashd_log::log_debug!(
                "utxo view: {} of {} outputs unresolved",
                still_missing.len(),
                outpoints.len()
            );
        }
        Ok(still_missing)
    }

    /// Retries previously missing outpoints. True iff everything the
    /// block needs is now resolved.
    pub fn finish_load(&mut self, chain: &impl HeaderView) -> Result<bool, ViewError> {
        if self.missing.is_empty() {
            return Ok(true);
        }
        let pending: Vec<OutPoint> = self.missing.iter().copied().collect();
        let still_missing = self.resolve(chain, &pending)?;
        Ok(still_missing.is_empty())
    }

    pub fn missing_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.missing.iter()
    }

    pub fn output(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.loaded.get(outpoint)
    }

    /// Height that mined the given transaction, if known. Falls back to
    /// the persistent side table so spent outputs stay answerable.
    pub fn mined_height(&self, txid: &Hash256) -> Result<Option<u32>, ViewError> {
        if let Some(height) = self.mined_heights.get(txid) {
            return Ok(Some(*height));
        }
        Ok(self.utxo_set.mined_height(txid)?)
    }

    pub fn is_coinbase_output(&self, outpoint: &OutPoint) -> bool {
        self.loaded
            .get(outpoint)
            .map(|entry| entry.is_coinbase)
            .unwrap_or(false)
    }

    pub fn is_pre_activation_token_forgery(&self, outpoint: &OutPoint) -> bool {
        self.forged.contains(outpoint)
    }

    /// Commits the block's effect: outputs it creates are inserted (with
    /// the forgery check applied at the block's own median-time),
    /// outputs it spends are removed. Returns the undo record.
    pub fn apply(
        &mut self,
        chain: &impl HeaderView,
        transactions: &[Transaction],
        height: u64,
    ) -> Result<BlockUndo, ViewError> {
        let median_time = chain.median_time_past(height).unwrap_or(0);
        let tokens_enabled = self.schedule.are_cash_tokens_enabled(median_time);
        let mut batch = WriteBatch::new();
        let mut undo = BlockUndo::default();

        for transaction in transactions {
            let txid = transaction.txid();
            let is_coinbase = transaction.is_coinbase();
            self.utxo_set
                .stage_mined_height(&mut batch, &txid, height as u32);
            self.mined_heights.insert(txid, height as u32);

            for (index, output) in transaction.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, index as u32);
                let entry = UtxoEntry {
                    value: output.value,
                    locking_script: output.locking_script.clone(),
                    height: height as u32,
                    is_coinbase,
                    has_token_data: output.has_token_data(),
                };
                if entry.has_token_data && !tokens_enabled {
                    self.forged.insert(outpoint);
                }
                self.utxo_set.stage_put(&mut batch, &outpoint, &entry);
                self.loaded.insert(outpoint, entry);
            }

            if is_coinbase {
                continue;
            }
            for input in &transaction.inputs {
                let entry = match self.loaded.remove(&input.prevout) {
                    Some(entry) => entry,
                    None => self
                        .utxo_set
                        .get(&input.prevout)?
                        .ok_or(ViewError::MissingSpentOutput(input.prevout))?,
                };
                undo.spent.push(SpentOutput {
                    outpoint: input.prevout,
                    entry,
                });
                self.utxo_set.stage_delete(&mut batch, &input.prevout);
            }
        }

        self.utxo_set.commit(&batch)?;
        Ok(undo)
    }

    /// Releases accumulated state for reuse across validation attempts.
    pub fn clear(&mut self) {
        self.loaded.clear();
        self.mined_heights.clear();
        self.missing.clear();
        self.forged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testutil::chain_with_timestamps;
    use cashd_consensus::{upgrade_schedule, Network};
    use cashd_primitives::hash::hash256_from_hex;
    use cashd_primitives::transaction::{TxIn, TxOut, SEQUENCE_FINAL};
    use cashd_storage::memory::MemoryStore;
    use std::sync::Arc;

    fn spend(prevout: OutPoint) -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxIn {
                prevout,
                unlocking_script: vec![0x51],
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![TxOut {
                value: 1_000,
                locking_script: vec![0x51],
                token_prefix: None,
            }],
            lock_time: 0,
        }
    }

    fn view() -> UtxoView<Arc<MemoryStore>> {
        UtxoView::new(
            Arc::new(MemoryStore::new()),
            upgrade_schedule(Network::Mainnet),
        )
    }

    fn store_output(view: &UtxoView<Arc<MemoryStore>>, outpoint: &OutPoint, entry: &UtxoEntry) {
        let mut batch = WriteBatch::new();
        view.utxo_set.stage_put(&mut batch, outpoint, entry);
        view.utxo_set
            .stage_mined_height(&mut batch, &outpoint.txid, entry.height);
        view.utxo_set.commit(&batch).unwrap();
    }

    fn plain_entry(height: u32) -> UtxoEntry {
        UtxoEntry {
            value: 5_000,
            locking_script: vec![0x51],
            height,
            is_coinbase: false,
            has_token_data: false,
        }
    }

    #[test]
    fn allowed_duplicates_match_recorded_hashes() {
        let first =
            hash256_from_hex("e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468")
                .unwrap();
        let second =
            hash256_from_hex("d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599")
                .unwrap();
        assert_eq!(ALLOWED_DUPLICATE_TX_HASHES[0], first);
        assert_eq!(ALLOWED_DUPLICATE_TX_HASHES[1], second);
        assert!(is_allowed_duplicate_tx_hash(&first));
        assert!(!is_allowed_duplicate_tx_hash(&[0u8; 32]));
    }

    #[test]
    fn double_spend_within_block_is_rejected() {
        let view = view();
        let outpoint = OutPoint::new([4u8; 32], 0);
        let result = view.begin_load(&[spend(outpoint), spend(outpoint)]);
        assert!(matches!(result, Err(ViewError::DoubleSpend(op)) if op == outpoint));
    }

    #[test]
    fn tolerated_duplicate_pair_is_not_rejected() {
        let view = view();
        let outpoint = OutPoint::new(ALLOWED_DUPLICATE_TX_HASHES[0], 0);
        let required = view
            .begin_load(&[spend(outpoint), spend(outpoint)])
            .unwrap();
        // Only the first occurrence is looked up.
        assert_eq!(required, vec![outpoint]);
    }

    #[test]
    fn same_block_outputs_are_not_looked_up() {
        let view = view();
        let funding = spend(OutPoint::new([4u8; 32], 0));
        let child = spend(OutPoint::new(funding.txid(), 0));
        let required = view.begin_load(&[funding.clone(), child]).unwrap();
        assert_eq!(required, vec![OutPoint::new([4u8; 32], 0)]);
    }

    #[test]
    fn missing_outputs_resolve_after_retry() {
        let mut view = view();
        let chain = chain_with_timestamps(&[1_000; 12]);
        let outpoint = OutPoint::new([4u8; 32], 0);

        let missing = view.resolve(&chain, &[outpoint]).unwrap();
        assert_eq!(missing, vec![outpoint]);
        assert!(!view.finish_load(&chain).unwrap());

        store_output(&view, &outpoint, &plain_entry(3));
        assert!(view.finish_load(&chain).unwrap());
        assert_eq!(view.output(&outpoint).unwrap().value, 5_000);
        assert_eq!(view.mined_height(&outpoint.txid).unwrap(), Some(3));
    }

    #[test]
    fn token_output_minted_before_activation_is_forged() {
        let schedule = upgrade_schedule(Network::Mainnet);
        let mut view = UtxoView::new(Arc::new(MemoryStore::new()), schedule);
        // All timestamps well before the token activation time.
        let chain = chain_with_timestamps(&[1_600_000_000; 12]);

        let outpoint = OutPoint::new([4u8; 32], 0);
        let entry = UtxoEntry {
            has_token_data: true,
            ..plain_entry(5)
        };
        store_output(&view, &outpoint, &entry);

        let missing = view.resolve(&chain, &[outpoint]).unwrap();
        assert!(missing.is_empty());
        assert!(view.is_pre_activation_token_forgery(&outpoint));
    }

    #[test]
    fn token_output_after_activation_is_not_forged() {
        let mut view = view();
        let chain = chain_with_timestamps(&[1_700_000_000; 12]);

        let outpoint = OutPoint::new([4u8; 32], 0);
        let entry = UtxoEntry {
            has_token_data: true,
            ..plain_entry(5)
        };
        store_output(&view, &outpoint, &entry);

        view.resolve(&chain, &[outpoint]).unwrap();
        assert!(!view.is_pre_activation_token_forgery(&outpoint));
    }

    #[test]
    fn token_output_with_unknown_owning_block_stays_missing() {
        let mut view = view();
        let chain = chain_with_timestamps(&[1_700_000_000; 4]);

        let outpoint = OutPoint::new([4u8; 32], 0);
        let entry = UtxoEntry {
            has_token_data: true,
            ..plain_entry(50) // beyond the indexed chain
        };
        store_output(&view, &outpoint, &entry);

        let missing = view.resolve(&chain, &[outpoint]).unwrap();
        assert_eq!(missing, vec![outpoint]);
        assert!(view.output(&outpoint).is_none());
    }

    #[test]
    fn apply_commits_and_clear_resets() {
        let mut view = view();
        let chain = chain_with_timestamps(&[1_700_000_000; 12]);

        let funding_outpoint = OutPoint::new([4u8; 32], 0);
        store_output(&view, &funding_outpoint, &plain_entry(3));
        let spending = spend(funding_outpoint);
        let spending_txid = spending.txid();

        let required = view.begin_load(std::slice::from_ref(&spending)).unwrap();
        assert!(view.resolve(&chain, &required).unwrap().is_empty());

        let undo = view.apply(&chain, &[spending], 10).unwrap();
        assert_eq!(undo.spent.len(), 1);
        assert_eq!(undo.spent[0].outpoint, funding_outpoint);

        // Spent output is gone, created output is present.
        assert_eq!(view.utxo_set.get(&funding_outpoint).unwrap(), None);
        let created = OutPoint::new(spending_txid, 0);
        assert_eq!(view.utxo_set.get(&created).unwrap().unwrap().value, 1_000);

        view.clear();
        assert!(view.output(&created).is_none());
        // Persistent state survives the clear.
        assert!(view.utxo_set.get(&created).unwrap().is_some());
    }

    #[test]
    fn undo_codec_round_trip() {
        let undo = BlockUndo {
            spent: vec![SpentOutput {
                outpoint: OutPoint::new([9u8; 32], 2),
                entry: plain_entry(77),
            }],
        };
        assert_eq!(BlockUndo::decode(&undo.encode()).unwrap(), undo);
    }
}
