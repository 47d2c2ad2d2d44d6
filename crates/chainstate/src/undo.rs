//! Rewind and replay of block effects on the output set, used when the
//! active chain switches to a better branch.

use std::collections::{HashMap, HashSet};
use std::fmt;

use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::Transaction;
use cashd_storage::{KeyValueStore, StoreError, WriteBatch};

use crate::utxo::{UtxoEntry, UtxoSet};
use crate::view::BlockUndo;

#[derive(Debug)]
pub enum UndoError {
    /// The undo record does not cover an output the block spent. The
    /// output set can not be restored; the reorganization must abort.
    MissingSpentOutput(OutPoint),
    Store(StoreError),
}

impl fmt::Display for UndoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoError::MissingSpentOutput(outpoint) => write!(
                f,
                "no undo record for spent output {}:{}",
                cashd_primitives::hash::hash256_to_hex(&outpoint.txid),
                outpoint.index
            ),
            UndoError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for UndoError {}

impl From<StoreError> for UndoError {
    fn from(err: StoreError) -> Self {
        UndoError::Store(err)
    }
}

/// Tracks output-set changes across a sequence of undone and re-applied
/// blocks so the persistent set is only touched through staged batches.
pub struct UtxoUndoLog<S> {
    utxo_set: UtxoSet<S>,
    available: HashMap<OutPoint, UtxoEntry>,
    unavailable: HashSet<OutPoint>,
}

impl<S: KeyValueStore> UtxoUndoLog<S> {
    pub fn new(store: S) -> Self {
        Self {
            utxo_set: UtxoSet::new(store),
            available: HashMap::new(),
            unavailable: HashSet::new(),
        }
    }

    /// Inverts one block: restores the outputs it spent from the undo
    /// record and removes the outputs it created. Transactions are
    /// walked in reverse block order so an output created and spent
    /// within the block ends up removed, not restored.
    pub fn undo_block(
        &mut self,
        transactions: &[Transaction],
        undo: &BlockUndo,
    ) -> Result<(), UndoError> {
        let mut restored: HashMap<OutPoint, &UtxoEntry> = HashMap::new();
        for spent in &undo.spent {
            restored.insert(spent.outpoint, &spent.entry);
        }

        let mut batch = WriteBatch::new();
        for transaction in transactions.iter().rev() {
            let txid = transaction.txid();
            for index in 0..transaction.outputs.len() {
                let outpoint = OutPoint::new(txid, index as u32);
                self.utxo_set.stage_delete(&mut batch, &outpoint);
                self.available.remove(&outpoint);
                self.unavailable.insert(outpoint);
            }
            if transaction.is_coinbase() {
                continue;
            }
            for input in &transaction.inputs {
                let entry = restored
                    .get(&input.prevout)
                    .ok_or(UndoError::MissingSpentOutput(input.prevout))?;
                self.utxo_set.stage_put(&mut batch, &input.prevout, entry);
                self.unavailable.remove(&input.prevout);
                self.available.insert(input.prevout, (*entry).clone());
            }
        }
        self.utxo_set.commit(&batch)?;
        Ok(())
    }

    /// Replays one block from the branch being connected: created
    /// outputs become available and spent outputs disappear.
    pub fn apply_block(
        &mut self,
        transactions: &[Transaction],
        height: u32,
    ) -> Result<(), UndoError> {
        let mut batch = WriteBatch::new();
        for transaction in transactions {
            let txid = transaction.txid();
            let is_coinbase = transaction.is_coinbase();
            self.utxo_set.stage_mined_height(&mut batch, &txid, height);
            for (index, output) in transaction.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(txid, index as u32);
                let entry = UtxoEntry {
                    value: output.value,
                    locking_script: output.locking_script.clone(),
                    height,
                    is_coinbase,
                    has_token_data: output.has_token_data(),
                };
                self.utxo_set.stage_put(&mut batch, &outpoint, &entry);
                self.unavailable.remove(&outpoint);
                self.available.insert(outpoint, entry);
            }
            if is_coinbase {
                continue;
            }
            for input in &transaction.inputs {
                self.utxo_set.stage_delete(&mut batch, &input.prevout);
                self.available.remove(&input.prevout);
                self.unavailable.insert(input.prevout);
            }
        }
        self.utxo_set.commit(&batch)?;
        Ok(())
    }

    /// Current spendability of an output, overlaying in-progress changes
    /// on the persistent set.
    pub fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, UndoError> {
        if self.unavailable.contains(outpoint) {
            return Ok(None);
        }
        if let Some(entry) = self.available.get(outpoint) {
            return Ok(Some(entry.clone()));
        }
        Ok(self.utxo_set.get(outpoint)?)
    }
}
