//! Chainstate: UTXO tracking, chain queries, and transaction validation.

pub mod anchor;
pub mod chain;
pub mod undo;
pub mod utxo;
pub mod validation;
pub mod view;

pub use anchor::{locate_anchor, AnchorBlock, AnchorError};
pub use chain::{work_from_bits, ChainWork, HeaderChain, HeaderView};
pub use undo::{UndoError, UtxoUndoLog};
pub use utxo::{UtxoEntry, UtxoSet};
pub use validation::{
    validate_block_transactions, BlockOutputs, RejectionReason, ScriptContext, ScriptResult,
    ScriptRunner, TransactionRejection, TransactionValidator, ValidTransaction,
};
pub use view::{BlockUndo, SpentOutput, UtxoView, ViewError};
