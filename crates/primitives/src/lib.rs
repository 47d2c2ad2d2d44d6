//! Core block/transaction types and consensus serialization.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use hash::{hash256_from_hex, hash256_to_hex, sha256, sha256d, Hash256};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
