//! Consensus-wide constants shared across validation.

/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: u64 = 100;
/// The maximum allowed number of signature check operations in one transaction (network rule).
pub const MAX_SIGNATURE_OPERATIONS_PER_TRANSACTION: u32 = 3_000;
/// Maximum script size, locking or unlocking (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// The minimum serialized transaction size enforced by the 2018-11-15 rules.
pub const MIN_TRANSACTION_SIZE: usize = 100;
/// The relaxed minimum serialized transaction size enforced by the 2023-05-15 rules.
pub const REDUCED_MIN_TRANSACTION_SIZE: usize = 65;
/// Locktime values at or above this threshold are timestamps, below are block heights.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Number of trailing blocks whose timestamps feed the median-time-past calculation.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// First backward jump when searching for a difficulty algorithm changeover.
pub const ANCHOR_INITIAL_JUMP: u64 = 144;
/// Jump growth unit for subsequent iterations of the backward search.
pub const ANCHOR_JUMP_SCALE: u64 = 2016;
