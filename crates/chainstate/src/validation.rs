//! Contextual transaction validation against a loaded output view.
//!
//! Script execution itself lives behind the `ScriptRunner` seam; this
//! module owns everything around it: size and version gates, absolute
//! and relative lock times, input resolution and coinbase maturity,
//! value conservation, and the per-transaction signature operation
//! budget.

use std::fmt;

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

use cashd_consensus::constants::{
    COINBASE_MATURITY, LOCKTIME_THRESHOLD, MAX_SCRIPT_SIZE,
    MAX_SIGNATURE_OPERATIONS_PER_TRANSACTION, MIN_TRANSACTION_SIZE,
    REDUCED_MIN_TRANSACTION_SIZE,
};
use cashd_consensus::money::{money_range, Amount};
use cashd_consensus::UpgradeSchedule;
use cashd_primitives::hash::{hash256_to_hex, Hash256};
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{
    sequence_disables_lock_time, sequence_is_seconds, sequence_seconds, sequence_value,
    Transaction,
};
use cashd_storage::KeyValueStore;

use crate::chain::HeaderView;
use crate::utxo::UtxoEntry;
use crate::view::UtxoView;

/// Outcome of executing one input's scripts.
#[derive(Clone, Copy, Debug)]
pub struct ScriptResult {
    pub is_valid: bool,
    pub signature_operation_count: u32,
}

/// Everything a script engine may consult beyond the raw script bytes.
pub struct ScriptContext<'a> {
    pub transaction: &'a Transaction,
    pub input_index: usize,
    pub spent_output: &'a UtxoEntry,
    pub schedule: &'a UpgradeSchedule,
    pub block_height: u64,
    pub median_time_past: u64,
}

/// Seam for the script interpreter. Implementations are shared across
/// validation workers and must be `Sync`.
pub trait ScriptRunner: Sync {
    fn run(&self, locking: &[u8], unlocking: &[u8], context: &ScriptContext<'_>) -> ScriptResult;
}

/// Outputs created earlier within the block being validated, consulted
/// before the persistent view so chained spends resolve.
pub struct BlockOutputs {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl BlockOutputs {
    pub fn from_transactions(transactions: &[Transaction], height: u64) -> Self {
        let mut entries = HashMap::new();
        for transaction in transactions {
            let txid = transaction.txid();
            let is_coinbase = transaction.is_coinbase();
            for (index, output) in transaction.outputs.iter().enumerate() {
                entries.insert(
                    OutPoint::new(txid, index as u32),
                    UtxoEntry {
                        value: output.value,
                        locking_script: output.locking_script.clone(),
                        height: height as u32,
                        is_coinbase,
                        has_token_data: output.has_token_data(),
                    },
                );
            }
        }
        Self { entries }
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RejectionReason {
    BelowMinimumSize { size: usize, minimum: usize },
    VersionNotAllowed(i32),
    NoInputs,
    NoOutputs,
    LockTimeNotSatisfied { lock_time: u32 },
    SequenceLockNotSatisfied,
    DuplicateInput(OutPoint),
    MissingOutput(OutPoint),
    ForgedTokenOutput(OutPoint),
    ImmatureCoinbaseSpend { confirmations: u64 },
    OversizedUnlockingScript { size: usize },
    OversizedLockingScript { size: usize },
    ScriptFailure,
    ValueOutOfRange(Amount),
    TotalValueOverflow { inputs: i128, outputs: i128 },
    InputsBelowOutputs { inputs: i128, outputs: i128 },
    TooManySignatureOperations { count: u32 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::BelowMinimumSize { size, minimum } => {
                write!(f, "transaction is {size} bytes, minimum is {minimum}")
            }
            RejectionReason::VersionNotAllowed(version) => {
                write!(f, "transaction version {version} not allowed")
            }
            RejectionReason::NoInputs => write!(f, "transaction has no inputs"),
            RejectionReason::NoOutputs => write!(f, "transaction has no outputs"),
            RejectionReason::LockTimeNotSatisfied { lock_time } => {
                write!(f, "lock time {lock_time} not yet satisfied")
            }
            RejectionReason::SequenceLockNotSatisfied => {
                write!(f, "relative lock time not yet satisfied")
            }
            RejectionReason::DuplicateInput(outpoint) => write!(
                f,
                "input {}:{} appears twice",
                hash256_to_hex(&outpoint.txid),
                outpoint.index
            ),
            RejectionReason::MissingOutput(outpoint) => write!(
                f,
                "spent output {}:{} is unknown or already spent",
                hash256_to_hex(&outpoint.txid),
                outpoint.index
            ),
            RejectionReason::ForgedTokenOutput(outpoint) => write!(
                f,
                "token-carrying output {}:{} predates token activation",
                hash256_to_hex(&outpoint.txid),
                outpoint.index
            ),
            RejectionReason::ImmatureCoinbaseSpend { confirmations } => {
                write!(f, "coinbase output spent after {confirmations} confirmations")
            }
            RejectionReason::OversizedUnlockingScript { size } => {
                write!(f, "unlocking script is {size} bytes")
            }
            RejectionReason::OversizedLockingScript { size } => {
                write!(f, "locking script is {size} bytes")
            }
            RejectionReason::ScriptFailure => write!(f, "script evaluation failed"),
            RejectionReason::ValueOutOfRange(value) => {
                write!(f, "output value {value} out of range")
            }
            RejectionReason::TotalValueOverflow { inputs, outputs } => {
                write!(f, "totals out of range (inputs {inputs}, outputs {outputs})")
            }
            RejectionReason::InputsBelowOutputs { inputs, outputs } => {
                write!(f, "inputs {inputs} below outputs {outputs}")
            }
            RejectionReason::TooManySignatureOperations { count } => {
                write!(f, "{count} signature operations exceed the limit")
            }
        }
    }
}

/// Structured rejection report with enough context to reproduce the
/// failing check outside the node.
#[derive(Clone, Debug)]
pub struct TransactionRejection {
    pub reason: RejectionReason,
    pub transaction_hash: Hash256,
    pub input_index: Option<usize>,
    pub unlocking_script: Vec<u8>,
    pub locking_script: Vec<u8>,
    pub block_height: u64,
    pub median_block_time: u64,
    pub network_time: u64,
}

impl fmt::Display for TransactionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rejected transaction {} at height {}: {}",
            hash256_to_hex(&self.transaction_hash),
            self.block_height,
            self.reason
        )?;
        if let Some(index) = self.input_index {
            write!(f, " (input {index})")?;
        }
        write!(
            f,
            " [median_time={} network_time={}]",
            self.median_block_time, self.network_time
        )
    }
}

impl std::error::Error for TransactionRejection {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidTransaction {
    pub signature_operation_count: u32,
}

pub struct TransactionValidator<'a, S, C, R> {
    view: &'a UtxoView<S>,
    block_outputs: &'a BlockOutputs,
    chain: &'a C,
    schedule: &'a UpgradeSchedule,
    script_runner: &'a R,
    network_time: u64,
}

impl<'a, S, C, R> TransactionValidator<'a, S, C, R>
where
    S: KeyValueStore,
    C: HeaderView,
    R: ScriptRunner,
{
    pub fn new(
        view: &'a UtxoView<S>,
        block_outputs: &'a BlockOutputs,
        chain: &'a C,
        schedule: &'a UpgradeSchedule,
        script_runner: &'a R,
        network_time: u64,
    ) -> Self {
        Self {
            view,
            block_outputs,
            chain,
            schedule,
            script_runner,
            network_time,
        }
    }

    pub fn validate(
        &self,
        block_height: u64,
        transaction: &Transaction,
    ) -> Result<ValidTransaction, Box<TransactionRejection>> {
        let median_time = self
            .chain
            .median_time_past(block_height.saturating_sub(1))
            .unwrap_or(0);
        let reject = |reason: RejectionReason, input_index: Option<usize>| {
            let (unlocking_script, locking_script) = match input_index {
                Some(index) => {
                    let input = &transaction.inputs[index];
                    let locking = self
                        .spent_output(&input.prevout)
                        .map(|(entry, _)| entry.locking_script.clone())
                        .unwrap_or_default();
                    (input.unlocking_script.clone(), locking)
                }
                None => (Vec::new(), Vec::new()),
            };
            Box::new(TransactionRejection {
                reason,
                transaction_hash: transaction.txid(),
                input_index,
                unlocking_script,
                locking_script,
                block_height,
                median_block_time: median_time,
                network_time: self.network_time,
            })
        };

        let size = transaction.serialized_size();
        if self
            .schedule
            .are_transactions_less_than_sixty_five_bytes_disallowed(median_time)
        {
            if size < REDUCED_MIN_TRANSACTION_SIZE {
                return Err(reject(
                    RejectionReason::BelowMinimumSize {
                        size,
                        minimum: REDUCED_MIN_TRANSACTION_SIZE,
                    },
                    None,
                ));
            }
        } else if self
            .schedule
            .are_transactions_less_than_one_hundred_bytes_disallowed(block_height)
            && size < MIN_TRANSACTION_SIZE
        {
            return Err(reject(
                RejectionReason::BelowMinimumSize {
                    size,
                    minimum: MIN_TRANSACTION_SIZE,
                },
                None,
            ));
        }

        if self.schedule.are_transaction_versions_restricted(median_time)
            && !(1..=2).contains(&transaction.version)
        {
            return Err(reject(
                RejectionReason::VersionNotAllowed(transaction.version),
                None,
            ));
        }

        if transaction.inputs.is_empty() {
            return Err(reject(RejectionReason::NoInputs, None));
        }
        if transaction.outputs.is_empty() {
            return Err(reject(RejectionReason::NoOutputs, None));
        }

        if let Some(reason) = self.absolute_lock_time_failure(transaction, block_height, median_time)
        {
            return Err(reject(reason, None));
        }

        let relative_locks_apply = transaction.version >= 2
            && self.schedule.is_relative_lock_time_enabled(block_height);

        let mut seen: HashSet<OutPoint> = HashSet::with_capacity(transaction.inputs.len());
        let mut input_total: i128 = 0;
        let mut signature_operation_count: u32 = 0;

        for (index, input) in transaction.inputs.iter().enumerate() {
            if !seen.insert(input.prevout) {
                return Err(reject(
                    RejectionReason::DuplicateInput(input.prevout),
                    Some(index),
                ));
            }

            let Some((spent, in_block)) = self.spent_output(&input.prevout) else {
                return Err(reject(
                    RejectionReason::MissingOutput(input.prevout),
                    Some(index),
                ));
            };

            if self.view.is_pre_activation_token_forgery(&input.prevout) {
                return Err(reject(
                    RejectionReason::ForgedTokenOutput(input.prevout),
                    Some(index),
                ));
            }

            // A same-block coinbase spend has a delta of zero and fails
            // the maturity comparison like any other immature spend.
            if spent.is_coinbase {
                let confirmations = block_height.saturating_sub(spent.height as u64);
                if confirmations <= COINBASE_MATURITY {
                    return Err(reject(
                        RejectionReason::ImmatureCoinbaseSpend { confirmations },
                        Some(index),
                    ));
                }
            }

            if relative_locks_apply
                && !self.relative_lock_satisfied(
                    input.sequence,
                    spent,
                    in_block,
                    block_height,
                    median_time,
                )
            {
                return Err(reject(RejectionReason::SequenceLockNotSatisfied, Some(index)));
            }

            if input.unlocking_script.len() > MAX_SCRIPT_SIZE {
                return Err(reject(
                    RejectionReason::OversizedUnlockingScript {
                        size: input.unlocking_script.len(),
                    },
                    Some(index),
                ));
            }

            let context = ScriptContext {
                transaction,
                input_index: index,
                spent_output: spent,
                schedule: self.schedule,
                block_height,
                median_time_past: median_time,
            };
            let result = self.script_runner.run(
                &spent.locking_script,
                &input.unlocking_script,
                &context,
            );
            if !result.is_valid {
                return Err(reject(RejectionReason::ScriptFailure, Some(index)));
            }
            signature_operation_count =
                signature_operation_count.saturating_add(result.signature_operation_count);
            input_total += spent.value as i128;
        }

        let mut output_total: i128 = 0;
        for output in &transaction.outputs {
            if output.locking_script.len() > MAX_SCRIPT_SIZE {
                return Err(reject(
                    RejectionReason::OversizedLockingScript {
                        size: output.locking_script.len(),
                    },
                    None,
                ));
            }
            if !money_range(output.value) {
                return Err(reject(RejectionReason::ValueOutOfRange(output.value), None));
            }
            output_total += output.value as i128;
        }
        let ceiling = cashd_consensus::money::MAX_MONEY as i128;
        if output_total > ceiling || input_total > ceiling {
            return Err(reject(
                RejectionReason::TotalValueOverflow {
                    inputs: input_total,
                    outputs: output_total,
                },
                None,
            ));
        }
        if input_total < output_total {
            return Err(reject(
                RejectionReason::InputsBelowOutputs {
                    inputs: input_total,
                    outputs: output_total,
                },
                None,
            ));
        }

        if self
            .schedule
            .is_signature_operation_count_version_two_enabled(median_time)
            && signature_operation_count > MAX_SIGNATURE_OPERATIONS_PER_TRANSACTION
        {
            return Err(reject(
                RejectionReason::TooManySignatureOperations {
                    count: signature_operation_count,
                },
                None,
            ));
        }

        Ok(ValidTransaction {
            signature_operation_count,
        })
    }

    fn spent_output(&self, outpoint: &OutPoint) -> Option<(&UtxoEntry, bool)> {
        if let Some(entry) = self.block_outputs.get(outpoint) {
            return Some((entry, true));
        }
        self.view.output(outpoint).map(|entry| (entry, false))
    }

    fn absolute_lock_time_failure(
        &self,
        transaction: &Transaction,
        block_height: u64,
        median_time: u64,
    ) -> Option<RejectionReason> {
        if transaction.lock_time == 0 || transaction.all_inputs_final() {
            return None;
        }
        let satisfied = if transaction.lock_time < LOCKTIME_THRESHOLD {
            block_height >= transaction.lock_time as u64
        } else {
            let reference = if self
                .schedule
                .should_use_median_block_time_for_transaction_lock_time(block_height)
            {
                median_time
            } else {
                self.network_time
            };
            reference >= transaction.lock_time as u64
        };
        if satisfied {
            None
        } else {
            Some(RejectionReason::LockTimeNotSatisfied {
                lock_time: transaction.lock_time,
            })
        }
    }

    fn relative_lock_satisfied(
        &self,
        sequence: u32,
        spent: &UtxoEntry,
        in_block: bool,
        block_height: u64,
        median_time: u64,
    ) -> bool {
        if sequence_disables_lock_time(sequence) {
            return true;
        }
        if sequence_is_seconds(sequence) {
            // Unconfirmed parents have accrued no time.
            let elapsed = if in_block {
                0
            } else {
                let owning_median = self
                    .chain
                    .median_time_past(spent.height as u64)
                    .unwrap_or(median_time);
                median_time.saturating_sub(owning_median)
            };
            elapsed >= sequence_seconds(sequence)
        } else {
            let owning_height = if in_block {
                block_height
            } else {
                spent.height as u64
            };
            block_height.saturating_sub(owning_height) >= sequence_value(sequence) as u64
        }
    }
}

/// Validates every non-coinbase transaction of a block in parallel
/// against a frozen view, returning the summed signature operation
/// count. The first rejection in block order wins.
pub fn validate_block_transactions<S, C, R>(
    validator: &TransactionValidator<'_, S, C, R>,
    block_height: u64,
    transactions: &[Transaction],
) -> Result<u64, Box<TransactionRejection>>
where
    S: KeyValueStore + Sync,
    C: HeaderView + Sync,
    R: ScriptRunner,
{
    let results: Vec<Result<ValidTransaction, Box<TransactionRejection>>> = transactions
        .par_iter()
        .enumerate()
        .map(|(index, transaction)| {
            if index == 0 && transaction.is_coinbase() {
                return Ok(ValidTransaction {
                    signature_operation_count: 0,
                });
            }
            validator.validate(block_height, transaction)
        })
        .collect();

    let mut total: u64 = 0;
    for result in results {
        match result {
            Ok(valid) => total += valid.signature_operation_count as u64,
            Err(rejection) => {
                cashd_log::log_warn!("{rejection}");
                return Err(rejection);
            }
        }
    }
    Ok(total)
}
