//! Locates the difficulty anchor block for the ASERT adjustment
//! algorithm: the first block whose median-time-past reaches the
//! activation time. The anchor is fixed once found, but it has to be
//! discovered by walking an arbitrary header chain, so the search is an
//! exponential back-off from the tip followed by a binary search.

use std::fmt;

use cashd_consensus::constants::{ANCHOR_INITIAL_JUMP, ANCHOR_JUMP_SCALE};
use cashd_consensus::UpgradeSchedule;

use crate::chain::HeaderView;

/// The anchor parameters the adjustment algorithm needs: the anchor
/// height, the timestamp of the anchor's parent, and the difficulty
/// target encoded in the anchor block itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AnchorBlock {
    pub height: u64,
    pub parent_block_timestamp: u64,
    pub bits: u32,
}

#[derive(Debug, Eq, PartialEq)]
pub enum AnchorError {
    /// The chain handed in is missing a header the walk needs.
    MissingHeader(u64),
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorError::MissingHeader(height) => {
                write!(f, "header at height {height} not available")
            }
        }
    }
}

impl std::error::Error for AnchorError {}

/// Finds the activation boundary on the given chain, or `None` when the
/// tip has not activated yet or activation predates the first block.
pub fn locate_anchor(
    chain: &impl HeaderView,
    schedule: &UpgradeSchedule,
) -> Result<Option<AnchorBlock>, AnchorError> {
    let Some(tip) = chain.tip_height() else {
        return Ok(None);
    };
    let tip_median = chain
        .median_time_past(tip)
        .ok_or(AnchorError::MissingHeader(tip))?;
    if !schedule.is_asert_difficulty_adjustment_algorithm_enabled(tip_median) {
        return Ok(None);
    }

    // Walk back in growing jumps until a block before the activation is
    // found. `upper` stays on the activated side throughout.
    let mut upper = tip;
    let mut distance = ANCHOR_INITIAL_JUMP;
    let mut step = ANCHOR_JUMP_SCALE;
    let lower = loop {
        let candidate = tip.saturating_sub(distance);
        let median = chain
            .median_time_past(candidate)
            .ok_or(AnchorError::MissingHeader(candidate))?;
        if !schedule.is_asert_difficulty_adjustment_algorithm_enabled(median) {
            break candidate;
        }
        upper = candidate;
        if candidate == 0 {
            // Every block is on the activated side; the boundary has no
            // parent to anchor on.
            return Ok(None);
        }
        distance = distance.saturating_add(step);
        step = step.saturating_mul(2);
    };

    // First activated height in (lower, upper].
    let mut low = lower;
    let mut high = upper;
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        let median = chain
            .median_time_past(mid)
            .ok_or(AnchorError::MissingHeader(mid))?;
        if schedule.is_asert_difficulty_adjustment_algorithm_enabled(median) {
            high = mid;
        } else {
            low = mid;
        }
    }

    let parent_block_timestamp = chain
        .timestamp_at(high - 1)
        .ok_or(AnchorError::MissingHeader(high - 1))?;
    let bits = chain
        .difficulty_at(high)
        .ok_or(AnchorError::MissingHeader(high))?;
    cashd_log::log_debug!(
        "anchor located at height {} ({} blocks below tip)",
        high,
        tip - high
    );
    Ok(Some(AnchorBlock {
        height: high,
        parent_block_timestamp,
        bits,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testutil::chain_with_timestamps;
    use cashd_consensus::{upgrade_schedule, Network};

    const ACTIVATION: u64 = 1_605_441_600;
    const SPACING: u64 = 600;

    /// Builds a chain of `len` blocks spaced ten minutes apart whose
    /// first activated median-time-past lands exactly at `boundary`.
    /// With constant spacing the median of heights h-10..h is the
    /// timestamp at h-5, so base is chosen to put that at `boundary`.
    fn chain_with_boundary(len: u64, boundary: u64) -> crate::chain::HeaderChain {
        let base = ACTIVATION - (boundary - 5) * SPACING;
        let timestamps: Vec<u64> = (0..len).map(|h| base + h * SPACING).collect();
        chain_with_timestamps(&timestamps)
    }

    fn expected_parent_timestamp(boundary: u64) -> u64 {
        let base = ACTIVATION - (boundary - 5) * SPACING;
        base + (boundary - 1) * SPACING
    }

    #[test]
    fn boundary_close_to_tip() {
        let chain = chain_with_boundary(600, 550);
        let schedule = upgrade_schedule(Network::Mainnet);
        let anchor = locate_anchor(&chain, &schedule).unwrap().unwrap();
        assert_eq!(anchor.height, 550);
        assert_eq!(
            anchor.parent_block_timestamp,
            expected_parent_timestamp(550)
        );
        assert_eq!(anchor.bits, 0x1d00_ffff);
    }

    #[test]
    fn boundary_in_the_middle() {
        let chain = chain_with_boundary(3_000, 1_500);
        let schedule = upgrade_schedule(Network::Mainnet);
        let anchor = locate_anchor(&chain, &schedule).unwrap().unwrap();
        assert_eq!(anchor.height, 1_500);
        assert_eq!(
            anchor.parent_block_timestamp,
            expected_parent_timestamp(1_500)
        );
    }

    #[test]
    fn boundary_deep_below_tip() {
        let chain = chain_with_boundary(6_000, 100);
        let schedule = upgrade_schedule(Network::Mainnet);
        let anchor = locate_anchor(&chain, &schedule).unwrap().unwrap();
        assert_eq!(anchor.height, 100);
        assert_eq!(
            anchor.parent_block_timestamp,
            expected_parent_timestamp(100)
        );
    }

    #[test]
    fn walk_distances_accumulate() {
        use std::sync::Mutex;

        use cashd_primitives::block::BlockHeader;
        use cashd_primitives::hash::Hash256;

        use crate::chain::{ChainWork, HeaderChain};

        struct RecordingChain {
            inner: HeaderChain,
            medians_queried: Mutex<Vec<u64>>,
        }

        impl HeaderView for RecordingChain {
            fn tip_height(&self) -> Option<u64> {
                self.inner.tip_height()
            }

            fn header_at(&self, height: u64) -> Option<BlockHeader> {
                self.inner.header_at(height)
            }

            fn height_of(&self, hash: &Hash256) -> Option<u64> {
                self.inner.height_of(hash)
            }

            fn chain_work_at(&self, height: u64) -> Option<ChainWork> {
                self.inner.chain_work_at(height)
            }

            fn median_time_past(&self, height: u64) -> Option<u64> {
                self.medians_queried.lock().unwrap().push(height);
                self.inner.median_time_past(height)
            }
        }

        let chain = RecordingChain {
            inner: chain_with_boundary(6_000, 100),
            medians_queried: Mutex::new(Vec::new()),
        };
        let schedule = upgrade_schedule(Network::Mainnet);
        let anchor = locate_anchor(&chain, &schedule).unwrap().unwrap();
        assert_eq!(anchor.height, 100);

        // Tip check first, then the back-off probes the tip minus 144,
        // 2160 and 6192 blocks, with the last jump clamped to genesis.
        let queried = chain.medians_queried.lock().unwrap();
        assert_eq!(queried[..4], [5_999, 5_855, 3_839, 0]);
    }

    #[test]
    fn inactive_tip_yields_no_anchor() {
        // Last median-time-past stays one step below the activation.
        let chain = chain_with_boundary(600, 600);
        let schedule = upgrade_schedule(Network::Mainnet);
        assert_eq!(locate_anchor(&chain, &schedule).unwrap(), None);
    }

    #[test]
    fn activation_at_genesis_yields_no_anchor() {
        let timestamps: Vec<u64> = (0..300).map(|h| ACTIVATION + h * SPACING).collect();
        let chain = chain_with_timestamps(&timestamps);
        let schedule = upgrade_schedule(Network::Mainnet);
        assert_eq!(locate_anchor(&chain, &schedule).unwrap(), None);
    }

    #[test]
    fn empty_chain_yields_no_anchor() {
        let chain = chain_with_timestamps(&[]);
        let schedule = upgrade_schedule(Network::Mainnet);
        assert_eq!(locate_anchor(&chain, &schedule).unwrap(), None);
    }
}
