//! Read-only chain queries consumed by validation.

use cashd_consensus::constants::MEDIAN_TIME_SPAN;
use cashd_primitives::block::BlockHeader;
use cashd_primitives::hash::Hash256;

/// Accumulated proof-of-work, 256-bit big-endian friendly.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChainWork([u64; 4]);

impl ChainWork {
    pub const ZERO: ChainWork = ChainWork([0; 4]);

    pub fn to_be_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().rev().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    fn add(self, other: ChainWork) -> ChainWork {
        let mut limbs = [0u64; 4];
        let mut carry = 0u64;
        for i in 0..4 {
            let (sum, overflow_a) = self.0[i].overflowing_add(other.0[i]);
            let (sum, overflow_b) = sum.overflowing_add(carry);
            limbs[i] = sum;
            carry = (overflow_a as u64) + (overflow_b as u64);
        }
        ChainWork(limbs)
    }
}

impl Ord for ChainWork {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for ChainWork {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Work contributed by one block with the given compact difficulty bits.
pub fn work_from_bits(bits: u32) -> ChainWork {
    let exponent = (bits >> 24) as i32;
    let mantissa = (bits & 0x007f_ffff) as u64;
    if mantissa == 0 || bits & 0x0080_0000 != 0 {
        return ChainWork::ZERO;
    }
    let shift_bits = 8 * (exponent - 3);
    let dividend_exp = 256 - shift_bits;
    if dividend_exp <= 0 {
        return ChainWork::ZERO;
    }
    div_pow2_by_u64(dividend_exp.min(256) as u32, mantissa + 1)
}

// Long division of 2^exp by a small divisor, bit at a time.
fn div_pow2_by_u64(exp: u32, divisor: u64) -> ChainWork {
    let mut quotient = [0u64; 4];
    let mut remainder: u128 = 1;
    for bit in (0..exp).rev() {
        remainder <<= 1;
        if remainder >= divisor as u128 {
            remainder -= divisor as u128;
            quotient[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }
    }
    ChainWork(quotient)
}

/// Read-only view of a chain segment, indexed by height.
///
/// `median_time_past(h)` is the median of the timestamps of up to
/// [`MEDIAN_TIME_SPAN`] blocks ending at `h`, the manipulation-resistant
/// clock every time-gated rule keys on.
pub trait HeaderView: Sync {
    fn tip_height(&self) -> Option<u64>;
    fn header_at(&self, height: u64) -> Option<BlockHeader>;
    fn height_of(&self, hash: &Hash256) -> Option<u64>;
    fn chain_work_at(&self, height: u64) -> Option<ChainWork>;

    fn hash_at(&self, height: u64) -> Option<Hash256> {
        self.header_at(height).map(|header| header.hash())
    }

    fn timestamp_at(&self, height: u64) -> Option<u64> {
        self.header_at(height).map(|header| header.time as u64)
    }

    fn difficulty_at(&self, height: u64) -> Option<u32> {
        self.header_at(height).map(|header| header.bits)
    }

    fn median_time_past(&self, height: u64) -> Option<u64> {
        let span = MEDIAN_TIME_SPAN.min(height as usize + 1);
        let mut timestamps = Vec::with_capacity(span);
        for offset in 0..span {
            timestamps.push(self.timestamp_at(height - offset as u64)?);
        }
        timestamps.sort_unstable();
        Some(timestamps[timestamps.len() / 2])
    }
}

/// In-memory header index. Backs the anchor locator and tests; a node
/// wraps its persistent block index in the same trait.
#[derive(Default)]
pub struct HeaderChain {
    headers: Vec<BlockHeader>,
    heights: std::collections::HashMap<Hash256, u64>,
    cumulative_work: Vec<ChainWork>,
}

impl HeaderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: BlockHeader) {
        let height = self.headers.len() as u64;
        let work = work_from_bits(header.bits);
        let total = self
            .cumulative_work
            .last()
            .copied()
            .unwrap_or(ChainWork::ZERO)
            .add(work);
        self.heights.insert(header.hash(), height);
        self.headers.push(header);
        self.cumulative_work.push(total);
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl HeaderView for HeaderChain {
    fn tip_height(&self) -> Option<u64> {
        self.headers.len().checked_sub(1).map(|height| height as u64)
    }

    fn header_at(&self, height: u64) -> Option<BlockHeader> {
        self.headers.get(height as usize).copied()
    }

    fn height_of(&self, hash: &Hash256) -> Option<u64> {
        self.heights.get(hash).copied()
    }

    fn chain_work_at(&self, height: u64) -> Option<ChainWork> {
        self.cumulative_work.get(height as usize).copied()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) fn chain_with_timestamps(timestamps: &[u64]) -> HeaderChain {
        let mut chain = HeaderChain::new();
        let mut prev_block = [0u8; 32];
        for (height, time) in timestamps.iter().enumerate() {
            let header = BlockHeader {
                version: 2,
                prev_block,
                merkle_root: [height as u8; 32],
                time: *time as u32,
                bits: 0x1d00_ffff,
                nonce: height as u32,
            };
            prev_block = header.hash();
            chain.push(header);
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::chain_with_timestamps;
    use super::*;

    #[test]
    fn median_time_past_uses_eleven_blocks() {
        let timestamps: Vec<u64> = (0..20).map(|i| 1_000 + i * 100).collect();
        let chain = chain_with_timestamps(&timestamps);
        // Heights 5..=15 have timestamps 1500..=2500; median is height 10.
        assert_eq!(chain.median_time_past(15), Some(2_000));
        // Short chains take the median of what exists.
        assert_eq!(chain.median_time_past(0), Some(1_000));
        assert_eq!(chain.median_time_past(2), Some(1_100));
    }

    #[test]
    fn median_is_order_insensitive() {
        let timestamps = vec![100, 900, 200, 800, 300, 700, 400, 600, 500, 450, 550];
        let chain = chain_with_timestamps(&timestamps);
        assert_eq!(chain.median_time_past(10), Some(500));
    }

    #[test]
    fn harder_bits_contribute_more_work() {
        let easy = work_from_bits(0x1d00_ffff);
        let hard = work_from_bits(0x1c00_ffff);
        assert!(hard > easy);
        assert!(easy > ChainWork::ZERO);
    }

    #[test]
    fn chain_work_accumulates() {
        let chain = chain_with_timestamps(&[1, 2, 3]);
        let w0 = chain.chain_work_at(0).unwrap();
        let w2 = chain.chain_work_at(2).unwrap();
        assert!(w2 > w0);
        assert_eq!(chain.chain_work_at(3), None);
    }

    #[test]
    fn height_lookup_by_hash() {
        let chain = chain_with_timestamps(&[10, 20, 30]);
        let hash = chain.hash_at(1).unwrap();
        assert_eq!(chain.height_of(&hash), Some(1));
        assert_eq!(chain.height_of(&[0xaa; 32]), None);
    }
}
