//! Protocol upgrade schedule.
//!
//! Every historical rule change is gated on either a block height or a
//! median-time-past threshold. The schedule is pure data: two fixed
//! arrays built once per network at startup, safe for unsynchronized
//! concurrent reads. Each public accessor maps one named rule to exactly
//! one table entry; that mapping is consensus logic, not configuration.

use crate::params::Network;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum HeightRule {
    /// Legacy pay-to-script-hash (BIP-16).
    Bip16 = 0,
    /// Block height required within the coinbase script (BIP-34).
    Bip34 = 1,
    /// OP_CHECKLOCKTIMEVERIFY (BIP-65).
    Bip65 = 2,
    /// Strict DER signature encoding (BIP-66).
    Bip66 = 3,
    /// Relative locktime via sequence numbers (BIP-68).
    Bip68 = 4,
    /// OP_CHECKSEQUENCEVERIFY (BIP-112).
    Bip112 = 5,
    /// Median-time-past for locktime comparisons (BIP-113).
    Bip113 = 6,
    /// The 2017-08-01 UAHF split (BUIP-55).
    Buip55 = 7,
    /// The 2017-11-13 hard fork (CW-144 difficulty algorithm).
    Hf20171113 = 8,
    /// The 2018-11-15 hard fork (clean stack, push-only, 100-byte minimum).
    Hf20181115 = 9,
    /// The 2019-05-15 hard fork (Schnorr signatures, segwit recovery).
    Hf20190515 = 10,
}

pub const MAX_HEIGHT_RULES: usize = 11;

pub const ALL_HEIGHT_RULES: [HeightRule; MAX_HEIGHT_RULES] = [
    HeightRule::Bip16,
    HeightRule::Bip34,
    HeightRule::Bip65,
    HeightRule::Bip66,
    HeightRule::Bip68,
    HeightRule::Bip112,
    HeightRule::Bip113,
    HeightRule::Buip55,
    HeightRule::Hf20171113,
    HeightRule::Hf20181115,
    HeightRule::Hf20190515,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TimeRule {
    /// The 2019-05-15 hard fork, time-gated rules.
    Hf20190515 = 0,
    /// The 2019-11-15 hard fork (minimal number encoding, Schnorr multisig).
    Hf20191115 = 1,
    /// The 2020-05-15 hard fork (SigChecks, OP_REVERSEBYTES).
    Hf20200515 = 2,
    /// The 2020-11-15 hard fork (ASERT difficulty algorithm).
    Hf20201115 = 3,
    /// The 2022-05-15 hard fork (introspection, 64-bit integers, OP_MUL).
    Hf20220515 = 4,
    /// The 2023-05-15 hard fork (cash tokens, SHA-256 P2SH, 65-byte minimum).
    Hf20230515 = 5,
}

pub const MAX_TIME_RULES: usize = 6;

pub const ALL_TIME_RULES: [TimeRule; MAX_TIME_RULES] = [
    TimeRule::Hf20190515,
    TimeRule::Hf20191115,
    TimeRule::Hf20200515,
    TimeRule::Hf20201115,
    TimeRule::Hf20220515,
    TimeRule::Hf20230515,
];

impl HeightRule {
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

impl TimeRule {
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

/// Immutable per-network activation table.
#[derive(Clone, Debug)]
pub struct UpgradeSchedule {
    network: Network,
    activation_heights: [u64; MAX_HEIGHT_RULES],
    activation_times: [u64; MAX_TIME_RULES],
}

impl UpgradeSchedule {
    pub(crate) const fn new(
        network: Network,
        activation_heights: [u64; MAX_HEIGHT_RULES],
        activation_times: [u64; MAX_TIME_RULES],
    ) -> Self {
        Self {
            network,
            activation_heights,
            activation_times,
        }
    }

    pub fn for_network(network: Network) -> Self {
        crate::params::upgrade_schedule(network)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Activation is `height >= threshold`, except BIP-34 which only
    /// takes effect strictly after its threshold block.
    pub fn height_rule_active(&self, rule: HeightRule, height: u64) -> bool {
        let threshold = self.activation_heights[rule.as_usize()];
        match rule {
            HeightRule::Bip34 => height > threshold,
            _ => height >= threshold,
        }
    }

    pub fn time_rule_active(&self, rule: TimeRule, median_time: u64) -> bool {
        median_time >= self.activation_times[rule.as_usize()]
    }

    /// True iff any rule's activation state differs between the two
    /// (height, median-time) points. Used to decide whether moving
    /// between chain tips requires re-validation.
    pub fn upgrade_activated_between(
        &self,
        height0: u64,
        median_time0: u64,
        height1: u64,
        median_time1: u64,
    ) -> bool {
        for rule in ALL_HEIGHT_RULES {
            if self.height_rule_active(rule, height0) != self.height_rule_active(rule, height1) {
                return true;
            }
        }
        for rule in ALL_TIME_RULES {
            if self.time_rule_active(rule, median_time0) != self.time_rule_active(rule, median_time1)
            {
                return true;
            }
        }
        false
    }

    // Height-gated rules.

    pub fn is_legacy_pay_to_script_hash_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip16, height)
    }

    pub fn is_block_height_within_coinbase_required(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip34, height)
    }

    pub fn is_check_lock_time_operation_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip65, height)
    }

    pub fn is_der_signature_format_required(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip66, height)
    }

    pub fn is_relative_lock_time_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip68, height)
    }

    pub fn is_check_sequence_number_operation_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip112, height)
    }

    pub fn should_use_median_block_time_for_transaction_lock_time(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Bip113, height)
    }

    pub fn is_bitcoin_cash_signature_hash_type_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Buip55, height)
    }

    pub fn is_emergency_difficulty_adjustment_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Buip55, height)
    }

    pub fn is_cw144_difficulty_adjustment_algorithm_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20171113, height)
    }

    /// NULLFAIL: failed signature checks must consume an empty signature.
    pub fn are_all_invalid_signatures_required_to_be_empty(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20171113, height)
    }

    pub fn are_canonical_signature_encodings_required(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20171113, height)
    }

    pub fn are_public_keys_required_to_be_strictly_encoded(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Buip55, height)
    }

    pub fn are_signatures_required_to_be_strictly_encoded(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Buip55, height)
    }

    pub fn are_only_push_operations_allowed_within_unlocking_scripts(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20181115, height)
    }

    /// Clean-stack: unlocking scripts must not leave extra values behind.
    pub fn is_unused_value_forbidden_within_unlocking_scripts(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20181115, height)
    }

    pub fn are_transactions_less_than_one_hundred_bytes_disallowed(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20181115, height)
    }

    pub fn is_check_data_signature_operation_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20181115, height)
    }

    pub fn are_schnorr_signatures_enabled(&self, height: u64) -> bool {
        self.height_rule_active(HeightRule::Hf20190515, height)
    }

    // Median-time-gated rules.

    /// Exemption from the clean-stack rule for recovering outputs locked
    /// by segwit-style scripts.
    pub fn is_segwit_recovery_exemption_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20190515, median_time)
    }

    pub fn is_minimal_number_encoding_required(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20191115, median_time)
    }

    pub fn are_schnorr_signatures_enabled_within_multi_signature(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20191115, median_time)
    }

    pub fn is_signature_operation_count_version_two_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20200515, median_time)
    }

    pub fn is_reverse_bytes_operation_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20200515, median_time)
    }

    pub fn is_asert_difficulty_adjustment_algorithm_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20201115, median_time)
    }

    pub fn are_introspection_operations_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20220515, median_time)
    }

    pub fn are_64_bit_script_integers_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20220515, median_time)
    }

    pub fn is_multiply_operation_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20220515, median_time)
    }

    pub fn are_transactions_less_than_sixty_five_bytes_disallowed(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20230515, median_time)
    }

    pub fn are_transaction_versions_restricted(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20230515, median_time)
    }

    pub fn are_cash_tokens_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20230515, median_time)
    }

    pub fn is_sha256_pay_to_script_hash_enabled(&self, median_time: u64) -> bool {
        self.time_rule_active(TimeRule::Hf20230515, median_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::upgrade_schedule;

    #[test]
    fn mainnet_activation_edges() {
        let schedule = upgrade_schedule(Network::Mainnet);

        assert!(!schedule.is_bitcoin_cash_signature_hash_type_enabled(478_558));
        assert!(schedule.is_bitcoin_cash_signature_hash_type_enabled(478_559));

        assert!(!schedule.is_cw144_difficulty_adjustment_algorithm_enabled(504_031));
        assert!(schedule.is_cw144_difficulty_adjustment_algorithm_enabled(504_032));

        assert!(!schedule.are_transactions_less_than_one_hundred_bytes_disallowed(556_766));
        assert!(schedule.are_transactions_less_than_one_hundred_bytes_disallowed(556_767));

        assert!(!schedule.is_asert_difficulty_adjustment_algorithm_enabled(1_605_441_599));
        assert!(schedule.is_asert_difficulty_adjustment_algorithm_enabled(1_605_441_600));

        assert!(!schedule.are_cash_tokens_enabled(1_684_151_999));
        assert!(schedule.are_cash_tokens_enabled(1_684_152_000));
    }

    #[test]
    fn strict_encoding_rules_follow_the_first_fork() {
        let schedule = upgrade_schedule(Network::Mainnet);

        assert!(!schedule.are_public_keys_required_to_be_strictly_encoded(478_558));
        assert!(schedule.are_public_keys_required_to_be_strictly_encoded(478_559));

        assert!(!schedule.are_signatures_required_to_be_strictly_encoded(478_558));
        assert!(schedule.are_signatures_required_to_be_strictly_encoded(478_559));
    }

    #[test]
    fn segwit_recovery_exemption_is_median_time_gated() {
        let schedule = upgrade_schedule(Network::Mainnet);

        assert!(!schedule.is_segwit_recovery_exemption_enabled(1_557_921_599));
        assert!(schedule.is_segwit_recovery_exemption_enabled(1_557_921_600));
    }

    #[test]
    fn coinbase_height_rule_is_strictly_after_threshold() {
        let schedule = upgrade_schedule(Network::Mainnet);
        assert!(!schedule.is_block_height_within_coinbase_required(227_834));
        assert!(!schedule.is_block_height_within_coinbase_required(227_835));
        assert!(schedule.is_block_height_within_coinbase_required(227_836));
    }

    #[test]
    fn rules_are_monotonic() {
        for network in [
            Network::Mainnet,
            Network::Testnet3,
            Network::Testnet4,
            Network::Chipnet,
        ] {
            let schedule = upgrade_schedule(network);
            for rule in ALL_HEIGHT_RULES {
                let mut previous = false;
                for height in [0u64, 1, 500, 21_112, 478_559, 556_767, 1_000_000, u64::MAX] {
                    let active = schedule.height_rule_active(rule, height);
                    assert!(active || !previous, "{network:?} {rule:?} at {height}");
                    previous = active;
                }
            }
            for rule in ALL_TIME_RULES {
                let mut previous = false;
                for time in [
                    0u64,
                    1_500_000_000,
                    1_557_921_600,
                    1_605_441_600,
                    1_684_152_000,
                    u64::MAX,
                ] {
                    let active = schedule.time_rule_active(rule, time);
                    assert!(active || !previous, "{network:?} {rule:?} at {time}");
                    previous = active;
                }
            }
        }
    }

    #[test]
    fn nothing_activates_between_identical_points() {
        let schedule = upgrade_schedule(Network::Mainnet);
        for (height, time) in [
            (0u64, 0u64),
            (478_559, 1_500_000_000),
            (800_000, 1_700_000_000),
        ] {
            assert!(!schedule.upgrade_activated_between(height, time, height, time));
        }
    }

    #[test]
    fn fork_boundaries_are_detected_in_both_directions() {
        let schedule = upgrade_schedule(Network::Mainnet);
        assert!(schedule.upgrade_activated_between(478_558, 0, 478_559, 0));
        assert!(schedule.upgrade_activated_between(478_559, 0, 478_558, 0));
        assert!(schedule.upgrade_activated_between(0, 1_605_441_599, 0, 1_605_441_600));
        assert!(!schedule.upgrade_activated_between(478_559, 0, 478_560, 0));
    }

    #[test]
    fn chipnet_enables_cash_tokens_early() {
        let chipnet = upgrade_schedule(Network::Chipnet);
        let testnet4 = upgrade_schedule(Network::Testnet4);
        assert!(chipnet.are_cash_tokens_enabled(1_668_513_600));
        assert!(!testnet4.are_cash_tokens_enabled(1_668_513_600));
    }
}
