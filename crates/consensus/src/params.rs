//! Per-network consensus parameters.

use crate::upgrades::{UpgradeSchedule, MAX_HEIGHT_RULES, MAX_TIME_RULES};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet3,
    Testnet4,
    Chipnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet3 => "testnet3",
            Network::Testnet4 => "testnet4",
            Network::Chipnet => "chipnet",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet3" | "testnet" | "test" => Some(Network::Testnet3),
            "testnet4" => Some(Network::Testnet4),
            "chipnet" => Some(Network::Chipnet),
            _ => None,
        }
    }
}

/// Builds the activation table for a network. Called once at startup;
/// every consumer shares the resulting schedule by reference.
pub fn upgrade_schedule(network: Network) -> UpgradeSchedule {
    match network {
        Network::Mainnet => mainnet_schedule(),
        Network::Testnet3 => testnet3_schedule(),
        Network::Testnet4 => testnet4_schedule(),
        Network::Chipnet => chipnet_schedule(),
    }
}

// Height order: BIP-16, BIP-34, BIP-65, BIP-66, BIP-68, BIP-112,
// BIP-113, BUIP-55, HF-2017-11-13, HF-2018-11-15, HF-2019-05-15.
// Time order: HF-2019-05-15, HF-2019-11-15, HF-2020-05-15,
// HF-2020-11-15, HF-2022-05-15, HF-2023-05-15.

fn mainnet_schedule() -> UpgradeSchedule {
    const HEIGHTS: [u64; MAX_HEIGHT_RULES] = [
        173_805, // BIP-16
        227_835, // BIP-34 (active strictly above)
        388_381, // BIP-65
        363_725, // BIP-66
        419_328, // BIP-68
        419_328, // BIP-112
        419_328, // BIP-113
        478_559, // BUIP-55
        504_032, // HF-2017-11-13
        556_767, // HF-2018-11-15
        582_680, // HF-2019-05-15
    ];
    const TIMES: [u64; MAX_TIME_RULES] = [
        1_557_921_600, // 2019-05-15
        1_573_819_200, // 2019-11-15
        1_589_544_000, // 2020-05-15
        1_605_441_600, // 2020-11-15
        1_652_616_000, // 2022-05-15
        1_684_152_000, // 2023-05-15
    ];
    UpgradeSchedule::new(Network::Mainnet, HEIGHTS, TIMES)
}

fn testnet3_schedule() -> UpgradeSchedule {
    const HEIGHTS: [u64; MAX_HEIGHT_RULES] = [
        514,       // BIP-16
        21_111,    // BIP-34 (active strictly above)
        581_885,   // BIP-65
        330_776,   // BIP-66
        770_112,   // BIP-68
        770_112,   // BIP-112
        770_112,   // BIP-113
        1_155_875, // BUIP-55
        1_188_697, // HF-2017-11-13
        1_267_996, // HF-2018-11-15
        1_303_885, // HF-2019-05-15
    ];
    const TIMES: [u64; MAX_TIME_RULES] = [
        1_557_921_600, // 2019-05-15
        1_573_819_200, // 2019-11-15
        1_589_544_000, // 2020-05-15
        1_605_441_600, // 2020-11-15
        1_652_616_000, // 2022-05-15
        1_684_152_000, // 2023-05-15
    ];
    UpgradeSchedule::new(Network::Testnet3, HEIGHTS, TIMES)
}

// Testnet4 boots with every early rule active within the first few
// blocks; only the difficulty-algorithm forks sit at a real height.
fn testnet4_schedule() -> UpgradeSchedule {
    const HEIGHTS: [u64; MAX_HEIGHT_RULES] = [
        1,     // BIP-16
        2,     // BIP-34 (active strictly above)
        3,     // BIP-65
        4,     // BIP-66
        5,     // BIP-68
        5,     // BIP-112
        5,     // BIP-113
        6,     // BUIP-55
        3_000, // HF-2017-11-13
        3_001, // HF-2018-11-15
        3_002, // HF-2019-05-15
    ];
    const TIMES: [u64; MAX_TIME_RULES] = [
        1_557_921_600, // 2019-05-15
        1_573_819_200, // 2019-11-15
        1_589_544_000, // 2020-05-15
        1_605_441_600, // 2020-11-15
        1_652_616_000, // 2022-05-15
        1_684_152_000, // 2023-05-15
    ];
    UpgradeSchedule::new(Network::Testnet4, HEIGHTS, TIMES)
}

// Chipnet shares testnet4's history but activates each yearly upgrade
// six months early, starting with the 2023-05-15 rules.
fn chipnet_schedule() -> UpgradeSchedule {
    const HEIGHTS: [u64; MAX_HEIGHT_RULES] = [
        1,     // BIP-16
        2,     // BIP-34 (active strictly above)
        3,     // BIP-65
        4,     // BIP-66
        5,     // BIP-68
        5,     // BIP-112
        5,     // BIP-113
        6,     // BUIP-55
        3_000, // HF-2017-11-13
        3_001, // HF-2018-11-15
        3_002, // HF-2019-05-15
    ];
    const TIMES: [u64; MAX_TIME_RULES] = [
        1_557_921_600, // 2019-05-15
        1_573_819_200, // 2019-11-15
        1_589_544_000, // 2020-05-15
        1_605_441_600, // 2020-11-15
        1_652_616_000, // 2022-05-15
        1_668_513_600, // 2022-11-15 (six months early)
    ];
    UpgradeSchedule::new(Network::Chipnet, HEIGHTS, TIMES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parse_round_trip() {
        for network in [
            Network::Mainnet,
            Network::Testnet3,
            Network::Testnet4,
            Network::Chipnet,
        ] {
            assert_eq!(Network::parse(network.as_str()), Some(network));
        }
        assert_eq!(Network::parse("testnet"), Some(Network::Testnet3));
        assert_eq!(Network::parse("mainnet2"), None);
    }

    #[test]
    fn schedules_carry_their_network() {
        assert_eq!(
            upgrade_schedule(Network::Chipnet).network(),
            Network::Chipnet
        );
    }
}
