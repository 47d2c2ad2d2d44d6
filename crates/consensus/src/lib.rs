//! Consensus constants, network parameters, and the upgrade schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod upgrades;

pub use params::{upgrade_schedule, Network};
pub use upgrades::{HeightRule, TimeRule, UpgradeSchedule};
