//! Runtime configuration for the simulation core (ambient concern; §4.10, §6).
//!
//! There is no CLI surface and no environment-variable reads inside the core (§6) — a host
//! process builds a `Config` (typically via [`serde_json`]) and hands it to the constructors
//! below.

use crate::siege::manager::SiegeManagerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub siege: SiegeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config { siege: SiegeConfig::default() }
    }
}

/// Serializable mirror of [`SiegeManagerConfig`] (which carries a non-serde `Duration` policy
/// identical to the reference defaults); kept distinct so the wire/config shape doesn't need
/// to track internal representation choices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SiegeConfig {
    pub attacker_max: u32,
    pub defender_max: u32,
    pub min_clan_level: i32,
    pub siege_cycle_secs: u64,
    pub siege_length_secs: u64,
    pub max_flags: u32,
}

impl Default for SiegeConfig {
    fn default() -> Self {
        SiegeConfig {
            attacker_max: crate::siege::manager::DEFAULT_ATTACKER_MAX,
            defender_max: crate::siege::manager::DEFAULT_DEFENDER_MAX,
            min_clan_level: crate::siege::manager::DEFAULT_MIN_CLAN_LEVEL,
            siege_cycle_secs: crate::siege::manager::DEFAULT_SIEGE_CYCLE.as_secs(),
            siege_length_secs: crate::siege::manager::DEFAULT_SIEGE_LENGTH.as_secs(),
            max_flags: crate::siege::manager::DEFAULT_MAX_FLAGS,
        }
    }
}

impl From<SiegeConfig> for SiegeManagerConfig {
    fn from(c: SiegeConfig) -> Self {
        SiegeManagerConfig {
            attacker_max: c.attacker_max,
            defender_max: c.defender_max,
            min_clan_level: c.min_clan_level,
            siege_cycle: Duration::from_secs(c.siege_cycle_secs),
            siege_length: Duration::from_secs(c.siege_length_secs),
            max_flags: c.max_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.siege.attacker_max, 500);
        assert_eq!(cfg.siege.defender_max, 500);
        assert_eq!(cfg.siege.min_clan_level, 4);
        assert_eq!(cfg.siege.siege_cycle_secs, 14 * 24 * 3600);
        assert_eq!(cfg.siege.siege_length_secs, 120 * 60);
        assert_eq!(cfg.siege.max_flags, 1);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.siege.attacker_max, cfg.siege.attacker_max);
    }
}
