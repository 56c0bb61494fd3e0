//! Siege manager (C10): the fixed nine-castle Interlude roster plus cross-castle registration
//! invariants layered on top of each castle's own `Siege`.

use super::{Castle, SiegeClanType};
use crate::error::SiegeError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ATTACKER_MAX: u32 = 500;
pub const DEFAULT_DEFENDER_MAX: u32 = 500;
pub const DEFAULT_MIN_CLAN_LEVEL: i32 = 4;
pub const DEFAULT_SIEGE_CYCLE: Duration = Duration::from_secs(14 * 24 * 3600);
pub const DEFAULT_SIEGE_LENGTH: Duration = Duration::from_secs(120 * 60);
pub const DEFAULT_MAX_FLAGS: u32 = 1;

const CASTLE_NAMES: [(i32, &str, u32); 9] = [
    (1, "Gludio", 30),
    (2, "Dion", 30),
    (3, "Giran", 30),
    (4, "Oren", 30),
    (5, "Aden", 36),
    (6, "Innadril", 30),
    (7, "Goddard", 30),
    (8, "Rune", 30),
    (9, "Schuttgart", 30),
];

#[derive(Debug, Clone, Copy)]
pub struct SiegeManagerConfig {
    pub attacker_max: u32,
    pub defender_max: u32,
    pub min_clan_level: i32,
    pub siege_cycle: Duration,
    pub siege_length: Duration,
    pub max_flags: u32,
}

impl Default for SiegeManagerConfig {
    fn default() -> Self {
        SiegeManagerConfig {
            attacker_max: DEFAULT_ATTACKER_MAX,
            defender_max: DEFAULT_DEFENDER_MAX,
            min_clan_level: DEFAULT_MIN_CLAN_LEVEL,
            siege_cycle: DEFAULT_SIEGE_CYCLE,
            siege_length: DEFAULT_SIEGE_LENGTH,
            max_flags: DEFAULT_MAX_FLAGS,
        }
    }
}

pub struct SiegeManager {
    config: SiegeManagerConfig,
    castles: RwLock<HashMap<i32, Arc<Castle>>>,
}

impl Default for SiegeManager {
    fn default() -> Self {
        Self::new(SiegeManagerConfig::default())
    }
}

impl SiegeManager {
    pub fn new(config: SiegeManagerConfig) -> Self {
        let mut castles = HashMap::new();
        for (id, name, max_mercenaries) in CASTLE_NAMES {
            castles.insert(id, Arc::new(Castle::new(id, name, max_mercenaries)));
        }
        SiegeManager { config, castles: RwLock::new(castles) }
    }

    pub fn config(&self) -> SiegeManagerConfig {
        self.config
    }

    pub fn castle(&self, id: i32) -> Option<Arc<Castle>> {
        self.castles.read().get(&id).cloned()
    }

    pub fn castle_count(&self) -> usize {
        self.castles.read().len()
    }

    fn castle_or_err(&self, castle_id: i32) -> Result<Arc<Castle>, SiegeError> {
        self.castle(castle_id).ok_or(SiegeError::CastleNotFound(castle_id))
    }

    fn check_common_gates(&self, castle: &Castle, clan_id: i32, clan_level: i32) -> Result<(), SiegeError> {
        let siege = castle.siege();
        if siege.state() == crate::siege::SiegeState::Running {
            return Err(SiegeError::SiegeInProgress(castle.id));
        }
        if !siege.is_registration() {
            return Err(SiegeError::RegistrationClosed(castle.id));
        }
        if clan_level < self.config.min_clan_level {
            return Err(SiegeError::ClanLevelTooLow { actual: clan_level, required: self.config.min_clan_level });
        }
        if siege.is_attacker(clan_id) || siege.is_defender(clan_id) || siege.is_pending_defender(clan_id) {
            return Err(SiegeError::AlreadyRegistered(clan_id));
        }
        Ok(())
    }

    pub fn register_attacker(
        &self,
        castle_id: i32,
        clan_id: i32,
        clan_name: &str,
        clan_level: i32,
    ) -> Result<(), SiegeError> {
        let castle = self.castle_or_err(castle_id)?;
        self.check_common_gates(&castle, clan_id, clan_level)?;
        if castle.owner_clan_id() == Some(clan_id) {
            return Err(SiegeError::OwnerCannotAttack);
        }
        let siege = castle.siege();
        if siege.attacker_count() as u32 >= self.config.attacker_max {
            return Err(SiegeError::AttackerLimitReached(castle_id));
        }
        siege.register_attacker(clan_id, clan_name);
        Ok(())
    }

    /// Registers a defender. If the castle currently has an owner, the clan is queued as a
    /// pending defender requiring later approval; otherwise it is registered immediately
    /// (§4.10).
    pub fn register_defender(
        &self,
        castle_id: i32,
        clan_id: i32,
        clan_name: &str,
        clan_level: i32,
    ) -> Result<(), SiegeError> {
        let castle = self.castle_or_err(castle_id)?;
        self.check_common_gates(&castle, clan_id, clan_level)?;
        let siege = castle.siege();
        if (siege.defender_count() + siege.pending_defender_count()) as u32 >= self.config.defender_max {
            return Err(SiegeError::DefenderLimitReached(castle_id));
        }
        if castle.owner_clan_id().is_some() {
            siege.register_pending_defender(clan_id, clan_name);
        } else {
            siege.register_defender(clan_id, clan_name, SiegeClanType::Defender);
        }
        Ok(())
    }

    pub fn approve_defender(&self, castle_id: i32, clan_id: i32) -> Result<(), SiegeError> {
        let castle = self.castle_or_err(castle_id)?;
        castle.siege().approve_defender(clan_id)
    }

    /// Returns the first `(castleID, true)` this clan is registered in (attacker, defender, or
    /// pending defender across any castle), else `(0, false)` (§4.10).
    pub fn is_clan_registered(&self, clan_id: i32) -> (i32, bool) {
        let castles = self.castles.read();
        let mut ids: Vec<i32> = castles.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let castle = &castles[&id];
            let siege = castle.siege();
            if siege.is_attacker(clan_id) || siege.is_defender(clan_id) || siege.is_pending_defender(clan_id) {
                return (id, true);
            }
        }
        (0, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_nine_castles_with_aden_mercenary_cap() {
        let mgr = SiegeManager::default();
        assert_eq!(mgr.castle_count(), 9);
        let aden = mgr.castle(5).unwrap();
        assert_eq!(aden.name, "Aden");
        assert_eq!(aden.max_mercenaries, 36);
        for id in [1, 2, 3, 4, 6, 7, 8, 9] {
            assert_eq!(mgr.castle(id).unwrap().max_mercenaries, 30);
        }
    }

    #[test]
    fn owner_cannot_register_as_attacker() {
        let mgr = SiegeManager::default();
        let castle = mgr.castle(1).unwrap();
        castle.set_owner_clan_id(Some(42));
        let err = mgr.register_attacker(1, 42, "Owners", 10).unwrap_err();
        assert_eq!(err, SiegeError::OwnerCannotAttack);
    }

    #[test]
    fn defender_queues_pending_when_castle_has_owner() {
        let mgr = SiegeManager::default();
        let castle = mgr.castle(1).unwrap();
        castle.set_owner_clan_id(Some(1));
        mgr.register_defender(1, 2, "Challengers", 10).unwrap();
        assert!(castle.siege().is_pending_defender(2));
        assert_eq!(castle.siege().clan_name(2).as_deref(), Some("Challengers"));

        mgr.approve_defender(1, 2).unwrap();
        assert!(castle.siege().is_defender(2));
        assert!(!castle.siege().is_pending_defender(2));
    }

    #[test]
    fn defender_registers_immediately_without_owner() {
        let mgr = SiegeManager::default();
        mgr.register_defender(1, 2, "Challengers", 10).unwrap();
        assert!(mgr.castle(1).unwrap().siege().is_defender(2));
    }

    #[test]
    fn clan_level_gate_and_registration_closed() {
        let mgr = SiegeManager::default();
        let err = mgr.register_attacker(1, 1, "Lowbies", 1).unwrap_err();
        assert_eq!(err, SiegeError::ClanLevelTooLow { actual: 1, required: 4 });

        let castle = mgr.castle(1).unwrap();
        castle.siege().begin_countdown();
        let err = mgr.register_attacker(1, 1, "Lowbies", 10).unwrap_err();
        assert_eq!(err, SiegeError::RegistrationClosed(1));
    }

    #[test]
    fn is_clan_registered_scans_all_castles() {
        let mgr = SiegeManager::default();
        assert_eq!(mgr.is_clan_registered(7), (0, false));
        mgr.register_attacker(3, 7, "Raiders", 10).unwrap();
        assert_eq!(mgr.is_clan_registered(7), (3, true));
    }

    #[test]
    fn already_registered_rejected() {
        let mgr = SiegeManager::default();
        mgr.register_attacker(1, 9, "Vanguard", 10).unwrap();
        let err = mgr.register_attacker(1, 9, "Vanguard", 10).unwrap_err();
        assert_eq!(err, SiegeError::AlreadyRegistered(9));
    }
}
