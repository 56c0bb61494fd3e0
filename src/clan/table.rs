//! Clan table (C4): name-indexed registry with alliance queries.

use super::Clan;
use crate::error::ClanError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct TableInner {
    by_id: HashMap<i32, Arc<Clan>>,
    by_name_lower: HashMap<String, i32>,
    next_id: i32,
}

pub struct ClanTable {
    inner: RwLock<TableInner>,
}

impl Default for ClanTable {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_name(name: &str) -> bool {
    (2..=16).contains(&name.chars().count()) && name.chars().all(|c| c.is_ascii_alphanumeric())
}

impl ClanTable {
    pub fn new() -> Self {
        ClanTable {
            inner: RwLock::new(TableInner {
                by_id: HashMap::new(),
                by_name_lower: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Creates a clan with a fresh monotonically-increasing ID (§4.4).
    pub fn create(&self, name: &str, leader_object_id: i64) -> Result<Arc<Clan>, ClanError> {
        if !valid_name(name) {
            return Err(ClanError::InvalidName(name.to_string()));
        }
        let lower = name.to_lowercase();
        let mut inner = self.inner.write();
        if inner.by_name_lower.contains_key(&lower) {
            return Err(ClanError::NameTaken(name.to_string()));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let clan = Arc::new(Clan::new(id, name, leader_object_id));
        inner.by_id.insert(id, clan.clone());
        inner.by_name_lower.insert(lower, id);
        Ok(clan)
    }

    pub fn get(&self, id: i32) -> Option<Arc<Clan>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Clan>> {
        let inner = self.inner.read();
        let id = *inner.by_name_lower.get(&name.to_lowercase())?;
        inner.by_id.get(&id).cloned()
    }

    /// Removes a clan and frees its name for reuse.
    pub fn disband(&self, id: i32) -> Result<(), ClanError> {
        let mut inner = self.inner.write();
        let clan = inner.by_id.remove(&id).ok_or(ClanError::NotFound(id))?;
        inner.by_name_lower.remove(&clan.name.to_lowercase());
        Ok(())
    }

    /// True iff some registered clan is an alliance leader with that (case-insensitive) name.
    pub fn ally_exists(&self, ally_name: &str) -> bool {
        let lower = ally_name.to_lowercase();
        self.inner
            .read()
            .by_id
            .values()
            .any(|c| c.is_alliance_leader() && c.ally_name().to_lowercase() == lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_disband_then_recreate() {
        let table = ClanTable::new();
        let clan1 = table.create("TestClan", 100).unwrap();
        assert_eq!(clan1.id, 1);

        let err = table.create("testclan", 200).unwrap_err();
        assert_eq!(err, ClanError::NameTaken("testclan".to_string()));

        table.disband(1).unwrap();
        let clan2 = table.create("TestClan", 200).unwrap();
        assert_eq!(clan2.id, 2);
    }

    #[test]
    fn invalid_names_rejected() {
        let table = ClanTable::new();
        assert!(table.create("a", 1).is_err());
        assert!(table.create("way-too-long-a-clan-name", 1).is_err());
        assert!(table.create("bad name!", 1).is_err());
    }

    #[test]
    fn ally_exists_is_case_insensitive() {
        let table = ClanTable::new();
        let clan = table.create("Leaders", 1).unwrap();
        clan.form_alliance("DarkAlliance");
        assert!(table.ally_exists("darkalliance"));
        assert!(!table.ally_exists("otheralliance"));
    }
}
