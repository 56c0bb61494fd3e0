//! Clan hall catalog (C8): static catalog, ownership, and the active-auction index.

pub mod auction;

use crate::error::HallError;
use auction::Auction;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const FEE_PERIOD: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HallType {
    Auctionable,
    Siegable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HallGrade {
    None,
    S,
    A,
    B,
    C,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionType {
    RestoreHp,
    RestoreMp,
    RestoreXp,
    Teleport,
    Support,
    ItemCreate,
}

#[derive(Debug, Clone, Copy)]
pub struct HallFunction {
    pub level: u8,
    pub lease_per_period: i64,
    pub renewal_period: Duration,
    pub end_time_nanos: i64,
}

struct HallInner {
    owner_clan_id: Option<i32>,
    paid_until_nanos: i64,
    functions: HashMap<FunctionType, HallFunction>,
    next_siege_time_nanos: i64,
    siege_length: Duration,
}

pub struct Hall {
    pub id: i32,
    pub name: String,
    pub hall_type: HallType,
    pub grade: HallGrade,
    pub location: String,
    pub weekly_lease: i64,
    inner: RwLock<HallInner>,
}

impl Hall {
    fn new(id: i32, name: &str, hall_type: HallType, grade: HallGrade, location: &str, weekly_lease: i64) -> Self {
        Hall {
            id,
            name: name.to_string(),
            hall_type,
            grade,
            location: location.to_string(),
            weekly_lease,
            inner: RwLock::new(HallInner {
                owner_clan_id: None,
                paid_until_nanos: 0,
                functions: HashMap::new(),
                next_siege_time_nanos: 0,
                siege_length: Duration::ZERO,
            }),
        }
    }

    pub fn owner_clan_id(&self) -> Option<i32> {
        self.inner.read().owner_clan_id
    }

    pub fn paid_until_nanos(&self) -> i64 {
        self.inner.read().paid_until_nanos
    }

    /// Assigns an owner, stamping `paid_until = now + 7 days` and clearing functions (§4.8).
    pub fn set_owner(&self, clan_id: i32, now_nanos: i64) -> Result<(), HallError> {
        let mut inner = self.inner.write();
        if inner.owner_clan_id.is_some() {
            return Err(HallError::AlreadyOwned(self.id));
        }
        inner.owner_clan_id = Some(clan_id);
        inner.paid_until_nanos = now_nanos + FEE_PERIOD.as_nanos() as i64;
        inner.functions.clear();
        Ok(())
    }

    /// No-op on an unowned hall (§4.8).
    pub fn free_hall(&self) {
        let mut inner = self.inner.write();
        inner.owner_clan_id = None;
        inner.paid_until_nanos = 0;
        inner.functions.clear();
    }

    pub fn set_function(&self, kind: FunctionType, function: HallFunction) {
        self.inner.write().functions.insert(kind, function);
    }

    pub fn function(&self, kind: FunctionType) -> Option<HallFunction> {
        self.inner.read().functions.get(&kind).copied()
    }
}

struct TableInner {
    halls: HashMap<i32, Arc<Hall>>,
}

pub struct HallTable {
    inner: RwLock<TableInner>,
    active_auctions: RwLock<HashMap<i32, Arc<Auction>>>,
}

fn seed_halls() -> HashMap<i32, Arc<Hall>> {
    let mut halls = HashMap::new();
    // 38 auctionable halls (IDs 1..=38), 6 siegable (IDs 101..=106). Catalog mirrors the
    // fixed Interlude hall/castle-town layout; names are illustrative placeholders.
    for id in 1..=38 {
        let grade = match id % 5 {
            0 => HallGrade::S,
            1 => HallGrade::A,
            2 => HallGrade::B,
            3 => HallGrade::C,
            _ => HallGrade::D,
        };
        let lease = 50_000 + (id as i64) * 1_000;
        halls.insert(
            id,
            Arc::new(Hall::new(id, &format!("Clan Hall {id}"), HallType::Auctionable, grade, "unspecified", lease)),
        );
    }
    for (i, id) in (101..=106).enumerate() {
        halls.insert(
            id,
            Arc::new(Hall::new(id, &format!("Siege Hall {i}"), HallType::Siegable, HallGrade::None, "unspecified", 0)),
        );
    }
    halls
}

pub static HALL_CATALOG_SIZE: usize = 44;

impl Default for HallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HallTable {
    pub fn new() -> Self {
        HallTable {
            inner: RwLock::new(TableInner { halls: seed_halls() }),
            active_auctions: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: i32) -> Option<Arc<Hall>> {
        self.inner.read().halls.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().halls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_auction(&self, auction: Auction) -> Arc<Auction> {
        let auction = Arc::new(auction);
        self.active_auctions.write().insert(auction.hall_id, auction.clone());
        auction
    }

    pub fn active_auction(&self, hall_id: i32) -> Option<Arc<Auction>> {
        self.active_auctions.read().get(&hall_id).cloned()
    }

    pub fn end_auction(&self, hall_id: i32) -> Option<Arc<Auction>> {
        self.active_auctions.write().remove(&hall_id)
    }
}

/// Lazily-initialized, process-global catalog matching the reference's single static table.
pub static HALL_TABLE: Lazy<HallTable> = Lazy::new(HallTable::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_44_halls() {
        let table = HallTable::new();
        assert_eq!(table.len(), HALL_CATALOG_SIZE);
        let auctionable = (1..=38).filter(|id| table.get(*id).is_some()).count();
        let siegable = (101..=106).filter(|id| table.get(*id).is_some()).count();
        assert_eq!(auctionable, 38);
        assert_eq!(siegable, 6);
    }

    #[test]
    fn set_owner_then_free() {
        let table = HallTable::new();
        let hall = table.get(1).unwrap();
        hall.set_owner(5, 1_000_000_000).unwrap();
        assert_eq!(hall.owner_clan_id(), Some(5));
        assert_eq!(hall.paid_until_nanos(), 1_000_000_000 + FEE_PERIOD.as_nanos() as i64);

        let err = hall.set_owner(6, 0).unwrap_err();
        assert_eq!(err, HallError::AlreadyOwned(1));

        hall.free_hall();
        assert!(hall.owner_clan_id().is_none());
        hall.free_hall(); // no-op on unowned hall
        assert!(hall.owner_clan_id().is_none());
    }
}
