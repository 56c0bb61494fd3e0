//! Siege engine (C9): per-castle siege state machine, clan roles, and tower attrition.

pub mod manager;

use crate::error::SiegeError;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SiegeState {
    Inactive = 0,
    Registration = 1,
    Countdown = 2,
    Running = 3,
}

impl SiegeState {
    fn from_u8(v: u8) -> SiegeState {
        match v {
            0 => SiegeState::Inactive,
            1 => SiegeState::Registration,
            2 => SiegeState::Countdown,
            _ => SiegeState::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum SiegeClanType {
    Owner = -1,
    Defender = 0,
    Attacker = 1,
    DefenderNotApproved = 2,
}

struct SiegeInner {
    attackers: HashSet<i32>,
    defenders: HashMap<i32, SiegeClanType>,
    pending_defenders: HashMap<i32, SiegeClanType>,
    clan_names: HashMap<i32, String>,
    start_time_nanos: i64,
    end_time_nanos: i64,
}

/// One castle's active siege. `state` and `alive_towers` are atomic for lock-free hot reads
/// (§5); attacker/defender-set mutations take the per-siege lock.
pub struct Siege {
    pub castle_id: i32,
    state: AtomicU8,
    is_normal_side: std::sync::atomic::AtomicBool,
    alive_towers: AtomicI32,
    inner: RwLock<SiegeInner>,
}

impl Siege {
    pub fn new(castle_id: i32, control_tower_count: i32) -> Self {
        Siege {
            castle_id,
            state: AtomicU8::new(SiegeState::Inactive as u8),
            is_normal_side: std::sync::atomic::AtomicBool::new(true),
            alive_towers: AtomicI32::new(control_tower_count),
            inner: RwLock::new(SiegeInner {
                attackers: HashSet::new(),
                defenders: HashMap::new(),
                pending_defenders: HashMap::new(),
                clan_names: HashMap::new(),
                start_time_nanos: 0,
                end_time_nanos: 0,
            }),
        }
    }

    pub fn state(&self) -> SiegeState {
        SiegeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: SiegeState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// A just-created siege (Inactive) or one in Registration both permit registration.
    pub fn is_registration(&self) -> bool {
        matches!(self.state(), SiegeState::Inactive | SiegeState::Registration)
    }

    pub fn prepare_registration(&self) {
        self.set_state(SiegeState::Registration);
    }

    pub fn begin_countdown(&self) {
        self.set_state(SiegeState::Countdown);
    }

    pub fn register_attacker(&self, clan_id: i32, clan_name: &str) {
        let mut inner = self.inner.write();
        inner.attackers.insert(clan_id);
        inner.clan_names.insert(clan_id, clan_name.to_string());
    }

    pub fn register_defender(&self, clan_id: i32, clan_name: &str, role: SiegeClanType) {
        let mut inner = self.inner.write();
        inner.defenders.insert(clan_id, role);
        inner.clan_names.insert(clan_id, clan_name.to_string());
    }

    pub fn register_pending_defender(&self, clan_id: i32, clan_name: &str) {
        let mut inner = self.inner.write();
        inner.pending_defenders.insert(clan_id, SiegeClanType::DefenderNotApproved);
        inner.clan_names.insert(clan_id, clan_name.to_string());
    }

    /// The clan name recorded at registration time, if this clan is registered in any role.
    pub fn clan_name(&self, clan_id: i32) -> Option<String> {
        self.inner.read().clan_names.get(&clan_id).cloned()
    }

    pub fn approve_defender(&self, clan_id: i32) -> Result<(), SiegeError> {
        let mut inner = self.inner.write();
        if inner.pending_defenders.remove(&clan_id).is_none() {
            return Err(SiegeError::NotPendingDefender(clan_id));
        }
        inner.defenders.insert(clan_id, SiegeClanType::Defender);
        Ok(())
    }

    pub fn is_attacker(&self, clan_id: i32) -> bool {
        self.inner.read().attackers.contains(&clan_id)
    }

    pub fn is_defender(&self, clan_id: i32) -> bool {
        self.inner.read().defenders.contains_key(&clan_id)
    }

    pub fn is_pending_defender(&self, clan_id: i32) -> bool {
        self.inner.read().pending_defenders.contains_key(&clan_id)
    }

    pub fn attacker_count(&self) -> usize {
        self.inner.read().attackers.len()
    }

    pub fn defender_count(&self) -> usize {
        self.inner.read().defenders.len()
    }

    pub fn pending_defender_count(&self) -> usize {
        self.inner.read().pending_defenders.len()
    }

    /// Records startTime, enters Running, auto-adds the current owner (if any) as a Defender
    /// with role Owner unless already present, promotes all pending defenders clearing their
    /// role to Defender, and clears the pending map (§4.9).
    pub fn start_siege(&self, now_nanos: i64, current_owner_clan_id: Option<i32>) {
        let mut inner = self.inner.write();
        inner.start_time_nanos = now_nanos;
        if let Some(owner) = current_owner_clan_id {
            inner.defenders.entry(owner).or_insert(SiegeClanType::Owner);
        }
        let pending: Vec<i32> = inner.pending_defenders.keys().copied().collect();
        for clan_id in pending {
            inner.defenders.insert(clan_id, SiegeClanType::Defender);
        }
        inner.pending_defenders.clear();
        drop(inner);
        self.set_state(SiegeState::Running);
        tracing::info!(
            castle_id = self.castle_id,
            attackers = self.attacker_count(),
            defenders = self.defender_count(),
            "siege started"
        );
    }

    /// Promotes `new_owner_clan_id` from attackers into defenders with role Owner; remaining
    /// attackers keep attacking. Caller is responsible for flipping the castle's ownerClanID
    /// and this siege's `is_normal_side` toggle (done here together, §4.9).
    pub fn mid_victory(&self, new_owner_clan_id: i32) {
        let mut inner = self.inner.write();
        inner.attackers.remove(&new_owner_clan_id);
        inner.defenders.insert(new_owner_clan_id, SiegeClanType::Owner);
        drop(inner);
        self.is_normal_side.fetch_xor(true, Ordering::AcqRel);
    }

    pub fn is_normal_side(&self) -> bool {
        self.is_normal_side.load(Ordering::Acquire)
    }

    /// Atomically decrements the alive-tower counter (floor at 0); returns true when it
    /// reaches zero, the trigger for mid-victory eligibility (§4.9).
    pub fn control_tower_destroyed(&self) -> bool {
        let mut cur = self.alive_towers.load(Ordering::Acquire);
        loop {
            if cur <= 0 {
                return false;
            }
            let next = cur - 1;
            match self.alive_towers.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return next == 0,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn alive_towers(&self) -> i32 {
        self.alive_towers.load(Ordering::Acquire)
    }

    pub fn end_siege(&self, now_nanos: i64) {
        self.inner.write().end_time_nanos = now_nanos;
        self.set_state(SiegeState::Inactive);
    }
}

struct CastleInner {
    owner_clan_id: Option<i32>,
    tax_rate: u8,
    treasury: i64,
    siege_date_nanos: i64,
    time_reg_over_nanos: i64,
}

/// A fixed fortress. The active `Siege` is published through an atomic pointer so readers
/// can fetch it without taking the castle lock (§4.9, §5).
pub struct Castle {
    pub id: i32,
    pub name: String,
    pub max_mercenaries: u32,
    inner: RwLock<CastleInner>,
    siege: AtomicPtr<Siege>,
}

impl Castle {
    pub fn new(id: i32, name: &str, max_mercenaries: u32) -> Self {
        let initial = Box::into_raw(Box::new(Siege::new(id, control_tower_count_for(id))));
        Castle {
            id,
            name: name.to_string(),
            max_mercenaries,
            inner: RwLock::new(CastleInner {
                owner_clan_id: None,
                tax_rate: 0,
                treasury: 0,
                siege_date_nanos: 0,
                time_reg_over_nanos: 0,
            }),
            siege: AtomicPtr::new(initial),
        }
    }

    pub fn owner_clan_id(&self) -> Option<i32> {
        self.inner.read().owner_clan_id
    }

    pub fn set_owner_clan_id(&self, clan_id: Option<i32>) {
        self.inner.write().owner_clan_id = clan_id;
    }

    pub fn tax_rate(&self) -> u8 {
        self.inner.read().tax_rate
    }

    pub fn set_tax_rate(&self, rate: u8) {
        self.inner.write().tax_rate = rate.min(25);
    }

    pub fn treasury(&self) -> i64 {
        self.inner.read().treasury
    }

    pub fn add_treasury(&self, amount: i64) {
        self.inner.write().treasury += amount;
    }

    /// Fetches the active siege without taking the castle lock (§4.9, §5).
    pub fn siege(&self) -> &Siege {
        let ptr = self.siege.load(Ordering::Acquire);
        // SAFETY: the slot always holds a live `Siege` published by `new` or `replace_siege`;
        // the old pointer is only freed after no new loads can observe it (next publish).
        unsafe { &*ptr }
    }

    /// Starts a fresh siege cycle: publishes a brand-new `Siege` (resetting tower count,
    /// role sets, and state to Inactive) and frees the previous one.
    pub fn replace_siege(&self) {
        let fresh = Box::into_raw(Box::new(Siege::new(self.id, control_tower_count_for(self.id))));
        let old = self.siege.swap(fresh, Ordering::AcqRel);
        // SAFETY: no reader retains a reference across a siege-cycle replace; `siege()` loads
        // and dereferences within one call, never storing the borrow past the call site.
        unsafe {
            drop(Box::from_raw(old));
        }
    }
}

impl Drop for Castle {
    fn drop(&mut self) {
        let ptr = self.siege.load(Ordering::Acquire);
        // SAFETY: `Castle` is the sole owner of its published `Siege`; this runs once.
        unsafe {
            drop(Box::from_raw(ptr));
        }
    }
}

fn control_tower_count_for(_castle_id: i32) -> i32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_siege_promotes_owner_and_pending() {
        let siege = Siege::new(1, 5);
        siege.register_attacker(100, "Alpha");
        siege.register_attacker(101, "Bravo");
        siege.register_pending_defender(200, "Charlie");

        siege.start_siege(1_000, Some(500));
        assert_eq!(siege.state(), SiegeState::Running);
        assert!(siege.is_defender(500));
        assert!(siege.is_defender(200));
        assert_eq!(siege.pending_defender_count(), 0);
        assert_eq!(siege.clan_name(200).as_deref(), Some("Charlie"));
    }

    #[test]
    fn mid_victory_flips_sides_scenario() {
        let siege = Siege::new(1, 5);
        siege.register_attacker(100, "Alpha");
        siege.register_attacker(101, "Bravo");
        siege.start_siege(0, Some(500));

        let was_normal = siege.is_normal_side();
        siege.mid_victory(100);
        assert_ne!(siege.is_normal_side(), was_normal);
        assert!(siege.is_defender(100));
        assert!(siege.is_attacker(101));
        assert!(!siege.is_attacker(100));
    }

    #[test]
    fn control_tower_destroyed_floors_at_zero() {
        let siege = Siege::new(1, 2);
        assert!(!siege.control_tower_destroyed());
        assert!(siege.control_tower_destroyed());
        assert!(!siege.control_tower_destroyed());
        assert_eq!(siege.alive_towers(), 0);
    }

    #[test]
    fn registration_allowed_inactive_and_registration_only() {
        let siege = Siege::new(1, 5);
        assert!(siege.is_registration());
        siege.prepare_registration();
        assert!(siege.is_registration());
        siege.begin_countdown();
        assert!(!siege.is_registration());
    }

    #[test]
    fn castle_siege_replace_resets_towers() {
        let castle = Castle::new(5, "Aden", 36);
        assert_eq!(castle.siege().alive_towers(), control_tower_count_for(5));
        castle.siege().control_tower_destroyed();
        assert_eq!(castle.siege().alive_towers(), control_tower_count_for(5) - 1);

        castle.replace_siege();
        assert_eq!(castle.siege().alive_towers(), control_tower_count_for(5));
        assert_eq!(castle.siege().state(), SiegeState::Inactive);
    }
}
