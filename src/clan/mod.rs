//! Clan model (C3): identity, membership, privileges, wars, alliance fields.
//!
//! Each clan owns a read-write lock over its structural state (members, wars, sub-pledges);
//! reputation is a hot counter and lives outside the lock as an atomic.

pub mod table;

use crate::error::ClanError;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};

/// Members allowed per clan level (index = level, §3).
pub const MAX_MEMBERS_BY_LEVEL: [u32; 9] = [10, 15, 20, 30, 40, 40, 40, 40, 40];

pub mod privilege {
    pub const INVITE: u32 = 1 << 0;
    pub const TITLES: u32 = 1 << 1;
    pub const WAREHOUSE: u32 = 1 << 2;
    pub const RANKS: u32 = 1 << 3;
    pub const WAR: u32 = 1 << 4;
    pub const DISMISS: u32 = 1 << 5;
    pub const CREST: u32 = 1 << 6;
    pub const APPRENTICE: u32 = 1 << 7;
    pub const FAME: u32 = 1 << 8;
    pub const AIRSHIP: u32 = 1 << 9;
    pub const HALL_DOOR: u32 = 1 << 10;
    pub const HALL_FUNCTIONS: u32 = 1 << 11;
    pub const HALL_AUCTION: u32 = 1 << 12;
    pub const HALL_BANISH: u32 = 1 << 13;
    pub const HALL_MANAGE: u32 = 1 << 14;
    pub const CASTLE_DOOR: u32 = 1 << 15;
    pub const CASTLE_MANOR: u32 = 1 << 16;
    pub const CASTLE_SIEGE: u32 = 1 << 17;
    pub const CASTLE_FUNCTIONS: u32 = 1 << 18;
    pub const CASTLE_BANISH: u32 = 1 << 19;
    pub const CASTLE_VAULT: u32 = 1 << 20;
    pub const CASTLE_MERCENARIES: u32 = 1 << 21;
    pub const CASTLE_MANAGE: u32 = 1 << 22;
    // ordinal 23 reserved for a 24th named flag; PrivAll covers bits 0..=23 regardless.
    pub const ALL: u32 = (1u32 << 24) - 1;
}

/// Default privilege mask for a power grade (§4.3).
pub fn default_privileges_for_grade(grade: u8) -> u32 {
    use privilege::*;
    match grade {
        1 => ALL,
        2 => INVITE | TITLES | WAREHOUSE | RANKS | WAR | DISMISS | CREST,
        3 => INVITE | TITLES | WAREHOUSE | DISMISS,
        4 => WAREHOUSE,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPledgeType {
    Main,
    Academy,
    Royal1,
    Royal2,
    Knight1,
    Knight2,
    Knight3,
    Knight4,
}

impl SubPledgeType {
    pub fn code(self) -> i32 {
        match self {
            SubPledgeType::Main => 0,
            SubPledgeType::Academy => -1,
            SubPledgeType::Royal1 => 100,
            SubPledgeType::Royal2 => 200,
            SubPledgeType::Knight1 => 1001,
            SubPledgeType::Knight2 => 1002,
            SubPledgeType::Knight3 => 2001,
            SubPledgeType::Knight4 => 2002,
        }
    }

    fn cap_and_min_level(self) -> Option<(u32, u8)> {
        match self {
            SubPledgeType::Main => None,
            SubPledgeType::Academy => Some((20, 5)),
            SubPledgeType::Royal1 | SubPledgeType::Royal2 => Some((20, 6)),
            SubPledgeType::Knight1 | SubPledgeType::Knight2 => Some((10, 7)),
            SubPledgeType::Knight3 | SubPledgeType::Knight4 => Some((10, 8)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubPledge {
    pub leader_object_id: i64,
    pub members: HashSet<i64>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub object_id: i64,
    pub name: String,
    pub level: u8,
    pub class_id: i32,
    pub sub_pledge: SubPledgeType,
    pub power_grade: u8,
    pub title: String,
    pub online: bool,
    pub sponsor_id: Option<i64>,
    pub apprentice_id: Option<i64>,
    pub privileges: u32,
}

impl Member {
    pub fn new(object_id: i64, name: impl Into<String>, level: u8, class_id: i32) -> Self {
        Member {
            object_id,
            name: name.into(),
            level,
            class_id,
            sub_pledge: SubPledgeType::Main,
            power_grade: 9,
            title: String::new(),
            online: false,
            sponsor_id: None,
            apprentice_id: None,
            privileges: default_privileges_for_grade(9),
        }
    }

    /// Sets the power grade and overwrites the privilege mask with that grade's default (§4.3).
    pub fn set_power_grade(&mut self, grade: u8) {
        self.power_grade = grade;
        self.privileges = default_privileges_for_grade(grade);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlliancePenaltyType {
    None,
    ClanLeaved,
    ClanDismissed,
    DismissClan,
    DissolveAlly,
}

#[derive(Debug, Clone, Copy)]
pub struct AlliancePenalty {
    pub expiry_millis: i64,
    pub penalty_type: AlliancePenaltyType,
}

impl Default for AlliancePenalty {
    fn default() -> Self {
        AlliancePenalty { expiry_millis: 0, penalty_type: AlliancePenaltyType::None }
    }
}

struct ClanInner {
    members: HashMap<i64, Member>,
    sub_pledges: HashMap<i32, SubPledge>,
    wars_declared_by_us: HashSet<i32>,
    wars_declared_against_us: HashSet<i32>,
    skills: HashMap<i32, u8>,
    rank_privileges: [u32; 9],
    level: u8,
    leader_object_id: i64,
    crest_id: i32,
    crest_large_id: i32,
    ally_id: i32,
    ally_name: String,
    ally_crest_id: i32,
    notice: String,
    dissolution_at: Option<i64>,
    ally_penalty: AlliancePenalty,
}

/// A clan. `id` and `name` are immutable identity; everything mutable lives behind the lock
/// except `reputation`, a hot atomic counter read far more often than it's written.
pub struct Clan {
    pub id: i32,
    pub name: String,
    pub reputation: AtomicI32,
    inner: RwLock<ClanInner>,
}

impl Clan {
    pub fn new(id: i32, name: impl Into<String>, leader_object_id: i64) -> Self {
        let mut rank_privileges = [0u32; 9];
        for (grade, slot) in rank_privileges.iter_mut().enumerate() {
            *slot = default_privileges_for_grade((grade + 1) as u8);
        }
        Clan {
            id,
            name: name.into(),
            reputation: AtomicI32::new(0),
            inner: RwLock::new(ClanInner {
                members: HashMap::new(),
                sub_pledges: HashMap::new(),
                wars_declared_by_us: HashSet::new(),
                wars_declared_against_us: HashSet::new(),
                skills: HashMap::new(),
                rank_privileges,
                level: 0,
                leader_object_id,
                crest_id: 0,
                crest_large_id: 0,
                ally_id: 0,
                ally_name: String::new(),
                ally_crest_id: 0,
                notice: String::new(),
                dissolution_at: None,
                ally_penalty: AlliancePenalty::default(),
            }),
        }
    }

    pub fn level(&self) -> u8 {
        self.inner.read().level
    }

    pub fn set_level(&self, level: u8) {
        self.inner.write().level = level;
    }

    pub fn leader_object_id(&self) -> i64 {
        self.inner.read().leader_object_id
    }

    pub fn member_count(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn max_members(&self) -> u32 {
        MAX_MEMBERS_BY_LEVEL[self.level() as usize]
    }

    pub fn add_member(&self, member: Member) -> Result<(), ClanError> {
        let mut inner = self.inner.write();
        let max = MAX_MEMBERS_BY_LEVEL[inner.level as usize];
        if inner.members.len() as u32 >= max {
            return Err(ClanError::ClanFull);
        }
        inner.members.insert(member.object_id, member);
        Ok(())
    }

    pub fn remove_member(&self, object_id: i64) -> Result<Member, ClanError> {
        self.inner
            .write()
            .members
            .remove(&object_id)
            .ok_or(ClanError::MemberNotFound(object_id))
    }

    pub fn with_member<R>(&self, object_id: i64, f: impl FnOnce(&Member) -> R) -> Result<R, ClanError> {
        let inner = self.inner.read();
        inner.members.get(&object_id).map(f).ok_or(ClanError::MemberNotFound(object_id))
    }

    pub fn set_member_power_grade(&self, object_id: i64, grade: u8) -> Result<(), ClanError> {
        let mut inner = self.inner.write();
        let member = inner.members.get_mut(&object_id).ok_or(ClanError::MemberNotFound(object_id))?;
        member.set_power_grade(grade);
        Ok(())
    }

    pub fn rank_privileges(&self, grade: u8) -> u32 {
        let inner = self.inner.read();
        inner.rank_privileges.get(grade.saturating_sub(1) as usize).copied().unwrap_or(0)
    }

    /// Creates or joins a sub-pledge, enforcing its member cap and min clan level (§3).
    pub fn join_sub_pledge(&self, sub: SubPledgeType, member_object_id: i64, leader_object_id: i64) -> Result<(), ClanError> {
        let mut inner = self.inner.write();
        if let Some((cap, min_level)) = sub.cap_and_min_level() {
            if inner.level < min_level {
                return Err(ClanError::ClanLevelTooLow);
            }
            let entry = inner.sub_pledges.entry(sub.code()).or_insert_with(|| SubPledge {
                leader_object_id,
                members: HashSet::new(),
            });
            if entry.members.len() as u32 >= cap {
                return Err(ClanError::SubPledgeFull);
            }
            entry.members.insert(member_object_id);
        }
        Ok(())
    }

    /// Declares war on `enemy`; fails if already declared (§4.3).
    pub fn declare_war(&self, enemy: i32) -> Result<(), ClanError> {
        let mut inner = self.inner.write();
        if !inner.wars_declared_by_us.insert(enemy) {
            return Err(ClanError::AlreadyAtWar(enemy));
        }
        Ok(())
    }

    /// Accepts an incoming war declaration unconditionally (§4.3).
    pub fn accept_war(&self, attacker: i32) {
        self.inner.write().wars_declared_against_us.insert(attacker);
    }

    /// Ends war with `other` on this clan's side only. The counterpart clan must call its own
    /// `end_war` to clear its side (§8.12 — deliberately unilateral, see DESIGN.md).
    pub fn end_war(&self, other: i32) {
        let mut inner = self.inner.write();
        inner.wars_declared_by_us.remove(&other);
        inner.wars_declared_against_us.remove(&other);
    }

    pub fn is_at_war_with(&self, other: i32) -> bool {
        self.inner.read().wars_declared_by_us.contains(&other)
    }

    pub fn is_under_attack_by(&self, other: i32) -> bool {
        self.inner.read().wars_declared_against_us.contains(&other)
    }

    pub fn ally_id(&self) -> i32 {
        self.inner.read().ally_id
    }

    pub fn is_alliance_leader(&self) -> bool {
        let inner = self.inner.read();
        inner.ally_id != 0 && inner.ally_id == self.id
    }

    pub fn ally_name(&self) -> String {
        self.inner.read().ally_name.clone()
    }

    pub fn form_alliance(&self, ally_name: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.ally_id = self.id;
        inner.ally_name = ally_name.into();
    }

    pub fn clear_ally(&self) {
        let mut inner = self.inner.write();
        inner.ally_id = 0;
        inner.ally_name.clear();
        inner.ally_crest_id = 0;
    }

    pub fn set_ally_penalty(&self, penalty: AlliancePenalty) {
        self.inner.write().ally_penalty = penalty;
    }

    pub fn ally_penalty(&self) -> AlliancePenalty {
        self.inner.read().ally_penalty
    }

    pub fn set_skill(&self, skill_id: i32, level: u8) {
        self.inner.write().skills.insert(skill_id, level);
    }

    pub fn skill_level(&self, skill_id: i32) -> Option<u8> {
        self.inner.read().skills.get(&skill_id).copied()
    }

    pub fn set_notice(&self, notice: impl Into<String>) {
        self.inner.write().notice = notice.into();
    }

    pub fn notice(&self) -> String {
        self.inner.read().notice.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clan_full_rejects_extra_member() {
        let clan = Clan::new(1, "TestClan", 100);
        clan.set_level(0); // max 10
        for i in 0..10 {
            clan.add_member(Member::new(i, format!("m{i}"), 10, 1)).unwrap();
        }
        let err = clan.add_member(Member::new(999, "overflow", 10, 1)).unwrap_err();
        assert_eq!(err, ClanError::ClanFull);
    }

    #[test]
    fn set_power_grade_overwrites_privileges() {
        let clan = Clan::new(1, "TestClan", 100);
        clan.add_member(Member::new(5, "m5", 10, 1)).unwrap();
        clan.set_member_power_grade(5, 2).unwrap();
        let privs = clan.with_member(5, |m| m.privileges).unwrap();
        assert_eq!(privs, default_privileges_for_grade(2));
    }

    #[test]
    fn war_end_is_unilateral() {
        let a = Clan::new(1, "A", 1);
        let b = Clan::new(2, "B", 2);
        a.declare_war(2).unwrap();
        b.accept_war(1);
        assert!(a.is_at_war_with(2));
        assert!(b.is_under_attack_by(1));

        a.end_war(2);
        assert!(!a.is_at_war_with(2));
        assert!(!a.is_under_attack_by(2));
        // b's side is untouched until b calls end_war itself
        assert!(b.is_under_attack_by(1));
    }

    #[test]
    fn declare_war_twice_fails() {
        let a = Clan::new(1, "A", 1);
        a.declare_war(2).unwrap();
        assert_eq!(a.declare_war(2).unwrap_err(), ClanError::AlreadyAtWar(2));
    }

    #[test]
    fn alliance_leader_invariant() {
        let clan = Clan::new(5, "Leader", 1);
        assert!(!clan.is_alliance_leader());
        clan.form_alliance("TheAlliance");
        assert!(clan.is_alliance_leader());
        clan.clear_ally();
        assert!(!clan.is_alliance_leader());
    }
}
