//! Error taxonomy for the simulation core.
//!
//! Each subsystem owns a typed sentinel error enum (ADR in DESIGN.md: typed errors over
//! stringly-typed ones so callers can match on variants instead of parsing messages).
//! Subsystems never translate each other's errors; the calling subsystem propagates them
//! verbatim or wraps them with `anyhow::Context` at a repository boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("truncated geo block at offset {offset}")]
    Truncated { offset: usize },
    #[error("unknown geo block type byte {0:#04x}")]
    UnknownBlockType(u8),
    #[error("invalid multilayer cell layer count {0} (valid range 1..=125)")]
    InvalidLayerCount(u8),
    #[error("invalid region file name {0:?}")]
    InvalidRegionName(String),
    #[error("region coordinates out of range: {x},{y}")]
    RegionOutOfRange { x: i32, y: i32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClanError {
    #[error("clan name {0:?} is already taken")]
    NameTaken(String),
    #[error("clan name {0:?} is invalid (length 2-16, alphanumeric only)")]
    InvalidName(String),
    #[error("clan {0} not found")]
    NotFound(i32),
    #[error("clan is full")]
    ClanFull,
    #[error("sub-pledge is full")]
    SubPledgeFull,
    #[error("clan level too low for this sub-pledge")]
    ClanLevelTooLow,
    #[error("player {0} is already a war target")]
    AlreadyAtWar(i32),
    #[error("member {0} not found in clan")]
    MemberNotFound(i64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HallError {
    #[error("hall {0} not found")]
    NotFound(i32),
    #[error("hall {0} already has an owner")]
    AlreadyOwned(i32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuctionError {
    #[error("auction {0} not found")]
    NotFound(i32),
    #[error("auction {0} is closed")]
    AuctionClosed(i32),
    #[error("bid {amount} is below the minimum bid {min}")]
    BidTooLow { amount: i64, min: i64 },
    #[error("clan {0} has no bid to cancel")]
    NoBid(i32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("instance {0} not found")]
    NotFound(i32),
    #[error("instance template {0} not found")]
    TemplateNotFound(i32),
    #[error("player {0} is already inside instance {1}")]
    AlreadyInInstance(i64, i32),
    #[error("player {0} is not inside any instance")]
    NotInInstance(i64),
    #[error("instance {0} is not active")]
    NotActive(i32),
    #[error("instance {0} has expired")]
    Expired(i32),
    #[error("instance {0} is full")]
    Full(i32),
    #[error("character level below the instance's minimum")]
    LevelTooLow,
    #[error("character level above the instance's maximum")]
    LevelTooHigh,
    #[error("character {character_id} is on cooldown for template {template_id} until {until_nanos}")]
    OnCooldown { character_id: i64, template_id: i32, until_nanos: i64 },
}

#[derive(Debug, Error)]
pub enum QuestError {
    #[error("quest id {0} is already registered")]
    DuplicateId(i32),
    #[error("quest name {0:?} is already registered")]
    DuplicateName(String),
    #[error("quest {0} not found")]
    NotFound(i32),
    #[error("quest named {0:?} not found")]
    NotFoundByName(String),
    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SiegeError {
    #[error("castle {0} not found")]
    CastleNotFound(i32),
    #[error("a siege is already in progress for castle {0}")]
    SiegeInProgress(i32),
    #[error("registration is closed for castle {0}")]
    RegistrationClosed(i32),
    #[error("clan level {actual} is below the minimum required level {required}")]
    ClanLevelTooLow { actual: i32, required: i32 },
    #[error("the castle owner cannot register as an attacker")]
    OwnerCannotAttack,
    #[error("clan {0} is already registered for this siege")]
    AlreadyRegistered(i32),
    #[error("attacker limit reached for castle {0}")]
    AttackerLimitReached(i32),
    #[error("defender limit reached for castle {0}")]
    DefenderLimitReached(i32),
    #[error("clan {0} is not a pending defender")]
    NotPendingDefender(i32),
}
