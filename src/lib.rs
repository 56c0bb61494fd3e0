//! Server-side game-world simulation core: geodata with line-of-sight and pathfinding, the
//! siege lifecycle over a fixed castle set, clan-hall auctions, instance management with
//! reentry cooldowns, and quest event dispatch with per-character persistent variables.
//!
//! The networking layer (packet protocol) and the relational persistence layer are out of
//! scope; this crate exposes narrow repository traits ([`quest::repository::QuestRepository`])
//! at those boundaries instead.

pub mod clan;
pub mod config;
pub mod error;
pub mod geo;
pub mod hall;
pub mod instance;
pub mod quest;
pub mod siege;

use tracing_subscriber::EnvFilter;

/// Initializes the process-wide `tracing` subscriber from `RUST_LOG` (falling back to `info`).
/// Host binaries call this once at startup; the core itself never reads environment variables
/// beyond this logging bootstrap (§6).
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
