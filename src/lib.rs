//! Bingo Hall - live bingo round core
//!
//! Rounds are opened by a scheduler or an admin, sell numbered cards from a
//! deterministic catalog, draw numbers on a timer and pay the collected pool to
//! validated claimants. All money movement goes through [`store::GameStore`]
//! transactions; everything else in a round lives in memory and is rebuilt (or
//! refunded) on restart.

pub mod api;
pub mod cards;
pub mod common;
pub mod config;
pub mod errors;
pub mod games;
pub mod metrics;
pub mod store;

pub use config::BingoConfig;
pub use errors::{BingoError, BingoResult};
pub use games::{CycleSupervisor, RoundEngine};
pub use store::GameStore;
