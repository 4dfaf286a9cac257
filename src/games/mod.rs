//! Round lifecycle: patterns, live state, settlement and the auto cycle

pub mod announcer;
pub mod engine;
pub mod events;
pub mod patterns;
pub mod runtime;
pub mod settlement;
pub mod supervisor;

pub use announcer::{LogAnnouncer, RoundAnnouncer};
pub use engine::{Actor, RoundEngine, TickOutcome};
pub use events::{EventBus, GameEvent};
pub use patterns::{validate_claim, ClaimVerdict, Shape};
pub use settlement::{SettlementEngine, SettlementOutcome, SettlementPlan};
pub use supervisor::{CycleSupervisor, RecoveryReport};
