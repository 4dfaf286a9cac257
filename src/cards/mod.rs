//! Card layouts and the pending-round allocation registry

pub mod allocation;
pub mod generator;

pub use allocation::{CardAllocationRegistry, CardLockState, SupplyPolicy};
pub use generator::{catalog_card, generate_card, CardGrid, Cell};
