//! Common utilities and shared functionality
//!
//! Record types shared by the store, the round engine and the API.

pub mod types;

pub use types::*;
