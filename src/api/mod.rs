//! HTTP and WebSocket API
//!
//! Authenticated player endpoints over the round engine, a real-time event
//! channel and the Prometheus scrape endpoint.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::ApiServer;
