//! HTTP API
//!
//! JSON endpoints for the ingestion collaborator (subjects, matches,
//! settlement trigger) and the presentation layer (wagers, accounts,
//! progress).

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::ApiServer;
