//! Receiving VASP server for UMA payments.
//!
//! Serves the receiving side of the UMA handshake over HTTP with [`axum`],
//! backed by users, currencies and keys from a TOML configuration file.
//!
//! # Modules
//!
//! - [`config`] - Server configuration with environment variable expansion
//! - [`demo`] - Configuration-backed user, compliance and invoice services
//! - [`error`] - Handler errors and their HTTP statuses
//! - [`handlers`] - Axum route handlers and router builder
//! - [`maintenance`] - Background purge of the nonce store
//! - [`util`] - Shutdown signal handling

pub mod config;
pub mod demo;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod util;

pub use handlers::{AppState, VaspState, vasp_router};
