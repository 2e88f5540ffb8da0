//! HTTP transport layer for the UMA payment handshake.
//!
//! Provides the well-known paths of the UMA HTTP surface and a
//! `reqwest`-based [`CounterpartyTransport`](uma::transport::CounterpartyTransport).
//!
//! # Modules
//!
//! - [`constants`] - Well-known paths and content types
//! - [`transport`] - HTTP client for counterparty VASPs

pub mod constants;
pub mod transport;

pub use transport::HttpTransport;
