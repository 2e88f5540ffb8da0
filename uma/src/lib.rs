#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types and handshake state machine for UMA payments.
//!
//! UMA (Universal Money Address) lets a user of one VASP pay `$user@domain`
//! at another VASP over Lightning. The two VASPs negotiate the payment with
//! four signed messages: an LNURLp discovery request and response, then a
//! PayRequest and the receiver's signed invoice. Every message is signed with
//! the VASP's secp256k1 key, carries a single-use nonce, and is verified
//! against keys the counterparty publishes at `/.well-known/lnurlpubkey`.
//!
//! This crate is transport-agnostic: HTTP lives in `uma-http`, and every
//! business capability (users, compliance, invoices, payments, ledger) is an
//! injected trait object.
//!
//! # Modules
//!
//! - [`config`] - VASP identity and handshake tunables
//! - [`currency`] - Currencies and millisatoshi conversion
//! - [`error`] - Failure reason codes and the wire error body
//! - [`handshake`] - Sending and receiving orchestrators
//! - [`keys`] - Signing keys, signature verification and published key bundles
//! - [`nonce`] - Replay protection
//! - [`proto`] - Wire format of the four handshake messages
//! - [`pubkey_cache`] - Expiring cache of counterparty keys
//! - [`services`] - Capability traits a VASP implements
//! - [`transport`] - The network seam to counterparties
//! - [`webhook`] - HMAC verification of node operator webhooks
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation and audit logging of failed steps

pub mod config;
pub mod currency;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod nonce;
pub mod proto;
pub mod pubkey_cache;
pub mod services;
pub mod timestamp;
pub mod transport;
pub mod webhook;

pub use error::{FailureReason, UmaError};
