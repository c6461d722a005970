//! # tether-core
//!
//! Foundation types for the tether realtime client.
//!
//! This crate provides the shared vocabulary that all other tether crates depend on:
//!
//! - **Branded IDs**: `EnvelopeId`, `SessionId`, `UserId`, `MatchId` as newtypes for type safety
//! - **Protocol**: [`MessageType`] and the [`Envelope`] wire wrapper
//! - **Errors**: [`ProtocolError`] via `thiserror`
//! - **Retry**: exponential backoff math for the reconnection state machine
//! - **Logging**: `tracing` subscriber bootstrap and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod retry;

pub use errors::ProtocolError;
pub use ids::{EnvelopeId, MatchId, SessionId, UserId};
pub use protocol::{Envelope, MessageType, Payload};
