//! Escrow ledger engine for attested buyer/seller settlement
//!
//! This crate implements custody of escrowed value released or refunded on a
//! signed verification verdict:
//! - Ed25519-attested verdicts bound to a canonical message
//! - Overflow-checked fee splitting
//! - Time-bounded dispute arbitration by an admin set
//! - Idempotent cross-chain relay handling

pub mod balances;
pub mod bridge;
pub mod clock;
pub mod dispute;
pub mod error;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod models;
pub mod node;
pub mod protocol_config;
pub mod verification_service;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
