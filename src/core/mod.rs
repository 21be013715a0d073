//! Core firewall policy functionality
//!
//! This module contains the domain types and the pure logic that turns a
//! stored policy into an nftables script. It provides:
//!
//! - [`firewall`]: Data structures for defaults, rules and snapshots
//! - [`rule_constraints`]: Which stored attributes make it into a statement
//! - [`render`]: Deterministic script generation
//! - [`nft`]: Piping scripts into the nft binary
//! - [`error`]: Error types shared by the whole crate

pub mod error;
pub mod firewall;
pub mod nft;
pub mod render;
pub mod rule_constraints;

#[cfg(test)]
pub mod test_helpers;
