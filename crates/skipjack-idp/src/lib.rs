//! # Identity-Provider Contract
//!
//! Types exchanged between upstream identity-provider engines and the
//! credential-issuance pipeline: the identity produced by a successful
//! login and the attributes handed back when that identity is later
//! re-validated without the user's password.
//!
//! This crate is a pure data boundary. It performs no I/O and has no
//! knowledge of any particular directory or protocol.

pub mod identity;

pub use identity::{Identity, RefreshAttributes, SCOPE_GROUPS};
