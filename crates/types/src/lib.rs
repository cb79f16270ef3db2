// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Chainshim Types
//!
//! This crate is the foundational library for the Chainshim runtime,
//! containing the error taxonomy, configuration objects, and the
//! transaction-key routing identity.
//!
//! ## Architectural Role
//!
//! As the base crate, `chainshim-types` has minimal dependencies and is a
//! dependency for every other crate in the workspace. Keeping the error and
//! configuration vocabulary here gives the transport, queue, and handler
//! layers one canonical definition to share.

/// Shared configuration structures (`ShimConfig` and its defaults).
pub mod config;
/// A unified set of all error types used across the runtime.
pub mod error;
/// The `channel_id ∥ txid` routing identity and diagnostic helpers.
pub mod tx_key;

pub use config::ShimConfig;
pub use error::{ClientError, ErrorCode, ProtocolError, TransportError};
pub use tx_key::TxKey;
