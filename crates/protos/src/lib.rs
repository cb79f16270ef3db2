// Path: crates/protos/src/lib.rs
//! # Chainshim Protos
//!
//! Generated protobuf and tonic bindings for the chaincode-support wire
//! protocol. Proto package names follow the peer's canonical schema
//! (`protos`, `common`, `queryresult`) so the `ChaincodeSupport/Register`
//! method path and every payload match the peer byte-for-byte.

// Re-export the generated Protobuf/Tonic code.

/// The `protos` package: `ChaincodeMessage`, frame bodies, proposals, and
/// the `ChaincodeSupport` service.
pub mod peer {
    tonic::include_proto!("protos");
}

/// The `common` package: envelope header structures.
pub mod common {
    tonic::include_proto!("common");
}

/// The `queryresult` package: records yielded by ledger scans.
pub mod queryresult {
    tonic::include_proto!("queryresult");
}

// Flatten the frame type for users; everything else is reached through its
// package module.
pub use peer::chaincode_message::Type as MessageType;
pub use peer::{ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, Response};
