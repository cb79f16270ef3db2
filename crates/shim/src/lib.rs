// Path: crates/shim/src/lib.rs

//! # Chainshim
//!
//! The chaincode-side protocol runtime. A chaincode process links this
//! crate, implements [`Chaincode`], and calls
//! [`ChaincodeSupportClient::start`] to register with its peer over one
//! bidirectional gRPC stream. The runtime then dispatches every INIT and
//! TRANSACTION the peer sends into the user code, and serves the ledger
//! operations user code performs through its [`ChaincodeStub`] (reads,
//! writes, scans, history lookups, and cross-chaincode calls) over the
//! same stream, one in-flight request per transaction.
//!
//! ```no_run
//! use chainshim::{success, Chaincode, ChaincodeStub, ChaincodeSupportClient, Response, ShimConfig};
//! use std::sync::Arc;
//!
//! struct Asset;
//!
//! #[async_trait::async_trait]
//! impl Chaincode for Asset {
//!     async fn init(&self, _stub: &mut ChaincodeStub) -> anyhow::Result<Response> {
//!         Ok(success(Vec::new()))
//!     }
//!
//!     async fn invoke(&self, stub: &mut ChaincodeStub) -> anyhow::Result<Response> {
//!         let value = stub.get_state("asset1").await?;
//!         Ok(success(value))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     chainshim::logging::init_tracing()?;
//!     let config = ShimConfig {
//!         chaincode_id_name: "asset:1.0".into(),
//!         ..Default::default()
//!     };
//!     let client = ChaincodeSupportClient::new(Arc::new(Asset), "grpc://127.0.0.1:7052", config)?;
//!     client.start().await
//! }
//! ```

/// The user-code contract and response helpers.
pub mod chaincode;
/// The top-level client: construction surface and stream lifecycle.
pub mod client;
/// The per-stream handler: handshake FSM, dispatch, and the ask-peer API.
pub mod handler;
/// Cursors over range scans, rich queries, and history lookups.
pub mod iterators;
/// The initialization routine for global structured logging.
pub mod logging;
/// The per-transaction context passed to user code.
pub mod stub;

mod queue;
mod transport;

pub use chaincode::{error_response, success, Chaincode};
pub use client::ChaincodeSupportClient;
pub use iterators::{HistoryQueryIterator, StateQueryIterator};
pub use stub::ChaincodeStub;

// The wire types user code touches directly.
pub use chainshim_protos::Response;
pub use chainshim_types::ShimConfig;
