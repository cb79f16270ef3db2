// Path: crates/shim/src/client.rs

//! The top-level chaincode-support client.
//!
//! Hosts construct one client per process, then call [`start`] to connect,
//! register, and serve transactions until the peer ends the stream.
//!
//! [`start`]: ChaincodeSupportClient::start

use crate::chaincode::Chaincode;
use crate::handler::ChaincodeMessageHandler;
use crate::transport::{self, PeerTarget};
use anyhow::Result;
use chainshim_types::error::ProtocolError;
use chainshim_types::{ClientError, ShimConfig};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Connects user-supplied chaincode to a peer's chaincode-support endpoint.
pub struct ChaincodeSupportClient {
    chaincode: Arc<dyn Chaincode>,
    target: PeerTarget,
    config: ShimConfig,
    url: String,
}

impl fmt::Display for ChaincodeSupportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChaincodeSupportClient : {{url:{}}}", self.url)
    }
}

impl fmt::Debug for ChaincodeSupportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl ChaincodeSupportClient {
    /// Validates the target URL and configuration and builds a client.
    ///
    /// `url` must begin with `grpc://` or `grpcs://`; secure targets also
    /// require the CA bundle, client key, and client certificate in
    /// `config`. Validation failures carry the exact construction-error
    /// messages of the protocol contract.
    pub fn new(
        chaincode: Arc<dyn Chaincode>,
        url: &str,
        config: ShimConfig,
    ) -> Result<Self, ClientError> {
        let target = PeerTarget::parse(url, &config)?;
        Ok(Self {
            chaincode,
            target,
            config,
            url: url.to_string(),
        })
    }

    /// Connects to the peer, writes the REGISTER frame, and serves the
    /// stream until the peer closes it or an unrecoverable error occurs.
    ///
    /// An unrecognized frame type after the handshake terminates the
    /// process with exit code 1: the peer is speaking a protocol this
    /// runtime does not know, and failing fast beats silent corruption.
    pub async fn start(&self) -> Result<()> {
        info!(peer = %self.target.authority(), "starting {self}");
        let (outbound, mut inbound) = transport::connect(&self.target, &self.config).await?;
        let handler =
            ChaincodeMessageHandler::new(Arc::clone(&self.chaincode), outbound, &self.config);
        // REGISTER is the first outbound frame of the stream, before any
        // inbound processing.
        handler.register()?;

        loop {
            match inbound.message().await {
                Ok(Some(frame)) => {
                    if let Err(e) = handler.handle_message(frame) {
                        if matches!(e, ProtocolError::FatalDesync { .. }) {
                            error!("{e}; exiting");
                            std::process::exit(1);
                        }
                        error!("ending stream: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    // The peer closed its end; cancel by tearing down ours.
                    // Outstanding requests complete with cancellation when
                    // the handler drops.
                    info!("peer closed the stream");
                    break;
                }
                Err(status) => {
                    error!("stream error: {status}");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaincode::success;
    use crate::stub::ChaincodeStub;
    use chainshim_protos::Response;

    struct NoopChaincode;

    #[async_trait::async_trait]
    impl Chaincode for NoopChaincode {
        async fn init(&self, _stub: &mut ChaincodeStub) -> Result<Response> {
            Ok(success(Vec::new()))
        }

        async fn invoke(&self, _stub: &mut ChaincodeStub) -> Result<Response> {
            Ok(success(Vec::new()))
        }
    }

    #[test]
    fn stringifies_with_url() {
        let client = ChaincodeSupportClient::new(
            Arc::new(NoopChaincode),
            "grpc://localhost:7052",
            ShimConfig::default(),
        )
        .unwrap();
        assert_eq!(
            client.to_string(),
            "ChaincodeSupportClient : {url:grpc://localhost:7052}"
        );
    }

    #[test]
    fn construction_validates_scheme() {
        let err = ChaincodeSupportClient::new(
            Arc::new(NoopChaincode),
            "https://localhost:7052",
            ShimConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid protocol: https.  URLs must begin with grpc:// or grpcs://"
        );
    }

    #[test]
    fn construction_validates_secure_material() {
        let err = ChaincodeSupportClient::new(
            Arc::new(NoopChaincode),
            "grpcs://localhost:7052",
            ShimConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "PEM encoded certificate is required.");
    }
}
