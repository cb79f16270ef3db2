// Path: crates/shim/src/chaincode.rs

//! The user-code contract: two operations, each taking a per-transaction
//! stub and producing a [`Response`].

use crate::stub::ChaincodeStub;
use anyhow::Result;
use async_trait::async_trait;
use chainshim_protos::Response;

/// Status of a successful chaincode response.
pub const OK: i32 = 200;
/// Threshold at and above which a response status is treated as an error.
pub const ERROR_THRESHOLD: i32 = 400;
/// Status of a failed chaincode response.
pub const ERROR: i32 = 500;

/// Builds a success [`Response`] carrying `payload`.
pub fn success(payload: Vec<u8>) -> Response {
    Response {
        status: OK,
        message: String::new(),
        payload,
    }
}

/// Builds an error [`Response`] carrying `message`.
pub fn error_response(message: impl Into<String>) -> Response {
    Response {
        status: ERROR,
        message: message.into(),
        payload: Vec::new(),
    }
}

/// User-supplied smart-contract logic.
///
/// The runtime invokes `init` for INIT frames and `invoke` for TRANSACTION
/// frames, concurrently across transactions. A returned `Ok(response)` is
/// sent to the peer as a COMPLETED frame; a returned `Err` is sent as an
/// ERROR frame carrying the error's message. A response whose status was
/// never set (zero) is reported to the peer as an error, because the peer
/// requires an explicit status.
#[async_trait]
pub trait Chaincode: Send + Sync {
    /// Called when the chaincode is instantiated or upgraded.
    async fn init(&self, stub: &mut ChaincodeStub) -> Result<Response>;

    /// Called for every regular transaction proposal.
    async fn invoke(&self, stub: &mut ChaincodeStub) -> Result<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_helpers() {
        let ok = success(b"hi".to_vec());
        assert_eq!(ok.status, 200);
        assert_eq!(ok.payload, b"hi");
        assert!(ok.message.is_empty());

        let err = error_response("boom");
        assert_eq!(err.status, 500);
        assert_eq!(err.message, "boom");
        assert!(err.payload.is_empty());
    }
}
