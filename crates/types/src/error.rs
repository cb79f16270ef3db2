// Path: crates/types/src/error.rs
//! Core error types for the Chainshim runtime.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors surfaced synchronously to the host program while constructing a
/// client.
///
/// The message text of each variant is part of the constructor contract and
/// must not be reworded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The peer target could not be parsed as a URL at all.
    #[error("Invalid URL")]
    InvalidUrl,
    /// The target URL used a scheme other than `grpc` or `grpcs`.
    #[error("Invalid protocol: {0}.  URLs must begin with grpc:// or grpcs://")]
    InvalidProtocol(String),
    /// A `grpcs://` target was given without a PEM CA certificate bundle.
    #[error("PEM encoded certificate is required.")]
    MissingRootCert,
    /// A `grpcs://` target was given without a client private key.
    #[error("encoded Private key is required.")]
    MissingClientKey,
    /// A `grpcs://` target was given without a client certificate.
    #[error("encoded client certificate is required.")]
    MissingClientCert,
    /// Client key or certificate material was present but not valid base64.
    #[error("Invalid TLS client material: {0}")]
    InvalidTlsMaterial(String),
}

impl ErrorCode for ClientError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "CLIENT_INVALID_URL",
            Self::InvalidProtocol(_) => "CLIENT_INVALID_PROTOCOL",
            Self::MissingRootCert => "CLIENT_MISSING_ROOT_CERT",
            Self::MissingClientKey => "CLIENT_MISSING_CLIENT_KEY",
            Self::MissingClientCert => "CLIENT_MISSING_CLIENT_CERT",
            Self::InvalidTlsMaterial(_) => "CLIENT_INVALID_TLS_MATERIAL",
        }
    }
}

/// Errors originating from the stream transport to the peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing the peer's chaincode-support endpoint failed.
    #[error("Failed to connect to peer at {addr}: {reason}")]
    Connect {
        /// The normalized peer address.
        addr: String,
        /// The underlying connection failure, stringified.
        reason: String,
    },
    /// A frame could not be written because the stream is gone.
    #[error("Stream to peer is closed")]
    StreamClosed,
    /// The TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "TRANSPORT_CONNECT_FAILED",
            Self::StreamClosed => "TRANSPORT_STREAM_CLOSED",
            Self::Tls(_) => "TRANSPORT_TLS_ERROR",
        }
    }
}

/// Errors raised while correlating, decoding, or awaiting peer responses.
///
/// Every variant here is either returned to the user-code call that caused
/// it or surfaced to the peer as an ERROR frame; none are logged-and-dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer answered an outstanding request with an ERROR frame; the
    /// message is the frame payload interpreted as UTF-8.
    #[error("{0}")]
    PeerError(String),
    /// The peer answered with a frame that is neither RESPONSE nor ERROR.
    #[error("[{channel_id}-{txid}] Received incorrect chaincode in response to the {method}() call: type=\"{got}\", expecting \"RESPONSE\"")]
    UnexpectedResponseType {
        /// The channel the request was issued on.
        channel_id: String,
        /// The transaction the request was issued for.
        txid: String,
        /// The symbolic name of the operation that was awaiting a response.
        method: &'static str,
        /// The frame type that actually arrived.
        got: String,
    },
    /// A protocol-buffer payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
    /// The transport failed while a request was pending.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// The configured request timeout elapsed before the peer answered.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    /// The stream was torn down while a request was pending.
    #[error("Request cancelled: stream to peer closed")]
    Cancelled,
    /// A cross-chaincode invocation completed with an error response.
    #[error("{0}")]
    InvokeFailed(String),
    /// The peer sent a frame type this runtime does not speak while the
    /// connection was fully established. The protocol is desynchronized and
    /// the stream loop terminates the process with exit code 1.
    #[error("Unrecognized message type ({msg_type}) received in ready state")]
    FatalDesync {
        /// The offending frame type.
        msg_type: String,
    },
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::PeerError(_) => "PROTOCOL_PEER_ERROR",
            Self::UnexpectedResponseType { .. } => "PROTOCOL_BAD_RESPONSE_TYPE",
            Self::Decode(_) => "PROTOCOL_DECODE_ERROR",
            Self::Transport(_) => "PROTOCOL_TRANSPORT_ERROR",
            Self::Timeout(_) => "PROTOCOL_REQUEST_TIMEOUT",
            Self::Cancelled => "PROTOCOL_CANCELLED",
            Self::InvokeFailed(_) => "PROTOCOL_INVOKE_FAILED",
            Self::FatalDesync { .. } => "PROTOCOL_FATAL_DESYNC",
        }
    }
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(e: prost::DecodeError) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_messages_are_literal() {
        assert_eq!(ClientError::InvalidUrl.to_string(), "Invalid URL");
        assert_eq!(
            ClientError::InvalidProtocol("http".to_string()).to_string(),
            "Invalid protocol: http.  URLs must begin with grpc:// or grpcs://"
        );
        assert_eq!(
            ClientError::MissingRootCert.to_string(),
            "PEM encoded certificate is required."
        );
        assert_eq!(
            ClientError::MissingClientKey.to_string(),
            "encoded Private key is required."
        );
        assert_eq!(
            ClientError::MissingClientCert.to_string(),
            "encoded client certificate is required."
        );
    }

    #[test]
    fn bad_response_type_message_shape() {
        let err = ProtocolError::UnexpectedResponseType {
            channel_id: "theChannelID".to_string(),
            txid: "theTxID".to_string(),
            method: "GetState",
            got: "INIT".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "[theChannelID-theTxID] Received incorrect chaincode in response to the GetState() call: type=\"INIT\", expecting \"RESPONSE\""
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ClientError::InvalidUrl.code(), "CLIENT_INVALID_URL");
        assert_eq!(TransportError::StreamClosed.code(), "TRANSPORT_STREAM_CLOSED");
        assert_eq!(ProtocolError::Cancelled.code(), "PROTOCOL_CANCELLED");
    }
}
