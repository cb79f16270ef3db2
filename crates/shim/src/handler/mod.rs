// Path: crates/shim/src/handler/mod.rs

//! The per-stream message handler.
//!
//! One handler owns one registered stream to the peer. It drives the
//! REGISTER handshake, classifies every inbound frame, dispatches INIT and
//! TRANSACTION frames into user code, and exposes the ask-peer operations
//! that user code reaches through its [`ChaincodeStub`].
//!
//! The inbound half never suspends: a frame is enqueued, dispatched to a
//! spawned transaction task, or rejected, and the handler returns to the
//! stream loop.

use crate::chaincode::{self, Chaincode};
use crate::iterators::{HistoryQueryIterator, StateQueryIterator};
use crate::queue::{MessageQueue, PeerMethod, QueuedMessage};
use crate::stub::ChaincodeStub;
use chainshim_protos::peer::{self, chaincode_spec};
use chainshim_protos::{
    ChaincodeEvent, ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageType, Response,
};
use chainshim_types::error::{ProtocolError, TransportError};
use chainshim_types::tx_key::{diag_prefix, short_txid};
use chainshim_types::ShimConfig;
use prost::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Connection state of the stream. Advances monotonically; it never
/// regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// REGISTER written, REGISTERED not yet seen.
    Created,
    /// REGISTERED seen, READY not yet seen.
    Established,
    /// Fully duplex; transactions flow.
    Ready,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnState::Created => "created",
            ConnState::Established => "established",
            ConnState::Ready => "ready",
        })
    }
}

/// Human-readable name of a wire frame type, falling back to the raw
/// discriminant for values outside the schema.
pub(crate) fn type_name(raw: i32) -> String {
    match MessageType::try_from(raw) {
        Ok(t) => t.as_str_name().to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Correlates requests with responses and dispatches transactions for one
/// registered stream.
pub struct ChaincodeMessageHandler {
    chaincode: Arc<dyn Chaincode>,
    queue: MessageQueue,
    outbound: UnboundedSender<ChaincodeMessage>,
    state: Mutex<ConnState>,
    request_timeout: Duration,
    chaincode_id_name: String,
    // Handle back to the owning Arc; lets dispatch and the scan cursors
    // hold the handler without threading an Arc through every call.
    self_ref: Weak<Self>,
}

impl fmt::Display for ChaincodeMessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChaincodeMessageHandler : {}")
    }
}

impl ChaincodeMessageHandler {
    /// Creates a handler writing frames into `outbound`.
    pub fn new(
        chaincode: Arc<dyn Chaincode>,
        outbound: UnboundedSender<ChaincodeMessage>,
        config: &ShimConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            chaincode,
            queue: MessageQueue::new(outbound.clone()),
            outbound,
            state: Mutex::new(ConnState::Created),
            request_timeout: config.request_timeout(),
            chaincode_id_name: config.chaincode_id_name.clone(),
            self_ref: self_ref.clone(),
        })
    }

    /// A strong handle to this handler. Fails only while the last owner is
    /// mid-drop, at which point no new work may start anyway.
    fn strong(&self) -> Result<Arc<Self>, ProtocolError> {
        self.self_ref.upgrade().ok_or(ProtocolError::Cancelled)
    }

    /// The current connection state.
    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: ConnState) {
        *self.state.lock().unwrap() = next;
    }

    /// Writes the REGISTER frame announcing this chaincode to the peer.
    /// This is the first outbound frame of the stream.
    pub fn register(&self) -> Result<(), TransportError> {
        let id = ChaincodeId {
            name: self.chaincode_id_name.clone(),
            ..Default::default()
        };
        let msg = ChaincodeMessage {
            r#type: MessageType::Register as i32,
            payload: id.encode_to_vec(),
            ..Default::default()
        };
        info!(chaincode = %self.chaincode_id_name, "registering with peer");
        self.outbound
            .send(msg)
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Classifies one inbound frame.
    ///
    /// Returns `Err(ProtocolError::FatalDesync)` only for an unrecognized
    /// frame type in the `ready` state; the stream loop turns that into
    /// process exit code 1. Every other outcome either advances the
    /// handshake, routes the frame, or answers the peer with an ERROR frame.
    pub fn handle_message(&self, msg: ChaincodeMessage) -> Result<(), ProtocolError> {
        let state = self.state();
        trace!(
            state = %state,
            msg_type = %type_name(msg.r#type),
            txid = %msg.txid,
            "inbound frame"
        );
        match state {
            ConnState::Created => match MessageType::try_from(msg.r#type) {
                Ok(MessageType::Registered) => {
                    self.set_state(ConnState::Established);
                    info!("registered with peer");
                    Ok(())
                }
                _ => self.reject_out_of_state(&msg, state),
            },
            ConnState::Established => match MessageType::try_from(msg.r#type) {
                Ok(MessageType::Ready) => {
                    self.set_state(ConnState::Ready);
                    info!("peer signalled ready; stream is fully duplex");
                    Ok(())
                }
                _ => self.reject_out_of_state(&msg, state),
            },
            ConnState::Ready => match MessageType::try_from(msg.r#type) {
                Ok(MessageType::Init) => {
                    self.dispatch(msg, true);
                    Ok(())
                }
                Ok(MessageType::Transaction) => {
                    self.dispatch(msg, false);
                    Ok(())
                }
                Ok(MessageType::Response) | Ok(MessageType::Error) => {
                    self.queue.on_response(msg);
                    Ok(())
                }
                Ok(MessageType::Registered) | Ok(MessageType::Ready) => {
                    trace!(msg_type = %type_name(msg.r#type), "ignoring duplicate handshake frame");
                    Ok(())
                }
                _ => Err(ProtocolError::FatalDesync {
                    msg_type: type_name(msg.r#type),
                }),
            },
        }
    }

    /// Answers an out-of-state frame with a diagnostic ERROR frame. The
    /// state does not advance.
    fn reject_out_of_state(
        &self,
        msg: &ChaincodeMessage,
        state: ConnState,
    ) -> Result<(), ProtocolError> {
        let text = format!(
            "{} Chaincode handler FSM cannot handle message ({}) with payload size ({}) while in state: {}",
            diag_prefix(&msg.channel_id, &msg.txid),
            type_name(msg.r#type),
            msg.payload.len(),
            state
        );
        warn!("{text}");
        self.send_error_frame(&msg.channel_id, &msg.txid, text.into_bytes())
            .map_err(ProtocolError::Transport)
    }

    // ------------------------------------------------------------------
    // Transaction dispatch
    // ------------------------------------------------------------------

    /// Spawns one task per inbound INIT/TRANSACTION frame. Transactions run
    /// concurrently; requests within one transaction stay serialized by the
    /// queue manager.
    fn dispatch(&self, msg: ChaincodeMessage, is_init: bool) {
        let Ok(handler) = self.strong() else {
            return;
        };
        tokio::spawn(async move {
            handler.run_transaction(msg, is_init).await;
        });
    }

    async fn run_transaction(self: Arc<Self>, msg: ChaincodeMessage, is_init: bool) {
        let op = if is_init { "Init" } else { "Invoke" };
        let channel_id = msg.channel_id;
        let txid = msg.txid;

        let input = match ChaincodeInput::decode(msg.payload.as_slice()) {
            Ok(input) => input,
            Err(e) => {
                warn!(
                    txid = %txid,
                    "{} could not decode chaincode input: {e}",
                    diag_prefix(&channel_id, &txid)
                );
                // The original payload goes back so the peer can correlate
                // the failure.
                self.try_send_error_frame(&channel_id, &txid, msg.payload);
                return;
            }
        };

        let mut stub = ChaincodeStub::new(
            Arc::clone(&self),
            channel_id.clone(),
            txid.clone(),
            input,
            msg.proposal,
        );

        debug!(txid = %txid, "invoking chaincode {op}");
        let result = if is_init {
            self.chaincode.init(&mut stub).await
        } else {
            self.chaincode.invoke(&mut stub).await
        };

        match result {
            Err(e) => {
                warn!(txid = %txid, "chaincode {op} failed: {e:#}");
                self.try_send_error_frame(&channel_id, &txid, e.to_string().into_bytes());
            }
            Ok(resp) if resp.status == 0 => {
                // The peer requires an explicit status; a handler that
                // resolves without setting one is an error.
                let message = format!(
                    "[{}-{}] Calling chaincode {}() has not called success or error.",
                    channel_id,
                    short_txid(&txid),
                    op
                );
                warn!("{message}");
                self.try_send_completed(&channel_id, &txid, chaincode::error_response(message), None);
            }
            Ok(resp) => {
                self.try_send_completed(&channel_id, &txid, resp, stub.take_event());
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound writers
    // ------------------------------------------------------------------

    fn send_error_frame(
        &self,
        channel_id: &str,
        txid: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let msg = ChaincodeMessage {
            r#type: MessageType::Error as i32,
            payload,
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            ..Default::default()
        };
        self.outbound
            .send(msg)
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Like [`Self::send_error_frame`], for spawned tasks that have nowhere
    /// to propagate a dead-transport failure.
    fn try_send_error_frame(&self, channel_id: &str, txid: &str, payload: Vec<u8>) {
        if self.send_error_frame(channel_id, txid, payload).is_err() {
            warn!(txid = %txid, "stream closed before error frame could be written");
        }
    }

    fn try_send_completed(
        &self,
        channel_id: &str,
        txid: &str,
        response: Response,
        event: Option<ChaincodeEvent>,
    ) {
        let msg = ChaincodeMessage {
            r#type: MessageType::Completed as i32,
            payload: response.encode_to_vec(),
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            chaincode_event: event,
            ..Default::default()
        };
        if self.outbound.send(msg).is_err() {
            warn!(txid = %txid, "stream closed before completed frame could be written");
        }
    }

    // ------------------------------------------------------------------
    // Ask-peer operations
    // ------------------------------------------------------------------

    /// Queues one peer request and awaits its correlated reply.
    ///
    /// The configured request timeout bounds the wait end-to-end. A timed
    /// out request leaves its queue entry in place: the eventual response
    /// (or stream teardown) still advances the per-transaction FIFO.
    async fn ask_peer(
        &self,
        method: PeerMethod,
        frame_type: MessageType,
        payload: Vec<u8>,
        channel_id: &str,
        txid: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        let msg = ChaincodeMessage {
            r#type: frame_type as i32,
            payload,
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            ..Default::default()
        };
        debug!(method = method.as_str(), txid = %txid, "issuing peer request");
        self.queue.enqueue(QueuedMessage::new(msg, method, tx));

        let frame = match timeout(self.request_timeout, rx).await {
            Err(_) => {
                return Err(ProtocolError::Timeout(self.request_timeout.as_millis() as u64))
            }
            Ok(Err(_)) => return Err(ProtocolError::Cancelled),
            Ok(Ok(completed)) => completed?,
        };
        parse_response(method, frame, channel_id, txid)
    }

    /// Reads a key. An absent key yields empty bytes.
    pub(crate) async fn get_state(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        key: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = peer::GetState {
            key: key.to_string(),
            collection: collection.to_string(),
        };
        self.ask_peer(
            PeerMethod::GetState,
            MessageType::GetState,
            body.encode_to_vec(),
            channel_id,
            txid,
        )
        .await
    }

    /// Writes a key.
    pub(crate) async fn put_state(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = peer::PutState {
            key: key.to_string(),
            value,
            collection: collection.to_string(),
        };
        self.ask_peer(
            PeerMethod::PutState,
            MessageType::PutState,
            body.encode_to_vec(),
            channel_id,
            txid,
        )
        .await
    }

    /// Deletes a key.
    pub(crate) async fn delete_state(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        key: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = peer::DelState {
            key: key.to_string(),
            collection: collection.to_string(),
        };
        self.ask_peer(
            PeerMethod::DeleteState,
            MessageType::DelState,
            body.encode_to_vec(),
            channel_id,
            txid,
        )
        .await
    }

    /// Reads the endorsement metadata of a key as a `metakey → value` map.
    pub(crate) async fn get_state_metadata(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        key: &str,
    ) -> Result<HashMap<String, Vec<u8>>, ProtocolError> {
        let body = peer::GetStateMetadata {
            key: key.to_string(),
            collection: collection.to_string(),
        };
        let raw = self
            .ask_peer(
                PeerMethod::GetStateMetadata,
                MessageType::GetStateMetadata,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;
        let result = peer::StateMetadataResult::decode(raw.as_slice())?;
        Ok(result
            .entries
            .into_iter()
            .map(|entry| (entry.metakey, entry.value))
            .collect())
    }

    /// Writes one endorsement-metadata entry of a key.
    pub(crate) async fn put_state_metadata(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        key: &str,
        metakey: &str,
        value: Vec<u8>,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = peer::PutStateMetadata {
            key: key.to_string(),
            collection: collection.to_string(),
            metadata: Some(peer::StateMetadata {
                metakey: metakey.to_string(),
                value,
            }),
        };
        self.ask_peer(
            PeerMethod::PutStateMetadata,
            MessageType::PutStateMetadata,
            body.encode_to_vec(),
            channel_id,
            txid,
        )
        .await
    }

    /// Reads the digest of a private-data key.
    pub(crate) async fn get_private_data_hash(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        key: &str,
    ) -> Result<Vec<u8>, ProtocolError> {
        let body = peer::GetState {
            key: key.to_string(),
            collection: collection.to_string(),
        };
        self.ask_peer(
            PeerMethod::GetPrivateDataHash,
            MessageType::GetPrivateDataHash,
            body.encode_to_vec(),
            channel_id,
            txid,
        )
        .await
    }

    /// Opens a range scan and returns its cursor plus pagination metadata.
    pub(crate) async fn get_state_by_range(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        start_key: &str,
        end_key: &str,
        metadata: Option<peer::QueryMetadata>,
    ) -> Result<(StateQueryIterator, peer::QueryResponseMetadata), ProtocolError> {
        let body = peer::GetStateByRange {
            start_key: start_key.to_string(),
            end_key: end_key.to_string(),
            collection: collection.to_string(),
            metadata: metadata.map(|m| m.encode_to_vec()).unwrap_or_default(),
        };
        let raw = self
            .ask_peer(
                PeerMethod::GetStateByRange,
                MessageType::GetStateByRange,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;
        let resp = peer::QueryResponse::decode(raw.as_slice())?;
        let meta = decode_scan_metadata(&resp.metadata)?;
        Ok((
            StateQueryIterator::new(self.strong()?, channel_id, txid, resp),
            meta,
        ))
    }

    /// Opens a rich query and returns its cursor plus pagination metadata.
    pub(crate) async fn get_query_result(
        &self,
        channel_id: &str,
        txid: &str,
        collection: &str,
        query: &str,
        metadata: Option<peer::QueryMetadata>,
    ) -> Result<(StateQueryIterator, peer::QueryResponseMetadata), ProtocolError> {
        let body = peer::GetQueryResult {
            query: query.to_string(),
            collection: collection.to_string(),
            metadata: metadata.map(|m| m.encode_to_vec()).unwrap_or_default(),
        };
        let raw = self
            .ask_peer(
                PeerMethod::GetQueryResult,
                MessageType::GetQueryResult,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;
        let resp = peer::QueryResponse::decode(raw.as_slice())?;
        let meta = decode_scan_metadata(&resp.metadata)?;
        Ok((
            StateQueryIterator::new(self.strong()?, channel_id, txid, resp),
            meta,
        ))
    }

    /// Opens a history scan for a key.
    pub(crate) async fn get_history_for_key(
        &self,
        channel_id: &str,
        txid: &str,
        key: &str,
    ) -> Result<(HistoryQueryIterator, peer::QueryResponseMetadata), ProtocolError> {
        let body = peer::GetHistoryForKey {
            key: key.to_string(),
        };
        let raw = self
            .ask_peer(
                PeerMethod::GetHistoryForKey,
                MessageType::GetHistoryForKey,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;
        let resp = peer::QueryResponse::decode(raw.as_slice())?;
        let meta = decode_scan_metadata(&resp.metadata)?;
        Ok((
            HistoryQueryIterator::new(self.strong()?, channel_id, txid, resp),
            meta,
        ))
    }

    /// Fetches the next batch of an open cursor.
    pub(crate) async fn query_state_next(
        &self,
        channel_id: &str,
        txid: &str,
        id: &str,
    ) -> Result<peer::QueryResponse, ProtocolError> {
        let body = peer::QueryStateNext { id: id.to_string() };
        let raw = self
            .ask_peer(
                PeerMethod::QueryStateNext,
                MessageType::QueryStateNext,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;
        Ok(peer::QueryResponse::decode(raw.as_slice())?)
    }

    /// Closes an open cursor.
    pub(crate) async fn query_state_close(
        &self,
        channel_id: &str,
        txid: &str,
        id: &str,
    ) -> Result<peer::QueryResponse, ProtocolError> {
        let body = peer::QueryStateClose { id: id.to_string() };
        let raw = self
            .ask_peer(
                PeerMethod::QueryStateClose,
                MessageType::QueryStateClose,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;
        Ok(peer::QueryResponse::decode(raw.as_slice())?)
    }

    /// Invokes another chaincode on the same peer within this transaction.
    pub(crate) async fn invoke_chaincode(
        &self,
        channel_id: &str,
        txid: &str,
        chaincode_name: &str,
        args: Vec<Vec<u8>>,
    ) -> Result<Response, ProtocolError> {
        let body = peer::ChaincodeSpec {
            r#type: chaincode_spec::Type::Undefined as i32,
            chaincode_id: Some(ChaincodeId {
                name: chaincode_name.to_string(),
                ..Default::default()
            }),
            input: Some(ChaincodeInput {
                args,
                ..Default::default()
            }),
            timeout: 0,
        };
        let raw = self
            .ask_peer(
                PeerMethod::InvokeChaincode,
                MessageType::InvokeChaincode,
                body.encode_to_vec(),
                channel_id,
                txid,
            )
            .await?;

        // The reply payload is itself a chaincode message describing how
        // the callee finished.
        let inner = ChaincodeMessage::decode(raw.as_slice())?;
        match MessageType::try_from(inner.r#type) {
            Ok(MessageType::Completed) => Ok(Response::decode(inner.payload.as_slice())?),
            Ok(MessageType::Error) => {
                let resp = Response::decode(inner.payload.as_slice())?;
                Err(ProtocolError::InvokeFailed(resp.message))
            }
            _ => Ok(Response {
                status: chaincode::OK,
                message: String::new(),
                payload: inner.payload,
            }),
        }
    }
}

/// Decodes a correlated reply frame: ERROR fails with the payload as UTF-8,
/// anything other than RESPONSE is a protocol violation, RESPONSE yields the
/// raw payload for the per-method decoder.
fn parse_response(
    method: PeerMethod,
    frame: ChaincodeMessage,
    channel_id: &str,
    txid: &str,
) -> Result<Vec<u8>, ProtocolError> {
    match MessageType::try_from(frame.r#type) {
        Ok(MessageType::Response) => Ok(frame.payload),
        Ok(MessageType::Error) => Err(ProtocolError::PeerError(
            String::from_utf8_lossy(&frame.payload).into_owned(),
        )),
        _ => Err(ProtocolError::UnexpectedResponseType {
            channel_id: channel_id.to_string(),
            txid: txid.to_string(),
            method: method.as_str(),
            got: type_name(frame.r#type),
        }),
    }
}

fn decode_scan_metadata(metadata: &[u8]) -> Result<peer::QueryResponseMetadata, ProtocolError> {
    if metadata.is_empty() {
        return Ok(peer::QueryResponseMetadata::default());
    }
    Ok(peer::QueryResponseMetadata::decode(metadata)?)
}
