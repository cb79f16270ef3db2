// Path: crates/shim/src/queue.rs

//! Per-transaction message queues.
//!
//! Every peer-bound request is queued under its transaction key and at most
//! one request per key is ever in flight: only the head of a queue has been
//! written to the transport. Responses complete the head and trigger the
//! send of its successor. Queues exist only while non-empty.

use chainshim_protos::ChaincodeMessage;
use chainshim_types::error::{ProtocolError, TransportError};
use chainshim_types::TxKey;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Symbolic name of a peer operation. Selects the response decoder and
/// appears verbatim in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMethod {
    /// Read a key from state.
    GetState,
    /// Write a key to state.
    PutState,
    /// Delete a key from state.
    DeleteState,
    /// Read the validation-parameter metadata of a key.
    GetStateMetadata,
    /// Write the validation-parameter metadata of a key.
    PutStateMetadata,
    /// Read the digest of a private-data key.
    GetPrivateDataHash,
    /// Open a range scan.
    GetStateByRange,
    /// Open a rich query.
    GetQueryResult,
    /// Fetch the next batch of an open cursor.
    QueryStateNext,
    /// Close an open cursor.
    QueryStateClose,
    /// Open a history scan.
    GetHistoryForKey,
    /// Invoke another chaincode.
    InvokeChaincode,
}

impl PeerMethod {
    /// The method symbol used in response-parsing diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetState => "GetState",
            Self::PutState => "PutState",
            Self::DeleteState => "DeleteState",
            Self::GetStateMetadata => "GetStateMetadata",
            Self::PutStateMetadata => "PutStateMetadata",
            Self::GetPrivateDataHash => "GetPrivateDataHash",
            Self::GetStateByRange => "GetStateByRange",
            Self::GetQueryResult => "GetQueryResult",
            Self::QueryStateNext => "QueryStateNext",
            Self::QueryStateClose => "QueryStateClose",
            Self::GetHistoryForKey => "GetHistoryForKey",
            Self::InvokeChaincode => "InvokeChaincode",
        }
    }
}

/// Completion handle for one pending request. The awaiting task holds the
/// receiving half; the queue holds only this sender.
type Completion = oneshot::Sender<Result<ChaincodeMessage, ProtocolError>>;

/// A peer-bound request waiting in (or at the head of) its transaction
/// queue. Never retried: the peer answers each written request exactly once.
pub struct QueuedMessage {
    msg: ChaincodeMessage,
    method: PeerMethod,
    completion: Completion,
}

impl QueuedMessage {
    /// Wraps an outbound frame and its completion handle.
    pub fn new(msg: ChaincodeMessage, method: PeerMethod, completion: Completion) -> Self {
        Self {
            msg,
            method,
            completion,
        }
    }

    fn tx_key(&self) -> TxKey {
        TxKey::new(&self.msg.channel_id, &self.msg.txid)
    }
}

/// Owns the per-transaction FIFOs and the write side of the transport.
///
/// All frame emission for peer requests funnels through the single
/// unbounded sender, which serializes writers structurally.
pub struct MessageQueue {
    outbound: UnboundedSender<ChaincodeMessage>,
    queues: Mutex<HashMap<TxKey, VecDeque<QueuedMessage>>>,
}

impl MessageQueue {
    /// Creates a queue manager writing frames into `outbound`.
    pub fn new(outbound: UnboundedSender<ChaincodeMessage>) -> Self {
        Self {
            outbound,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Places `qmsg` at the tail of the queue for its transaction key. If
    /// the queue was empty or absent, the new head is written to the
    /// transport immediately. Never blocks.
    pub fn enqueue(&self, qmsg: QueuedMessage) {
        let key = qmsg.tx_key();
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.entry(key.clone()).or_default();
        let was_idle = queue.is_empty();
        debug!(
            method = qmsg.method.as_str(),
            key = key.as_str(),
            depth = queue.len(),
            "queueing peer request"
        );
        queue.push_back(qmsg);
        if was_idle {
            Self::send_head(&self.outbound, queue);
            if queue.is_empty() {
                queues.remove(&key);
            }
        }
    }

    /// Routes an inbound RESPONSE or ERROR frame to the head request of its
    /// transaction queue. Frames with no waiting head are dropped silently:
    /// they are late or duplicate answers for a transaction that no longer
    /// has a pending request.
    pub fn on_response(&self, frame: ChaincodeMessage) {
        let key = TxKey::new(&frame.channel_id, &frame.txid);
        let mut queues = self.queues.lock().unwrap();
        let Some(queue) = queues.get_mut(&key) else {
            trace!(key = key.as_str(), "dropping response with no pending request");
            return;
        };
        let Some(head) = queue.pop_front() else {
            queues.remove(&key);
            return;
        };
        debug!(
            method = head.method.as_str(),
            key = key.as_str(),
            "completing peer request"
        );
        // The receiver may be gone (request timeout); completion is then a
        // no-op and the queue still advances.
        let _ = head.completion.send(Ok(frame));
        Self::send_head(&self.outbound, queue);
        if queue.is_empty() {
            queues.remove(&key);
        }
    }

    /// Writes the head of `queue` to the transport. A synchronous write
    /// failure fails that request and moves on to the next, so a dead
    /// transport drains the queue deterministically instead of wedging the
    /// FIFO behind a frame the peer never saw.
    fn send_head(
        outbound: &UnboundedSender<ChaincodeMessage>,
        queue: &mut VecDeque<QueuedMessage>,
    ) {
        while let Some(head) = queue.front() {
            match outbound.send(head.msg.clone()) {
                Ok(()) => {
                    trace!(method = head.method.as_str(), "wrote head frame");
                    return;
                }
                Err(_) => {
                    if let Some(failed) = queue.pop_front() {
                        let _ = failed
                            .completion
                            .send(Err(ProtocolError::Transport(TransportError::StreamClosed)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainshim_protos::MessageType;
    use tokio::sync::mpsc;

    fn frame(channel_id: &str, txid: &str, payload: &[u8]) -> ChaincodeMessage {
        ChaincodeMessage {
            r#type: MessageType::GetState as i32,
            payload: payload.to_vec(),
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            ..Default::default()
        }
    }

    fn response(channel_id: &str, txid: &str) -> ChaincodeMessage {
        ChaincodeMessage {
            r#type: MessageType::Response as i32,
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            ..Default::default()
        }
    }

    fn pending(
        channel_id: &str,
        txid: &str,
        payload: &[u8],
    ) -> (
        QueuedMessage,
        oneshot::Receiver<Result<ChaincodeMessage, ProtocolError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            QueuedMessage::new(frame(channel_id, txid, payload), PeerMethod::GetState, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn head_is_sent_immediately() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(out_tx);

        let (qmsg, _rx) = pending("ch", "tx1", b"a");
        queue.enqueue(qmsg);

        let sent = out_rx.recv().await.unwrap();
        assert_eq!(sent.payload, b"a");
    }

    #[tokio::test]
    async fn at_most_one_in_flight_per_key() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(out_tx);

        let (first, mut first_rx) = pending("ch", "tx1", b"a");
        let (second, _second_rx) = pending("ch", "tx1", b"b");
        queue.enqueue(first);
        queue.enqueue(second);

        // Only the head has been written.
        assert_eq!(out_rx.recv().await.unwrap().payload, b"a");
        assert!(out_rx.try_recv().is_err());
        assert!(first_rx.try_recv().is_err());

        // The response completes the head strictly before the successor is
        // written.
        queue.on_response(response("ch", "tx1"));
        assert!(first_rx.try_recv().unwrap().is_ok());
        assert_eq!(out_rx.recv().await.unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn keys_proceed_independently() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(out_tx);

        let (a, _a_rx) = pending("ch", "tx1", b"a");
        let (b, _b_rx) = pending("ch", "tx2", b"b");
        queue.enqueue(a);
        queue.enqueue(b);

        // Both heads are in flight at once: the serialization is per key.
        assert_eq!(out_rx.recv().await.unwrap().payload, b"a");
        assert_eq!(out_rx.recv().await.unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn late_response_is_dropped_silently() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(out_tx);

        queue.on_response(response("ch", "unknown"));
        assert!(queue.queues.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_absent_iff_empty() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(out_tx);

        let (a, _a_rx) = pending("ch", "tx1", b"a");
        let (b, _b_rx) = pending("ch", "tx1", b"b");
        queue.enqueue(a);
        queue.enqueue(b);
        let key = TxKey::new("ch", "tx1");
        assert_eq!(queue.queues.lock().unwrap()[&key].len(), 2);

        queue.on_response(response("ch", "tx1"));
        // New head already written, queue still present and non-empty.
        assert_eq!(queue.queues.lock().unwrap()[&key].len(), 1);
        assert_eq!(out_rx.recv().await.unwrap().payload, b"a");
        assert_eq!(out_rx.recv().await.unwrap().payload, b"b");

        queue.on_response(response("ch", "tx1"));
        assert!(!queue.queues.lock().unwrap().contains_key(&key));
    }

    #[tokio::test]
    async fn dead_transport_drains_queue() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        drop(out_rx);
        let queue = MessageQueue::new(out_tx);

        let (a, mut a_rx) = pending("ch", "tx1", b"a");
        let (b, mut b_rx) = pending("ch", "tx1", b"b");
        queue.enqueue(a);
        // The head send fails synchronously; the request is failed and the
        // (empty) queue is removed.
        assert!(matches!(
            a_rx.try_recv().unwrap(),
            Err(ProtocolError::Transport(TransportError::StreamClosed))
        ));
        assert!(queue.queues.lock().unwrap().is_empty());

        queue.enqueue(b);
        assert!(b_rx.try_recv().unwrap().is_err());
        assert!(queue.queues.lock().unwrap().is_empty());
    }
}
