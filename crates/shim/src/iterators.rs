// Path: crates/shim/src/iterators.rs

//! Cursors over ledger scans.
//!
//! Range scans, rich queries, and history scans return a peer-side cursor.
//! These iterators walk it lazily: each exhausted batch triggers one
//! QUERY_STATE_NEXT, and `close` (or drop) releases the cursor with
//! QUERY_STATE_CLOSE. Cursors are finite and non-restartable.

use crate::handler::ChaincodeMessageHandler;
use chainshim_protos::peer::{QueryResponse, QueryResultBytes};
use chainshim_protos::queryresult::{KeyModification, Kv};
use chainshim_types::error::ProtocolError;
use prost::Message;
use std::sync::Arc;
use tracing::{trace, warn};

/// Shared batch-walking core of the two iterator flavors.
struct QueryCursor {
    handler: Arc<ChaincodeMessageHandler>,
    channel_id: String,
    txid: String,
    id: String,
    results: Vec<QueryResultBytes>,
    next_index: usize,
    has_more: bool,
    closed: bool,
}

impl QueryCursor {
    fn new(
        handler: Arc<ChaincodeMessageHandler>,
        channel_id: &str,
        txid: &str,
        resp: QueryResponse,
    ) -> Self {
        Self {
            handler,
            channel_id: channel_id.to_string(),
            txid: txid.to_string(),
            id: resp.id,
            results: resp.results,
            next_index: 0,
            has_more: resp.has_more,
            closed: false,
        }
    }

    async fn next_bytes(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            if let Some(result) = self.results.get_mut(self.next_index) {
                self.next_index += 1;
                return Ok(Some(std::mem::take(&mut result.result_bytes)));
            }
            if !self.has_more {
                return Ok(None);
            }
            let resp = self
                .handler
                .query_state_next(&self.channel_id, &self.txid, &self.id)
                .await?;
            self.results = resp.results;
            self.next_index = 0;
            self.has_more = resp.has_more;
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.handler
            .query_state_close(&self.channel_id, &self.txid, &self.id)
            .await?;
        Ok(())
    }
}

impl Drop for QueryCursor {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Release the peer-side cursor even when the user never called
        // close.
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(id = %self.id, "cursor dropped outside a runtime; peer-side cursor leaks");
            return;
        };
        let handler = Arc::clone(&self.handler);
        let channel_id = std::mem::take(&mut self.channel_id);
        let txid = std::mem::take(&mut self.txid);
        let id = std::mem::take(&mut self.id);
        rt.spawn(async move {
            if let Err(e) = handler.query_state_close(&channel_id, &txid, &id).await {
                trace!(id = %id, "close-on-drop failed: {e}");
            }
        });
    }
}

/// Walks the key/value records of a range scan or rich query.
pub struct StateQueryIterator {
    cursor: QueryCursor,
}

impl StateQueryIterator {
    pub(crate) fn new(
        handler: Arc<ChaincodeMessageHandler>,
        channel_id: &str,
        txid: &str,
        resp: QueryResponse,
    ) -> Self {
        Self {
            cursor: QueryCursor::new(handler, channel_id, txid, resp),
        }
    }

    /// The next record, or `None` once the scan is exhausted.
    pub async fn next(&mut self) -> Result<Option<Kv>, ProtocolError> {
        match self.cursor.next_bytes().await? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Kv::decode(bytes.as_slice())?)),
        }
    }

    /// Releases the peer-side cursor. Idempotent.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        self.cursor.close().await
    }
}

/// Walks the historic modifications of one key.
pub struct HistoryQueryIterator {
    cursor: QueryCursor,
}

impl HistoryQueryIterator {
    pub(crate) fn new(
        handler: Arc<ChaincodeMessageHandler>,
        channel_id: &str,
        txid: &str,
        resp: QueryResponse,
    ) -> Self {
        Self {
            cursor: QueryCursor::new(handler, channel_id, txid, resp),
        }
    }

    /// The next modification, or `None` once the history is exhausted.
    pub async fn next(&mut self) -> Result<Option<KeyModification>, ProtocolError> {
        match self.cursor.next_bytes().await? {
            None => Ok(None),
            Some(bytes) => Ok(Some(KeyModification::decode(bytes.as_slice())?)),
        }
    }

    /// Releases the peer-side cursor. Idempotent.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        self.cursor.close().await
    }
}
