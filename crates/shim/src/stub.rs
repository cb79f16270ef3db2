// Path: crates/shim/src/stub.rs

//! The per-transaction context handed to user code.
//!
//! A stub is created for each INIT/TRANSACTION frame and borrows the
//! stream handler for every ledger operation, so requests issued through it
//! are serialized with the rest of the transaction's traffic.

use crate::handler::ChaincodeMessageHandler;
use crate::iterators::{HistoryQueryIterator, StateQueryIterator};
use anyhow::{anyhow, bail, Context, Result};
use chainshim_protos::common::{Header, SignatureHeader};
use chainshim_protos::peer::{
    ChaincodeProposalPayload, Proposal, QueryMetadata, QueryResponseMetadata, SignedProposal,
};
use chainshim_protos::{ChaincodeEvent, ChaincodeInput, Response};
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata key under which a state key's endorsement policy is stored.
pub const VALIDATION_PARAMETER: &str = "VALIDATION_PARAMETER";

// Composite keys are namespaced under U+0000 and their components are
// U+0000-separated; partial-key range scans end at U+10FFFF.
const COMPOSITE_KEY_NAMESPACE: char = '\u{0}';
const MIN_UNICODE_RUNE: char = '\u{0}';
const MAX_UNICODE_RUNE: char = '\u{10FFFF}';

/// The transaction context passed to [`Chaincode`](crate::Chaincode)
/// operations.
pub struct ChaincodeStub {
    handler: Arc<ChaincodeMessageHandler>,
    channel_id: String,
    txid: String,
    input: ChaincodeInput,
    proposal: Option<SignedProposal>,
    event: Option<ChaincodeEvent>,
}

impl ChaincodeStub {
    pub(crate) fn new(
        handler: Arc<ChaincodeMessageHandler>,
        channel_id: String,
        txid: String,
        input: ChaincodeInput,
        proposal: Option<SignedProposal>,
    ) -> Self {
        Self {
            handler,
            channel_id,
            txid,
            input,
            proposal,
            event: None,
        }
    }

    // ------------------------------------------------------------------
    // Invocation context
    // ------------------------------------------------------------------

    /// The raw invocation arguments.
    pub fn get_args(&self) -> &[Vec<u8>] {
        &self.input.args
    }

    /// The invocation arguments decoded as UTF-8 (lossily).
    pub fn get_string_args(&self) -> Vec<String> {
        self.input
            .args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect()
    }

    /// The conventional `(function, parameters)` split of the arguments, or
    /// `None` when the invocation carried no arguments at all.
    pub fn get_function_and_parameters(&self) -> Option<(String, Vec<String>)> {
        let mut args = self.get_string_args();
        if args.is_empty() {
            return None;
        }
        let function = args.remove(0);
        Some((function, args))
    }

    /// The transaction id.
    pub fn get_txid(&self) -> &str {
        &self.txid
    }

    /// The channel the transaction executes on.
    pub fn get_channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Decorations attached to the invocation by the peer.
    pub fn get_decorations(&self) -> &HashMap<String, Vec<u8>> {
        &self.input.decorations
    }

    /// The signed proposal carried with the transaction, if any.
    pub fn get_signed_proposal(&self) -> Option<&SignedProposal> {
        self.proposal.as_ref()
    }

    /// The serialized identity of the proposal creator.
    pub fn get_creator(&self) -> Result<Vec<u8>> {
        let proposal = self.decode_proposal()?;
        let header =
            Header::decode(proposal.header.as_slice()).context("malformed proposal header")?;
        let signature_header = SignatureHeader::decode(header.signature_header.as_slice())
            .context("malformed signature header")?;
        Ok(signature_header.creator)
    }

    /// Data passed to the chaincode but kept out of the transaction and the
    /// ledger.
    pub fn get_transient(&self) -> Result<HashMap<String, Vec<u8>>> {
        let proposal = self.decode_proposal()?;
        let payload = ChaincodeProposalPayload::decode(proposal.payload.as_slice())
            .context("malformed chaincode proposal payload")?;
        Ok(payload.transient_map)
    }

    fn decode_proposal(&self) -> Result<Proposal> {
        let signed = self
            .proposal
            .as_ref()
            .ok_or_else(|| anyhow!("transaction carries no signed proposal"))?;
        Proposal::decode(signed.proposal_bytes.as_slice()).context("malformed proposal")
    }

    // ------------------------------------------------------------------
    // World state
    // ------------------------------------------------------------------

    /// Reads `key` from world state. An absent key yields empty bytes.
    pub async fn get_state(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self
            .handler
            .get_state(&self.channel_id, &self.txid, "", key)
            .await?)
    }

    /// Writes `value` under `key` in world state.
    pub async fn put_state(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.handler
            .put_state(&self.channel_id, &self.txid, "", key, value)
            .await?;
        Ok(())
    }

    /// Deletes `key` from world state.
    pub async fn delete_state(&self, key: &str) -> Result<()> {
        self.handler
            .delete_state(&self.channel_id, &self.txid, "", key)
            .await?;
        Ok(())
    }

    /// Reads the endorsement policy of `key`, if one is set.
    pub async fn get_state_validation_parameter(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut metadata = self
            .handler
            .get_state_metadata(&self.channel_id, &self.txid, "", key)
            .await?;
        Ok(metadata.remove(VALIDATION_PARAMETER))
    }

    /// Sets the endorsement policy of `key`.
    pub async fn set_state_validation_parameter(&self, key: &str, policy: Vec<u8>) -> Result<()> {
        self.handler
            .put_state_metadata(
                &self.channel_id,
                &self.txid,
                "",
                key,
                VALIDATION_PARAMETER,
                policy,
            )
            .await?;
        Ok(())
    }

    /// Opens an ordered scan over `[start_key, end_key)` of world state.
    pub async fn get_state_by_range(
        &self,
        start_key: &str,
        end_key: &str,
    ) -> Result<StateQueryIterator> {
        let (iter, _) = self
            .handler
            .get_state_by_range(&self.channel_id, &self.txid, "", start_key, end_key, None)
            .await?;
        Ok(iter)
    }

    /// Like [`Self::get_state_by_range`], fetching at most `page_size`
    /// records and resuming from `bookmark`.
    pub async fn get_state_by_range_with_pagination(
        &self,
        start_key: &str,
        end_key: &str,
        page_size: i32,
        bookmark: &str,
    ) -> Result<(StateQueryIterator, QueryResponseMetadata)> {
        let metadata = QueryMetadata {
            page_size,
            bookmark: bookmark.to_string(),
        };
        Ok(self
            .handler
            .get_state_by_range(
                &self.channel_id,
                &self.txid,
                "",
                start_key,
                end_key,
                Some(metadata),
            )
            .await?)
    }

    /// Opens a scan over every composite key with the given object type and
    /// attribute prefix.
    pub async fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<StateQueryIterator> {
        let (start, end) = partial_composite_range(object_type, attributes)?;
        let (iter, _) = self
            .handler
            .get_state_by_range(&self.channel_id, &self.txid, "", &start, &end, None)
            .await?;
        Ok(iter)
    }

    /// Like [`Self::get_state_by_partial_composite_key`], paginated.
    pub async fn get_state_by_partial_composite_key_with_pagination(
        &self,
        object_type: &str,
        attributes: &[&str],
        page_size: i32,
        bookmark: &str,
    ) -> Result<(StateQueryIterator, QueryResponseMetadata)> {
        let (start, end) = partial_composite_range(object_type, attributes)?;
        let metadata = QueryMetadata {
            page_size,
            bookmark: bookmark.to_string(),
        };
        Ok(self
            .handler
            .get_state_by_range(&self.channel_id, &self.txid, "", &start, &end, Some(metadata))
            .await?)
    }

    /// Runs a rich query against the state database.
    pub async fn get_query_result(&self, query: &str) -> Result<StateQueryIterator> {
        let (iter, _) = self
            .handler
            .get_query_result(&self.channel_id, &self.txid, "", query, None)
            .await?;
        Ok(iter)
    }

    /// Like [`Self::get_query_result`], paginated.
    pub async fn get_query_result_with_pagination(
        &self,
        query: &str,
        page_size: i32,
        bookmark: &str,
    ) -> Result<(StateQueryIterator, QueryResponseMetadata)> {
        let metadata = QueryMetadata {
            page_size,
            bookmark: bookmark.to_string(),
        };
        Ok(self
            .handler
            .get_query_result(&self.channel_id, &self.txid, "", query, Some(metadata))
            .await?)
    }

    /// Walks the committed history of `key`, newest first.
    pub async fn get_history_for_key(&self, key: &str) -> Result<HistoryQueryIterator> {
        let (iter, _) = self
            .handler
            .get_history_for_key(&self.channel_id, &self.txid, key)
            .await?;
        Ok(iter)
    }

    // ------------------------------------------------------------------
    // Private data collections
    // ------------------------------------------------------------------

    /// Reads `key` from the private collection `collection`.
    pub async fn get_private_data(&self, collection: &str, key: &str) -> Result<Vec<u8>> {
        require_collection(collection)?;
        Ok(self
            .handler
            .get_state(&self.channel_id, &self.txid, collection, key)
            .await?)
    }

    /// Writes `value` under `key` in the private collection `collection`.
    pub async fn put_private_data(
        &self,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        require_collection(collection)?;
        self.handler
            .put_state(&self.channel_id, &self.txid, collection, key, value)
            .await?;
        Ok(())
    }

    /// Deletes `key` from the private collection `collection`.
    pub async fn delete_private_data(&self, collection: &str, key: &str) -> Result<()> {
        require_collection(collection)?;
        self.handler
            .delete_state(&self.channel_id, &self.txid, collection, key)
            .await?;
        Ok(())
    }

    /// Reads the digest of a private-data key. Available to chaincode that
    /// is not itself a member of the collection.
    pub async fn get_private_data_hash(&self, collection: &str, key: &str) -> Result<Vec<u8>> {
        require_collection(collection)?;
        Ok(self
            .handler
            .get_private_data_hash(&self.channel_id, &self.txid, collection, key)
            .await?)
    }

    /// Reads the endorsement policy of a private-data key, if one is set.
    pub async fn get_private_data_validation_parameter(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        require_collection(collection)?;
        let mut metadata = self
            .handler
            .get_state_metadata(&self.channel_id, &self.txid, collection, key)
            .await?;
        Ok(metadata.remove(VALIDATION_PARAMETER))
    }

    /// Sets the endorsement policy of a private-data key.
    pub async fn set_private_data_validation_parameter(
        &self,
        collection: &str,
        key: &str,
        policy: Vec<u8>,
    ) -> Result<()> {
        require_collection(collection)?;
        self.handler
            .put_state_metadata(
                &self.channel_id,
                &self.txid,
                collection,
                key,
                VALIDATION_PARAMETER,
                policy,
            )
            .await?;
        Ok(())
    }

    /// Opens an ordered scan over `[start_key, end_key)` of a private
    /// collection.
    pub async fn get_private_data_by_range(
        &self,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<StateQueryIterator> {
        require_collection(collection)?;
        let (iter, _) = self
            .handler
            .get_state_by_range(
                &self.channel_id,
                &self.txid,
                collection,
                start_key,
                end_key,
                None,
            )
            .await?;
        Ok(iter)
    }

    /// Opens a partial-composite-key scan over a private collection.
    pub async fn get_private_data_by_partial_composite_key(
        &self,
        collection: &str,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<StateQueryIterator> {
        require_collection(collection)?;
        let (start, end) = partial_composite_range(object_type, attributes)?;
        let (iter, _) = self
            .handler
            .get_state_by_range(&self.channel_id, &self.txid, collection, &start, &end, None)
            .await?;
        Ok(iter)
    }

    /// Runs a rich query against a private collection.
    pub async fn get_private_data_query_result(
        &self,
        collection: &str,
        query: &str,
    ) -> Result<StateQueryIterator> {
        require_collection(collection)?;
        let (iter, _) = self
            .handler
            .get_query_result(&self.channel_id, &self.txid, collection, query, None)
            .await?;
        Ok(iter)
    }

    // ------------------------------------------------------------------
    // Cross-chaincode invocation, events, composite keys
    // ------------------------------------------------------------------

    /// Invokes `chaincode_name` with `args` inside this transaction. A
    /// non-empty `channel` addresses the chaincode on another channel.
    pub async fn invoke_chaincode(
        &self,
        chaincode_name: &str,
        args: Vec<Vec<u8>>,
        channel: &str,
    ) -> Result<Response> {
        let target = if channel.is_empty() {
            chaincode_name.to_string()
        } else {
            format!("{chaincode_name}/{channel}")
        };
        Ok(self
            .handler
            .invoke_chaincode(&self.channel_id, &self.txid, &target, args)
            .await?)
    }

    /// Records the single event this transaction may emit; it rides on the
    /// COMPLETED frame.
    pub fn set_event(&mut self, name: &str, payload: Vec<u8>) -> Result<()> {
        if name.is_empty() {
            bail!("event name must be a non-empty string");
        }
        self.event = Some(ChaincodeEvent {
            event_name: name.to_string(),
            payload,
            ..Default::default()
        });
        Ok(())
    }

    pub(crate) fn take_event(&mut self) -> Option<ChaincodeEvent> {
        self.event.take()
    }

    /// Builds a composite key from an object type and attribute list.
    pub fn create_composite_key(&self, object_type: &str, attributes: &[&str]) -> Result<String> {
        create_composite_key(object_type, attributes)
    }

    /// Splits a composite key back into its object type and attributes.
    pub fn split_composite_key(&self, composite_key: &str) -> Result<(String, Vec<String>)> {
        split_composite_key(composite_key)
    }
}

fn require_collection(collection: &str) -> Result<()> {
    if collection.is_empty() {
        bail!("collection must not be an empty string");
    }
    Ok(())
}

fn validate_composite_component(what: &str, component: &str) -> Result<()> {
    if component
        .chars()
        .any(|c| c == MIN_UNICODE_RUNE || c == MAX_UNICODE_RUNE)
    {
        bail!("{what} must not contain U+0000 or U+10FFFF");
    }
    Ok(())
}

fn create_composite_key(object_type: &str, attributes: &[&str]) -> Result<String> {
    validate_composite_component("object type", object_type)?;
    let mut key = String::new();
    key.push(COMPOSITE_KEY_NAMESPACE);
    key.push_str(object_type);
    key.push(MIN_UNICODE_RUNE);
    for attribute in attributes {
        validate_composite_component("attribute", attribute)?;
        key.push_str(attribute);
        key.push(MIN_UNICODE_RUNE);
    }
    Ok(key)
}

fn split_composite_key(composite_key: &str) -> Result<(String, Vec<String>)> {
    let inner = composite_key
        .strip_prefix(COMPOSITE_KEY_NAMESPACE)
        .ok_or_else(|| anyhow!("not a composite key"))?;
    let mut components = inner.split(MIN_UNICODE_RUNE);
    let object_type = components
        .next()
        .ok_or_else(|| anyhow!("composite key has no object type"))?
        .to_string();
    let mut attributes: Vec<String> = components.map(str::to_string).collect();
    // The key is terminated by a trailing separator, which split renders as
    // one empty component.
    if attributes.last().is_some_and(String::is_empty) {
        attributes.pop();
    }
    Ok((object_type, attributes))
}

/// The `[start, end)` world-state range covering every composite key with
/// the given object type and attribute prefix.
fn partial_composite_range(object_type: &str, attributes: &[&str]) -> Result<(String, String)> {
    let start = create_composite_key(object_type, attributes)?;
    let mut end = start.clone();
    end.push(MAX_UNICODE_RUNE);
    Ok((start, end))
}
