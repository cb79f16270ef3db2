// Path: crates/types/src/tx_key.rs

//! The transaction routing identity.
//!
//! The peer correlates every frame of a transaction by the concatenation
//! `channel_id ∥ txid`. The runtime makes no other uniqueness assumption:
//! the peer guarantees that two concurrent transactions never share a key.

use std::fmt;

/// The routing identity of a transaction: `channel_id ∥ txid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxKey(String);

impl TxKey {
    /// Builds the key for a `(channel, transaction)` pair.
    pub fn new(channel_id: &str, txid: &str) -> Self {
        let mut key = String::with_capacity(channel_id.len() + txid.len());
        key.push_str(channel_id);
        key.push_str(txid);
        TxKey(key)
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `[<channel>-<txid>]` prefix used in peer-facing diagnostics.
pub fn diag_prefix(channel_id: &str, txid: &str) -> String {
    format!("[{channel_id}-{txid}]")
}

/// The first eight characters of a transaction id, used in user-facing
/// diagnostics where the full id would drown the message.
pub fn short_txid(txid: &str) -> &str {
    txid.get(..8).unwrap_or(txid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_plain_concatenation() {
        let key = TxKey::new("theChannelID", "theTxID");
        assert_eq!(key.as_str(), "theChannelIDtheTxID");
        assert_eq!(key, TxKey::new("theChannelID", "theTxID"));
    }

    #[test]
    fn empty_channel_is_legal() {
        assert_eq!(TxKey::new("", "tx1").as_str(), "tx1");
    }

    #[test]
    fn short_txid_truncates_to_eight() {
        assert_eq!(short_txid("012345678cafebabe"), "01234567");
        assert_eq!(short_txid("ab"), "ab");
    }

    #[test]
    fn diag_prefix_shape() {
        assert_eq!(diag_prefix("mychannel", "tx1"), "[mychannel-tx1]");
    }
}
