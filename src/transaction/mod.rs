//! Bitcoin transaction core: structure, identity, and the Raw/EF wire codecs.
//!
//! **Reference**: ts-sdk `Transaction` class (`transaction/Transaction.ts`).

pub mod codec;
pub mod ef;
pub mod script_offsets;
pub mod sighash;
pub mod transaction;
pub mod tx_input;
pub mod tx_output;

pub use codec::{CodecError, Reader, Writer};
pub use transaction::Transaction;
pub use tx_input::TxInput;
pub use tx_output::TxOutput;

use std::sync::Arc;
use tokio::sync::RwLock;

/// A transaction shared between sibling inputs and concurrent readers (the
/// ancestor DAG reachable through `TxInput::source_transaction`).
pub type SharedTx = Arc<RwLock<Transaction>>;

/// Errors surfaced by transaction construction, serialization, and signing.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("input {0} has no source_txid and no source_transaction")]
    MissingSource(usize),

    #[error("output {0} has no satoshis amount")]
    MissingAmount(usize),

    #[error("change output {0} has no resolved satoshis amount")]
    MissingChangeAmount(usize),

    #[error("satoshis amount overflowed for output {0}")]
    NegativeAmount(usize),

    #[error("input {0} has no unlocking_script")]
    MissingUnlockingScript(usize),

    #[error("input {0} has no sequence number")]
    MissingSequence(usize),

    #[error("bad raw transaction format: {0}")]
    BadFormatRaw(#[from] CodecError),

    #[error("bad extended-format transaction: {0}")]
    BadFormatEf(String),

    #[error("txid must be exactly 32 bytes, got {0}")]
    BadTxid(usize),

    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

pub type TransactionResult<T> = Result<T, TransactionError>;

/// A transaction identifier: double-SHA256 of the Raw serialization.
///
/// Stored internally in the natural, big-endian hex reading order. Bitcoin's
/// wire format (outpoints, Atomic BEEF's subject field once parsed) reverses
/// these bytes; use [`Txid::to_wire_bytes`]/[`Txid::from_wire_bytes`] at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    pub fn from_hex(s: &str) -> TransactionResult<Self> {
        let bytes = hex::decode(s)?;
        Self::from_display_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Bytes already in display (big-endian) order.
    pub fn from_display_bytes(bytes: &[u8]) -> TransactionResult<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransactionError::BadTxid(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Bytes in wire order (as carried in a serialized outpoint or the Atomic
    /// BEEF subject field before the natural-order exception is applied).
    pub fn from_wire_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Self(bytes)
    }

    pub fn to_wire_bytes(&self) -> [u8; 32] {
        let mut b = self.0;
        b.reverse();
        b
    }

    /// Construct a txid from the raw double-SHA256 digest (already in the
    /// hash's native byte order, i.e. the same order as the wire encoding).
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self::from_wire_bytes(digest)
    }
}

impl std::fmt::Display for Txid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_reverses_exactly_once() {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        let txid = Txid::from_wire_bytes(bytes);
        assert_eq!(txid.0[31], 1);
        assert_eq!(txid.to_wire_bytes(), bytes);
    }

    #[test]
    fn hex_is_display_order_not_wire_order() {
        let txid = Txid::from_hex(
            "0100000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();
        assert_eq!(txid.0[0], 1);
        assert_eq!(txid.to_wire_bytes()[31], 1);
    }
}
