//! Transaction input: the outpoint being spent plus its unlocking capability.
//!
//! **Reference**: ts-sdk `TransactionInput` interface.

use super::codec::Writer;
use super::{SharedTx, TransactionError, TransactionResult, Txid};
use crate::templates::UnlockingTemplate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The default sequence number: no timelock, final.
pub const DEFAULT_SEQUENCE: u32 = 0xFFFF_FFFF;

/// An input spending a previous output, identified either by its `source_txid`
/// or by a live back-reference to the `source_transaction` (or both, once
/// `Transaction::add_input` has resolved one from the other).
#[derive(Clone, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(rename = "sourceTXID")]
    pub source_txid: Option<Txid>,

    #[serde(skip)]
    pub source_transaction: Option<SharedTx>,

    #[serde(rename = "sourceOutputIndex")]
    pub source_output_index: u32,

    #[serde(rename = "unlockingScript")]
    pub unlocking_script: Option<Vec<u8>>,

    pub sequence: Option<u32>,

    #[serde(skip)]
    pub unlocking_script_template: Option<Arc<dyn UnlockingTemplate>>,
}

impl std::fmt::Debug for TxInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxInput")
            .field("source_txid", &self.source_txid)
            .field("source_transaction", &self.source_transaction.is_some())
            .field("source_output_index", &self.source_output_index)
            .field("unlocking_script", &self.unlocking_script)
            .field("sequence", &self.sequence)
            .field(
                "unlocking_script_template",
                &self.unlocking_script_template.is_some(),
            )
            .finish()
    }
}

impl TxInput {
    /// An input identified by an already-known source txid.
    pub fn with_source_txid(source_txid: Txid, source_output_index: u32) -> Self {
        Self {
            source_txid: Some(source_txid),
            source_transaction: None,
            source_output_index,
            unlocking_script: None,
            sequence: Some(DEFAULT_SEQUENCE),
            unlocking_script_template: None,
        }
    }

    /// An input identified only by a back-reference; `Transaction::add_input`
    /// resolves `source_txid` from it before the input is stored.
    pub fn with_source_transaction(source_transaction: SharedTx, source_output_index: u32) -> Self {
        Self {
            source_txid: None,
            source_transaction: Some(source_transaction),
            source_output_index,
            unlocking_script: None,
            sequence: Some(DEFAULT_SEQUENCE),
            unlocking_script_template: None,
        }
    }

    pub fn with_template(mut self, template: Arc<dyn UnlockingTemplate>) -> Self {
        self.unlocking_script_template = Some(template);
        self
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Format: `source_txid_reversed (32) || source_output_index (u32LE) ||
    /// varint(script_len) || unlocking_script || sequence (u32LE)`.
    pub fn serialize(&self, index: usize) -> TransactionResult<Vec<u8>> {
        let txid = self
            .source_txid
            .ok_or(TransactionError::MissingSource(index))?;
        let script = self
            .unlocking_script
            .as_ref()
            .ok_or(TransactionError::MissingUnlockingScript(index))?;
        let sequence = self
            .sequence
            .ok_or(TransactionError::MissingSequence(index))?;

        let mut w = Writer::new();
        w.write(&txid.to_wire_bytes());
        w.write_u32_le(self.source_output_index);
        w.write_varint(script.len() as u64);
        w.write(script);
        w.write_u32_le(sequence);
        Ok(w.into_bytes())
    }
}
