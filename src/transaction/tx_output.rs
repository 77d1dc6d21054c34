//! Transaction output: satoshi value and locking script.
//!
//! **Reference**: ts-sdk `TransactionOutput` interface.

use super::codec::Writer;
use super::{TransactionError, TransactionResult};
use serde::{Deserialize, Serialize};

/// An output of a transaction, possibly awaiting a fee-computed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in satoshis. Absent while `change` is true and no fee pass has run yet.
    pub satoshis: Option<u64>,

    #[serde(rename = "lockingScript")]
    pub locking_script: Vec<u8>,

    /// Marks an output whose amount is filled in by the fee engine.
    #[serde(default)]
    pub change: bool,
}

impl TxOutput {
    /// A fixed-amount output.
    pub fn new(satoshis: u64, locking_script: Vec<u8>) -> Self {
        Self {
            satoshis: Some(satoshis),
            locking_script,
            change: false,
        }
    }

    /// As [`TxOutput::new`], but accepts a signed amount the way callers
    /// integrating against external, loosely-typed amount fields might pass
    /// one through; rejects a negative value instead of silently wrapping.
    pub fn try_new(satoshis: i64, locking_script: Vec<u8>) -> TransactionResult<Self> {
        if satoshis < 0 {
            return Err(TransactionError::NegativeAmount(0));
        }
        Ok(Self::new(satoshis as u64, locking_script))
    }

    /// A change output whose amount is resolved later by `FeeEngine::apply`.
    pub fn new_change(locking_script: Vec<u8>) -> Self {
        Self {
            satoshis: None,
            locking_script,
            change: true,
        }
    }

    /// Format: `satoshis (u64LE) || varint(script_len) || locking_script`.
    pub fn serialize(&self, index: usize) -> TransactionResult<Vec<u8>> {
        let satoshis = self.satoshis.ok_or_else(|| {
            if self.change {
                TransactionError::MissingChangeAmount(index)
            } else {
                TransactionError::MissingAmount(index)
            }
        })?;

        let mut w = Writer::new();
        w.write_u64_le(satoshis);
        w.write_varint(self.locking_script.len() as u64);
        w.write(&self.locking_script);
        Ok(w.into_bytes())
    }
}
