//! Legacy (pre-BIP143) signature hash, used by the concrete P2PKH templates.
//!
//! **Reference**: ts-sdk `TransactionSignature` legacy sighash path.
//!
//! Script evaluation itself (`Spend::validate`) is an external collaborator;
//! this helper only produces the digest a template signs over.

use super::{Transaction, TransactionError, TransactionResult};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SigHashType {
    All = 0x01,
    None = 0x02,
    Single = 0x03,
    AnyoneCanPay = 0x80,
}

impl SigHashType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Computes the double-SHA256 digest signed for `input_index` under
/// `SIGHASH_ALL`: every input's unlocking script is blanked except the one
/// being signed, which carries the source output's locking script instead.
pub fn legacy_sighash_all(
    tx: &Transaction,
    input_index: usize,
    source_locking_script: &[u8],
) -> TransactionResult<[u8; 32]> {
    if input_index >= tx.inputs.len() {
        return Err(TransactionError::MissingUnlockingScript(input_index));
    }

    let mut blanked = tx.clone();
    for input in blanked.inputs.iter_mut() {
        input.unlocking_script = Some(Vec::new());
    }
    blanked.inputs[input_index].unlocking_script = Some(source_locking_script.to_vec());

    let mut serialized = blanked.serialize_raw()?;
    serialized.extend_from_slice(&SigHashType::All.as_u32().to_le_bytes());

    let once = Sha256::digest(&serialized);
    let twice = Sha256::digest(once);
    Ok(twice.into())
}
