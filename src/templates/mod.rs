//! Unlocking/locking script template contracts and a concrete P2PKH pair.
//!
//! **Reference**: ts-sdk `ScriptTemplate` interfaces (`script/template/*.ts`).

mod p2pkh;

pub use p2pkh::{P2pkhLockingTemplate, P2pkhUnlockingTemplate};

use crate::transaction::Transaction;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("input index {0} out of range")]
    InputOutOfRange(usize),
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Produces an unlocking script for one input of a transaction.
///
/// Implementations may suspend (network signer, hardware wallet, ...); the
/// `Signer` awaits every input's `sign` call concurrently before assigning
/// any of the results.
#[async_trait]
pub trait UnlockingTemplate: Send + Sync {
    async fn sign(&self, tx: &Transaction, input_index: usize) -> TemplateResult<Vec<u8>>;

    /// Upper bound on the unlocking script's serialized length, consulted by
    /// fee models that need to estimate a transaction's final size before it
    /// is signed.
    fn estimate_length(&self) -> u64;
}

/// Produces a locking script for a destination (e.g. an address).
pub trait LockingTemplate: Send + Sync {
    fn lock(&self, address: &str) -> TemplateResult<Vec<u8>>;
}
