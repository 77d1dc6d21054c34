//! Bitcoin transaction assembly, serialization, and SPV verification.
//!
//! Transactions are built incrementally (`add_input`/`add_output`), optionally
//! balanced with a [`fee::FeeModel`], signed through pluggable
//! [`templates::UnlockingTemplate`]s, and emitted in one of three wire
//! envelopes: Raw, Extended Format (BRC-30), or BEEF/Atomic BEEF (BRC-62/95).
//! [`verify::Verifier`] walks the resulting input DAG to perform recursive
//! SPV validation against merkle-proof anchors or full script evaluation.

pub mod beef;
pub mod broadcaster;
pub mod fee;
pub mod signer;
pub mod templates;
pub mod transaction;
pub mod verify;

pub use transaction::{SharedTx, Transaction, TxInput, TxOutput, Txid};
