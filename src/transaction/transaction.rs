//! The `Transaction` aggregate: structure, Raw serialization, and identity.
//!
//! **Reference**: ts-sdk `Transaction` class (`transaction/Transaction.ts`).

use super::codec::{Reader, Writer};
use super::{SharedTx, TransactionError, TransactionResult, TxInput, TxOutput, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A Bitcoin transaction under construction, signing, or verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,

    #[serde(rename = "lockTime")]
    pub lock_time: u32,

    /// Free-form, never serialized.
    #[serde(skip)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Opaque proof of inclusion; see `beef::merkle_path::MerklePath`.
    #[serde(skip)]
    pub merkle_path: Option<Arc<crate::beef::merkle_path::MerklePath>>,

    #[serde(skip)]
    cached_hash: Option<[u8; 32]>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            metadata: HashMap::new(),
            merkle_path: None,
            cached_hash: None,
        }
    }

    pub fn with_params(version: u32, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, lock_time: u32) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
            metadata: HashMap::new(),
            merkle_path: None,
            cached_hash: None,
        }
    }

    pub(crate) fn invalidate_cache(&mut self) {
        self.cached_hash = None;
    }

    /// Adds an input, resolving `source_txid` from `source_transaction` when
    /// the caller supplied only the back-reference. Fails if neither is set.
    pub async fn add_input(&mut self, mut input: TxInput) -> TransactionResult<()> {
        if input.source_txid.is_none() {
            let src = input
                .source_transaction
                .clone()
                .ok_or(TransactionError::MissingSource(self.inputs.len()))?;
            let guard = src.read().await;
            let txid = guard.txid()?;
            drop(guard);
            input.source_txid = Some(txid);
        }
        self.inputs.push(input);
        self.invalidate_cache();
        Ok(())
    }

    pub fn add_output(&mut self, output: TxOutput) {
        self.outputs.push(output);
        self.invalidate_cache();
    }

    /// As [`Transaction::add_output`], but for a caller passing through a
    /// signed amount from a loosely-typed boundary; rejects a negative value
    /// with `NegativeAmount` at the index the output would have occupied,
    /// rather than letting it silently wrap into a huge `u64`.
    pub fn add_output_checked(&mut self, satoshis: i64, locking_script: Vec<u8>) -> TransactionResult<()> {
        let output = TxOutput::try_new(satoshis, locking_script)
            .map_err(|_| TransactionError::NegativeAmount(self.outputs.len()))?;
        self.add_output(output);
        Ok(())
    }

    /// Adds a P2PKH output. Omitting `satoshis` marks the output as `change`,
    /// to be resolved by a later `FeeEngine::apply` call.
    pub fn add_p2pkh_output(&mut self, address: &str, satoshis: Option<u64>) -> TransactionResult<()> {
        use crate::templates::LockingTemplate;
        let script = crate::templates::P2pkhLockingTemplate
            .lock(address)
            .map_err(|e| TransactionError::BadFormatEf(e.to_string()))?;
        let output = match satoshis {
            Some(sats) => TxOutput::new(sats, script),
            None => TxOutput::new_change(script),
        };
        self.add_output(output);
        Ok(())
    }

    pub fn update_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// `version (u32LE) || varint(n_inputs) || inputs || varint(n_outputs) ||
    /// outputs || lock_time (u32LE)`.
    pub fn serialize_raw(&self) -> TransactionResult<Vec<u8>> {
        let mut w = Writer::new();
        w.write_u32_le(self.version);

        w.write_varint(self.inputs.len() as u64);
        for (i, input) in self.inputs.iter().enumerate() {
            w.write(&input.serialize(i)?);
        }

        w.write_varint(self.outputs.len() as u64);
        for (i, output) in self.outputs.iter().enumerate() {
            w.write(&output.serialize(i)?);
        }

        w.write_u32_le(self.lock_time);
        Ok(w.into_bytes())
    }

    /// Alias matching the public surface's `to_binary`.
    pub fn to_binary(&self) -> TransactionResult<Vec<u8>> {
        self.serialize_raw()
    }

    pub fn to_hex(&self) -> TransactionResult<String> {
        Ok(hex::encode(self.serialize_raw()?))
    }

    pub fn parse_raw(data: &[u8]) -> TransactionResult<Self> {
        let mut r = Reader::new(data);
        Self::parse_raw_from_reader(&mut r)
    }

    /// Consumes exactly one Raw-encoded transaction from `r`, leaving the
    /// cursor positioned right after `lock_time`. Shared with the BEEF
    /// transaction table, where each entry is a Raw tx with no length prefix.
    pub(crate) fn parse_raw_from_reader(r: &mut Reader) -> TransactionResult<Self> {
        let version = r.read_u32_le()?;

        let n_inputs = r.read_varint()?;
        let mut inputs = Vec::with_capacity(n_inputs as usize);
        for _ in 0..n_inputs {
            let txid = Txid::from_wire_bytes(r.read_reverse(32)?.try_into().unwrap());
            let source_output_index = r.read_u32_le()?;
            let script_len = r.read_varint()?;
            let unlocking_script = r.read(script_len as usize)?;
            let sequence = r.read_u32_le()?;
            inputs.push(TxInput {
                source_txid: Some(txid),
                source_transaction: None,
                source_output_index,
                unlocking_script: Some(unlocking_script),
                sequence: Some(sequence),
                unlocking_script_template: None,
            });
        }

        let n_outputs = r.read_varint()?;
        let mut outputs = Vec::with_capacity(n_outputs as usize);
        for _ in 0..n_outputs {
            let satoshis = r.read_u64_le()?;
            let script_len = r.read_varint()?;
            let locking_script = r.read(script_len as usize)?;
            outputs.push(TxOutput {
                satoshis: Some(satoshis),
                locking_script,
                change: false,
            });
        }

        let lock_time = r.read_u32_le()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
            metadata: HashMap::new(),
            merkle_path: None,
            cached_hash: None,
        })
    }

    pub fn parse_hex(hex_str: &str) -> TransactionResult<Self> {
        let bytes = hex::decode(hex_str)?;
        Self::parse_raw(&bytes)
    }

    /// Double-SHA256 of the Raw encoding, in wire byte order. Memoized until
    /// the next mutation.
    pub fn hash(&mut self) -> TransactionResult<[u8; 32]> {
        if let Some(h) = self.cached_hash {
            return Ok(h);
        }
        let serialized = self.serialize_raw()?;
        let once = Sha256::digest(&serialized);
        let twice: [u8; 32] = Sha256::digest(once).into();
        self.cached_hash = Some(twice);
        Ok(twice)
    }

    /// `hash()` without requiring `&mut self` or touching the cache; used by
    /// read-only collaborators (e.g. while holding a shared read lock over an
    /// ancestor transaction).
    pub fn hash_uncached(&self) -> TransactionResult<[u8; 32]> {
        if let Some(h) = self.cached_hash {
            return Ok(h);
        }
        let serialized = self.serialize_raw()?;
        let once = Sha256::digest(&serialized);
        Ok(Sha256::digest(once).into())
    }

    /// `TxID = reverse_bytes(double_sha256(raw_serialize(tx)))`.
    pub fn txid(&self) -> TransactionResult<Txid> {
        Ok(Txid::from_digest(self.hash_uncached()?))
    }

    pub fn id_hex(&self) -> TransactionResult<String> {
        Ok(self.txid()?.to_hex())
    }

    pub fn size(&self) -> TransactionResult<usize> {
        Ok(self.serialize_raw()?.len())
    }

    /// Wraps this transaction for sharing as an ancestor back-reference.
    pub fn into_shared(self) -> SharedTx {
        Arc::new(RwLock::new(self))
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxOutput;

    #[test]
    fn new_transaction_has_v1_and_no_timelock() {
        let tx = Transaction::new();
        assert_eq!(tx.version, 1);
        assert_eq!(tx.lock_time, 0);
        assert!(tx.inputs.is_empty());
        assert!(tx.outputs.is_empty());
    }

    #[test]
    fn add_output_checked_rejects_a_negative_amount_at_its_would_be_index() {
        let mut tx = Transaction::new();
        tx.add_output(TxOutput::new(100, vec![]));
        assert!(matches!(
            tx.add_output_checked(-5, vec![]),
            Err(TransactionError::NegativeAmount(1))
        ));
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn empty_transaction_serializes_to_ten_bytes() {
        let tx = Transaction::new();
        let raw = tx.serialize_raw().unwrap();
        assert_eq!(raw.len(), 10);
        assert_eq!(u32::from_le_bytes(raw[0..4].try_into().unwrap()), 1);
        assert_eq!(raw[4], 0);
        assert_eq!(raw[5], 0);
        assert_eq!(u32::from_le_bytes(raw[6..10].try_into().unwrap()), 0);
    }

    #[tokio::test]
    async fn add_input_without_source_txid_or_backref_fails() {
        let mut tx = Transaction::new();
        let input = TxInput {
            source_txid: None,
            source_transaction: None,
            source_output_index: 0,
            unlocking_script: None,
            sequence: None,
            unlocking_script_template: None,
        };
        assert!(matches!(
            tx.add_input(input).await,
            Err(TransactionError::MissingSource(0))
        ));
    }

    #[tokio::test]
    async fn add_input_resolves_txid_from_backref() {
        let parent = Transaction::new().into_shared();
        let parent_txid = parent.read().await.txid().unwrap();

        let mut tx = Transaction::new();
        let input = TxInput::with_source_transaction(parent.clone(), 0);
        tx.add_input(input).await.unwrap();

        assert_eq!(tx.inputs[0].source_txid, Some(parent_txid));
    }

    #[test]
    fn raw_round_trip_preserves_fields() {
        let mut tx = Transaction::new();
        let txid = Txid::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let mut input = TxInput::with_source_txid(txid, 0);
        input.unlocking_script = Some(vec![0x51]);
        tx.inputs.push(input);
        tx.outputs.push(TxOutput::new(900, vec![0x76, 0xa9]));

        let raw = tx.serialize_raw().unwrap();
        let parsed = Transaction::parse_raw(&raw).unwrap();

        assert_eq!(parsed.version, tx.version);
        assert_eq!(parsed.lock_time, tx.lock_time);
        assert_eq!(parsed.inputs.len(), 1);
        assert_eq!(parsed.inputs[0].source_txid, Some(txid));
        assert_eq!(parsed.outputs, tx.outputs);
    }

    #[test]
    fn txid_hex_is_reverse_of_double_sha256() {
        let tx = Transaction::new();
        let raw = tx.serialize_raw().unwrap();
        let once = Sha256::digest(&raw);
        let twice = Sha256::digest(once);
        let expected: Vec<u8> = twice.iter().rev().copied().collect();

        assert_eq!(tx.id_hex().unwrap(), hex::encode(expected));
    }

    #[tokio::test]
    async fn add_input_invalidates_hash_cache() {
        let mut tx = Transaction::new();
        let stale = tx.hash().unwrap();

        let txid = Txid::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let mut input = TxInput::with_source_txid(txid, 0);
        input.unlocking_script = Some(vec![]);
        tx.add_input(input).await.unwrap();

        let fresh = tx.hash().unwrap();
        assert_ne!(stale, fresh);
        assert_eq!(fresh, tx.hash().unwrap());
    }
}
