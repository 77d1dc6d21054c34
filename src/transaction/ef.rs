//! Extended Format (BRC-30): inlines each input's source value and locking
//! script so script evaluation needs no further network lookups.
//!
//! **Reference**: ts-sdk `Transaction.toEF`/`fromEF` (`transaction/Transaction.ts`).

use super::codec::{Reader, Writer};
use super::{Transaction, TransactionError, TransactionResult, TxInput, TxOutput, Txid};
use std::collections::HashMap;

/// The six bytes following the version field that mark an EF payload.
pub const EF_MARKER: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0xEF];

impl Transaction {
    /// `version (u32LE) || EF_MARKER || varint(n_inputs) || inputs || varint(n_outputs) || outputs || lock_time (u32LE)`.
    ///
    /// Each input additionally carries `source_satoshis (u64LE) ||
    /// varint(src_locking_len) || src_locking_script` right after the
    /// outpoint. Requires every input to have a resolvable
    /// `source_transaction`.
    pub async fn to_ef(&self) -> TransactionResult<Vec<u8>> {
        let mut w = Writer::new();
        w.write_u32_le(self.version);
        w.write(&EF_MARKER);

        w.write_varint(self.inputs.len() as u64);
        for (i, input) in self.inputs.iter().enumerate() {
            let txid = input
                .source_txid
                .ok_or(TransactionError::MissingSource(i))?;
            let src = input
                .source_transaction
                .as_ref()
                .ok_or(TransactionError::MissingSource(i))?;
            let guard = src.read().await;
            let source_output = guard
                .outputs
                .get(input.source_output_index as usize)
                .ok_or(TransactionError::MissingSource(i))?;
            let source_satoshis = source_output
                .satoshis
                .ok_or(TransactionError::MissingAmount(i))?;
            let source_locking_script = source_output.locking_script.clone();
            drop(guard);

            w.write(&txid.to_wire_bytes());
            w.write_u32_le(input.source_output_index);
            w.write_u64_le(source_satoshis);
            w.write_varint(source_locking_script.len() as u64);
            w.write(&source_locking_script);

            let unlocking_script = input
                .unlocking_script
                .as_ref()
                .ok_or(TransactionError::MissingUnlockingScript(i))?;
            w.write_varint(unlocking_script.len() as u64);
            w.write(unlocking_script);

            let sequence = input.sequence.ok_or(TransactionError::MissingSequence(i))?;
            w.write_u32_le(sequence);
        }

        w.write_varint(self.outputs.len() as u64);
        for (i, output) in self.outputs.iter().enumerate() {
            w.write(&output.serialize(i)?);
        }

        w.write_u32_le(self.lock_time);
        Ok(w.into_bytes())
    }

    pub async fn to_ef_hex(&self) -> TransactionResult<String> {
        Ok(hex::encode(self.to_ef().await?))
    }

    /// Materializes a synthetic `source_transaction` for every input, sized
    /// to `source_output_index + 1`, with the carried `(satoshis,
    /// locking_script)` at that index.
    pub fn parse_ef(data: &[u8]) -> TransactionResult<Self> {
        let mut r = Reader::new(data);
        let version = r.read_u32_le()?;

        let marker: [u8; 6] = r.read(6)?.try_into().unwrap();
        if marker != EF_MARKER {
            return Err(TransactionError::BadFormatEf(format!(
                "expected marker {EF_MARKER:02x?}, got {marker:02x?}"
            )));
        }

        let n_inputs = r.read_varint()?;
        let mut inputs = Vec::with_capacity(n_inputs as usize);
        for _ in 0..n_inputs {
            let txid = Txid::from_wire_bytes(r.read_reverse(32)?.try_into().unwrap());
            let source_output_index = r.read_u32_le()?;
            let source_satoshis = r.read_u64_le()?;
            let src_script_len = r.read_varint()?;
            let src_locking_script = r.read(src_script_len as usize)?;

            let unlocking_len = r.read_varint()?;
            let unlocking_script = r.read(unlocking_len as usize)?;
            let sequence = r.read_u32_le()?;

            let mut source_outputs = vec![
                TxOutput {
                    satoshis: None,
                    locking_script: Vec::new(),
                    change: false,
                };
                source_output_index as usize + 1
            ];
            source_outputs[source_output_index as usize] = TxOutput {
                satoshis: Some(source_satoshis),
                locking_script: src_locking_script,
                change: false,
            };
            let source_transaction = Transaction::with_params(1, Vec::new(), source_outputs, 0).into_shared();

            inputs.push(TxInput {
                source_txid: Some(txid),
                source_transaction: Some(source_transaction),
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

    pub fn parse_ef_hex(hex_str: &str) -> TransactionResult<Self> {
        let bytes = hex::decode(hex_str)?;
        Self::parse_ef(&bytes)
    }

    /// Whether this transaction looks like an EF blob (cheap marker sniff).
    pub fn is_ef(data: &[u8]) -> bool {
        data.len() >= 10 && data[4..10] == EF_MARKER
    }
}
