//! Locates every script in a Raw transaction without materializing it.
//!
//! **Reference**: ts-sdk `Transaction.parseScriptOffsets` helper used by
//! overlay lookups to slice scripts straight out of the wire bytes.

use super::codec::Reader;
use super::{TransactionError, TransactionResult};

/// The byte range of one input's or output's script within the Raw encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptOffset {
    pub index: usize,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptOffsets {
    pub inputs: Vec<ScriptOffset>,
    pub outputs: Vec<ScriptOffset>,
}

/// Walks a Raw transaction's fixed fields (36-byte outpoint, 4-byte sequence,
/// 8-byte satoshis) and varint-prefixed scripts, recording each script's
/// offset/length without copying it out.
pub fn parse_script_offsets(data: &[u8]) -> TransactionResult<ScriptOffsets> {
    let mut r = Reader::new(data);
    r.read_u32_le()?; // version

    let n_inputs = r.read_varint()?;
    let mut inputs = Vec::with_capacity(n_inputs as usize);
    for i in 0..n_inputs {
        r.read(32)?; // source txid
        r.read_u32_le()?; // source output index
        let length = r.read_varint()? as usize;
        let offset = r.pos();
        r.read(length)?;
        inputs.push(ScriptOffset {
            index: i as usize,
            offset,
            length,
        });
        r.read_u32_le()?; // sequence
    }

    let n_outputs = r.read_varint()?;
    let mut outputs = Vec::with_capacity(n_outputs as usize);
    for i in 0..n_outputs {
        r.read_u64_le()?; // satoshis
        let length = r.read_varint()? as usize;
        let offset = r.pos();
        r.read(length)?;
        outputs.push(ScriptOffset {
            index: i as usize,
            offset,
            length,
        });
    }

    r.read_u32_le()?; // lock_time

    Ok(ScriptOffsets { inputs, outputs })
}

/// Slices the original bytes back to the exact script at an offset.
pub fn slice<'a>(data: &'a [u8], so: &ScriptOffset) -> TransactionResult<&'a [u8]> {
    data.get(so.offset..so.offset + so.length)
        .ok_or(TransactionError::BadTxid(so.length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Transaction, TxInput, TxOutput, Txid};

    #[tokio::test]
    async fn offsets_slice_back_to_the_exact_scripts() {
        let mut tx = Transaction::new();

        let txid = Txid::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let mut in0 = TxInput::with_source_txid(txid, 0);
        in0.unlocking_script = Some(vec![0xAA; 23]);
        tx.add_input(in0).await.unwrap();

        let mut in1 = TxInput::with_source_txid(txid, 1);
        in1.unlocking_script = Some(vec![0xBB; 106]);
        tx.add_input(in1).await.unwrap();

        tx.add_output(TxOutput::new(900, vec![0xCC; 25]));

        let raw = tx.serialize_raw().unwrap();
        let offsets = parse_script_offsets(&raw).unwrap();

        assert_eq!(offsets.inputs.len(), 2);
        assert_eq!(offsets.inputs[0].length, 23);
        assert_eq!(offsets.inputs[1].length, 106);
        assert_eq!(offsets.outputs.len(), 1);
        assert_eq!(offsets.outputs[0].length, 25);

        assert_eq!(slice(&raw, &offsets.inputs[0]).unwrap(), &[0xAA; 23][..]);
        assert_eq!(slice(&raw, &offsets.inputs[1]).unwrap(), &[0xBB; 106][..]);
        assert_eq!(slice(&raw, &offsets.outputs[0]).unwrap(), &[0xCC; 25][..]);
    }
}
