//! BEEF (BRC-62) and Atomic BEEF (BRC-95): a transaction serialized together
//! with its ancestor DAG and a deduplicated table of merkle paths.
//!
//! **Reference**: wallet-core `beef::mod` (`crates/wallet-core/src/beef/mod.rs`)
//! for the error/constant shape; the byte layout itself is this crate's own,
//! grounded on BRC-62/BRC-74/BRC-95.

pub mod merkle_path;

use crate::transaction::codec::{CodecError, Reader, Writer};
use crate::transaction::{SharedTx, Transaction, TransactionError, TxInput, Txid};
use futures::future::{BoxFuture, FutureExt};
use merkle_path::MerklePath;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// BEEF V1 version marker (the only version this crate emits or parses).
pub const BEEF_V1: u32 = 0x0100_BEEF;
/// Atomic BEEF (BRC-95) prefix, distinguishing it from a bare BEEF blob.
pub const ATOMIC_BEEF_PREFIX: u32 = 0x0101_0101;

#[derive(Debug, Error)]
pub enum BeefError {
    #[error("invalid BEEF data: {0}")]
    InvalidData(String),

    #[error("bad BEEF format: {0}")]
    BadFormatBeef(String),

    #[error("bad Atomic BEEF format: {0}")]
    BadFormatAtomicBeef(String),

    #[error("merkle path verification failed: {0}")]
    VerificationFailed(String),

    #[error("BEEF payload references unknown input transaction {0}")]
    UnknownInputTx(String),

    #[error("Atomic BEEF payload contains an unreachable transaction {0}")]
    UnrelatedTx(String),

    #[error("invalid BUMP index {0}")]
    InvalidBumpIndex(u64),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type BeefResult<T> = Result<T, BeefError>;

/// One entry of the emitted transaction table: the transaction bytes plus an
/// optional index into the BUMP table.
struct BeefTxEntry {
    txid: Txid,
    tx: Transaction,
    bump_index: Option<usize>,
}

/// Accumulates deduplicated merkle paths as new ones are encountered, per the
/// three-step procedure in BRC-62 §BUMP dedup: reuse on reference identity,
/// reuse-and-merge on equal root at equal height, else append.
#[derive(Default)]
struct BumpTable {
    merged: Vec<MerklePath>,
    origins: Vec<Vec<Arc<MerklePath>>>,
}

impl BumpTable {
    fn dedupe(&mut self, mp: &Arc<MerklePath>) -> BeefResult<usize> {
        for (i, origins) in self.origins.iter().enumerate() {
            if origins.iter().any(|o| Arc::ptr_eq(o, mp)) {
                return Ok(i);
            }
        }
        for (i, existing) in self.merged.iter_mut().enumerate() {
            if existing.block_height != mp.block_height {
                continue;
            }
            if let (Ok(root_a), Ok(root_b)) =
                (existing.compute_root_from_any_leaf(), mp.compute_root_from_any_leaf())
            {
                if root_a == root_b {
                    existing.combine(mp)?;
                    self.origins[i].push(mp.clone());
                    return Ok(i);
                }
            }
        }
        self.merged.push((**mp).clone());
        self.origins.push(vec![mp.clone()]);
        Ok(self.merged.len() - 1)
    }
}

/// Depth-first, parents-before-children traversal: an anchored node (one
/// carrying a `merkle_path`) is recorded with its BUMP index and never
/// descended into; everything else is appended only after its own inputs'
/// ancestors have been collected.
fn collect_for_beef<'a>(
    node: Transaction,
    bumps: &'a mut BumpTable,
    order: &'a mut Vec<BeefTxEntry>,
    visited: &'a mut HashSet<Txid>,
    allow_partial: bool,
) -> BoxFuture<'a, BeefResult<()>> {
    async move {
        let txid = node.txid()?;
        if visited.contains(&txid) {
            return Ok(());
        }

        if let Some(mp) = node.merkle_path.clone() {
            let bump_index = bumps.dedupe(&mp)?;
            visited.insert(txid);
            order.push(BeefTxEntry { txid, tx: node, bump_index: Some(bump_index) });
            return Ok(());
        }

        for (i, input) in node.inputs.iter().enumerate() {
            match &input.source_transaction {
                Some(src) => {
                    let child = src.read().await.clone();
                    collect_for_beef(child, bumps, order, visited, allow_partial).await?;
                }
                None if allow_partial => continue,
                None => return Err(TransactionError::MissingSource(i).into()),
            }
        }

        visited.insert(txid);
        order.push(BeefTxEntry { txid, tx: node, bump_index: None });
        Ok(())
    }
    .boxed()
}

fn encode_beef(bumps: &[MerklePath], order: &[BeefTxEntry]) -> BeefResult<Vec<u8>> {
    let mut w = Writer::new();
    w.write_u32_le(BEEF_V1);

    w.write_varint(bumps.len() as u64);
    for bump in bumps {
        w.write(&bump.to_binary());
    }

    w.write_varint(order.len() as u64);
    for entry in order {
        w.write(&entry.tx.serialize_raw()?);
        match entry.bump_index {
            Some(idx) => {
                w.write_u8(1);
                w.write_varint(idx as u64);
            }
            None => w.write_u8(0),
        }
    }
    Ok(w.into_bytes())
}

impl Transaction {
    /// `version (BEEF_V1) || varint(n_bumps) || bumps[] || varint(n_txs) ||
    /// (raw_tx || has_bump (u8) || ? varint(bump_index))+`, with ancestors
    /// emitted strictly before their descendants. Fails with `MissingSource`
    /// if any non-anchored input lacks a `source_transaction`.
    pub async fn to_beef(&self) -> BeefResult<Vec<u8>> {
        self.to_beef_opts(false).await
    }

    /// As [`Transaction::to_beef`], but silently omits a non-anchored input's
    /// missing ancestor from the payload instead of failing.
    pub async fn to_beef_allow_partial(&self) -> BeefResult<Vec<u8>> {
        self.to_beef_opts(true).await
    }

    async fn to_beef_opts(&self, allow_partial: bool) -> BeefResult<Vec<u8>> {
        let mut bumps = BumpTable::default();
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        collect_for_beef(self.clone(), &mut bumps, &mut order, &mut visited, allow_partial).await?;
        encode_beef(&bumps.merged, &order)
    }

    pub async fn to_beef_hex(&self) -> BeefResult<String> {
        Ok(hex::encode(self.to_beef().await?))
    }

    /// `ATOMIC_BEEF_PREFIX (u32LE) || subject_txid (32 bytes, big-endian) ||
    /// beef_payload`. The subject txid is this transaction's own TXID in its
    /// natural (display) byte order — the one Atomic BEEF field that is not
    /// wire-reversed.
    pub async fn to_atomic_beef(&self) -> BeefResult<Vec<u8>> {
        let beef = self.to_beef().await?;
        let txid = self.txid()?;
        let mut w = Writer::new();
        w.write_u32_le(ATOMIC_BEEF_PREFIX);
        w.write(&txid.0);
        w.write(&beef);
        Ok(w.into_bytes())
    }

    pub async fn to_atomic_beef_hex(&self) -> BeefResult<String> {
        Ok(hex::encode(self.to_atomic_beef().await?))
    }

    /// Parses a BEEF blob and returns its subject transaction (the last
    /// entry in the transaction table), with `merkle_path`/`source_transaction`
    /// bound across the whole embedded DAG.
    pub async fn parse_beef(data: &[u8]) -> BeefResult<SharedTx> {
        let (subject, _all) = parse_beef_table(data).await?;
        Ok(subject)
    }

    pub async fn parse_beef_hex(hex_str: &str) -> BeefResult<SharedTx> {
        let bytes = hex::decode(hex_str).map_err(|e| BeefError::BadFormatBeef(e.to_string()))?;
        Self::parse_beef(&bytes).await
    }

    /// Parses an Atomic BEEF blob, verifies its subject-txid header against
    /// the payload, and checks that every embedded transaction is reachable
    /// from the subject through `source_transaction` links (stopping descent
    /// at proof-anchored ancestors, which are terminal witnesses).
    pub async fn parse_atomic_beef(data: &[u8]) -> BeefResult<SharedTx> {
        let mut r = Reader::new(data);
        let prefix = r.read_u32_le()?;
        if prefix != ATOMIC_BEEF_PREFIX {
            return Err(BeefError::BadFormatAtomicBeef(format!(
                "expected prefix {ATOMIC_BEEF_PREFIX:#010x}, got {prefix:#010x}"
            )));
        }
        let subject_bytes: [u8; 32] = r
            .read(32)?
            .try_into()
            .map_err(|_| BeefError::BadFormatAtomicBeef("truncated subject txid".into()))?;
        let declared_subject = Txid::from_display_bytes(&subject_bytes)?;
        let rest = r.read_remainder();

        let (subject, all) = parse_beef_table(&rest).await?;
        let actual_subject = subject.read().await.txid()?;
        if actual_subject != declared_subject {
            return Err(BeefError::BadFormatAtomicBeef(format!(
                "declared subject {declared_subject} does not match payload's final transaction {actual_subject}"
            )));
        }

        verify_atomic_reachability(&subject, &all).await?;
        Ok(subject)
    }

    pub async fn parse_atomic_beef_hex(hex_str: &str) -> BeefResult<SharedTx> {
        let bytes = hex::decode(hex_str).map_err(|e| BeefError::BadFormatAtomicBeef(e.to_string()))?;
        Self::parse_atomic_beef(&bytes).await
    }

    /// Cheap marker sniff distinguishing a BEEF blob from Raw/EF.
    pub fn is_beef(data: &[u8]) -> bool {
        data.len() >= 4 && u32::from_le_bytes(data[0..4].try_into().unwrap()) == BEEF_V1
    }

    /// Cheap marker sniff for Atomic BEEF.
    pub fn is_atomic_beef(data: &[u8]) -> bool {
        data.len() >= 4 && u32::from_le_bytes(data[0..4].try_into().unwrap()) == ATOMIC_BEEF_PREFIX
    }
}

/// Parses the BEEF payload (bumps + transaction table), links every node's
/// `merkle_path`/`source_transaction`, and returns `(subject, all_nodes)`.
async fn parse_beef_table(data: &[u8]) -> BeefResult<(SharedTx, Vec<SharedTx>)> {
    let mut r = Reader::new(data);
    let version = r.read_u32_le()?;
    if version != BEEF_V1 {
        return Err(BeefError::BadFormatBeef(format!(
            "expected BEEF_V1 ({BEEF_V1:#010x}), got {version:#010x}"
        )));
    }

    let n_bumps = r.read_varint()?;
    let mut bumps = Vec::with_capacity(n_bumps as usize);
    for _ in 0..n_bumps {
        bumps.push(MerklePath::from_reader(&mut r)?);
    }

    let n_txs = r.read_varint()?;
    if n_txs == 0 {
        return Err(BeefError::InvalidData("BEEF payload has no transactions".into()));
    }

    let mut entries: Vec<(Txid, Transaction, Option<usize>)> = Vec::with_capacity(n_txs as usize);
    let mut index_by_txid: HashMap<Txid, usize> = HashMap::new();
    for _ in 0..n_txs {
        let tx = Transaction::parse_raw_from_reader(&mut r)?;
        let has_bump = r.read_u8()?;
        let bump_index = if has_bump != 0 {
            let idx = r.read_varint()?;
            if idx as usize >= bumps.len() {
                return Err(BeefError::InvalidBumpIndex(idx));
            }
            Some(idx as usize)
        } else {
            None
        };
        let txid = tx.txid()?;
        index_by_txid.insert(txid, entries.len());
        entries.push((txid, tx, bump_index));
    }

    let shared: Vec<SharedTx> = entries
        .iter()
        .map(|(_, tx, _)| tx.clone().into_shared())
        .collect();

    for (i, (_, _, bump_index)) in entries.iter().enumerate() {
        if let Some(bi) = bump_index {
            shared[i].write().await.merkle_path = Some(Arc::new(bumps[*bi].clone()));
        }
    }

    // Ancestor linking: a node with a bump is proof-anchored and is not
    // descended into; every other node's inputs are bound to their parent
    // by txid, unless that txid is itself proved at some BUMP's level 0.
    for (i, (_, _, bump_index)) in entries.iter().enumerate() {
        if bump_index.is_some() {
            continue;
        }
        let n_inputs = shared[i].read().await.inputs.len();
        for j in 0..n_inputs {
            let input_txid = shared[i]
                .read()
                .await
                .inputs
                .get(j)
                .and_then(|inp: &TxInput| inp.source_txid)
                .ok_or(TransactionError::MissingSource(j))?;

            if let Some(&parent_idx) = index_by_txid.get(&input_txid) {
                shared[i].write().await.inputs[j].source_transaction = Some(shared[parent_idx].clone());
            } else if bumps.iter().any(|b| b.level_zero_txids().contains(&input_txid)) {
                // Proved directly by a BUMP without its own table entry; no
                // transaction body is available to bind as a back-reference.
            } else {
                return Err(BeefError::UnknownInputTx(input_txid.to_hex()));
            }
        }
    }

    let subject = shared.last().cloned().expect("n_txs > 0 checked above");
    Ok((subject, shared))
}

async fn verify_atomic_reachability(subject: &SharedTx, all: &[SharedTx]) -> BeefResult<()> {
    let mut visited: HashSet<Txid> = HashSet::new();
    let mut stack = vec![subject.clone()];

    while let Some(node) = stack.pop() {
        let guard = node.read().await;
        let txid = guard.txid()?;
        if !visited.insert(txid) {
            continue;
        }
        if guard.merkle_path.is_some() {
            continue; // proof-anchored: a terminal witness, don't descend further
        }
        for input in &guard.inputs {
            if let Some(src) = &input.source_transaction {
                stack.push(src.clone());
            }
        }
    }

    for node in all {
        let guard = node.read().await;
        let txid = guard.txid()?;
        if !visited.contains(&txid) {
            return Err(BeefError::UnrelatedTx(txid.to_hex()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxOutput, Txid};
    use merkle_path::BumpLeaf;

    fn txid_n(n: u8) -> Txid {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        Txid::from_hex(&hex::encode(bytes)).unwrap()
    }

    async fn make_spend(source: &SharedTx, vout: u32, out_sats: u64) -> Transaction {
        let mut tx = Transaction::new();
        let mut input = TxInput::with_source_transaction(source.clone(), vout);
        input.unlocking_script = Some(vec![0x51]);
        tx.inputs.push(input);
        let src_txid = source.read().await.txid().unwrap();
        tx.inputs[0].source_txid = Some(src_txid);
        tx.add_output(TxOutput::new(out_sats, vec![0x51]));
        tx
    }

    #[tokio::test]
    async fn beef_round_trip_preserves_two_hop_dag() {
        let root = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_000, vec![0x51])], 0)
            .into_shared();
        let mid = make_spend(&root, 0, 900).await.into_shared();
        let leaf = make_spend(&mid, 0, 800).await;

        let bytes = leaf.to_beef().await.unwrap();
        assert!(Transaction::is_beef(&bytes));

        let parsed = Transaction::parse_beef(&bytes).await.unwrap();
        let parsed_guard = parsed.read().await;
        assert_eq!(parsed_guard.outputs[0].satoshis, Some(800));

        let parsed_mid = parsed_guard.inputs[0].source_transaction.clone().unwrap();
        let parsed_mid_guard = parsed_mid.read().await;
        assert_eq!(parsed_mid_guard.outputs[0].satoshis, Some(900));

        let parsed_root = parsed_mid_guard.inputs[0].source_transaction.clone().unwrap();
        assert_eq!(parsed_root.read().await.outputs[0].satoshis, Some(1_000));
    }

    #[tokio::test]
    async fn beef_emission_is_topologically_sorted() {
        let root = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_000, vec![0x51])], 0)
            .into_shared();
        let mid = make_spend(&root, 0, 900).await.into_shared();
        let leaf = make_spend(&mid, 0, 800).await;

        let bytes = leaf.to_beef().await.unwrap();
        let mut r = Reader::new(&bytes);
        r.read_u32_le().unwrap();
        let n_bumps = r.read_varint().unwrap();
        for _ in 0..n_bumps {
            MerklePath::from_reader(&mut r).unwrap();
        }
        let n_txs = r.read_varint().unwrap();
        assert_eq!(n_txs, 3);

        let mut seen_before: HashSet<Txid> = HashSet::new();
        for _ in 0..n_txs {
            let tx = Transaction::parse_raw_from_reader(&mut r).unwrap();
            for input in &tx.inputs {
                if let Some(parent) = input.source_txid {
                    assert!(
                        seen_before.contains(&parent),
                        "parent must be emitted before its child"
                    );
                }
            }
            seen_before.insert(tx.txid().unwrap());
            let has_bump = r.read_u8().unwrap();
            if has_bump != 0 {
                r.read_varint().unwrap();
            }
        }
    }

    #[tokio::test]
    async fn scripts_only_verification_short_circuits_at_a_merkle_anchored_ancestor() {
        let mut root = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_000, vec![0x51])], 0);
        let anchor_txid = root.txid().unwrap();
        root.merkle_path = Some(Arc::new(MerklePath::new(
            100,
            vec![vec![BumpLeaf {
                offset: 0,
                hash: Some(anchor_txid.to_wire_bytes()),
                txid: true,
                duplicate: false,
            }]],
        )));
        let root_shared = root.into_shared();
        let leaf = make_spend(&root_shared, 0, 900).await;

        let bytes = leaf.to_beef().await.unwrap();
        let parsed = Transaction::parse_beef(&bytes).await.unwrap();
        let guard = parsed.read().await;
        let ancestor = guard.inputs[0].source_transaction.clone().unwrap();
        assert!(ancestor.read().await.merkle_path.is_some());

        use crate::verify::{AcceptAllSpends, ScriptsOnly, Verifier};
        let fee_model = crate::fee::SatoshisPerKilobyte::new(0);
        let verifier = Verifier::new(&ScriptsOnly, Some(&fee_model), &AcceptAllSpends);
        assert!(verifier.verify(parsed.clone()).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_merkle_paths_at_equal_height_and_root_collapse_to_one_bump() {
        let leaf_hash = [7u8; 32];
        let path_a = MerklePath::new(
            55,
            vec![vec![BumpLeaf { offset: 0, hash: Some(leaf_hash), txid: true, duplicate: false }]],
        );
        let path_b = path_a.clone();

        let mut tx_a = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(500, vec![0x51])], 0);
        tx_a.merkle_path = Some(Arc::new(path_a));
        // Force tx_a's txid to match the bump leaf by overriding at the wire level isn't
        // possible without control of hashing, so instead exercise dedup through two
        // independently-constructed but root-equal paths on two different ancestors.
        let tx_a_shared = tx_a.into_shared();

        let mut tx_b = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(700, vec![0x51])], 0);
        tx_b.merkle_path = Some(Arc::new(path_b));
        let tx_b_shared = tx_b.into_shared();

        let mut root = Transaction::new();
        let mut in0 = TxInput::with_source_transaction(tx_a_shared.clone(), 0);
        in0.unlocking_script = Some(vec![0x51]);
        in0.source_txid = Some(tx_a_shared.read().await.txid().unwrap());
        root.inputs.push(in0);
        let mut in1 = TxInput::with_source_transaction(tx_b_shared.clone(), 0);
        in1.unlocking_script = Some(vec![0x51]);
        in1.source_txid = Some(tx_b_shared.read().await.txid().unwrap());
        root.inputs.push(in1);
        root.add_output(TxOutput::new(1_000, vec![0x51]));

        let bytes = root.to_beef().await.unwrap();
        let mut r = Reader::new(&bytes);
        r.read_u32_le().unwrap();
        let n_bumps = r.read_varint().unwrap();
        assert_eq!(n_bumps, 1, "equal-root paths at equal height must dedupe to a single BUMP");
    }

    #[tokio::test]
    async fn atomic_beef_round_trips_and_checks_subject_header() {
        let root = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_000, vec![0x51])], 0)
            .into_shared();
        let leaf = make_spend(&root, 0, 900).await;
        let subject_txid = leaf.txid().unwrap();

        let bytes = leaf.to_atomic_beef().await.unwrap();
        assert!(Transaction::is_atomic_beef(&bytes));

        let parsed = Transaction::parse_atomic_beef(&bytes).await.unwrap();
        assert_eq!(parsed.read().await.txid().unwrap(), subject_txid);
    }

    #[tokio::test]
    async fn atomic_beef_with_an_unreachable_extra_tx_is_rejected() {
        let root = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1_000, vec![0x51])], 0)
            .into_shared();
        let leaf = make_spend(&root, 0, 900).await;

        let beef_bytes = leaf.to_beef().await.unwrap();
        let mut w = Writer::new();
        let mut r = Reader::new(&beef_bytes);
        w.write_u32_le(r.read_u32_le().unwrap());
        let n_bumps = r.read_varint().unwrap();
        w.write_varint(n_bumps);
        for _ in 0..n_bumps {
            w.write(&MerklePath::from_reader(&mut r).unwrap().to_binary());
        }
        let n_txs = r.read_varint().unwrap();
        w.write_varint(n_txs + 1);

        // `root` is the table's first entry (ancestors precede descendants);
        // re-emit it unchanged, then splice the unrelated tx in before `leaf`
        // so `leaf` stays last and still matches the declared subject header.
        let root_tx = Transaction::parse_raw_from_reader(&mut r).unwrap();
        w.write(&root_tx.serialize_raw().unwrap());
        let root_has_bump = r.read_u8().unwrap();
        w.write_u8(root_has_bump);
        if root_has_bump != 0 {
            let idx = r.read_varint().unwrap();
            w.write_varint(idx);
        }

        // An unrelated transaction, unreachable from the subject by any input chain.
        let unrelated = Transaction::with_params(1, Vec::new(), vec![TxOutput::new(1, vec![0x51])], 99);
        w.write(&unrelated.serialize_raw().unwrap());
        w.write_u8(0);

        // The remaining entry (`leaf`) re-emitted unchanged, still last.
        w.write(&r.read_remainder());

        let subject_txid = leaf.txid().unwrap();
        let mut outer = Writer::new();
        outer.write_u32_le(ATOMIC_BEEF_PREFIX);
        outer.write(&subject_txid.0);
        outer.write(&w.into_bytes());

        let err = Transaction::parse_atomic_beef(&outer.into_bytes()).await.unwrap_err();
        assert!(matches!(err, BeefError::UnrelatedTx(_)));
    }

    #[test]
    fn txid_n_helper_produces_distinct_ids() {
        assert_ne!(txid_n(1), txid_n(2));
    }
}
