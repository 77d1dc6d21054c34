//! BUMP (BSV Unified Merkle Path, BRC-74): the merkle-path entries carried
//! inside a BEEF payload.
//!
//! **Reference**: ts-sdk `MerklePath` class (`transaction/MerklePath.ts`).
//!
//! Computing a local root from stored siblings is this crate's job; proving
//! that root came from an actual mined block is `ChainTracker`'s.

use super::{BeefError, BeefResult};
use crate::transaction::codec::{CodecError, Reader, Writer};
use crate::transaction::Txid;
use crate::verify::ChainTracker;
use sha2::{Digest, Sha256};

/// One node of a BUMP level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumpLeaf {
    pub offset: u64,
    /// Internal (wire) byte order, as produced by double-SHA256.
    pub hash: Option<[u8; 32]>,
    /// True at level 0 for nodes that represent a transaction's own txid.
    pub txid: bool,
    /// True when this node has no real sibling and duplicates its pair instead.
    pub duplicate: bool,
}

/// A BRC-74 merkle path: `tree_height` levels from the leaves up to (but not
/// including) the root, which is recomputed on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    pub block_height: u32,
    pub path: Vec<Vec<BumpLeaf>>,
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let once = Sha256::digest(data);
    Sha256::digest(once).into()
}

impl MerklePath {
    pub fn new(block_height: u32, path: Vec<Vec<BumpLeaf>>) -> Self {
        Self { block_height, path }
    }

    /// The txids this path proves inclusion for (level-0 nodes flagged `txid`).
    pub fn level_zero_txids(&self) -> Vec<Txid> {
        self.path
            .first()
            .into_iter()
            .flat_map(|level| level.iter())
            .filter(|n| n.txid)
            .filter_map(|n| n.hash.map(Txid::from_wire_bytes))
            .collect()
    }

    fn combine_from(&self, mut offset: u64, mut current: [u8; 32]) -> BeefResult<[u8; 32]> {
        for level in &self.path {
            let sibling_offset = offset ^ 1;
            let sibling_hash = match level.iter().find(|n| n.offset == sibling_offset) {
                Some(sib) if sib.duplicate => current,
                Some(sib) => sib
                    .hash
                    .ok_or_else(|| BeefError::InvalidData("bump sibling missing a hash".into()))?,
                None => current,
            };

            let mut preimage = Vec::with_capacity(64);
            if offset % 2 == 0 {
                preimage.extend_from_slice(&current);
                preimage.extend_from_slice(&sibling_hash);
            } else {
                preimage.extend_from_slice(&sibling_hash);
                preimage.extend_from_slice(&current);
            }
            current = double_sha256(&preimage);
            offset /= 2;
        }
        Ok(current)
    }

    /// Recomputes the merkle root by walking up from `txid`'s level-0 leaf.
    pub fn compute_root(&self, txid: Txid) -> BeefResult<[u8; 32]> {
        let wire = txid.to_wire_bytes();
        let level0 = self
            .path
            .first()
            .ok_or_else(|| BeefError::InvalidData("empty merkle path".into()))?;
        let leaf = level0
            .iter()
            .find(|n| n.txid && n.hash == Some(wire))
            .ok_or_else(|| {
                BeefError::InvalidData(format!("txid {txid} not present at bump level 0"))
            })?;
        self.combine_from(leaf.offset, wire)
    }

    /// Root computed from an arbitrary leaf, for structural comparison
    /// between two BUMPs that may not track the same txid.
    pub fn compute_root_from_any_leaf(&self) -> BeefResult<[u8; 32]> {
        let level0 = self
            .path
            .first()
            .ok_or_else(|| BeefError::InvalidData("empty merkle path".into()))?;
        let leaf = level0
            .iter()
            .find(|n| n.hash.is_some())
            .ok_or_else(|| BeefError::InvalidData("bump level 0 has no hashes".into()))?;
        self.combine_from(leaf.offset, leaf.hash.unwrap())
    }

    /// Merges `other`'s sibling sets into `self`; both must share `block_height`.
    pub fn combine(&mut self, other: &MerklePath) -> BeefResult<()> {
        if self.block_height != other.block_height {
            return Err(BeefError::InvalidData(format!(
                "cannot combine merkle paths at heights {} and {}",
                self.block_height, other.block_height
            )));
        }
        while self.path.len() < other.path.len() {
            self.path.push(Vec::new());
        }
        for (level, nodes) in other.path.iter().enumerate() {
            for node in nodes {
                if !self.path[level].iter().any(|n| n.offset == node.offset) {
                    self.path[level].push(node.clone());
                }
            }
        }
        Ok(())
    }

    /// `verify` accepts the `ScriptsOnly` sentinel tracker without recomputing
    /// anything; otherwise it recomputes the root and defers the header check
    /// to `tracker`.
    pub async fn verify(&self, txid: Txid, tracker: &dyn ChainTracker) -> BeefResult<bool> {
        if tracker.is_scripts_only() {
            return Ok(true);
        }
        let root = self.compute_root(txid)?;
        tracker
            .is_valid_root_for_height(&root, self.block_height)
            .await
            .map_err(|e| BeefError::VerificationFailed(e.to_string()))
    }

    /// `block_height (varint) || tree_height (u8) || per-level(nLeaves (varint)
    /// || per-leaf(offset (varint) || flags (u8) || ? hash (32 bytes)))`.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_varint(self.block_height as u64);
        w.write_u8(self.path.len() as u8);
        for level in &self.path {
            w.write_varint(level.len() as u64);
            for leaf in level {
                w.write_varint(leaf.offset);
                let mut flags = 0u8;
                if leaf.hash.is_some() {
                    flags |= 0x01;
                }
                if leaf.txid {
                    flags |= 0x02;
                }
                if leaf.duplicate {
                    flags |= 0x04;
                }
                w.write_u8(flags);
                if let Some(hash) = leaf.hash {
                    w.write(&hash);
                }
            }
        }
        w.into_bytes()
    }

    pub fn from_reader(r: &mut Reader) -> Result<Self, CodecError> {
        let block_height = r.read_varint()? as u32;
        let tree_height = r.read_u8()?;
        let mut path = Vec::with_capacity(tree_height as usize);
        for _ in 0..tree_height {
            let n_leaves = r.read_varint()?;
            let mut level = Vec::with_capacity(n_leaves as usize);
            for _ in 0..n_leaves {
                let offset = r.read_varint()?;
                let flags = r.read_u8()?;
                let hash = if flags & 0x01 != 0 {
                    Some(r.read(32)?.try_into().unwrap())
                } else {
                    None
                };
                level.push(BumpLeaf {
                    offset,
                    hash,
                    txid: flags & 0x02 != 0,
                    duplicate: flags & 0x04 != 0,
                });
            }
            path.push(level);
        }
        Ok(Self { block_height, path })
    }
}
