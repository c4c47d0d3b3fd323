//! Bitcoin-style transaction merkle trees.
//!
//! Used for the fallback claim path: when the ledger rejects the node's
//! packaged inclusion proof, the branch is recomputed locally from the
//! block's txid list and submitted with an explicit tx index.
//!
//! Txids are displayed byte-reversed; all arithmetic here runs in
//! internal byte order. A level with an odd node count duplicates its
//! last node, as Bitcoin does.

use crate::error::RpcError;
use sha2::{Digest, Sha256};

/// SHA256(SHA256(data)).
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Decode a display-order (reversed) txid hex string into internal byte order.
pub fn txid_to_internal(txid: &str) -> Result<[u8; 32], RpcError> {
    let mut bytes: Vec<u8> =
        hex::decode(txid).map_err(|e| RpcError::Parse(format!("bad txid hex {}: {}", txid, e)))?;
    if bytes.len() != 32 {
        return Err(RpcError::Parse(format!(
            "txid {} is {} bytes, want 32",
            txid,
            bytes.len()
        )));
    }
    bytes.reverse();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn internal_to_hex(hash: &[u8; 32]) -> String {
    let mut bytes = *hash;
    bytes.reverse();
    hex::encode(bytes)
}

fn parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    double_sha256(&buf)
}

/// Merkle root of a block's txids (display-order hex), returned as
/// display-order hex.
pub fn merkle_root(txids: &[String]) -> Result<String, RpcError> {
    if txids.is_empty() {
        return Err(RpcError::Parse("merkle root of empty tx list".to_string()));
    }
    let mut level: Vec<[u8; 32]> = txids
        .iter()
        .map(|t| txid_to_internal(t))
        .collect::<Result<_, _>>()?;

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(parent(left, right));
        }
        level = next;
    }
    Ok(internal_to_hex(&level[0]))
}

/// Audit path for the transaction at `index`: the sibling hash at every
/// tree level, leaf-to-root, as display-order hex.
pub fn merkle_branch(txids: &[String], index: usize) -> Result<Vec<String>, RpcError> {
    if index >= txids.len() {
        return Err(RpcError::Parse(format!(
            "tx index {} out of range ({} txs)",
            index,
            txids.len()
        )));
    }
    let mut level: Vec<[u8; 32]> = txids
        .iter()
        .map(|t| txid_to_internal(t))
        .collect::<Result<_, _>>()?;

    let mut branch = Vec::new();
    let mut pos = index;
    while level.len() > 1 {
        let sibling = if pos % 2 == 0 {
            // Right sibling, or self-duplicate at an odd tail
            *level.get(pos + 1).unwrap_or(&level[pos])
        } else {
            level[pos - 1]
        };
        branch.push(internal_to_hex(&sibling));

        let mut next = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(parent(left, right));
        }
        level = next;
        pos /= 2;
    }
    Ok(branch)
}

/// Fold a branch from a leaf txid back up to a root. Position parity at
/// each level comes from the tx index.
pub fn verify_branch(
    txid: &str,
    branch: &[String],
    index: usize,
    expected_root: &str,
) -> Result<bool, RpcError> {
    let mut acc = txid_to_internal(txid)?;
    let mut pos = index;
    for sibling_hex in branch {
        let sibling = txid_to_internal(sibling_hex)?;
        acc = if pos % 2 == 0 {
            parent(&acc, &sibling)
        } else {
            parent(&sibling, &acc)
        };
        pos /= 2;
    }
    Ok(internal_to_hex(&acc) == expected_root.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_txid(seed: u8) -> String {
        hex::encode([seed; 32])
    }

    #[test]
    fn test_single_tx_root_is_txid() {
        let txid = fake_txid(0xab);
        assert_eq!(merkle_root(&[txid.clone()]).unwrap(), txid);
        assert!(merkle_branch(&[txid.clone()], 0).unwrap().is_empty());
        assert!(verify_branch(&txid, &[], 0, &txid).unwrap());
    }

    #[test]
    fn test_branch_verifies_for_every_index() {
        for n in 2..=7usize {
            let txids: Vec<String> = (0..n).map(|i| fake_txid(i as u8 + 1)).collect();
            let root = merkle_root(&txids).unwrap();
            for (i, txid) in txids.iter().enumerate() {
                let branch = merkle_branch(&txids, i).unwrap();
                assert!(
                    verify_branch(txid, &branch, i, &root).unwrap(),
                    "branch for index {} of {} txs must fold to the root",
                    i,
                    n
                );
            }
        }
    }

    #[test]
    fn test_wrong_leaf_fails_verification() {
        let txids: Vec<String> = (1..=4u8).map(fake_txid).collect();
        let root = merkle_root(&txids).unwrap();
        let branch = merkle_branch(&txids, 2).unwrap();
        // Leaf from a different position does not verify at index 2
        assert!(!verify_branch(&txids[1], &branch, 2, &root).unwrap());
    }

    #[test]
    fn test_deterministic_root() {
        let txids: Vec<String> = (1..=5u8).map(fake_txid).collect();
        assert_eq!(merkle_root(&txids).unwrap(), merkle_root(&txids).unwrap());
    }

    #[test]
    fn test_odd_level_duplicates_last() {
        // With 3 leaves, index 2's level-0 sibling is itself
        let txids: Vec<String> = (1..=3u8).map(fake_txid).collect();
        let branch = merkle_branch(&txids, 2).unwrap();
        assert_eq!(branch[0], txids[2]);
    }

    #[test]
    fn test_bad_inputs_rejected() {
        assert!(merkle_root(&[]).is_err());
        assert!(merkle_branch(&[fake_txid(1)], 1).is_err());
        assert!(merkle_root(&["zz".to_string()]).is_err());
        assert!(merkle_root(&["abcd".to_string()]).is_err());
    }
}
