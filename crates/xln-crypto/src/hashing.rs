pub use xln_core::Hash;

/// Prefix byte for interior merkle nodes, so a node never collides with a leaf.
const MERKLE_NODE_TAG: u8 = 0x01;

/// BLAKE3 digest of `data`.
pub fn hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Merkle root over frame transaction hashes.
///
/// Interior nodes are `H(0x01 || left || right)`. An odd node at the end of a
/// level is carried up unchanged. The root of no leaves is the zero hash.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    let mut level: Vec<Hash> = leaves.to_vec();
    if level.is_empty() {
        return [0u8; 32];
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = blake3::Hasher::new();
                    hasher.update(&[MERKLE_NODE_TAG]);
                    hasher.update(left);
                    hasher.update(right);
                    *hasher.finalize().as_bytes()
                }
                _ => pair[0],
            })
            .collect();
    }

    level[0]
}
