//! RFC 6962 Merkle tree hashing and consistency-proof verification.

use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Verify a consistency proof between the tree head at size `first` (root
/// `first_root`) and the tree head at size `second` (root `second_root`).
pub fn verify_consistency(
    first: u64,
    second: u64,
    first_root: &Hash,
    second_root: &Hash,
    proof: &[Hash],
) -> bool {
    if first > second {
        return false;
    }
    if first == second {
        return proof.is_empty() && first_root == second_root;
    }
    if first == 0 {
        // anything is consistent with the empty tree
        return proof.is_empty();
    }

    // skip the right-border nodes shared by both trees
    let mut node = first - 1;
    let mut last = second - 1;
    while node % 2 == 1 {
        node /= 2;
        last /= 2;
    }

    let mut hashes = proof.iter();
    let (mut first_hash, mut second_hash) = if node > 0 {
        match hashes.next() {
            Some(h) => (*h, *h),
            None => return false,
        }
    } else {
        (*first_root, *first_root)
    };

    while node > 0 {
        if node % 2 == 1 {
            let Some(h) = hashes.next() else {
                return false;
            };
            first_hash = node_hash(h, &first_hash);
            second_hash = node_hash(h, &second_hash);
        } else if node < last {
            let Some(h) = hashes.next() else {
                return false;
            };
            second_hash = node_hash(&second_hash, h);
        }
        node /= 2;
        last /= 2;
    }
    while last > 0 {
        let Some(h) = hashes.next() else {
            return false;
        };
        second_hash = node_hash(&second_hash, h);
        last /= 2;
    }

    first_hash == *first_root && second_hash == *second_root && hashes.next().is_none()
}
