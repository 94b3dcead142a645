//! Inclusion proofs for the authenticated map.
//!
//! A proof carries the key, the value, a [`BranchMask`] with one bit per trie
//! level whose sibling is non-empty, and those non-empty siblings ordered from
//! the root downwards. Empty siblings are implied.
//!
//! The proven leaf sits one level below the deepest set mask bit (or is the
//! root itself when the mask is clear), so the verifier can replay the path
//! without any further metadata.

use crate::types::{bit_at, Digest, Key, ReputationValue, HASH_LEN, KEY_BITS};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const LEAF_DOMAIN: &[u8] = b"repmine/leaf/v1";
const BRANCH_DOMAIN: &[u8] = b"repmine/branch/v1";

/// Digest of a leaf node.
pub fn hash_leaf(key: &Key, value: &ReputationValue) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_DOMAIN);
    hasher.update(key.as_bytes());
    hasher.update(&value.to_bytes());
    Digest(*hasher.finalize().as_bytes())
}

/// Digest of an internal node.
pub fn hash_branch(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(BRANCH_DOMAIN);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest(*hasher.finalize().as_bytes())
}

/// One bit per trie level, laid out like key bits (level 0 is the MSB).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BranchMask(pub [u8; HASH_LEN]);

impl BranchMask {
    pub fn set(&mut self, level: usize) {
        self.0[level / 8] |= 1 << (7 - (level % 8));
    }

    pub fn is_set(&self, level: usize) -> bool {
        bit_at(&self.0, level)
    }

    pub fn count(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Depth of the proven leaf: one past the deepest set level.
    pub fn leaf_depth(&self) -> usize {
        (0..KEY_BITS)
            .rev()
            .find(|level| self.is_set(*level))
            .map(|level| level + 1)
            .unwrap_or(0)
    }
}

impl fmt::Display for BranchMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BranchMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchMask({})", self)
    }
}

impl FromStr for BranchMask {
    type Err = crate::types::ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest: Digest = s.parse()?;
        Ok(BranchMask(digest.0))
    }
}

impl Serialize for BranchMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BranchMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusion proof of `value` at `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationProof {
    pub branch_mask: BranchMask,
    /// Non-empty siblings, root first.
    pub siblings: Vec<Digest>,
    pub key: Key,
    pub value: ReputationValue,
}

impl ReputationProof {
    /// Recompute the root implied by this proof.
    ///
    /// Returns `None` if the sibling list does not match the mask.
    pub fn compute_root(&self) -> Option<Digest> {
        if self.siblings.len() != self.branch_mask.count() {
            return None;
        }

        let mut current = hash_leaf(&self.key, &self.value);
        let mut remaining = self.siblings.iter().rev();

        for level in (0..self.branch_mask.leaf_depth()).rev() {
            let sibling = if self.branch_mask.is_set(level) {
                *remaining.next()?
            } else {
                Digest::EMPTY
            };
            current = if self.key.bit(level) {
                hash_branch(&sibling, &current)
            } else {
                hash_branch(&current, &sibling)
            };
        }

        Some(current)
    }

    /// True if the proof replays to `root`.
    pub fn verify(&self, root: &Digest) -> bool {
        self.compute_root().as_ref() == Some(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::AuthenticatedMap;

    fn sample_map(n: u64) -> AuthenticatedMap {
        let mut map = AuthenticatedMap::new();
        for i in 0..n {
            let key = Key(*blake3::hash(&i.to_be_bytes()).as_bytes());
            map.put(key, ReputationValue::new(i as i128 * 3 - 7, i));
        }
        map
    }

    #[test]
    fn test_mask_bits_follow_key_layout() {
        let mut mask = BranchMask::default();
        mask.set(0);
        mask.set(9);
        assert_eq!(mask.0[0], 0b1000_0000);
        assert_eq!(mask.0[1], 0b0100_0000);
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.leaf_depth(), 10);
        assert_eq!(BranchMask::default().leaf_depth(), 0);
    }

    #[test]
    fn test_every_key_verifies() {
        let map = sample_map(64);
        let root = map.root_digest();
        for (key, value) in map.iter() {
            let proof = map.prove(&key).unwrap();
            assert_eq!(proof.value, value);
            assert!(proof.verify(&root), "proof for {} failed", key);
        }
    }

    #[test]
    fn test_single_bit_flips_break_verification() {
        let map = sample_map(16);
        let root = map.root_digest();
        let (key, _) = map.iter().nth(5).unwrap();
        let proof = map.prove(&key).unwrap();
        assert!(!proof.siblings.is_empty());

        // Flip each bit of the encoded value.
        let encoded = proof.value.to_bytes();
        for bit in 0..encoded.len() * 8 {
            let mut bytes = encoded;
            bytes[bit / 8] ^= 1 << (bit % 8);
            // Some flips leave an invalid encoding; those can't be proven at all.
            if let Ok(value) = ReputationValue::from_bytes(&bytes) {
                let tampered = ReputationProof { value, ..proof.clone() };
                assert!(!tampered.verify(&root));
            }
        }

        // Flip each bit of each sibling.
        for i in 0..proof.siblings.len() {
            for bit in 0..HASH_LEN * 8 {
                let mut tampered = proof.clone();
                tampered.siblings[i].0[bit / 8] ^= 1 << (bit % 8);
                assert!(!tampered.verify(&root));
            }
        }
    }

    #[test]
    fn test_mismatched_sibling_count_is_rejected() {
        let map = sample_map(8);
        let (key, _) = map.iter().next().unwrap();
        let mut proof = map.prove(&key).unwrap();
        proof.siblings.push(Digest([7u8; HASH_LEN]));
        assert_eq!(proof.compute_root(), None);
    }

    #[test]
    fn test_wrong_key_does_not_verify() {
        let map = sample_map(8);
        let root = map.root_digest();
        let (key, _) = map.iter().next().unwrap();
        let mut proof = map.prove(&key).unwrap();
        proof.key.0[31] ^= 1;
        assert!(!proof.verify(&root));
    }

    #[test]
    fn test_proof_json_shape() {
        let map = sample_map(4);
        let (key, _) = map.iter().next().unwrap();
        let proof = map.prove(&key).unwrap();
        let json = serde_json::to_value(&proof).unwrap();
        assert!(json["branchMask"].as_str().unwrap().starts_with("0x"));
        assert_eq!(json["siblings"].as_array().unwrap().len(), proof.siblings.len());
        let back: ReputationProof = serde_json::from_value(json).unwrap();
        assert_eq!(back, proof);
    }
}
