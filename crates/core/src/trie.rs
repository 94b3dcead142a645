//! Authenticated Map: a compact sparse binary Merkle trie over 256-bit keys.
//!
//! # Layout
//!
//! - Level `i` branches on key bit `i` (most significant bit first).
//! - A subtree that holds a single key is represented by that key's leaf.
//! - A subtree that holds no key is implied and hashes to [`Digest::EMPTY`].
//!
//! The shape therefore depends only on the set of keys present, and the root
//! is a pure function of the (key, value) pairs regardless of update order.
//!
//! # Sharing
//!
//! Nodes are immutable and reference-counted. [`AuthenticatedMap::put`] copies
//! only the path from the root to the modified leaf, so cloning a map is O(1)
//! and a clone taken before a write keeps observing the old contents. The
//! versioned store relies on this to hand readers stable snapshots while the
//! writer builds the next version.

use crate::proof::{hash_branch, hash_leaf, BranchMask, ReputationProof};
use crate::types::{Digest, Key, ReputationValue, KEY_BITS};
use std::sync::Arc;
use thiserror::Error;

/// Trie errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrieError {
    #[error("key not found: {0}")]
    KeyNotFound(Key),
}

pub type Result<T> = std::result::Result<T, TrieError>;

#[derive(Debug)]
enum Node {
    Empty,
    Leaf {
        key: Key,
        value: ReputationValue,
        digest: Digest,
    },
    Branch {
        left: Arc<Node>,
        right: Arc<Node>,
        digest: Digest,
    },
}

impl Node {
    fn leaf(key: Key, value: ReputationValue) -> Arc<Node> {
        Arc::new(Node::Leaf {
            digest: hash_leaf(&key, &value),
            key,
            value,
        })
    }

    fn branch(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
        Arc::new(Node::Branch {
            digest: hash_branch(&left.digest(), &right.digest()),
            left,
            right,
        })
    }

    fn digest(&self) -> Digest {
        match self {
            Node::Empty => Digest::EMPTY,
            Node::Leaf { digest, .. } | Node::Branch { digest, .. } => *digest,
        }
    }
}

/// Join two leaves whose keys agree on every bit above `depth`.
fn split(existing: Arc<Node>, existing_key: &Key, key: Key, value: ReputationValue, depth: usize) -> Arc<Node> {
    let new_leaf = Node::leaf(key, value);
    let mut level = depth;
    while existing_key.bit(level) == key.bit(level) {
        level += 1;
    }

    let mut node = if key.bit(level) {
        Node::branch(existing, new_leaf)
    } else {
        Node::branch(new_leaf, existing)
    };

    // Re-wrap the shared prefix, each level with an empty sibling.
    let empty = Arc::new(Node::Empty);
    for prefix_level in (depth..level).rev() {
        node = if key.bit(prefix_level) {
            Node::branch(empty.clone(), node)
        } else {
            Node::branch(node, empty.clone())
        };
    }
    node
}

fn insert(node: &Arc<Node>, key: Key, value: ReputationValue, depth: usize) -> (Arc<Node>, bool) {
    match node.as_ref() {
        Node::Empty => (Node::leaf(key, value), true),
        Node::Leaf { key: existing, .. } if *existing == key => (Node::leaf(key, value), false),
        Node::Leaf { key: existing, .. } => {
            // Distinct 256-bit keys always diverge before the last level.
            debug_assert!(depth < KEY_BITS);
            (split(node.clone(), existing, key, value, depth), true)
        }
        Node::Branch { left, right, .. } => {
            if key.bit(depth) {
                let (child, inserted) = insert(right, key, value, depth + 1);
                (Node::branch(left.clone(), child), inserted)
            } else {
                let (child, inserted) = insert(left, key, value, depth + 1);
                (Node::branch(child, right.clone()), inserted)
            }
        }
    }
}

/// Persistent authenticated key-value map.
#[derive(Debug, Clone)]
pub struct AuthenticatedMap {
    root: Arc<Node>,
    len: u64,
}

impl Default for AuthenticatedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticatedMap {
    /// An empty map; its root is [`Digest::EMPTY`].
    pub fn new() -> Self {
        Self {
            root: Arc::new(Node::Empty),
            len: 0,
        }
    }

    /// Build a map from (key, value) pairs. The result does not depend on order.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Key, ReputationValue)>,
    {
        let mut map = Self::new();
        for (key, value) in entries {
            map.put(key, value);
        }
        map
    }

    pub fn root_digest(&self) -> Digest {
        self.root.digest()
    }

    /// Number of keys stored.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &Key) -> Option<ReputationValue> {
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            match node.as_ref() {
                Node::Empty => return None,
                Node::Leaf { key: k, value, .. } => return (k == key).then_some(*value),
                Node::Branch { left, right, .. } => {
                    node = if key.bit(depth) { right } else { left };
                    depth += 1;
                }
            }
        }
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite `key`, returning the new root digest.
    ///
    /// Only the nodes on the path to `key` are rebuilt.
    pub fn put(&mut self, key: Key, value: ReputationValue) -> Digest {
        let (root, inserted) = insert(&self.root, key, value, 0);
        self.root = root;
        if inserted {
            self.len += 1;
        }
        self.root.digest()
    }

    /// Inclusion proof for `key` against [`Self::root_digest`].
    pub fn prove(&self, key: &Key) -> Result<ReputationProof> {
        let mut mask = BranchMask::default();
        let mut siblings = Vec::new();
        let mut node = &self.root;
        let mut depth = 0;

        loop {
            match node.as_ref() {
                Node::Empty => return Err(TrieError::KeyNotFound(*key)),
                Node::Leaf { key: k, value, .. } => {
                    if k != key {
                        return Err(TrieError::KeyNotFound(*key));
                    }
                    return Ok(ReputationProof {
                        branch_mask: mask,
                        siblings,
                        key: *key,
                        value: *value,
                    });
                }
                Node::Branch { left, right, .. } => {
                    let (next, sibling) = if key.bit(depth) {
                        (right, left)
                    } else {
                        (left, right)
                    };
                    let sibling_digest = sibling.digest();
                    if !sibling_digest.is_empty() {
                        mask.set(depth);
                        siblings.push(sibling_digest);
                    }
                    node = next;
                    depth += 1;
                }
            }
        }
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, ReputationValue)> + '_ {
        let mut stack = vec![&self.root];
        std::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                match node.as_ref() {
                    Node::Empty => {}
                    Node::Leaf { key, value, .. } => return Some((*key, *value)),
                    Node::Branch { left, right, .. } => {
                        stack.push(right);
                        stack.push(left);
                    }
                }
            }
            None
        })
    }
}
