//! Hash-based selection for sticky routing and canary bucketing

use crate::selector::Selector;
use crate::{CoreError, Node, Result};

/// Key hashed when the caller supplies none, so keyless calls stay deterministic
pub const NO_KEY_SENTINEL: &str = "__switchyard_no_key__";

/// Pluggable hash function
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashFunction {
    Crc32,
    /// Murmur3 x86 32-bit, seed 0
    Murmur3,
    /// FNV-1a 64-bit
    Fnv1a,
}

impl HashFunction {
    pub fn hash(&self, key: &[u8]) -> u64 {
        match self {
            HashFunction::Crc32 => crc32fast::hash(key) as u64,
            HashFunction::Murmur3 => murmur3_32(key, 0) as u64,
            HashFunction::Fnv1a => fnv1a_64(key),
        }
    }
}

impl std::str::FromStr for HashFunction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "crc32" => Ok(HashFunction::Crc32),
            "murmur3" => Ok(HashFunction::Murmur3),
            "fnv1a" => Ok(HashFunction::Fnv1a),
            other => Err(CoreError::Internal(format!("unknown hash function {:?}", other))),
        }
    }
}

/// `hash(key) % len(nodes)`
#[derive(Debug)]
pub struct HashSelector<T> {
    nodes: Vec<Node<T>>,
    function: HashFunction,
}

impl<T> HashSelector<T> {
    pub fn new(nodes: Vec<Node<T>>, function: HashFunction) -> Self {
        Self { nodes, function }
    }
}

impl<T: Send + Sync> Selector<T> for HashSelector<T> {
    fn select(&self, key: Option<&str>) -> Result<&Node<T>> {
        if self.nodes.is_empty() {
            return Err(CoreError::EmptyNodes);
        }
        let key = key.unwrap_or(NO_KEY_SENTINEL);
        let hash = self.function.hash(key.as_bytes());
        Ok(&self.nodes[(hash % self.nodes.len() as u64) as usize])
    }

    fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, byte) in tail.iter().enumerate() {
            k ^= (*byte as u32) << (8 * i);
        }
        h ^= k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
