//! Character-keyed prefix tree for path prefix routes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which of the matched prefixes wins
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Deepest registered prefix on the walked path
    #[default]
    Longest,
    /// First registered prefix on the walked path
    Shortest,
}

struct TrieNode<T> {
    children: HashMap<char, TrieNode<T>>,
    payload: Option<T>,
}

impl<T> TrieNode<T> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            payload: None,
        }
    }
}

/// A node carries a payload only where a registered prefix ends.
///
/// Matching is per character, so `/api` also matches `/apis`.
pub struct PrefixTrie<T> {
    root: TrieNode<T>,
    len: usize,
}

impl<T> PrefixTrie<T> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            len: 0,
        }
    }

    /// Register `prefix`, returning the payload it replaced
    pub fn insert(&mut self, prefix: &str, payload: T) -> Option<T> {
        let mut node = &mut self.root;
        for c in prefix.chars() {
            node = node.children.entry(c).or_insert_with(TrieNode::new);
        }
        let previous = node.payload.replace(payload);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Whether `prefix` itself was registered
    pub fn contains(&self, prefix: &str) -> bool {
        let mut node = &self.root;
        for c in prefix.chars() {
            match node.children.get(&c) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.payload.is_some()
    }

    pub fn search(&self, path: &str, policy: MatchPolicy) -> Option<&T> {
        let mut node = &self.root;
        let mut found = node.payload.as_ref();
        if found.is_some() && policy == MatchPolicy::Shortest {
            return found;
        }

        for c in path.chars() {
            match node.children.get(&c) {
                Some(child) => node = child,
                None => break,
            }
            if let Some(payload) = node.payload.as_ref() {
                if policy == MatchPolicy::Shortest {
                    return Some(payload);
                }
                found = Some(payload);
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for PrefixTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}
