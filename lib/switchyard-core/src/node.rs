//! Nodes handed to selectors

/// A weighted, identified reference to a backend target.
///
/// Nodes belong to exactly one selector build and are never mutated; a
/// discovery refresh rebuilds the whole set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node<T> {
    pub id: String,
    pub data: T,
    pub weight: u32,
}

impl<T> Node<T> {
    pub fn new(id: impl Into<String>, data: T, weight: u32) -> Self {
        Self {
            id: id.into(),
            data,
            weight,
        }
    }
}
