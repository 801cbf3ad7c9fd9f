//! Request matching for gateway routes

pub mod expr;
pub mod request;
pub mod table;
pub mod trie;

pub use expr::{Comparator, CustomFetcher, ENode, Fetcher, MatcherRegistry, RegexCache};
pub use request::RequestView;
pub use table::{RouteTable, RouteTableBuilder};
pub use trie::{MatchPolicy, PrefixTrie};
