//! Exact, prefix and expression lookup structures with fixed precedence

use std::collections::HashMap;
use std::sync::Arc;

use switchyard_api::ConfigError;

use crate::matching::{ENode, MatchPolicy, MatcherRegistry, PrefixTrie, RequestView};

struct ExprEntry<T> {
    node: ENode,
    priority: i32,
    payload: Arc<T>,
}

/// Route lookup: exact path, then prefix trie, then expressions.
///
/// Expressions are tried by descending priority; equal priorities keep
/// registration order. Immutable once built.
pub struct RouteTable<T> {
    exact: HashMap<String, Arc<T>>,
    prefix: PrefixTrie<Arc<T>>,
    exprs: Vec<ExprEntry<T>>,
    policy: MatchPolicy,
    matchers: Arc<MatcherRegistry>,
}

impl<T> RouteTable<T> {
    pub fn builder(matchers: Arc<MatcherRegistry>, policy: MatchPolicy) -> RouteTableBuilder<T> {
        RouteTableBuilder {
            table: RouteTable {
                exact: HashMap::new(),
                prefix: PrefixTrie::new(),
                exprs: Vec::new(),
                policy,
                matchers,
            },
        }
    }

    pub fn find(&self, request: &RequestView<'_>) -> Option<&Arc<T>> {
        if let Some(payload) = self.exact.get(request.path()) {
            return Some(payload);
        }
        if let Some(payload) = self.prefix.search(request.path(), self.policy) {
            return Some(payload);
        }
        self.exprs
            .iter()
            .find(|entry| self.matchers.evaluate(&entry.node, request))
            .map(|entry| &entry.payload)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefix.len() + self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn matchers(&self) -> &Arc<MatcherRegistry> {
        &self.matchers
    }
}

pub struct RouteTableBuilder<T> {
    table: RouteTable<T>,
}

impl<T> RouteTableBuilder<T> {
    pub fn insert_exact(&mut self, path: &str, payload: T) -> Result<(), ConfigError> {
        if self.table.exact.contains_key(path) {
            return Err(duplicate("fullMatch", path));
        }
        self.table.exact.insert(path.to_string(), Arc::new(payload));
        Ok(())
    }

    pub fn insert_prefix(&mut self, path: &str, payload: T) -> Result<(), ConfigError> {
        if self.table.prefix.contains(path) {
            return Err(duplicate("prefixMatch", path));
        }
        self.table.prefix.insert(path, Arc::new(payload));
        Ok(())
    }

    pub fn insert_expr(&mut self, node: ENode, priority: i32, payload: T) {
        self.table.exprs.push(ExprEntry {
            node,
            priority,
            payload: Arc::new(payload),
        });
    }

    pub fn matchers(&self) -> &Arc<MatcherRegistry> {
        &self.table.matchers
    }

    pub fn build(mut self) -> RouteTable<T> {
        // stable: ties keep registration order
        self.table.exprs.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.table
    }
}

fn duplicate(kind: &str, path: &str) -> ConfigError {
    ConfigError::InvalidRouteConfig(format!("duplicate {} route for {}", kind, path))
}
