//! Boolean expression routes: fetchers, comparators and evaluation

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use switchyard_api::{ConfigError, ExprConfig};
use tracing::warn;

use crate::matching::RequestView;

/// User-supplied attribute extractor, registered by source name
pub type CustomFetcher = Arc<dyn Fn(&RequestView<'_>, &str) -> Option<String> + Send + Sync>;

const DEFAULT_HASH_MODULUS: u32 = 100;
const REGEX_CACHE_SIZE: usize = 256;

/// Extracts one string attribute from a request; missing values read as ""
#[derive(Clone)]
pub enum Fetcher {
    Header(String),
    Cookie(String),
    Host,
    Path,
    /// `crc32(header value) % modulus`, as a decimal string
    HeaderHashMod { header: String, modulus: u32 },
    Custom {
        name: String,
        key: String,
        fetch: CustomFetcher,
    },
}

impl Fetcher {
    pub fn fetch<'a>(&self, request: &RequestView<'a>) -> Cow<'a, str> {
        match self {
            Fetcher::Header(name) => Cow::Borrowed(request.header(name).unwrap_or("")),
            Fetcher::Cookie(name) => Cow::Borrowed(request.cookie(name).unwrap_or("")),
            Fetcher::Host => Cow::Borrowed(request.host()),
            Fetcher::Path => Cow::Borrowed(request.path()),
            Fetcher::HeaderHashMod { header, modulus } => match request.header(header) {
                Some(value) => {
                    Cow::Owned((crc32fast::hash(value.as_bytes()) % modulus).to_string())
                }
                None => Cow::Borrowed(""),
            },
            Fetcher::Custom { key, fetch, .. } => {
                Cow::Owned(fetch(request, key).unwrap_or_default())
            }
        }
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetcher::Header(name) => write!(f, "header({})", name),
            Fetcher::Cookie(name) => write!(f, "cookie({})", name),
            Fetcher::Host => f.write_str("host"),
            Fetcher::Path => f.write_str("path"),
            Fetcher::HeaderHashMod { header, modulus } => {
                write!(f, "headerHashMod({}%{})", header, modulus)
            }
            Fetcher::Custom { name, key, .. } => write!(f, "{}({})", name, key),
        }
    }
}

/// Compares a fetched value against the configured one
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Comparator {
    Eq(String),
    Neq(String),
    /// Membership in a comma separated list
    In(Vec<String>),
    Contains(String),
    /// Pattern compiled on first use through the [`RegexCache`]
    Regex(String),
    Empty,
    NotEmpty,
}

impl Comparator {
    pub fn parse(operator: &str, value: &str) -> Result<Self, ConfigError> {
        Ok(match operator {
            "eq" => Comparator::Eq(value.to_string()),
            "neq" => Comparator::Neq(value.to_string()),
            "in" => Comparator::In(value.split(',').map(|v| v.trim().to_string()).collect()),
            "contains" => Comparator::Contains(value.to_string()),
            "regex" => Comparator::Regex(value.to_string()),
            "empty" => Comparator::Empty,
            "notEmpty" => Comparator::NotEmpty,
            other => return Err(ConfigError::UnsupportedOperator(other.to_string())),
        })
    }

    pub fn matches(&self, actual: &str, regexes: &RegexCache) -> bool {
        match self {
            Comparator::Eq(expected) => actual == expected,
            Comparator::Neq(expected) => actual != expected,
            Comparator::In(options) => options.iter().any(|o| o == actual),
            Comparator::Contains(needle) => actual.contains(needle.as_str()),
            Comparator::Regex(pattern) => match regexes.get(pattern) {
                Ok(re) => re.is_match(actual),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid regex in expression route");
                    false
                }
            },
            Comparator::Empty => actual.is_empty(),
            Comparator::NotEmpty => !actual.is_empty(),
        }
    }
}

/// Compiled expression tree; built once, never mutated
#[derive(Clone, Debug)]
pub enum ENode {
    Leaf {
        fetcher: Fetcher,
        comparator: Comparator,
    },
    And(Vec<ENode>),
    Or(Vec<ENode>),
}

impl ENode {
    /// Evaluate against a request; AND stops at the first false child and
    /// OR at the first true one.
    pub fn evaluate(&self, request: &RequestView<'_>, regexes: &RegexCache) -> bool {
        match self {
            ENode::Leaf {
                fetcher,
                comparator,
            } => comparator.matches(&fetcher.fetch(request), regexes),
            ENode::And(children) => children.iter().all(|c| c.evaluate(request, regexes)),
            ENode::Or(children) => children.iter().any(|c| c.evaluate(request, regexes)),
        }
    }
}

type RegexCell = Arc<OnceLock<Result<Arc<Regex>, regex::Error>>>;

/// Bounded cache of compiled patterns.
///
/// Concurrent first uses of one pattern compile it once: the slot is
/// reserved under the lock and compiled outside it, with late arrivals
/// blocking on the same cell.
pub struct RegexCache {
    cells: Mutex<LruCache<String, RegexCell>>,
}

impl RegexCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cells: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        let cell = {
            let mut cells = self.cells.lock();
            match cells.get(pattern) {
                Some(cell) => cell.clone(),
                None => {
                    let cell = RegexCell::default();
                    cells.put(pattern.to_string(), cell.clone());
                    cell
                }
            }
        };
        cell.get_or_init(|| Regex::new(pattern).map(Arc::new))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(REGEX_CACHE_SIZE)
    }
}

/// Compiles [`ExprConfig`] trees and owns what evaluation needs: the custom
/// fetcher table and the regex cache.
///
/// Created once at startup and handed to the router builder; there is no
/// process-wide fetcher table.
#[derive(Default)]
pub struct MatcherRegistry {
    custom: HashMap<String, CustomFetcher>,
    regexes: RegexCache,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `source: <name>` available to expression leaves
    pub fn register_fetcher(&mut self, name: impl Into<String>, fetch: CustomFetcher) {
        self.custom.insert(name.into(), fetch);
    }

    pub fn regexes(&self) -> &RegexCache {
        &self.regexes
    }

    pub fn compile(&self, config: &ExprConfig) -> Result<ENode, ConfigError> {
        config.validate()?;
        self.compile_node(config)
    }

    pub fn evaluate(&self, node: &ENode, request: &RequestView<'_>) -> bool {
        node.evaluate(request, &self.regexes)
    }

    fn compile_node(&self, config: &ExprConfig) -> Result<ENode, ConfigError> {
        if !config.and.is_empty() {
            return Ok(ENode::And(
                config
                    .and
                    .iter()
                    .map(|c| self.compile_node(c))
                    .collect::<Result<_, _>>()?,
            ));
        }
        if !config.or.is_empty() {
            return Ok(ENode::Or(
                config
                    .or
                    .iter()
                    .map(|c| self.compile_node(c))
                    .collect::<Result<_, _>>()?,
            ));
        }

        let fetcher = self.fetcher(&config.source, &config.key)?;
        let comparator = Comparator::parse(&config.operator, &config.value)?;
        if let Comparator::Regex(pattern) = &comparator {
            self.regexes.get(pattern).map_err(|e| {
                ConfigError::InvalidRouteConfig(format!("invalid regex {:?}: {}", pattern, e))
            })?;
        }
        Ok(ENode::Leaf {
            fetcher,
            comparator,
        })
    }

    fn fetcher(&self, source: &str, key: &str) -> Result<Fetcher, ConfigError> {
        let require_key = || {
            if key.is_empty() {
                Err(ConfigError::InvalidRouteConfig(format!(
                    "{} fetcher requires a key",
                    source
                )))
            } else {
                Ok(())
            }
        };

        Ok(match source {
            "header" => {
                require_key()?;
                Fetcher::Header(key.to_ascii_lowercase())
            }
            "cookie" => {
                require_key()?;
                Fetcher::Cookie(key.to_string())
            }
            "host" => Fetcher::Host,
            "path" => Fetcher::Path,
            "headerHashMod" => {
                require_key()?;
                let (header, modulus) = parse_hash_mod_key(key)?;
                Fetcher::HeaderHashMod { header, modulus }
            }
            other => match self.custom.get(other) {
                Some(fetch) => Fetcher::Custom {
                    name: other.to_string(),
                    key: key.to_string(),
                    fetch: fetch.clone(),
                },
                None => return Err(ConfigError::UnsupportedFetcher(other.to_string())),
            },
        })
    }
}

/// `name` or `name%N`
fn parse_hash_mod_key(key: &str) -> Result<(String, u32), ConfigError> {
    match key.split_once('%') {
        None => Ok((key.to_ascii_lowercase(), DEFAULT_HASH_MODULUS)),
        Some((header, modulus)) => {
            let modulus = modulus
                .parse::<u32>()
                .ok()
                .filter(|m| *m > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidRouteConfig(format!("invalid hash modulus in {:?}", key))
                })?;
            Ok((header.to_ascii_lowercase(), modulus))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn leaf(source: &str, key: &str, operator: &str, value: &str) -> ExprConfig {
        ExprConfig {
            source: source.to_string(),
            key: key.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_comparators() {
        let cache = RegexCache::default();
        assert!(Comparator::parse("eq", "a").unwrap().matches("a", &cache));
        assert!(Comparator::parse("neq", "a").unwrap().matches("b", &cache));
        assert!(Comparator::parse("in", "a, b,c").unwrap().matches("b", &cache));
        assert!(!Comparator::parse("in", "a,b").unwrap().matches("c", &cache));
        assert!(Comparator::parse("contains", "ob").unwrap().matches("bob", &cache));
        assert!(Comparator::parse("regex", "^v[0-9]+$").unwrap().matches("v12", &cache));
        assert!(Comparator::parse("empty", "").unwrap().matches("", &cache));
        assert!(Comparator::parse("notEmpty", "").unwrap().matches("x", &cache));
        assert_eq!(
            Comparator::parse("gt", "1"),
            Err(ConfigError::UnsupportedOperator("gt".to_string()))
        );
    }

    #[test]
    fn test_header_and_cookie_leaves() {
        let registry = MatcherRegistry::new();
        let map = headers(&[("x-canary", "true"), ("cookie", "uid=42")]);
        let view = RequestView::new("/orders", "shop.example.com", &map);

        let node = registry
            .compile(&ExprConfig {
                and: vec![
                    leaf("header", "X-Canary", "eq", "true"),
                    leaf("cookie", "uid", "in", "41,42"),
                    leaf("host", "", "contains", "shop"),
                    leaf("path", "", "regex", "^/orders"),
                ],
                ..Default::default()
            })
            .unwrap();
        assert!(registry.evaluate(&node, &view));

        let node = registry
            .compile(&leaf("header", "x-missing", "empty", ""))
            .unwrap();
        assert!(registry.evaluate(&node, &view));
    }

    #[test]
    fn test_header_hash_mod_buckets() {
        let registry = MatcherRegistry::new();
        let map = headers(&[("x-user", "123456789")]);
        let view = RequestView::new("/", "", &map);

        // crc32("123456789") = 0xcbf43926 = 3421780262
        let node = registry
            .compile(&leaf("headerHashMod", "x-user%10", "eq", "2"))
            .unwrap();
        assert!(registry.evaluate(&node, &view));

        let node = registry
            .compile(&leaf("headerHashMod", "x-user", "eq", "62"))
            .unwrap();
        assert!(registry.evaluate(&node, &view));

        assert!(registry
            .compile(&leaf("headerHashMod", "x-user%0", "eq", "1"))
            .is_err());
    }

    #[test]
    fn test_and_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = MatcherRegistry::new();
        registry.register_fetcher(
            "probe",
            Arc::new(move |_: &RequestView<'_>, _: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some("hit".to_string())
            }),
        );

        let map = HeaderMap::new();
        let view = RequestView::new("/", "", &map);

        let and = registry
            .compile(&ExprConfig {
                and: vec![leaf("path", "", "eq", "/nope"), leaf("probe", "k", "eq", "hit")],
                ..Default::default()
            })
            .unwrap();
        assert!(!registry.evaluate(&and, &view));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let or = registry
            .compile(&ExprConfig {
                or: vec![leaf("path", "", "eq", "/"), leaf("probe", "k", "eq", "hit")],
                ..Default::default()
            })
            .unwrap();
        assert!(registry.evaluate(&or, &view));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let probe = registry.compile(&leaf("probe", "k", "eq", "hit")).unwrap();
        assert!(registry.evaluate(&probe, &view));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_source_and_bad_regex_rejected() {
        let registry = MatcherRegistry::new();
        assert_eq!(
            registry.compile(&leaf("query", "id", "eq", "1")).err(),
            Some(ConfigError::UnsupportedFetcher("query".to_string()))
        );
        assert!(matches!(
            registry.compile(&leaf("path", "", "regex", "(")),
            Err(ConfigError::InvalidRouteConfig(_))
        ));
    }

    #[test]
    fn test_regex_cache_compiles_once() {
        let cache = Arc::new(RegexCache::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get("^a+$").unwrap())
            })
            .collect();
        let compiled: Vec<Arc<Regex>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(compiled.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }
}
