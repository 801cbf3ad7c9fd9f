//! Version and locality partitioning on top of selectors

pub mod nearby;
pub mod table;
pub mod version;

pub use nearby::{Locality, NearbyRouter};
pub use table::{ServiceTable, TableOptions};
pub use version::VersionRouter;

use switchyard_api::DEFAULT_VERSION;

/// Per-request routing signal
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteContext {
    /// Desired version, usually taken from a request header
    pub version: Option<String>,
    /// Key for hash-based selectors
    pub hash_key: Option<String>,
}

impl RouteContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version = if version.is_empty() { None } else { Some(version) };
        self
    }

    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = Some(key.into());
        self
    }

    /// Same context pinned to the default partition
    pub fn pinned_to_default(&self) -> Self {
        Self {
            version: Some(DEFAULT_VERSION.to_string()),
            hash_key: self.hash_key.clone(),
        }
    }

    pub fn hash_key(&self) -> Option<&str> {
        self.hash_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_version_is_absent() {
        assert_eq!(RouteContext::new().with_version("").version, None);
        assert_eq!(
            RouteContext::new().with_version("v2").version.as_deref(),
            Some("v2")
        );
    }

    #[test]
    fn test_pinned_to_default_keeps_key() {
        let ctx = RouteContext::new().with_version("v2").with_hash_key("user-1");
        let pinned = ctx.pinned_to_default();
        assert_eq!(pinned.version.as_deref(), Some("default"));
        assert_eq!(pinned.hash_key(), Some("user-1"));
    }
}
