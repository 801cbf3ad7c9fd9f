use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Version tag every untagged instance is normalized to.
pub const DEFAULT_VERSION: &str = "default";

/// Instance is a discovered backend address as reported by a registry
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Host name or IP of the backend
    pub address: String,

    /// Port where the backend listens
    pub port: u16,

    /// Relative weight for weighted load balancing
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Version tag; empty means version-agnostic
    #[serde(default)]
    pub version: String,

    /// Region the instance runs in (empty when unknown)
    #[serde(default)]
    pub region: String,

    /// Zone inside the region (empty when unknown)
    #[serde(default)]
    pub zone: String,
}

impl Instance {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            weight: default_weight(),
            version: String::new(),
            region: String::new(),
            zone: String::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_locality(mut self, region: impl Into<String>, zone: impl Into<String>) -> Self {
        self.region = region.into();
        self.zone = zone.into();
        self
    }

    /// The version tag with `""` mapped to [`DEFAULT_VERSION`]
    pub fn normalized_version(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.version
        }
    }

    /// `address:port`, used as the node id and as the outbound authority
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

fn default_weight() -> u32 {
    1
}
