use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// RouteConfig is the declarative description of one gateway route.
///
/// Enumerated fields are kept as strings so a single bad value rejects only
/// this route; call [`RouteConfig::validate`] to obtain a typed [`RouteSpec`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteConfig {
    /// "fullMatch", "prefixMatch" or "exprMatch"
    pub match_type: String,

    /// Request path; required unless exprMatch
    pub path: String,

    /// Boolean expression for exprMatch routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<ExprConfig>,

    /// Evaluation priority among exprMatch routes (higher first)
    pub priority: i32,

    /// "discovery", "domain" or "mock"
    pub target_type: String,

    /// Service name for discovery targets
    pub service_name: String,

    /// Static weighted targets for domain targets
    pub targets: Vec<TargetConfig>,

    /// "round_robin", "weighted_round_robin" or "hash_policy"
    pub target_lb_policy: String,

    /// Header whose value is the hash key for hash_policy
    pub hash_header: String,

    /// "copyFullPath", "stripPrefix" or "replaceAny"
    pub rewrite_type: String,

    /// Replacement path for replaceAny
    pub replace_path: String,

    /// Static response for mock targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_content: Option<MockContent>,
}

/// Expression tree node: a leaf comparison or an AND/OR combinator
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExprConfig {
    pub source: String,
    pub key: String,
    pub operator: String,
    pub value: String,
    pub and: Vec<ExprConfig>,
    pub or: Vec<ExprConfig>,
}

/// One static upstream of a domain target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TargetConfig {
    /// `host:port` of the upstream
    pub target: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Mock response body and status
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MockContent {
    /// "json" or "string"
    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default = "default_status_code")]
    pub status_code: u16,

    #[serde(default)]
    pub resp_str: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchType {
    FullMatch,
    PrefixMatch,
    ExprMatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetType {
    Discovery,
    Domain,
    Mock,
}

/// Load balancing policy for a route's targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LbPolicy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    HashPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum RewriteType {
    #[default]
    CopyFullPath,
    StripPrefix,
    ReplaceAny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Text,
}

impl FromStr for MatchType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fullMatch" => Ok(MatchType::FullMatch),
            "prefixMatch" => Ok(MatchType::PrefixMatch),
            "exprMatch" => Ok(MatchType::ExprMatch),
            other => Err(ConfigError::InvalidRouteConfig(format!(
                "unknown matchType {:?}",
                other
            ))),
        }
    }
}

impl FromStr for TargetType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovery" => Ok(TargetType::Discovery),
            "domain" => Ok(TargetType::Domain),
            "mock" => Ok(TargetType::Mock),
            other => Err(ConfigError::UnsupportedTargetType(other.to_string())),
        }
    }
}

impl FromStr for LbPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "round_robin" => Ok(LbPolicy::RoundRobin),
            "weighted_round_robin" => Ok(LbPolicy::WeightedRoundRobin),
            "hash_policy" => Ok(LbPolicy::HashPolicy),
            other => Err(ConfigError::InvalidRouteConfig(format!(
                "unknown targetLbPolicy {:?}",
                other
            ))),
        }
    }
}

impl FromStr for RewriteType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "copyFullPath" => Ok(RewriteType::CopyFullPath),
            "stripPrefix" => Ok(RewriteType::StripPrefix),
            "replaceAny" => Ok(RewriteType::ReplaceAny),
            other => Err(ConfigError::InvalidRouteConfig(format!(
                "unknown rewriteType {:?}",
                other
            ))),
        }
    }
}

impl FromStr for ContentType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ContentType::Json),
            "string" => Ok(ContentType::Text),
            other => Err(ConfigError::InvalidRouteConfig(format!(
                "unknown mock contentType {:?}",
                other
            ))),
        }
    }
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Text => "text/plain; charset=utf-8",
        }
    }
}

impl fmt::Display for LbPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LbPolicy::RoundRobin => "round_robin",
            LbPolicy::WeightedRoundRobin => "weighted_round_robin",
            LbPolicy::HashPolicy => "hash_policy",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetType::Discovery => "discovery",
            TargetType::Domain => "domain",
            TargetType::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// Path rewrite applied before forwarding
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rewrite {
    CopyFullPath,
    /// Strip the registered route prefix
    StripPrefix(String),
    /// Replace the whole path with a fixed one
    ReplaceAny(String),
}

/// Validated mock response
#[derive(Clone, Debug)]
pub struct MockSpec {
    pub content_type: ContentType,
    pub status_code: u16,
    pub body: String,
}

/// Validated forwarding target
#[derive(Clone, Debug)]
pub enum Target {
    Discovery {
        service_name: String,
        lb_policy: LbPolicy,
        hash_header: Option<String>,
    },
    Domain {
        targets: Vec<TargetConfig>,
        lb_policy: LbPolicy,
        hash_header: Option<String>,
    },
    Mock(MockSpec),
}

impl Target {
    pub fn target_type(&self) -> TargetType {
        match self {
            Target::Discovery { .. } => TargetType::Discovery,
            Target::Domain { .. } => TargetType::Domain,
            Target::Mock(_) => TargetType::Mock,
        }
    }
}

/// A route that passed validation; immutable once registered
#[derive(Clone, Debug)]
pub struct RouteSpec {
    pub match_type: MatchType,
    pub path: String,
    pub expr: Option<ExprConfig>,
    pub priority: i32,
    pub target: Target,
    pub rewrite: Rewrite,
}

impl RouteConfig {
    /// Human readable identity used in logs and metrics labels
    pub fn name(&self) -> String {
        if self.path.is_empty() {
            format!("expr:{}", self.priority)
        } else {
            self.path.clone()
        }
    }

    /// Validate this route; fails closed on any unknown or missing value
    pub fn validate(&self) -> Result<RouteSpec> {
        let match_type: MatchType = self.match_type.parse()?;

        let expr = match match_type {
            MatchType::ExprMatch => {
                let expr = self.expr.clone().ok_or_else(|| {
                    ConfigError::InvalidRouteConfig("exprMatch route requires expr".to_string())
                })?;
                expr.validate()?;
                Some(expr)
            }
            MatchType::FullMatch | MatchType::PrefixMatch => {
                if self.path.is_empty() {
                    return Err(ConfigError::InvalidRouteConfig(
                        "path is required for fullMatch and prefixMatch routes".to_string(),
                    ));
                }
                if !self.path.starts_with('/') {
                    return Err(ConfigError::InvalidRouteConfig(format!(
                        "path {:?} must start with '/'",
                        self.path
                    )));
                }
                None
            }
        };

        let target = self.validate_target()?;
        let rewrite = self.validate_rewrite(match_type)?;

        Ok(RouteSpec {
            match_type,
            path: self.path.clone(),
            expr,
            priority: self.priority,
            target,
            rewrite,
        })
    }

    fn validate_target(&self) -> Result<Target> {
        let target_type: TargetType = self.target_type.parse()?;
        let lb_policy: LbPolicy = self.target_lb_policy.parse()?;
        let hash_header = if self.hash_header.is_empty() {
            None
        } else {
            Some(self.hash_header.to_ascii_lowercase())
        };

        match target_type {
            TargetType::Discovery => {
                if self.service_name.is_empty() {
                    return Err(ConfigError::InvalidRouteConfig(
                        "discovery target requires serviceName".to_string(),
                    ));
                }
                Ok(Target::Discovery {
                    service_name: self.service_name.clone(),
                    lb_policy,
                    hash_header,
                })
            }
            TargetType::Domain => {
                if self.targets.is_empty() {
                    return Err(ConfigError::InvalidRouteConfig(
                        "domain target requires at least one target".to_string(),
                    ));
                }
                for target in &self.targets {
                    if target.target.is_empty() {
                        return Err(ConfigError::InvalidRouteConfig(
                            "domain target address must not be empty".to_string(),
                        ));
                    }
                    if target.weight == 0 {
                        return Err(ConfigError::InvalidRouteConfig(format!(
                            "domain target {} has weight 0",
                            target.target
                        )));
                    }
                }
                Ok(Target::Domain {
                    targets: self.targets.clone(),
                    lb_policy,
                    hash_header,
                })
            }
            TargetType::Mock => {
                let mock = self.mock_content.as_ref().ok_or_else(|| {
                    ConfigError::InvalidRouteConfig("mock target requires mockContent".to_string())
                })?;
                let content_type: ContentType = mock.content_type.parse()?;
                if content_type == ContentType::Json {
                    serde_json::from_str::<serde_json::Value>(&mock.resp_str).map_err(|e| {
                        ConfigError::InvalidRouteConfig(format!("mock respStr is not JSON: {}", e))
                    })?;
                }
                if !(100..=599).contains(&mock.status_code) {
                    return Err(ConfigError::InvalidRouteConfig(format!(
                        "mock statusCode {} out of range",
                        mock.status_code
                    )));
                }
                Ok(Target::Mock(MockSpec {
                    content_type,
                    status_code: mock.status_code,
                    body: mock.resp_str.clone(),
                }))
            }
        }
    }

    fn validate_rewrite(&self, match_type: MatchType) -> Result<Rewrite> {
        match self.rewrite_type.parse::<RewriteType>()? {
            RewriteType::CopyFullPath => Ok(Rewrite::CopyFullPath),
            RewriteType::StripPrefix => {
                if match_type == MatchType::ExprMatch {
                    return Err(ConfigError::InvalidRouteConfig(
                        "stripPrefix needs a registered path".to_string(),
                    ));
                }
                Ok(Rewrite::StripPrefix(self.path.clone()))
            }
            RewriteType::ReplaceAny => {
                if self.replace_path.is_empty() {
                    return Err(ConfigError::InvalidRouteConfig(
                        "replaceAny requires replacePath".to_string(),
                    ));
                }
                Ok(Rewrite::ReplaceAny(self.replace_path.clone()))
            }
        }
    }
}

impl ExprConfig {
    pub fn is_leaf(&self) -> bool {
        self.and.is_empty() && self.or.is_empty()
    }

    /// Structural check: a leaf names a source and operator, an inner node
    /// has exactly one of `and`/`or` and no leaf fields.
    pub fn validate(&self) -> Result<()> {
        if self.is_leaf() {
            if self.source.is_empty() || self.operator.is_empty() {
                return Err(ConfigError::InvalidRouteConfig(
                    "expression leaf requires source and operator".to_string(),
                ));
            }
            return Ok(());
        }
        if !self.and.is_empty() && !self.or.is_empty() {
            return Err(ConfigError::InvalidRouteConfig(
                "expression node cannot have both and/or children".to_string(),
            ));
        }
        if !self.source.is_empty() || !self.operator.is_empty() {
            return Err(ConfigError::InvalidRouteConfig(
                "expression node mixes a comparison with children".to_string(),
            ));
        }
        self.and.iter().chain(self.or.iter()).try_for_each(ExprConfig::validate)
    }
}

fn default_weight() -> u32 {
    1
}

fn default_content_type() -> String {
    "json".to_string()
}

fn default_status_code() -> u16 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_route() -> RouteConfig {
        RouteConfig {
            match_type: "prefixMatch".to_string(),
            path: "/host".to_string(),
            target_type: "domain".to_string(),
            targets: vec![
                TargetConfig { target: "127.0.0.1:9001".to_string(), weight: 1 },
                TargetConfig { target: "127.0.0.1:9002".to_string(), weight: 1 },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_domain_route_defaults() {
        let spec = domain_route().validate().unwrap();
        assert_eq!(spec.match_type, MatchType::PrefixMatch);
        assert_eq!(spec.rewrite, Rewrite::CopyFullPath);
        match spec.target {
            Target::Domain { targets, lb_policy, hash_header } => {
                assert_eq!(targets.len(), 2);
                assert_eq!(lb_policy, LbPolicy::RoundRobin);
                assert!(hash_header.is_none());
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_domain_route_requires_targets() {
        let mut route = domain_route();
        route.targets.clear();
        assert!(matches!(route.validate(), Err(ConfigError::InvalidRouteConfig(_))));
    }

    #[test]
    fn test_unknown_target_type() {
        let mut route = domain_route();
        route.target_type = "ftp".to_string();
        assert_eq!(
            route.validate().unwrap_err(),
            ConfigError::UnsupportedTargetType("ftp".to_string())
        );
    }

    #[test]
    fn test_unknown_match_type() {
        let mut route = domain_route();
        route.match_type = "fuzzyMatch".to_string();
        assert!(matches!(route.validate(), Err(ConfigError::InvalidRouteConfig(_))));
    }

    #[test]
    fn test_unknown_lb_policy() {
        let mut route = domain_route();
        route.target_lb_policy = "random".to_string();
        assert!(route.validate().is_err());
    }

    #[test]
    fn test_path_required_for_prefix() {
        let mut route = domain_route();
        route.path.clear();
        assert!(route.validate().is_err());
    }

    #[test]
    fn test_strip_prefix_keeps_registered_path() {
        let mut route = domain_route();
        route.rewrite_type = "stripPrefix".to_string();
        let spec = route.validate().unwrap();
        assert_eq!(spec.rewrite, Rewrite::StripPrefix("/host".to_string()));
    }

    #[test]
    fn test_replace_any_requires_path() {
        let mut route = domain_route();
        route.rewrite_type = "replaceAny".to_string();
        assert!(route.validate().is_err());
        route.replace_path = "/fixed".to_string();
        assert_eq!(
            route.validate().unwrap().rewrite,
            Rewrite::ReplaceAny("/fixed".to_string())
        );
    }

    #[test]
    fn test_mock_route_from_yaml() {
        let yaml = r#"
matchType: fullMatch
path: /mock1
targetType: mock
mockContent:
  contentType: json
  statusCode: 200
  respStr: '{"code":2001,"message":"success"}'
"#;
        let route: RouteConfig = serde_yaml::from_str(yaml).unwrap();
        let spec = route.validate().unwrap();
        match spec.target {
            Target::Mock(mock) => {
                assert_eq!(mock.status_code, 200);
                assert_eq!(mock.content_type, ContentType::Json);
                assert_eq!(mock.body, r#"{"code":2001,"message":"success"}"#);
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_mock_json_must_parse() {
        let route = RouteConfig {
            match_type: "fullMatch".to_string(),
            path: "/mock".to_string(),
            target_type: "mock".to_string(),
            mock_content: Some(MockContent {
                content_type: "json".to_string(),
                status_code: 200,
                resp_str: "{not json".to_string(),
            }),
            ..Default::default()
        };
        assert!(route.validate().is_err());
    }

    #[test]
    fn test_expr_structure() {
        let leaf = ExprConfig {
            source: "header".to_string(),
            key: "x-env".to_string(),
            operator: "eq".to_string(),
            value: "canary".to_string(),
            ..Default::default()
        };
        assert!(leaf.validate().is_ok());

        let both = ExprConfig {
            and: vec![leaf.clone()],
            or: vec![leaf.clone()],
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let mixed = ExprConfig {
            and: vec![leaf.clone()],
            ..leaf.clone()
        };
        assert!(mixed.validate().is_err());

        let empty = ExprConfig::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_expr_route_requires_expr() {
        let route = RouteConfig {
            match_type: "exprMatch".to_string(),
            target_type: "discovery".to_string(),
            service_name: "users".to_string(),
            ..Default::default()
        };
        assert!(route.validate().is_err());
    }
}
