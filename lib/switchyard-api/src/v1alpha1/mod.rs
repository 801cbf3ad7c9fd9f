/// API version v1alpha1 for switchyard routing configuration

pub mod instance;
pub mod route;

pub use instance::{Instance, DEFAULT_VERSION};
pub use route::{
    ContentType, ExprConfig, LbPolicy, MatchType, MockContent, MockSpec, Rewrite, RewriteType,
    RouteConfig, RouteSpec, Target, TargetConfig, TargetType,
};

/// API version of the route configuration schema
pub const API_VERSION: &str = "v1alpha1";
