//! Static responses for mock routes; no upstream is contacted

use hyper::{Response, StatusCode};
use switchyard_api::MockSpec;

use crate::body::{response, ProxyBody};

pub fn mock_response(spec: &MockSpec) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(spec.status_code).unwrap_or(StatusCode::OK);
    response(status, spec.content_type.mime(), spec.body.clone())
}
