//! Borrowed view of the request attributes routes match on

use hyper::header::{HeaderMap, COOKIE, HOST};
use hyper::Request;

#[derive(Clone, Copy, Debug)]
pub struct RequestView<'a> {
    path: &'a str,
    host: &'a str,
    headers: &'a HeaderMap,
}

impl<'a> RequestView<'a> {
    pub fn new(path: &'a str, host: &'a str, headers: &'a HeaderMap) -> Self {
        Self {
            path,
            host,
            headers,
        }
    }

    /// Host comes from the `host` header, or the URI authority for HTTP/2
    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        let headers = request.headers();
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| request.uri().authority().map(|a| a.as_str()))
            .unwrap_or("");
        Self::new(request.uri().path(), host, headers)
    }

    pub fn path(&self) -> &'a str {
        self.path
    }

    pub fn host(&self) -> &'a str {
        self.host
    }

    pub fn headers(&self) -> &'a HeaderMap {
        self.headers
    }

    /// First value of `name` that is valid visible ASCII
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_from_request() {
        let request = Request::builder()
            .uri("/api/users?id=1")
            .header("host", "example.com")
            .header("cookie", "session=abc; theme=dark")
            .header("x-version", "v2")
            .body(())
            .unwrap();
        let view = RequestView::from_request(&request);

        assert_eq!(view.path(), "/api/users");
        assert_eq!(view.host(), "example.com");
        assert_eq!(view.header("x-version"), Some("v2"));
        assert_eq!(view.cookie("theme"), Some("dark"));
        assert_eq!(view.cookie("missing"), None);
    }

    #[test]
    fn test_host_from_authority() {
        let request = Request::builder()
            .uri("http://h2.example.com/grpc.Service/Call")
            .body(())
            .unwrap();
        assert_eq!(RequestView::from_request(&request).host(), "h2.example.com");
    }
}
