//! Path rewriting applied before a request is forwarded

use switchyard_api::Rewrite;

/// Rewrite `path` under `rewrite`; the result always starts with '/'
pub fn rewrite_path(rewrite: &Rewrite, path: &str) -> String {
    let rewritten = match rewrite {
        Rewrite::CopyFullPath => path,
        Rewrite::StripPrefix(prefix) => path.strip_prefix(prefix.as_str()).unwrap_or(path),
        Rewrite::ReplaceAny(fixed) => fixed.as_str(),
    };

    if rewritten.starts_with('/') {
        rewritten.to_string()
    } else {
        format!("/{}", rewritten)
    }
}

/// Rewritten path plus the original query string
pub fn path_and_query(rewrite: &Rewrite, path: &str, query: Option<&str>) -> String {
    let mut rewritten = rewrite_path(rewrite, path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    rewritten
}
