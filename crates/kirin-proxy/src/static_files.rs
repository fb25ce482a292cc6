//! Static content fallback for paths no service claims.

use std::path::{Component, Path, PathBuf};

use actix_files::NamedFile;
use actix_web::{HttpRequest, HttpResponse};

use crate::error::ProxyError;

const INDEX_FILE: &str = "index.html";

/// Map a request path onto a file below `root`.
///
/// Rejects traversal, hidden files and anything that is not a plain path
/// segment. Directories resolve to their index file.
pub fn resolve_path(root: &Path, request_path: &str) -> Result<PathBuf, ProxyError> {
    let decoded = urlencoding::decode(request_path)
        .map_err(|_| ProxyError::BadRequest("invalid URL encoding in path".to_string()))?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return Err(ProxyError::BadRequest("invalid characters in path".to_string()));
    }

    let mut path = root.to_path_buf();
    for segment in decoded.split('/').filter(|s| !s.is_empty()) {
        if segment.starts_with('.') {
            return Err(ProxyError::RouteNotFound(request_path.to_string()));
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return Err(ProxyError::RouteNotFound(request_path.to_string())),
        }
    }

    if path.is_dir() {
        path.push(INDEX_FILE);
    }
    Ok(path)
}

/// Serve `req`'s path from `root`, or `RouteNotFound`.
pub async fn serve(req: &HttpRequest, root: &Path) -> Result<HttpResponse, ProxyError> {
    let path = resolve_path(root, req.path())?;
    match NamedFile::open_async(&path).await {
        Ok(file) => Ok(file.use_etag(true).use_last_modified(true).into_response(req)),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "static file not served");
            Err(ProxyError::RouteNotFound(req.path().to_string()))
        }
    }
}
