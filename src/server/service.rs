use std::collections::HashMap;
use std::io;
use std::sync::{Arc, RwLock};

use http::Method;
use serde_json::json;
use tracing::warn;

use super::http_server::HttpService;
use super::request::ParsedRequest;
use super::response::{write_json_error, write_reply, WireResponse};
use crate::dispatcher::{Dispatcher, HeaderVec, RequestParts};
use crate::ids::RequestId;
use crate::router::{ParamVec, Router};
use crate::static_files::StaticFiles;

/// A directory of files served under a URL prefix.
#[derive(Debug, Clone)]
pub struct StaticMount {
    pub prefix: String,
    pub files: StaticFiles,
}

/// The service the server loop drives: static mounts, then routing, then
/// dispatch.
///
/// Cloned per connection; all state is behind `Arc`.
#[derive(Clone)]
pub struct AppService {
    pub router: Arc<RwLock<Router>>,
    pub dispatcher: Arc<RwLock<Dispatcher>>,
    static_mounts: Arc<Vec<StaticMount>>,
}

impl AppService {
    #[must_use]
    pub fn new(
        router: Arc<RwLock<Router>>,
        dispatcher: Arc<RwLock<Dispatcher>>,
        static_mounts: Vec<StaticMount>,
    ) -> Self {
        Self {
            router,
            dispatcher,
            static_mounts: Arc::new(static_mounts),
        }
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: ParsedRequest, res: &mut WireResponse) -> io::Result<()> {
        let request_id =
            RequestId::from_header_or_new(req.headers.get("x-request-id").map(String::as_str));

        // Static mounts are checked first so a mounted file shadows routes,
        // and a miss falls through to routing.
        if req.method == Method::GET || req.method == Method::HEAD {
            for mount in self.static_mounts.iter() {
                let Some(rest) = strip_mount_prefix(&req.path, &mount.prefix) else {
                    continue;
                };
                match mount.files.load(rest) {
                    Ok((bytes, content_type)) => {
                        res.status_code(200);
                        res.header("Content-Type", content_type);
                        res.body_vec(bytes);
                        return Ok(());
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(error = %e, path = %req.path, "static file read failed");
                        write_json_error(res, 500, json!({ "error": "static file read failed" }));
                        return Ok(());
                    }
                }
            }
        }

        let route_match = {
            let router = self.router.read().unwrap();
            router.route(&req.method, &req.path)
        };
        let Some(route_match) = route_match else {
            warn!(method = %req.method, path = %req.path, "no route matched");
            write_json_error(
                res,
                404,
                json!({ "error": "Not Found", "method": req.method.as_str(), "path": req.path }),
            );
            return Ok(());
        };

        let parts = RequestParts {
            request_id,
            method: req.method.clone(),
            path: req.path.clone(),
            query_params: to_param_vec(&req.query_params),
            headers: to_header_vec(&req.headers),
            cookies: to_header_vec(&req.cookies),
            body: req.body,
        };

        let reply = {
            let dispatcher = self.dispatcher.read().unwrap();
            dispatcher.dispatch(route_match, parts)
        };
        match reply {
            Some(reply) => write_reply(res, reply),
            None => {
                // Matched route without a live handler is a wiring bug, not
                // a client error.
                write_json_error(res, 500, json!({ "error": "handler not registered" }));
            }
        }
        Ok(())
    }
}

/// Remainder of `path` under `prefix`, if the prefix matches on a segment
/// boundary. An exact prefix hit yields the empty remainder (the mount's
/// index).
fn strip_mount_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() || prefix == "/" {
        return Some(path.trim_start_matches('/'));
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

fn to_param_vec(map: &HashMap<String, String>) -> ParamVec {
    map.iter()
        .map(|(k, v)| (Arc::from(k.as_str()), v.clone()))
        .collect()
}

fn to_header_vec(map: &HashMap<String, String>) -> HeaderVec {
    map.iter()
        .map(|(k, v)| (Arc::from(k.as_str()), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mount_prefix() {
        assert_eq!(strip_mount_prefix("/public/a.txt", "/public"), Some("a.txt"));
        assert_eq!(strip_mount_prefix("/public", "/public"), Some(""));
        assert_eq!(strip_mount_prefix("/public/", "/public"), Some(""));
        assert_eq!(strip_mount_prefix("/publicfoo", "/public"), None);
        assert_eq!(strip_mount_prefix("/other", "/public"), None);
        assert_eq!(strip_mount_prefix("/anything/x", "/"), Some("anything/x"));
    }

    #[test]
    fn test_header_vec_conversion() {
        let mut map = HashMap::new();
        map.insert("content-type".to_string(), "application/json".to_string());
        let vec = to_header_vec(&map);
        assert_eq!(vec.len(), 1);
        assert_eq!(vec[0].0.as_ref(), "content-type");
        assert_eq!(vec[0].1, "application/json");
    }
}
