//! Directory-backed transport
//!
//! Serves request URLs as files below a root directory. `.json` files are
//! answered with their parsed content, anything else with its text.
//! Responses arrive `latency_ms` after dispatch on the scheduler's clock.

use serde_json::{json, Value};
use skein_engine::{Deferred, Scheduler};
use skein_runtime::{HttpRequest, Transport};
use std::fmt;
use std::path::{Component, Path, PathBuf};

pub struct DirTransport {
    scheduler: Scheduler,
    root: PathBuf,
    latency_ms: u64,
}

impl DirTransport {
    pub fn new(scheduler: Scheduler, root: impl Into<PathBuf>, latency_ms: u64) -> Self {
        Self {
            scheduler,
            root: root.into(),
            latency_ms,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a URL onto a file below the root; `None` if it would escape it
    fn resolve(&self, url: &str) -> Option<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

fn read_response(url: &str, path: &Path) -> Result<Value, Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| json!({ "status": 404, "url": url, "error": err.to_string() }))?;
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&text)
            .map_err(|err| json!({ "status": 500, "url": url, "error": err.to_string() }))
    } else {
        Ok(Value::String(text))
    }
}

impl Transport for DirTransport {
    fn dispatch(&self, request: HttpRequest, deferred: Deferred) {
        tracing::debug!(method = %request.method, url = %request.url, "dispatch");
        let path = self.resolve(&request.url);
        self.scheduler.defer(
            move || {
                let outcome = match path {
                    Some(path) => read_response(&request.url, &path),
                    None => Err(json!({ "status": 403, "url": request.url })),
                };
                match outcome {
                    Ok(body) => deferred.resolve(body),
                    Err(reason) => {
                        tracing::warn!(url = %request.url, %reason, "request failed");
                        deferred.reject(reason);
                    }
                }
            },
            self.latency_ms,
        );
    }
}

impl fmt::Debug for DirTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirTransport")
            .field("root", &self.root)
            .field("latency_ms", &self.latency_ms)
            .finish()
    }
}
