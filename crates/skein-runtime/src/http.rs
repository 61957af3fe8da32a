//! Promise-returning HTTP client over a pluggable transport
//!
//! The client only shapes requests; a [`Transport`] carries them and settles
//! the deferred it is handed. [`MemoryTransport`] answers from an in-process
//! route table on the scheduler, which is what tests and offline rendering
//! use.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use skein_engine::{Deferred, Kernel, Promise, Scheduler};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Option keys owned by the client; callers cannot override them
pub const RESERVED_OPTIONS: [&str; 4] = ["type", "dataType", "success", "error"];

/// Request flavour
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    /// `GET` answered with a JSON-with-padding payload
    Jsonp,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Jsonp => "JSONP",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "JSONP" => Ok(Method::Jsonp),
            other => Err(format!(
                "unsupported method '{other}', expected GET, POST or JSONP"
            )),
        }
    }
}

/// A request handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Query or body parameters
    pub params: Value,
    /// Caller options with the reserved keys removed
    pub options: Map<String, Value>,
}

/// Carries requests and settles their deferred
///
/// Implementations must settle asynchronously (through the scheduler or a
/// later turn), never inside `dispatch`.
pub trait Transport {
    fn dispatch(&self, request: HttpRequest, deferred: Deferred);
}

/// HTTP client handing out promises of response bodies
#[derive(Clone)]
pub struct HttpClient {
    kernel: Kernel,
    transport: Rc<dyn Transport>,
}

impl HttpClient {
    pub fn new(kernel: Kernel, transport: Rc<dyn Transport>) -> Self {
        Self { kernel, transport }
    }

    pub fn get(&self, url: &str, params: Value, options: Value) -> Promise {
        self.request(Method::Get, url, params, options)
    }

    pub fn post(&self, url: &str, params: Value, options: Value) -> Promise {
        self.request(Method::Post, url, params, options)
    }

    pub fn jsonp(&self, url: &str, params: Value, options: Value) -> Promise {
        self.request(Method::Jsonp, url, params, options)
    }

    /// Issue a request; the promise settles with the response body or the
    /// transport's error payload
    pub fn request(&self, method: Method, url: &str, params: Value, options: Value) -> Promise {
        let deferred = self.kernel.defer();
        let promise = deferred.promise();
        let request = HttpRequest {
            method,
            url: url.to_string(),
            params,
            options: filter_options(options),
        };
        tracing::debug!(%method, url, "http request");
        self.transport.dispatch(request, deferred);
        promise
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

/// Keep caller options except the reserved keys; non-objects become `{}`
pub fn filter_options(options: Value) -> Map<String, Value> {
    match options {
        Value::Object(mut map) => {
            for key in RESERVED_OPTIONS {
                map.remove(key);
            }
            map
        }
        _ => Map::new(),
    }
}

type RouteHandler = Rc<dyn Fn(&HttpRequest) -> Result<Value, Value>>;

/// In-process transport answering from a route table
///
/// Responses are delivered `latency_ms` after dispatch. Unknown URLs reject
/// with `{"status": 404, "url": ...}`.
#[derive(Clone)]
pub struct MemoryTransport {
    scheduler: Scheduler,
    latency_ms: u64,
    routes: Rc<RefCell<FxHashMap<String, RouteHandler>>>,
    log: Rc<RefCell<Vec<HttpRequest>>>,
}

impl MemoryTransport {
    pub fn new(scheduler: Scheduler, latency_ms: u64) -> Self {
        Self {
            scheduler,
            latency_ms,
            routes: Rc::new(RefCell::new(FxHashMap::default())),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Answer `url` with a fixed body
    pub fn route(&self, url: impl Into<String>, body: impl Into<Value>) {
        let body = body.into();
        self.route_with(url, move |_| Ok(body.clone()));
    }

    /// Answer `url` by calling `handler`; `Err` rejects the request
    pub fn route_with<F>(&self, url: impl Into<String>, handler: F)
    where
        F: Fn(&HttpRequest) -> Result<Value, Value> + 'static,
    {
        self.routes.borrow_mut().insert(url.into(), Rc::new(handler));
    }

    /// Every request dispatched so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.borrow().clone()
    }
}

impl Transport for MemoryTransport {
    fn dispatch(&self, request: HttpRequest, deferred: Deferred) {
        self.log.borrow_mut().push(request.clone());
        let handler = self.routes.borrow().get(&request.url).cloned();
        self.scheduler.defer(
            move || {
                let outcome = match handler {
                    Some(handler) => handler(&request),
                    None => Err(json!({ "status": 404, "url": request.url })),
                };
                match outcome {
                    Ok(body) => deferred.resolve(body),
                    Err(reason) => {
                        tracing::debug!(url = %request.url, %reason, "request failed");
                        deferred.reject(reason);
                    }
                }
            },
            self.latency_ms,
        );
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("latency_ms", &self.latency_ms)
            .field("routes", &self.routes.borrow().len())
            .finish()
    }
}
