//! Batch requests over named data sources
//!
//! Data sources are registered once by name; a [`Batch`] then collects data
//! and template requests and fires them together, resolving with their
//! results in the order they were added.

use crate::cache::{Cache, CacheError, CacheFactory};
use crate::http::{HttpClient, Method};
use crate::template::TemplateLoader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skein_engine::{Kernel, Promise};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Cache id holding the registered sources
pub const SOURCE_CACHE_ID: &str = "$$dataSourceMap";

/// Batch request misuse
#[derive(Debug, Error)]
pub enum BatchError {
    /// No data source registered under this name
    #[error("data source '{0}' does not exist")]
    UnknownSource(String),

    /// Backing cache could not be opened
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Where a data source lives and how to call it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub url: String,

    /// Defaults to `GET`
    #[serde(default)]
    pub method: Method,
}

impl SourceConfig {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
        }
    }
}

/// Registry of named data sources
#[derive(Clone)]
pub struct DataSources {
    kernel: Kernel,
    http: HttpClient,
    loader: TemplateLoader,
    sources: Rc<Cache<SourceConfig>>,
}

impl DataSources {
    pub fn new(
        kernel: Kernel,
        caches: &CacheFactory,
        http: HttpClient,
        loader: TemplateLoader,
    ) -> Result<Self, BatchError> {
        Ok(Self {
            kernel,
            http,
            loader,
            sources: caches.cache::<SourceConfig>(SOURCE_CACHE_ID)?,
        })
    }

    /// Register or replace a source
    pub fn register(&self, name: impl Into<String>, config: SourceConfig) -> &Self {
        let name = name.into();
        tracing::debug!(source = %name, url = %config.url, method = %config.method, "data source registered");
        self.sources.put(name, config);
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.sources.has(name)
    }

    /// Start an empty batch
    pub fn batch(&self) -> Batch {
        Batch {
            owner: self.clone(),
            entries: Vec::new(),
        }
    }

    fn execute(&self, entry: &Entry) -> Promise {
        match entry {
            Entry::Data { source, params } => {
                let params = params.clone();
                match source.method {
                    Method::Get => self.http.get(&source.url, params, Value::Null),
                    Method::Post => self.http.post(&source.url, params, Value::Null),
                    Method::Jsonp => self.http.jsonp(&source.url, params, Value::Null),
                }
            }
            Entry::Template { url, tid } => match self.loader.load(url, tid.as_deref()) {
                Ok(promise) => promise,
                Err(err) => self.kernel.reject(err.to_string()),
            },
        }
    }
}

impl fmt::Debug for DataSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.sources.keys();
        names.sort();
        f.debug_struct("DataSources").field("sources", &names).finish()
    }
}

enum Entry {
    Data { source: SourceConfig, params: Value },
    Template { url: String, tid: Option<String> },
}

/// Requests collected for one combined round trip
pub struct Batch {
    owner: DataSources,
    entries: Vec<Entry>,
}

impl Batch {
    /// Add a request to the named data source
    pub fn data(&mut self, name: &str, params: Value) -> Result<&mut Self, BatchError> {
        let source = self
            .owner
            .sources
            .get(name)
            .ok_or_else(|| BatchError::UnknownSource(name.to_string()))?;
        self.entries.push(Entry::Data { source, params });
        Ok(self)
    }

    /// Add a template load
    pub fn template(&mut self, url: &str, tid: Option<&str>) -> &mut Self {
        self.entries.push(Entry::Template {
            url: url.to_string(),
            tid: tid.map(str::to_string),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire every request; fulfills with the results in insertion order
    /// and rejects with the first failure
    pub fn done(&self) -> Promise {
        tracing::debug!(requests = self.entries.len(), "batch dispatched");
        let requests: Vec<Promise> = self
            .entries
            .iter()
            .map(|entry| self.owner.execute(entry))
            .collect();
        self.owner.kernel.all(requests)
    }
}
