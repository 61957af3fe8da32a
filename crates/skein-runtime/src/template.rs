//! Template cache and loader
//!
//! Templates are plain markup strings keyed by template id or by the URL
//! they were fetched from. Markup may embed further templates as
//! `<script type="text/html" id="...">` blocks; [`TemplateCache::harvest`]
//! pulls those out into the cache.

use crate::cache::{Cache, CacheError, CacheFactory};
use crate::http::HttpClient;
use regex::Regex;
use serde_json::Value;
use skein_engine::{Kernel, Promise};
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;
use thiserror::Error;

/// Cache id holding the templates
pub const TEMPLATE_CACHE_ID: &str = "$$templateCache";

/// Cache id holding in-flight template fetches
pub const TEMPLATE_FETCH_CACHE_ID: &str = "$$templateHttpResultCache";

/// Template lookup failures
#[derive(Debug, Error)]
pub enum TemplateError {
    /// No template under this id
    #[error("template '{0}' does not exist")]
    Missing(String),

    /// Fetched markup did not contain the requested template id
    #[error("template '{tid}' not found in markup loaded from '{url}'")]
    NotInMarkup {
        /// Source URL
        url: String,
        /// Requested template id
        tid: String,
    },

    /// Neither a URL nor a template id was given
    #[error("template request needs a url or a template id")]
    NoSource,

    /// Backing cache could not be opened
    #[error(transparent)]
    Cache(#[from] CacheError),
}

fn script_block() -> &'static Regex {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        Regex::new(r#"(?is)<script\b([^>]*)>(.*?)</script\s*>"#).expect("valid script regex")
    })
}

fn attribute(name: &str) -> Regex {
    Regex::new(&format!(r#"(?i)\b{name}\s*=\s*["']([^"']*)["']"#)).expect("valid attribute regex")
}

fn html_type() -> &'static Regex {
    static TYPE: OnceLock<Regex> = OnceLock::new();
    TYPE.get_or_init(|| attribute("type"))
}

fn html_id() -> &'static Regex {
    static ID: OnceLock<Regex> = OnceLock::new();
    ID.get_or_init(|| attribute("id"))
}

/// Extract `(id, markup)` for every `text/html` script block
pub fn script_templates(markup: &str) -> Vec<(String, String)> {
    script_block()
        .captures_iter(markup)
        .filter_map(|block| {
            let attrs = block.get(1)?.as_str();
            let kind = html_type().captures(attrs)?.get(1)?.as_str();
            if !kind.eq_ignore_ascii_case("text/html") {
                return None;
            }
            let id = html_id().captures(attrs)?.get(1)?.as_str();
            if id.is_empty() {
                return None;
            }
            Some((id.to_string(), block.get(2)?.as_str().to_string()))
        })
        .collect()
}

/// Markup by template id or URL
#[derive(Clone)]
pub struct TemplateCache {
    cache: Rc<Cache<String>>,
}

impl TemplateCache {
    pub fn new(caches: &CacheFactory) -> Result<Self, TemplateError> {
        Ok(Self {
            cache: caches.cache::<String>(TEMPLATE_CACHE_ID)?,
        })
    }

    pub fn get(&self, tid: &str) -> Result<String, TemplateError> {
        self.cache
            .get(tid)
            .ok_or_else(|| TemplateError::Missing(tid.to_string()))
    }

    pub fn put(&self, tid: impl Into<String>, markup: impl Into<String>) {
        self.cache.put(tid, markup.into());
    }

    pub fn has(&self, tid: &str) -> bool {
        self.cache.has(tid)
    }

    pub fn remove(&self, tid: &str) {
        self.cache.remove(tid);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Cache every `text/html` script block found in `markup`
    ///
    /// Returns the ids that were stored.
    pub fn harvest(&self, markup: &str) -> Vec<String> {
        script_templates(markup)
            .into_iter()
            .map(|(id, body)| {
                tracing::trace!(template = %id, "template harvested");
                self.cache.put(id.clone(), body);
                id
            })
            .collect()
    }
}

impl fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCache")
            .field("templates", &self.cache.len())
            .finish()
    }
}

/// Fetches templates over HTTP into a [`TemplateCache`]
#[derive(Clone)]
pub struct TemplateLoader {
    kernel: Kernel,
    templates: TemplateCache,
    http: HttpClient,
    in_flight: Rc<Cache<Promise>>,
}

impl TemplateLoader {
    pub fn new(
        kernel: Kernel,
        caches: &CacheFactory,
        templates: TemplateCache,
        http: HttpClient,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            kernel,
            templates,
            http,
            in_flight: caches.cache::<Promise>(TEMPLATE_FETCH_CACHE_ID)?,
        })
    }

    /// The cache templates are loaded into
    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    /// Promise of the markup for `tid`, or of the whole document at `url`
    ///
    /// Cached templates resolve without a request. Otherwise `url` is
    /// fetched once, however many loads are waiting on it; its markup is
    /// cached under the URL and its script blocks are harvested. A failed
    /// fetch is forgotten so a later load retries.
    pub fn load(&self, url: &str, tid: Option<&str>) -> Result<Promise, TemplateError> {
        let tid = tid.filter(|tid| !tid.is_empty());
        if url.is_empty() && tid.is_none() {
            return Err(TemplateError::NoSource);
        }
        if self.templates.has(url) || tid.is_some_and(|tid| self.templates.has(tid)) {
            return Ok(match self.lookup(url, tid) {
                Ok(markup) => self.kernel.when(markup),
                Err(err) => self.kernel.reject(err.to_string()),
            });
        }
        if url.is_empty() {
            return Err(TemplateError::Missing(tid.unwrap_or_default().to_string()));
        }

        let fetch = match self.in_flight.get(url) {
            Some(fetch) => fetch,
            None => self.fetch(url),
        };
        let loader = self.clone();
        let url = url.to_string();
        let tid = tid.map(str::to_string);
        Ok(fetch.then(move |_| {
            loader
                .lookup(&url, tid.as_deref())
                .map_err(|err| Value::from(err.to_string()))
        }))
    }

    fn fetch(&self, url: &str) -> Promise {
        tracing::debug!(url, "fetching template");
        let templates = self.templates.clone();
        let in_flight = Rc::clone(&self.in_flight);
        let done = Rc::clone(&self.in_flight);
        let key = url.to_string();
        let failed_key = url.to_string();
        let fetch = self.http.get(url, Value::Null, Value::Null).then_or(
            move |body| {
                let markup = match body {
                    Value::String(markup) => markup,
                    other => other.to_string(),
                };
                templates.harvest(&markup);
                templates.put(key.clone(), markup);
                done.remove(&key);
                Ok(())
            },
            move |reason| {
                tracing::warn!(url = %failed_key, %reason, "template fetch failed");
                in_flight.remove(&failed_key);
                Err::<(), _>(reason)
            },
        );
        self.in_flight.put(url, fetch.clone());
        fetch
    }

    fn lookup(&self, url: &str, tid: Option<&str>) -> Result<String, TemplateError> {
        match tid {
            Some(tid) if self.templates.has(tid) => self.templates.get(tid),
            Some(tid) => Err(TemplateError::NotInMarkup {
                url: url.to_string(),
                tid: tid.to_string(),
            }),
            None => self.templates.get(url),
        }
    }
}

impl fmt::Debug for TemplateLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateLoader")
            .field("templates", &self.templates)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
