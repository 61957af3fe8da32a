//! Named key/value caches
//!
//! A [`CacheFactory`] hands out one [`Cache`] per id; asking for the same id
//! again returns the same cache. Collaborators use it for their internal
//! tables (templates, in-flight requests, data sources).

use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Cache factory errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// The id is already used by a cache of another value type
    #[error("cache '{id}' does not hold {expected} values")]
    TypeMismatch {
        /// Cache id
        id: String,
        /// Requested value type
        expected: &'static str,
    },
}

/// Snapshot returned by [`Cache::info`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    pub id: String,
    pub size: usize,
}

/// String-keyed cache of `V`
pub struct Cache<V> {
    id: String,
    entries: RefCell<FxHashMap<String, V>>,
}

impl<V: Clone> Cache<V> {
    fn new(id: String) -> Self {
        Self {
            id,
            entries: RefCell::new(FxHashMap::default()),
        }
    }

    /// Id the cache was created under
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store `value`, replacing any previous entry
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.borrow_mut().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Remove an entry; absent keys leave the size untouched
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.borrow_mut().remove(key)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            id: self.id.clone(),
            size: self.len(),
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("id", &self.id)
            .field("size", &self.entries.borrow().len())
            .finish()
    }
}

/// Registry of named caches
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct CacheFactory {
    caches: Rc<RefCell<FxHashMap<String, Rc<dyn Any>>>>,
}

impl CacheFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache registered under `id`, created on first use
    pub fn cache<V: Clone + 'static>(&self, id: &str) -> Result<Rc<Cache<V>>, CacheError> {
        let mut caches = self.caches.borrow_mut();
        let entry = caches
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::trace!(cache = id, "cache created");
                Rc::new(Cache::<V>::new(id.to_string())) as Rc<dyn Any>
            })
            .clone();
        entry
            .downcast::<Cache<V>>()
            .map_err(|_| CacheError::TypeMismatch {
                id: id.to_string(),
                expected: std::any::type_name::<V>(),
            })
    }

    /// Whether a cache with this id exists
    pub fn exists(&self, id: &str) -> bool {
        self.caches.borrow().contains_key(id)
    }

    /// Forget the cache registered under `id`
    ///
    /// Handles already given out keep working but are detached; the next
    /// [`CacheFactory::cache`] call creates a fresh cache.
    pub fn destroy(&self, id: &str) -> bool {
        self.caches.borrow_mut().remove(id).is_some()
    }

    /// Ids of every live cache
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.caches.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for CacheFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFactory")
            .field("caches", &self.ids())
            .finish()
    }
}
