//! Format registry with reference-counted handles.
//!
//! Publishers hold a [`FormatHandle`] while rendering; outstanding handles
//! gate unregistration (and overwriting) so a format is never pulled out from
//! under an in-flight publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use ah_common::EnrichedAlert;

use crate::{FormatError, Payload, SharedFormatter};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[a-z][a-z0-9_-]*$").expect("static pattern"))
}

struct RegistryEntry {
    formatter: SharedFormatter,
    refs: Arc<AtomicUsize>,
}

/// Named formatter registry.
pub struct FormatRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the five built-in formats.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for (name, formatter) in crate::formats::builtins() {
            registry
                .register(name, formatter)
                .expect("built-in format names are valid");
        }
        registry
    }

    /// Registry whose built-ins are wrapped in the standard middleware
    /// chain: validation, metrics, result caching. Each format gets its own
    /// cache instance, because the cache key does not include the format
    /// name. Rate limiting, timeouts, and retries are composed by callers
    /// that need them.
    pub fn with_instrumented_builtins() -> Self {
        use crate::middleware::cache::DEFAULT_FORMAT_CACHE_TTL;
        use crate::middleware::{
            chain, CachingMiddleware, FormatMiddleware, MetricsMiddleware, ValidationMiddleware,
        };
        use ah_cache::TtlLruCache;

        const FORMAT_CACHE_CAPACITY: usize = 1024;

        let registry = Self::new();
        for (name, formatter) in crate::formats::builtins() {
            let cache = Arc::new(TtlLruCache::new(
                FORMAT_CACHE_CAPACITY,
                DEFAULT_FORMAT_CACHE_TTL,
            ));
            let middlewares: Vec<Arc<dyn FormatMiddleware>> = vec![
                Arc::new(ValidationMiddleware),
                Arc::new(MetricsMiddleware::new(name)),
                Arc::new(CachingMiddleware::new(cache, DEFAULT_FORMAT_CACHE_TTL)),
            ];
            registry
                .register(name, chain(&middlewares, formatter))
                .expect("built-in format names are valid");
        }
        registry
    }

    /// Register a formatter under `name`.
    ///
    /// Overwriting an existing entry is allowed only while no handles to it
    /// are outstanding.
    pub fn register(
        &self,
        name: impl Into<String>,
        formatter: SharedFormatter,
    ) -> Result<(), FormatError> {
        let name = name.into();
        if !name_pattern().is_match(&name) {
            return Err(FormatError::InvalidName(name));
        }

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&name) {
            let refs = existing.refs.load(Ordering::SeqCst);
            if refs > 0 {
                return Err(FormatError::InUse { name, refs });
            }
        }
        debug!(format = %name, "Registering format");
        entries.insert(
            name,
            RegistryEntry {
                formatter,
                refs: Arc::new(AtomicUsize::new(0)),
            },
        );
        Ok(())
    }

    /// Remove a format. Fails while handles are outstanding.
    pub fn unregister(&self, name: &str) -> Result<(), FormatError> {
        let mut entries = self.entries.lock();
        match entries.get(name) {
            None => Err(FormatError::NotFound(name.to_string())),
            Some(entry) => {
                let refs = entry.refs.load(Ordering::SeqCst);
                if refs > 0 {
                    return Err(FormatError::InUse {
                        name: name.to_string(),
                        refs,
                    });
                }
                entries.remove(name);
                debug!(format = %name, "Unregistered format");
                Ok(())
            }
        }
    }

    /// Acquire a handle to a format, incrementing its reference count until
    /// the handle is dropped.
    pub fn get(&self, name: &str) -> Result<FormatHandle, FormatError> {
        let entries = self.entries.lock();
        let entry = entries
            .get(name)
            .ok_or_else(|| FormatError::NotFound(name.to_string()))?;
        entry.refs.fetch_add(1, Ordering::SeqCst);
        Ok(FormatHandle {
            name: name.to_string(),
            formatter: entry.formatter.clone(),
            refs: entry.refs.clone(),
        })
    }

    /// Sorted, detached copy of the registered names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn supports(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Current reference count for a format, for introspection.
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.entries
            .lock()
            .get(name)
            .map(|entry| entry.refs.load(Ordering::SeqCst))
    }
}

/// RAII reference to a registered format.
pub struct FormatHandle {
    name: String,
    formatter: SharedFormatter,
    refs: Arc<AtomicUsize>,
}

impl FormatHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn formatter(&self) -> SharedFormatter {
        self.formatter.clone()
    }

    pub async fn format(&self, alert: &EnrichedAlert) -> Result<Payload, FormatError> {
        self.formatter.format(alert).await
    }
}

impl Clone for FormatHandle {
    fn clone(&self) -> Self {
        self.refs.fetch_add(1, Ordering::SeqCst);
        Self {
            name: self.name.clone(),
            formatter: self.formatter.clone(),
            refs: self.refs.clone(),
        }
    }
}

impl Drop for FormatHandle {
    fn drop(&mut self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }
}
