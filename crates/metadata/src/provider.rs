use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fxq_common::{FxqError, Result};
use tracing::trace;

use crate::catalog::EntityMetadata;

/// Source of entity metadata for the compiler.
///
/// The compiler treats lookups as synchronous, possibly blocking calls and
/// propagates their failures without retrying.
pub trait MetadataProvider: Send + Sync {
    /// Returns the definition of `logical_name`.
    ///
    /// # Errors
    /// Returns [`FxqError::Semantic`] when the entity does not exist, or any
    /// provider-specific failure.
    fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>>;
}

impl<P: MetadataProvider + ?Sized> MetadataProvider for Arc<P> {
    fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
        (**self).entity(logical_name)
    }
}

/// Memoizing wrapper: each entity is fetched from the inner provider at most once.
///
/// Failed lookups are not cached.
pub struct MetadataCache<P> {
    inner: P,
    entries: RwLock<HashMap<String, Arc<EntityMetadata>>>,
}

impl<P: MetadataProvider> MetadataCache<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl<P: MetadataProvider> MetadataProvider for MetadataCache<P> {
    fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
        let key = logical_name.to_ascii_lowercase();
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| FxqError::InvalidConfig("metadata cache lock poisoned".into()))?;
            if let Some(hit) = entries.get(&key) {
                return Ok(Arc::clone(hit));
            }
        }
        trace!(entity = %key, "metadata cache miss");
        let fetched = self.inner.entity(logical_name)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| FxqError::InvalidConfig("metadata cache lock poisoned".into()))?;
        Ok(Arc::clone(entries.entry(key).or_insert(fetched)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::catalog::{AttributeMetadata, AttributeType, Catalog};

    struct CountingProvider {
        catalog: Catalog,
        calls: AtomicUsize,
    }

    impl MetadataProvider for CountingProvider {
        fn entity(&self, logical_name: &str) -> Result<Arc<EntityMetadata>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.catalog.entity(logical_name)
        }
    }

    #[test]
    fn cache_hits_skip_inner_provider() {
        let mut catalog = Catalog::new();
        catalog.register_entity(
            EntityMetadata::new("contact", "contactid")
                .with_attribute(AttributeMetadata::new("contactid", AttributeType::Uniqueidentifier)),
        );
        let cache = MetadataCache::new(CountingProvider {
            catalog,
            calls: AtomicUsize::new(0),
        });

        cache.entity("contact").expect("first");
        cache.entity("CONTACT").expect("second");
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached_len(), 1);

        assert!(cache.entity("missing").is_err());
        assert!(cache.entity("missing").is_err());
        assert_eq!(cache.inner().calls.load(Ordering::SeqCst), 3);
    }
}
