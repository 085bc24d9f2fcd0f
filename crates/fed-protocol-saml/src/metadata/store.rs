//! Copy-on-write store of trusted metadata.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use super::{EntityDescriptor, MetadataParser};
use crate::error::SamlResult;

/// An immutable view of the trusted entities.
#[derive(Debug, Default)]
pub struct MetadataSnapshot {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    version: u64,
}

impl MetadataSnapshot {
    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityDescriptor>> {
        self.entities.get(entity_id).cloned()
    }

    /// Iterates over all entities.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entity is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Incremented on every change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

/// Trusted metadata, read-mostly.
///
/// Readers clone the current snapshot `Arc` and never observe a partial
/// update. Writers are serialized and publish a whole new snapshot.
#[derive(Debug, Default)]
pub struct MetadataStore {
    current: RwLock<Arc<MetadataSnapshot>>,
    write: Mutex<()>,
}

impl MetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `entities`.
    #[must_use]
    pub fn with_entities(entities: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        let store = Self::new();
        store.replace_all(entities);
        store
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MetadataSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Looks up an entity in the current snapshot.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityDescriptor>> {
        self.snapshot().get(entity_id)
    }

    /// Parses a document and adds or replaces every entity in it, in one
    /// update. Returns the number of entities loaded.
    ///
    /// # Errors
    ///
    /// Returns the parse error; the store is unchanged.
    pub fn load_document(&self, bytes: &[u8], parser: &MetadataParser) -> SamlResult<usize> {
        let entities = parser.parse(bytes)?;
        let count = entities.len();
        self.update(|map| {
            for entity in entities {
                map.insert(entity.entity_id.clone(), Arc::new(entity));
            }
        });
        info!(entities = count, "loaded metadata document");
        Ok(count)
    }

    /// Replaces the whole set.
    pub fn replace_all(&self, entities: impl IntoIterator<Item = EntityDescriptor>) {
        let entities: HashMap<_, _> = entities
            .into_iter()
            .map(|e| (e.entity_id.clone(), Arc::new(e)))
            .collect();
        self.update(|map| *map = entities);
    }

    /// Adds or replaces one entity.
    pub fn upsert(&self, entity: EntityDescriptor) {
        self.update(|map| {
            map.insert(entity.entity_id.clone(), Arc::new(entity));
        });
    }

    /// Removes an entity. Returns true if it was present.
    pub fn remove(&self, entity_id: &str) -> bool {
        let mut removed = false;
        self.update(|map| removed = map.remove(entity_id).is_some());
        removed
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, Arc<EntityDescriptor>>)) {
        let _writer = self.write.lock();
        let current = self.snapshot();
        let mut entities = current.entities.clone();
        change(&mut entities);
        let next = Arc::new(MetadataSnapshot {
            entities,
            version: current.version + 1,
        });
        *self.current.write() = next;
    }
}
