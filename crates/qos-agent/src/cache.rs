//! Generic object cache.
//!
//! One ordered map per object kind, keyed by typed object id and owning the
//! node by value. Every "does this id exist" lookup in the control plane
//! goes through a cache; parent/child and back-reference relations are id
//! fields validated against these maps, never pointers.

use std::collections::BTreeMap;

use sai_common::error::{SaiError, SaiResult};
use sai_common::types::{ObjectId, ObjectKind};

/// Ordered map of nodes keyed by typed object id.
///
/// Iteration order is id order, which the de-init paths rely on for
/// deterministic teardown.
#[derive(Debug)]
pub struct ObjectCache<K: ObjectKind, N> {
    nodes: BTreeMap<ObjectId<K>, N>,
}

impl<K: ObjectKind, N> Default for ObjectCache<K, N> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<K: ObjectKind, N> ObjectCache<K, N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node under `id`; `ITEM_ALREADY_EXISTS` if taken.
    pub fn insert(&mut self, id: ObjectId<K>, node: N) -> SaiResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(SaiError::already_exists(format!(
                "{} {}",
                K::kind_name(),
                id
            )));
        }
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Removes and returns the node under `id`; `ITEM_NOT_FOUND` if absent.
    pub fn remove(&mut self, id: ObjectId<K>) -> SaiResult<N> {
        self.nodes
            .remove(&id)
            .ok_or_else(|| SaiError::not_found(format!("{} {}", K::kind_name(), id)))
    }

    /// Returns the node under `id`; `ITEM_NOT_FOUND` if absent.
    pub fn get(&self, id: ObjectId<K>) -> SaiResult<&N> {
        self.nodes
            .get(&id)
            .ok_or_else(|| SaiError::not_found(format!("{} {}", K::kind_name(), id)))
    }

    /// Returns the node under `id` mutably; `ITEM_NOT_FOUND` if absent.
    pub fn get_mut(&mut self, id: ObjectId<K>) -> SaiResult<&mut N> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| SaiError::not_found(format!("{} {}", K::kind_name(), id)))
    }

    pub fn contains(&self, id: ObjectId<K>) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId<K>, &N)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn ids(&self) -> Vec<ObjectId<K>> {
        self.nodes.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sai_common::types::QueueOid;

    #[test]
    fn test_insert_get_remove() {
        let mut cache: ObjectCache<sai_common::types::QueueKind, u32> = ObjectCache::new();
        let id = QueueOid::from_raw(0x15_0001).unwrap();

        cache.insert(id, 7).unwrap();
        assert_eq!(*cache.get(id).unwrap(), 7);
        assert_eq!(cache.remove(id).unwrap(), 7);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_double_insert_rejected() {
        let mut cache: ObjectCache<sai_common::types::QueueKind, u32> = ObjectCache::new();
        let id = QueueOid::from_raw(1).unwrap();

        cache.insert(id, 1).unwrap();
        let err = cache.insert(id, 2).unwrap_err();
        assert!(matches!(err, SaiError::AlreadyExists { .. }));
        assert_eq!(*cache.get(id).unwrap(), 1);
    }

    #[test]
    fn test_missing_lookup() {
        let cache: ObjectCache<sai_common::types::QueueKind, u32> = ObjectCache::new();
        let err = cache.get(QueueOid::from_raw(9).unwrap()).unwrap_err();
        assert!(matches!(err, SaiError::NotFound { .. }));
    }

    #[test]
    fn test_iteration_is_id_ordered() {
        let mut cache: ObjectCache<sai_common::types::QueueKind, u32> = ObjectCache::new();
        for raw in [5u64, 1, 3] {
            cache.insert(QueueOid::from_raw(raw).unwrap(), raw as u32).unwrap();
        }
        let order: Vec<u64> = cache.iter().map(|(id, _)| id.as_raw()).collect();
        assert_eq!(order, vec![1, 3, 5]);
    }
}
