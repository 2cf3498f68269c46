//! Optional cache side-channel for hydrated ACLs.
//!
//! Backends store serialized [`AclSnapshot`]s, so an implementation can
//! live out of process. The provider keeps the cache consistent with its
//! own memo by explicit put/evict calls at every mutation boundary; a
//! provider without a cache is fully functional.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{AclError, AclResult};
use crate::model::{AclSnapshot, ObjectIdentity};

#[async_trait]
pub trait AclCache: Send + Sync {
    async fn get_from_cache_by_identity(
        &self,
        oid: &ObjectIdentity,
    ) -> AclResult<Option<AclSnapshot>>;

    async fn get_from_cache_by_id(&self, pk: i64) -> AclResult<Option<AclSnapshot>>;

    async fn put_in_cache(&self, snapshot: &AclSnapshot) -> AclResult<()>;

    async fn evict_from_cache_by_identity(&self, oid: &ObjectIdentity) -> AclResult<()>;

    async fn evict_from_cache_by_id(&self, pk: i64) -> AclResult<()>;

    /// Evicts every ACL whose object identity has the given type. Used
    /// when shared class-scoped entries change.
    async fn evict_from_cache_by_type(&self, class_type: &str) -> AclResult<()>;

    async fn clear_cache(&self) -> AclResult<()>;
}

// A shared backend can serve several provider instances.
#[async_trait]
impl<T: AclCache + ?Sized> AclCache for std::sync::Arc<T> {
    async fn get_from_cache_by_identity(
        &self,
        oid: &ObjectIdentity,
    ) -> AclResult<Option<AclSnapshot>> {
        (**self).get_from_cache_by_identity(oid).await
    }

    async fn get_from_cache_by_id(&self, pk: i64) -> AclResult<Option<AclSnapshot>> {
        (**self).get_from_cache_by_id(pk).await
    }

    async fn put_in_cache(&self, snapshot: &AclSnapshot) -> AclResult<()> {
        (**self).put_in_cache(snapshot).await
    }

    async fn evict_from_cache_by_identity(&self, oid: &ObjectIdentity) -> AclResult<()> {
        (**self).evict_from_cache_by_identity(oid).await
    }

    async fn evict_from_cache_by_id(&self, pk: i64) -> AclResult<()> {
        (**self).evict_from_cache_by_id(pk).await
    }

    async fn evict_from_cache_by_type(&self, class_type: &str) -> AclResult<()> {
        (**self).evict_from_cache_by_type(class_type).await
    }

    async fn clear_cache(&self) -> AclResult<()> {
        (**self).clear_cache().await
    }
}

#[derive(Debug)]
struct CachedRecord {
    json: String,
    identity: (String, String),
    class_type: String,
}

#[derive(Debug, Default)]
struct CacheInner {
    by_id: HashMap<i64, CachedRecord>,
    id_by_identity: HashMap<(String, String), i64>,
    ids_by_type: HashMap<String, HashSet<i64>>,
}

impl CacheInner {
    fn remove(&mut self, pk: i64) {
        if let Some(record) = self.by_id.remove(&pk) {
            self.id_by_identity.remove(&record.identity);
            if let Some(ids) = self.ids_by_type.get_mut(&record.class_type) {
                ids.remove(&pk);
                if ids.is_empty() {
                    self.ids_by_type.remove(&record.class_type);
                }
            }
        }
    }
}

/// Process-local cache backend storing JSON-serialized snapshots, with
/// identity and type indexes for the targeted eviction paths.
#[derive(Debug, Default)]
pub struct InMemoryAclCache {
    inner: Mutex<CacheInner>,
}

impl InMemoryAclCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AclResult<std::sync::MutexGuard<'_, CacheInner>> {
        self.inner
            .lock()
            .map_err(|_| AclError::cache("cache mutex poisoned"))
    }

    fn identity_key(oid: &ObjectIdentity) -> (String, String) {
        (oid.object_type().to_string(), oid.identifier().to_string())
    }
}

#[async_trait]
impl AclCache for InMemoryAclCache {
    async fn get_from_cache_by_identity(
        &self,
        oid: &ObjectIdentity,
    ) -> AclResult<Option<AclSnapshot>> {
        let inner = self.lock()?;
        let Some(pk) = inner.id_by_identity.get(&Self::identity_key(oid)) else {
            return Ok(None);
        };
        match inner.by_id.get(pk) {
            Some(record) => Ok(Some(serde_json::from_str(&record.json)?)),
            None => Ok(None),
        }
    }

    async fn get_from_cache_by_id(&self, pk: i64) -> AclResult<Option<AclSnapshot>> {
        let inner = self.lock()?;
        match inner.by_id.get(&pk) {
            Some(record) => Ok(Some(serde_json::from_str(&record.json)?)),
            None => Ok(None),
        }
    }

    async fn put_in_cache(&self, snapshot: &AclSnapshot) -> AclResult<()> {
        let record = CachedRecord {
            json: serde_json::to_string(snapshot)?,
            identity: Self::identity_key(&snapshot.object_identity),
            class_type: snapshot.object_identity.object_type().to_string(),
        };
        let mut inner = self.lock()?;
        inner.remove(snapshot.id);
        inner.id_by_identity.insert(record.identity.clone(), snapshot.id);
        inner
            .ids_by_type
            .entry(record.class_type.clone())
            .or_default()
            .insert(snapshot.id);
        inner.by_id.insert(snapshot.id, record);
        Ok(())
    }

    async fn evict_from_cache_by_identity(&self, oid: &ObjectIdentity) -> AclResult<()> {
        let mut inner = self.lock()?;
        if let Some(pk) = inner.id_by_identity.get(&Self::identity_key(oid)).copied() {
            inner.remove(pk);
        }
        Ok(())
    }

    async fn evict_from_cache_by_id(&self, pk: i64) -> AclResult<()> {
        let mut inner = self.lock()?;
        inner.remove(pk);
        Ok(())
    }

    async fn evict_from_cache_by_type(&self, class_type: &str) -> AclResult<()> {
        let mut inner = self.lock()?;
        if let Some(ids) = inner.ids_by_type.remove(class_type) {
            for pk in ids {
                inner.remove(pk);
            }
        }
        Ok(())
    }

    async fn clear_cache(&self) -> AclResult<()> {
        let mut inner = self.lock()?;
        *inner = CacheInner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: i64, identifier: &str, class_type: &str) -> AclSnapshot {
        AclSnapshot {
            id,
            object_identity: ObjectIdentity::new(identifier, class_type).unwrap(),
            entries_inheriting: true,
            class_aces: Vec::new(),
            class_field_aces: HashMap::new(),
            object_aces: Vec::new(),
            object_field_aces: HashMap::new(),
            parent: None,
            loaded_sids: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_by_both_keys() {
        let cache = InMemoryAclCache::new();
        let snap = snapshot(1, "1", "post");
        cache.put_in_cache(&snap).await.unwrap();

        let by_id = cache.get_from_cache_by_id(1).await.unwrap().unwrap();
        assert_eq!(by_id.id, 1);

        let oid = ObjectIdentity::new("1", "post").unwrap();
        let by_identity = cache
            .get_from_cache_by_identity(&oid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_identity.object_identity, oid);
    }

    #[tokio::test]
    async fn evicting_by_type_removes_all_instances_of_the_class() {
        let cache = InMemoryAclCache::new();
        cache.put_in_cache(&snapshot(1, "1", "post")).await.unwrap();
        cache.put_in_cache(&snapshot(2, "2", "post")).await.unwrap();
        cache
            .put_in_cache(&snapshot(3, "1", "comment"))
            .await
            .unwrap();

        cache.evict_from_cache_by_type("post").await.unwrap();

        assert!(cache.get_from_cache_by_id(1).await.unwrap().is_none());
        assert!(cache.get_from_cache_by_id(2).await.unwrap().is_none());
        assert!(cache.get_from_cache_by_id(3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn eviction_by_identity_clears_the_id_index_too() {
        let cache = InMemoryAclCache::new();
        cache.put_in_cache(&snapshot(1, "1", "post")).await.unwrap();

        let oid = ObjectIdentity::new("1", "post").unwrap();
        cache.evict_from_cache_by_identity(&oid).await.unwrap();

        assert!(cache.get_from_cache_by_id(1).await.unwrap().is_none());
        assert!(cache
            .get_from_cache_by_identity(&oid)
            .await
            .unwrap()
            .is_none());
    }
}
