//! Batched, cached retrieval of ACLs from relational storage.

use std::collections::{BTreeSet, HashMap};

use sqlx::SqlitePool;

use crate::cache::AclCache;
use crate::errors::{AclError, AclResult};
use crate::hydrator;
use crate::model::{Acl, AclRef, ObjectIdentity, SecurityIdentity};

/// Maximum number of object identities resolved per storage round trip.
pub const MAX_BATCH_SIZE: usize = 20;

const ANCESTOR_CONDITION: &str = "(o.object_identifier = ? AND c.class_type = ?)";

/// Read-side ACL provider.
///
/// Resolution priority per object identity: the call's result set, the
/// process-local memo (when the requested identities are loaded), the
/// external cache (evicted when partially loaded), and finally a batched
/// storage lookup over the ancestor closure.
pub struct AclProvider {
    pool: SqlitePool,
    cache: Option<Box<dyn AclCache>>,
    memo: HashMap<(String, String), AclRef>,
    batch_lookups: u64,
}

impl AclProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: None,
            memo: HashMap::new(),
            batch_lookups: 0,
        }
    }

    pub fn with_cache(pool: SqlitePool, cache: Box<dyn AclCache>) -> Self {
        Self {
            pool,
            cache: Some(cache),
            memo: HashMap::new(),
            batch_lookups: 0,
        }
    }

    /// Number of batch flushes issued against storage so far.
    pub fn batch_lookups(&self) -> u64 {
        self.batch_lookups
    }

    pub async fn find_acl(
        &mut self,
        oid: &ObjectIdentity,
        sids: &[SecurityIdentity],
    ) -> AclResult<AclRef> {
        let mut acls = self.find_acls(std::slice::from_ref(oid), sids).await?;
        acls.remove(oid)
            .ok_or_else(|| AclError::AclNotFound(oid.clone()))
    }

    /// Resolves every requested object identity or fails with
    /// [`AclError::AclNotFound`] naming the first unresolved one.
    pub async fn find_acls(
        &mut self,
        oids: &[ObjectIdentity],
        sids: &[SecurityIdentity],
    ) -> AclResult<HashMap<ObjectIdentity, AclRef>> {
        let mut result: HashMap<ObjectIdentity, AclRef> = HashMap::new();
        let mut batch: Vec<ObjectIdentity> = Vec::new();

        for (i, oid) in oids.iter().enumerate() {
            if !result.contains_key(oid) {
                let key = Self::memo_key(oid);
                let memo_hit = self
                    .memo
                    .get(&key)
                    .filter(|acl| acl.borrow().is_sid_loaded(sids))
                    .cloned();

                if let Some(acl) = memo_hit {
                    result.insert(oid.clone(), acl);
                } else if let Some(acl) = self.resolve_from_cache(oid, sids).await? {
                    self.memo.insert(key, acl.clone());
                    result.insert(oid.clone(), acl);
                } else {
                    // A partially loaded instance must not be reused by
                    // the hydrator; drop it and rebuild from storage.
                    self.memo.remove(&key);
                    if !batch.contains(oid) {
                        batch.push(oid.clone());
                    }
                }
            }

            if !batch.is_empty() && (batch.len() == MAX_BATCH_SIZE || i + 1 == oids.len()) {
                let hydrated = self.lookup_object_identities(&batch).await?;
                if let Some(cache) = &self.cache {
                    for acl in &hydrated {
                        let snapshot = acl.borrow().to_snapshot()?;
                        cache.put_in_cache(&snapshot).await?;
                    }
                }
                for oid in batch.drain(..) {
                    if let Some(acl) = self.memo.get(&Self::memo_key(&oid)) {
                        result.insert(oid, acl.clone());
                    }
                }
            }
        }

        for oid in oids {
            if !result.contains_key(oid) {
                return Err(AclError::AclNotFound(oid.clone()));
            }
        }
        Ok(result)
    }

    /// Lists the object identities whose ACLs inherit from the given one,
    /// either only direct children or the whole subtree via the ancestor
    /// closure.
    pub async fn find_children(
        &self,
        parent_oid: &ObjectIdentity,
        direct_children_only: bool,
    ) -> AclResult<Vec<ObjectIdentity>> {
        let sql = if direct_children_only {
            "SELECT o.object_identifier, c.class_type
             FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             INNER JOIN object_identities p ON p.id = o.parent_object_identity_id
             INNER JOIN classes pc ON pc.id = p.class_id
             WHERE p.object_identifier = ? AND pc.class_type = ?"
        } else {
            "SELECT o.object_identifier, c.class_type
             FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             INNER JOIN object_identity_ancestors a ON a.object_identity_id = o.id
             WHERE a.object_identity_id != a.ancestor_id
               AND a.ancestor_id = (
                   SELECT po.id FROM object_identities po
                   INNER JOIN classes pc ON pc.id = po.class_id
                   WHERE po.object_identifier = ? AND pc.class_type = ?
               )"
        };

        let rows: Vec<(String, String)> = sqlx::query_as(sql)
            .bind(parent_oid.identifier())
            .bind(parent_oid.object_type())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(identifier, class_type)| ObjectIdentity::new(identifier, class_type))
            .collect()
    }

    /// One storage flush for a batch: resolve the ancestor closure of
    /// every identity in the batch, then load and hydrate all rows of the
    /// closure. Returns the newly built ACLs.
    async fn lookup_object_identities(
        &mut self,
        batch: &[ObjectIdentity],
    ) -> AclResult<Vec<AclRef>> {
        self.batch_lookups += 1;
        tracing::debug!(batch_size = batch.len(), "flushing acl lookup batch");

        let conditions = vec![ANCESTOR_CONDITION; batch.len()].join(" OR ");
        let sql = format!(
            "SELECT a.ancestor_id
             FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             INNER JOIN object_identity_ancestors a ON a.object_identity_id = o.id
             WHERE {}",
            conditions
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for oid in batch {
            query = query.bind(oid.identifier()).bind(oid.object_type());
        }
        let ancestor_ids: BTreeSet<i64> = query.fetch_all(&self.pool).await?.into_iter().collect();

        if ancestor_ids.is_empty() {
            // No identity in the batch has an ancestor row: no ACL exists.
            return Err(AclError::AclNotFound(batch[0].clone()));
        }

        let placeholders = vec!["?"; ancestor_ids.len()].join(", ");
        let sql = format!(
            "SELECT o.id AS acl_id, c.class_type, o.object_identifier,
                    o.parent_object_identity_id, o.entries_inheriting,
                    e.id AS ace_id, e.object_identity_id AS ace_object_identity_id,
                    e.field_name, e.ace_order, e.mask, e.granting,
                    e.granting_strategy, e.audit_success, e.audit_failure,
                    s.identifier AS sid_identifier, s.username AS sid_is_user
             FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             LEFT JOIN entries e ON e.class_id = o.class_id
                  AND (e.object_identity_id = o.id OR e.object_identity_id IS NULL)
             LEFT JOIN security_identities s ON s.id = e.security_identity_id
             WHERE o.id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in &ancestor_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        hydrator::hydrate(&rows, &mut self.memo)
    }

    async fn resolve_from_cache(
        &self,
        oid: &ObjectIdentity,
        sids: &[SecurityIdentity],
    ) -> AclResult<Option<AclRef>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(snapshot) = cache.get_from_cache_by_identity(oid).await? else {
            return Ok(None);
        };
        if snapshot.sid_loaded(sids) {
            tracing::debug!(oid = %oid, "acl cache hit");
            Ok(Some(Acl::from_snapshot(snapshot)))
        } else {
            // Cached with a narrower identity set than requested; it must
            // be re-hydrated, not served as-is.
            cache.evict_from_cache_by_identity(oid).await?;
            Ok(None)
        }
    }

    pub(crate) fn memo_key(oid: &ObjectIdentity) -> (String, String) {
        (oid.object_type().to_string(), oid.identifier().to_string())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn cache(&self) -> Option<&dyn AclCache> {
        self.cache.as_deref()
    }

    pub(crate) fn memo(&mut self) -> &mut HashMap<(String, String), AclRef> {
        &mut self.memo
    }

    /// Primary key of an object identity row, if one exists.
    pub(crate) async fn retrieve_object_identity_pk(
        &self,
        oid: &ObjectIdentity,
    ) -> AclResult<Option<i64>> {
        let pk: Option<i64> = sqlx::query_scalar(
            "SELECT o.id FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             WHERE o.object_identifier = ? AND c.class_type = ?",
        )
        .bind(oid.identifier())
        .bind(oid.object_type())
        .fetch_optional(&self.pool)
        .await?;
        Ok(pk)
    }
}
