//! Change-tracking extension that persists incremental ACL edits.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use sqlx::SqlitePool;

use crate::cache::AclCache;
use crate::errors::{AclError, AclResult};
use crate::model::{Acl, AclRef, ChangeSet, Entry, ObjectIdentity, SecurityIdentity, StrategyKind};
use crate::provider::AclProvider;

/// Offset applied to `ace_order` before rewriting a collection, keeping
/// the per-collection order uniqueness satisfied mid-rewrite.
const ORDER_REWRITE_OFFSET: i64 = 1 << 20;

/// Pending write set for one ACE collection.
struct CollectionPlan {
    object_scoped: bool,
    field: Option<String>,
    deletes: Vec<i64>,
    entries: Vec<EntryWrite>,
}

struct EntryWrite {
    id: Option<i64>,
    sid: SecurityIdentity,
    mask: u32,
    granting: bool,
    strategy: StrategyKind,
    audit_success: bool,
    audit_failure: bool,
}

impl EntryWrite {
    fn of(entry: &Entry) -> Self {
        Self {
            id: entry.id(),
            sid: entry.security_identity().clone(),
            mask: entry.mask(),
            granting: entry.is_granting(),
            strategy: entry.strategy(),
            audit_success: entry.is_audit_success(),
            audit_failure: entry.is_audit_failure(),
        }
    }
}

/// Newly assigned primary key for an inserted ACE, applied to the
/// in-memory entry only after the transaction commits.
struct IdAssignment {
    object_scoped: bool,
    field: Option<String>,
    index: usize,
    id: i64,
}

/// Write-side provider: creates, deletes and incrementally updates ACLs,
/// each operation inside one transaction rolled back entirely on failure.
pub struct MutableAclProvider {
    inner: AclProvider,
}

impl MutableAclProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: AclProvider::new(pool),
        }
    }

    pub fn with_cache(pool: SqlitePool, cache: Box<dyn AclCache>) -> Self {
        Self {
            inner: AclProvider::with_cache(pool, cache),
        }
    }

    pub async fn find_acl(
        &mut self,
        oid: &ObjectIdentity,
        sids: &[SecurityIdentity],
    ) -> AclResult<AclRef> {
        self.inner.find_acl(oid, sids).await
    }

    pub async fn find_acls(
        &mut self,
        oids: &[ObjectIdentity],
        sids: &[SecurityIdentity],
    ) -> AclResult<HashMap<ObjectIdentity, AclRef>> {
        self.inner.find_acls(oids, sids).await
    }

    pub async fn find_children(
        &self,
        parent_oid: &ObjectIdentity,
        direct_children_only: bool,
    ) -> AclResult<Vec<ObjectIdentity>> {
        self.inner.find_children(parent_oid, direct_children_only).await
    }

    pub fn batch_lookups(&self) -> u64 {
        self.inner.batch_lookups()
    }

    /// Creates an empty ACL with a self-referencing ancestor row. The
    /// existence check and the inserts run in one transaction so two
    /// processes cannot race duplicate ACLs for one identity.
    pub async fn create_acl(&mut self, oid: &ObjectIdentity) -> AclResult<AclRef> {
        let mut tx = self.inner.pool().begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT o.id FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             WHERE o.object_identifier = ? AND c.class_type = ?",
        )
        .bind(oid.identifier())
        .bind(oid.object_type())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            return Err(AclError::AclAlreadyExists(oid.clone()));
        }

        let class_id = get_or_create_class_id(&mut tx, oid.object_type()).await?;
        let pk = sqlx::query(
            "INSERT INTO object_identities (class_id, object_identifier, entries_inheriting)
             VALUES (?, ?, 1)",
        )
        .bind(class_id)
        .bind(oid.identifier())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        sqlx::query(
            "INSERT INTO object_identity_ancestors (object_identity_id, ancestor_id) VALUES (?, ?)",
        )
        .bind(pk)
        .bind(pk)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(oid = %oid, pk, "created acl");

        self.inner.find_acl(oid, &[]).await
    }

    /// Deletes an ACL and, recursively, the ACLs of every descendant
    /// object identity, in one transaction. Deleting a missing ACL is a
    /// no-op.
    pub async fn delete_acl(&mut self, oid: &ObjectIdentity) -> AclResult<()> {
        let Some(pk) = self.inner.retrieve_object_identity_pk(oid).await? else {
            return Ok(());
        };

        let mut tx = self.inner.pool().begin().await?;

        // The closure lists the whole subtree, the ACL itself included.
        let descendants: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT o.id, o.object_identifier, c.class_type
             FROM object_identities o
             INNER JOIN classes c ON c.id = o.class_id
             INNER JOIN object_identity_ancestors a ON a.object_identity_id = o.id
             WHERE a.ancestor_id = ?",
        )
        .bind(pk)
        .fetch_all(&mut *tx)
        .await?;

        let placeholders = vec!["?"; descendants.len()].join(", ");
        let ids: Vec<i64> = descendants.iter().map(|(id, _, _)| *id).collect();

        // Detach parent pointers first so row deletion order cannot
        // violate the self-referencing foreign key.
        for sql in [
            format!(
                "UPDATE object_identities SET parent_object_identity_id = NULL WHERE id IN ({})",
                placeholders
            ),
            format!("DELETE FROM entries WHERE object_identity_id IN ({})", placeholders),
            format!(
                "DELETE FROM object_identity_ancestors WHERE object_identity_id IN ({})",
                placeholders
            ),
            format!("DELETE FROM object_identities WHERE id IN ({})", placeholders),
        ] {
            let mut query = sqlx::query(&sql);
            for id in &ids {
                query = query.bind(id);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::debug!(oid = %oid, subtree = descendants.len(), "deleted acl subtree");

        for (id, identifier, class_type) in descendants {
            self.inner.memo().remove(&(class_type, identifier));
            if let Some(cache) = self.inner.cache() {
                cache.evict_from_cache_by_id(id).await?;
            }
        }
        Ok(())
    }

    /// Flushes the ACL's accumulated diff. A clean ACL is a no-op and
    /// opens no transaction; any failure rolls the transaction back and
    /// leaves the diff untouched for retry.
    pub async fn update_acl(&mut self, acl_ref: &AclRef) -> AclResult<()> {
        let (acl_id, changes) = {
            let acl = acl_ref.borrow();
            let id = acl.id().ok_or(AclError::NotPersisted)?;
            if acl.changes().is_empty() {
                return Ok(());
            }
            (id, acl.changes().clone())
        };

        let class_changed = changes.class_aces.is_some() || changes.class_field_aces.is_some();
        let mut tx = self.inner.pool().begin().await?;

        let class_id: i64 =
            sqlx::query_scalar("SELECT class_id FROM object_identities WHERE id = ?")
                .bind(acl_id)
                .fetch_one(&mut *tx)
                .await?;

        if changes.entries_inheriting.is_some() {
            let value = acl_ref.borrow().is_entries_inheriting();
            sqlx::query("UPDATE object_identities SET entries_inheriting = ? WHERE id = ?")
                .bind(value)
                .bind(acl_id)
                .execute(&mut *tx)
                .await?;
        }

        if changes.parent.is_some() {
            let parent_pk = match acl_ref.borrow().parent_acl() {
                Some(parent) => Some(parent.borrow().id().ok_or(AclError::NotPersisted)?),
                None => None,
            };
            sqlx::query("UPDATE object_identities SET parent_object_identity_id = ? WHERE id = ?")
                .bind(parent_pk)
                .bind(acl_id)
                .execute(&mut *tx)
                .await?;
            regenerate_ancestor_relations(&mut tx, acl_id, parent_pk).await?;
        }

        // Mask/strategy/audit updates for already-persisted entries.
        for &ace_id in changes.ace_diffs.keys() {
            let Some(write) = find_live_entry(&acl_ref.borrow(), ace_id) else {
                continue;
            };
            sqlx::query(
                "UPDATE entries SET mask = ?, granting_strategy = ?,
                        audit_success = ?, audit_failure = ?
                 WHERE id = ?",
            )
            .bind(write.mask as i64)
            .bind(write.strategy.as_str())
            .bind(write.audit_success)
            .bind(write.audit_failure)
            .bind(ace_id)
            .execute(&mut *tx)
            .await?;
        }

        let plans = build_collection_plans(&acl_ref.borrow(), &changes);
        let mut assignments: Vec<IdAssignment> = Vec::new();
        for plan in &plans {
            flush_collection(&mut tx, acl_id, class_id, plan, &mut assignments).await?;
        }

        tx.commit().await?;
        tracing::debug!(acl_id, "flushed acl changes");

        {
            let mut acl = acl_ref.borrow_mut();
            for assignment in assignments {
                apply_id_assignment(&mut acl, assignment);
            }
            acl.clear_changes();
        }

        let oid = acl_ref.borrow().object_identity().clone();
        if class_changed {
            self.propagate_shared_class_aces(acl_ref, oid.object_type());
            if let Some(cache) = self.inner.cache() {
                cache.evict_from_cache_by_type(oid.object_type()).await?;
            }
        }
        if let Some(cache) = self.inner.cache() {
            cache.evict_from_cache_by_identity(&oid).await?;
            for child in self.inner.find_children(&oid, false).await? {
                cache.evict_from_cache_by_identity(&child).await?;
            }
        }
        Ok(())
    }

    /// Class-scoped collections are shared by every instance of a type;
    /// after a flush, every other in-memory ACL of the type gets the new
    /// collections.
    fn propagate_shared_class_aces(&mut self, acl_ref: &AclRef, class_type: &str) {
        let (class_aces, class_field_aces) = {
            let acl = acl_ref.borrow();
            (acl.class_aces().to_vec(), acl.class_field_ace_map().clone())
        };
        for ((memo_type, _), other) in self.inner.memo().iter() {
            if memo_type != class_type || Rc::ptr_eq(other, acl_ref) {
                continue;
            }
            let mut other = other.borrow_mut();
            other.replace_class_aces(class_aces.clone());
            other.replace_class_field_aces(class_field_aces.clone());
        }
    }
}

async fn get_or_create_class_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    class_type: &str,
) -> AclResult<i64> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM classes WHERE class_type = ?")
        .bind(class_type)
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = sqlx::query("INSERT INTO classes (class_type) VALUES (?)")
        .bind(class_type)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();
    Ok(id)
}

async fn get_or_create_sid_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sid: &SecurityIdentity,
) -> AclResult<i64> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM security_identities WHERE identifier = ? AND username = ?",
    )
    .bind(sid.identifier())
    .bind(sid.is_user())
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = sqlx::query("INSERT INTO security_identities (identifier, username) VALUES (?, ?)")
        .bind(sid.identifier())
        .bind(sid.is_user())
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();
    Ok(id)
}

/// Rewrites the ancestor closure of one object identity: itself plus the
/// full closure of its new parent.
async fn regenerate_ancestor_relations(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    acl_id: i64,
    parent_pk: Option<i64>,
) -> AclResult<()> {
    sqlx::query("DELETE FROM object_identity_ancestors WHERE object_identity_id = ?")
        .bind(acl_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO object_identity_ancestors (object_identity_id, ancestor_id) VALUES (?, ?)",
    )
    .bind(acl_id)
    .bind(acl_id)
    .execute(&mut **tx)
    .await?;

    if let Some(parent_pk) = parent_pk {
        let ancestors: Vec<i64> = sqlx::query_scalar(
            "SELECT ancestor_id FROM object_identity_ancestors WHERE object_identity_id = ?",
        )
        .bind(parent_pk)
        .fetch_all(&mut **tx)
        .await?;
        for ancestor in ancestors {
            sqlx::query(
                "INSERT INTO object_identity_ancestors (object_identity_id, ancestor_id)
                 VALUES (?, ?)",
            )
            .bind(acl_id)
            .bind(ancestor)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

fn find_live_entry(acl: &Acl, ace_id: i64) -> Option<EntryWrite> {
    let collections = [acl.class_aces(), acl.object_aces()];
    for entries in collections {
        if let Some(entry) = entries.iter().find(|e| e.id() == Some(ace_id)) {
            return Some(EntryWrite::of(entry));
        }
    }
    for map in [acl.class_field_ace_map(), acl.object_field_ace_map()] {
        for entries in map.values() {
            if let Some(entry) = entries.iter().find(|e| e.id() == Some(ace_id)) {
                return Some(EntryWrite::of(entry));
            }
        }
    }
    None
}

fn build_collection_plans(acl: &Acl, changes: &ChangeSet) -> Vec<CollectionPlan> {
    let mut plans = Vec::new();
    if let Some(old) = &changes.class_aces {
        plans.push(plan_for(false, None, old, acl.class_aces()));
    }
    if let Some(old) = &changes.object_aces {
        plans.push(plan_for(true, None, old, acl.object_aces()));
    }
    if let Some(old_map) = &changes.class_field_aces {
        field_plans(false, old_map, acl.class_field_ace_map(), &mut plans);
    }
    if let Some(old_map) = &changes.object_field_aces {
        field_plans(true, old_map, acl.object_field_ace_map(), &mut plans);
    }
    plans
}

fn plan_for(
    object_scoped: bool,
    field: Option<String>,
    old: &[Entry],
    new: &[Entry],
) -> CollectionPlan {
    let surviving: HashSet<i64> = new.iter().filter_map(Entry::id).collect();
    CollectionPlan {
        object_scoped,
        field,
        deletes: old
            .iter()
            .filter_map(Entry::id)
            .filter(|id| !surviving.contains(id))
            .collect(),
        entries: new.iter().map(EntryWrite::of).collect(),
    }
}

fn field_plans(
    object_scoped: bool,
    old_map: &HashMap<String, Vec<Entry>>,
    new_map: &HashMap<String, Vec<Entry>>,
    plans: &mut Vec<CollectionPlan>,
) {
    let mut fields: BTreeSet<&String> = old_map.keys().collect();
    fields.extend(new_map.keys());
    for field in fields {
        let old = old_map.get(field).map_or(&[][..], Vec::as_slice);
        let new = new_map.get(field).map_or(&[][..], Vec::as_slice);
        if old != new {
            plans.push(plan_for(object_scoped, Some(field.clone()), old, new));
        }
    }
}

async fn flush_collection(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    acl_id: i64,
    class_id: i64,
    plan: &CollectionPlan,
    assignments: &mut Vec<IdAssignment>,
) -> AclResult<()> {
    for &ace_id in &plan.deletes {
        sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(ace_id)
            .execute(&mut **tx)
            .await?;
    }

    let object_identity_id = plan.object_scoped.then_some(acl_id);

    // Shift surviving rows out of the way, then write the dense final
    // order; the per-collection (field, ace_order) unique stays intact.
    let mut selector = String::from("class_id = ?");
    selector.push_str(if plan.object_scoped {
        " AND object_identity_id = ?"
    } else {
        " AND object_identity_id IS NULL"
    });
    selector.push_str(if plan.field.is_some() {
        " AND field_name = ?"
    } else {
        " AND field_name IS NULL"
    });

    let sql = format!(
        "UPDATE entries SET ace_order = ace_order + {} WHERE {}",
        ORDER_REWRITE_OFFSET, selector
    );
    let mut query = sqlx::query(&sql).bind(class_id);
    if let Some(oid_pk) = object_identity_id {
        query = query.bind(oid_pk);
    }
    if let Some(field) = &plan.field {
        query = query.bind(field);
    }
    query.execute(&mut **tx).await?;

    for (index, entry) in plan.entries.iter().enumerate() {
        match entry.id {
            Some(ace_id) => {
                sqlx::query("UPDATE entries SET ace_order = ? WHERE id = ?")
                    .bind(index as i64)
                    .bind(ace_id)
                    .execute(&mut **tx)
                    .await?;
            }
            None => {
                let sid_id = get_or_create_sid_id(tx, &entry.sid).await?;
                let id = sqlx::query(
                    "INSERT INTO entries (class_id, object_identity_id, field_name, ace_order,
                                          security_identity_id, mask, granting, granting_strategy,
                                          audit_success, audit_failure)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(class_id)
                .bind(object_identity_id)
                .bind(&plan.field)
                .bind(index as i64)
                .bind(sid_id)
                .bind(entry.mask as i64)
                .bind(entry.granting)
                .bind(entry.strategy.as_str())
                .bind(entry.audit_success)
                .bind(entry.audit_failure)
                .execute(&mut **tx)
                .await?
                .last_insert_rowid();
                assignments.push(IdAssignment {
                    object_scoped: plan.object_scoped,
                    field: plan.field.clone(),
                    index,
                    id,
                });
            }
        }
    }
    Ok(())
}

fn apply_id_assignment(acl: &mut Acl, assignment: IdAssignment) {
    let entries = match (assignment.object_scoped, &assignment.field) {
        (false, None) => Some(acl.class_aces_mut()),
        (true, None) => Some(acl.object_aces_mut()),
        (false, Some(field)) => acl.class_field_aces_map_mut().get_mut(field),
        (true, Some(field)) => acl.object_field_aces_map_mut().get_mut(field),
    };
    if let Some(entries) = entries {
        if let Some(entry) = entries.get_mut(assignment.index) {
            entry.set_id(assignment.id);
        }
    }
}
