//! Row-to-object mapping for the batched lookup query.
//!
//! One `Acl`/`Entry` instance is created at most once per primary key per
//! pass; instances already memoized by the provider are reused so repeated
//! lookups observe the same object. Parent wiring is deferred to the end
//! of the pass because a row may reference a parent hydrated later.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::{AclError, AclResult};
use crate::model::{Acl, AclRef, Entry, ObjectIdentity, SecurityIdentity, StrategyKind};

#[derive(Default)]
struct StagedAces {
    class: Vec<(i64, Entry)>,
    class_field: HashMap<String, Vec<(i64, Entry)>>,
    object: Vec<(i64, Entry)>,
    object_field: HashMap<String, Vec<(i64, Entry)>>,
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> AclResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| AclError::internal(format!("missing {}: {}", column, e)))
}

/// Hydrates the joined row set into ACL graphs, registering every newly
/// built ACL in the provider memo. Returns the newly built ACLs (memo
/// reuses excluded) so the caller can push them into the cache.
pub(crate) fn hydrate(
    rows: &[SqliteRow],
    memo: &mut HashMap<(String, String), AclRef>,
) -> AclResult<Vec<AclRef>> {
    let mut acls: HashMap<i64, AclRef> = HashMap::new();
    let mut new_ids: Vec<i64> = Vec::new();
    let mut reused: HashSet<i64> = HashSet::new();
    let mut staged: HashMap<i64, StagedAces> = HashMap::new();
    let mut parent_links: HashMap<i64, i64> = HashMap::new();
    let mut seen_aces: HashSet<(i64, i64)> = HashSet::new();

    for row in rows {
        let acl_id: i64 = get(row, "acl_id")?;

        if !acls.contains_key(&acl_id) {
            let class_type: String = get(row, "class_type")?;
            let object_identifier: String = get(row, "object_identifier")?;
            let key = (class_type.clone(), object_identifier.clone());

            if let Some(existing) = memo.get(&key) {
                acls.insert(acl_id, existing.clone());
                reused.insert(acl_id);
            } else {
                let entries_inheriting: bool = get(row, "entries_inheriting")?;
                let oid = ObjectIdentity::new(object_identifier, class_type)?;
                let acl = Rc::new(RefCell::new(Acl::new(
                    Some(acl_id),
                    oid,
                    entries_inheriting,
                    None,
                )));
                memo.insert(key, acl.clone());
                acls.insert(acl_id, acl);
                new_ids.push(acl_id);

                let parent_pk: Option<i64> = get(row, "parent_object_identity_id")?;
                if let Some(parent_pk) = parent_pk {
                    parent_links.insert(acl_id, parent_pk);
                }
            }
        }

        // Entries of memoized ACLs are already loaded.
        if reused.contains(&acl_id) {
            continue;
        }

        let ace_id: Option<i64> = get(row, "ace_id")?;
        let Some(ace_id) = ace_id else {
            continue; // left join produced no entry for this identity
        };
        if !seen_aces.insert((acl_id, ace_id)) {
            continue;
        }

        let sid_identifier: String = get(row, "sid_identifier")?;
        let sid_is_user: bool = get(row, "sid_is_user")?;
        let sid = if sid_is_user {
            SecurityIdentity::user(sid_identifier)?
        } else {
            SecurityIdentity::role(sid_identifier)?
        };

        let mask: i64 = get(row, "mask")?;
        let granting: bool = get(row, "granting")?;
        let strategy: String = get(row, "granting_strategy")?;
        let audit_success: bool = get(row, "audit_success")?;
        let audit_failure: bool = get(row, "audit_failure")?;
        let field_name: Option<String> = get(row, "field_name")?;
        let ace_order: i64 = get(row, "ace_order")?;
        let object_scoped: Option<i64> = get(row, "ace_object_identity_id")?;

        let entry = Entry::hydrated(
            ace_id,
            sid,
            mask as u32,
            granting,
            StrategyKind::from_storage(&strategy)?,
            audit_success,
            audit_failure,
            field_name.clone(),
        );

        let staging = staged.entry(acl_id).or_default();
        match (object_scoped, field_name) {
            (None, None) => staging.class.push((ace_order, entry)),
            (None, Some(field)) => staging
                .class_field
                .entry(field)
                .or_default()
                .push((ace_order, entry)),
            (Some(_), None) => staging.object.push((ace_order, entry)),
            (Some(_), Some(field)) => staging
                .object_field
                .entry(field)
                .or_default()
                .push((ace_order, entry)),
        }
    }

    // Sort each collection by the stored order column and reindex densely;
    // the granting strategy's precedence scan depends on this ordering.
    for (acl_id, staging) in staged {
        let acl = &acls[&acl_id];
        let mut acl = acl.borrow_mut();
        acl.replace_class_aces(sorted(staging.class));
        acl.replace_object_aces(sorted(staging.object));
        acl.replace_class_field_aces(sorted_map(staging.class_field));
        acl.replace_object_field_aces(sorted_map(staging.object_field));
    }

    for (child_id, parent_pk) in parent_links {
        let parent = acls.get(&parent_pk).cloned().ok_or_else(|| {
            AclError::integrity(format!(
                "parent object identity {} was not hydrated",
                parent_pk
            ))
        })?;
        acls[&child_id].borrow_mut().set_parent_raw(Some(parent));
    }

    Ok(new_ids.iter().map(|id| acls[id].clone()).collect())
}

fn sorted(mut staged: Vec<(i64, Entry)>) -> Vec<Entry> {
    staged.sort_by_key(|(order, _)| *order);
    staged.into_iter().map(|(_, entry)| entry).collect()
}

fn sorted_map(staged: HashMap<String, Vec<(i64, Entry)>>) -> HashMap<String, Vec<Entry>> {
    staged
        .into_iter()
        .map(|(field, entries)| (field, sorted(entries)))
        .collect()
}
