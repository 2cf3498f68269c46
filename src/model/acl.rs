use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::errors::{AclError, AclResult};
use crate::model::{Entry, ObjectIdentity, SecurityIdentity, StrategyKind};
use crate::strategy::PermissionGrantingStrategy;

/// Shared handle to an ACL.
///
/// The provider memo and parent links hold the same `Rc`, so repeated
/// lookups observe one instance per primary key. The engine is
/// synchronous per request; futures holding an `AclRef` are `!Send`.
pub type AclRef = Rc<RefCell<Acl>>;

/// Which of the ACE collection groups an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Class,
    Object,
}

/// Before-values of a persisted ACE captured at its first tracked change.
/// The live entry carries the after-state; when both agree again the diff
/// is pruned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AceBefore {
    pub(crate) mask: u32,
    pub(crate) strategy: StrategyKind,
    pub(crate) audit_success: bool,
    pub(crate) audit_failure: bool,
}

impl AceBefore {
    fn of(entry: &Entry) -> Self {
        Self {
            mask: entry.mask(),
            strategy: entry.strategy(),
            audit_success: entry.is_audit_success(),
            audit_failure: entry.is_audit_failure(),
        }
    }

    fn matches(&self, entry: &Entry) -> bool {
        self.mask == entry.mask()
            && self.strategy == entry.strategy()
            && self.audit_success == entry.is_audit_success()
            && self.audit_failure == entry.is_audit_failure()
    }
}

/// Accumulated property diff of one ACL.
///
/// Each slot stores the before-value captured at the first change; the ACL
/// itself carries the after-state. A change that restores the before-value
/// drops the slot again, so a toggled-back property never reaches storage.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeSet {
    pub(crate) entries_inheriting: Option<bool>,
    /// Parent primary key before the first reparent.
    pub(crate) parent: Option<Option<i64>>,
    pub(crate) class_aces: Option<Vec<Entry>>,
    pub(crate) class_field_aces: Option<HashMap<String, Vec<Entry>>>,
    pub(crate) object_aces: Option<Vec<Entry>>,
    pub(crate) object_field_aces: Option<HashMap<String, Vec<Entry>>>,
    /// Per-ACE before-values, keyed by persisted ACE id.
    pub(crate) ace_diffs: HashMap<i64, AceBefore>,
}

impl ChangeSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.entries_inheriting.is_none()
            && self.parent.is_none()
            && self.class_aces.is_none()
            && self.class_field_aces.is_none()
            && self.object_aces.is_none()
            && self.object_field_aces.is_none()
            && self.ace_diffs.is_empty()
    }
}

/// Aggregate of all ACEs for one object identity.
///
/// Holds four independent ordered collections (class, class-field, object,
/// object-field); within each, index order encodes evaluation precedence.
/// All mutation goes through the tracked operations below, which feed the
/// internal [`ChangeSet`] the mutable provider flushes incrementally.
#[derive(Debug, Clone)]
pub struct Acl {
    id: Option<i64>,
    object_identity: ObjectIdentity,
    class_aces: Vec<Entry>,
    class_field_aces: HashMap<String, Vec<Entry>>,
    object_aces: Vec<Entry>,
    object_field_aces: HashMap<String, Vec<Entry>>,
    parent: Option<AclRef>,
    entries_inheriting: bool,
    /// `None` means entries for every security identity are loaded.
    loaded_sids: Option<Vec<SecurityIdentity>>,
    changes: ChangeSet,
}

impl Acl {
    pub(crate) fn new(
        id: Option<i64>,
        object_identity: ObjectIdentity,
        entries_inheriting: bool,
        loaded_sids: Option<Vec<SecurityIdentity>>,
    ) -> Self {
        Self {
            id,
            object_identity,
            class_aces: Vec::new(),
            class_field_aces: HashMap::new(),
            object_aces: Vec::new(),
            object_field_aces: HashMap::new(),
            parent: None,
            entries_inheriting,
            loaded_sids,
            changes: ChangeSet::default(),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn object_identity(&self) -> &ObjectIdentity {
        &self.object_identity
    }

    pub fn class_aces(&self) -> &[Entry] {
        &self.class_aces
    }

    pub fn class_field_aces(&self, field: &str) -> &[Entry] {
        self.class_field_aces.get(field).map_or(&[], Vec::as_slice)
    }

    pub fn object_aces(&self) -> &[Entry] {
        &self.object_aces
    }

    pub fn object_field_aces(&self, field: &str) -> &[Entry] {
        self.object_field_aces.get(field).map_or(&[], Vec::as_slice)
    }

    pub fn parent_acl(&self) -> Option<&AclRef> {
        self.parent.as_ref()
    }

    pub fn is_entries_inheriting(&self) -> bool {
        self.entries_inheriting
    }

    /// Whether this instance has fully loaded entries for every one of the
    /// given identities. A partially hydrated ACL must not serve queries
    /// for identities outside its loaded set.
    pub fn is_sid_loaded(&self, sids: &[SecurityIdentity]) -> bool {
        match &self.loaded_sids {
            None => true,
            Some(loaded) => sids.iter().all(|sid| loaded.contains(sid)),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Grant check with the default strategy. Use a configured
    /// [`PermissionGrantingStrategy`] directly to attach an audit logger.
    pub fn is_granted(&self, masks: &[u32], sids: &[SecurityIdentity]) -> AclResult<bool> {
        PermissionGrantingStrategy::new().is_granted(self, masks, sids, false)
    }

    pub fn is_field_granted(
        &self,
        field: &str,
        masks: &[u32],
        sids: &[SecurityIdentity],
    ) -> AclResult<bool> {
        PermissionGrantingStrategy::new().is_field_granted(self, field, masks, sids, false)
    }

    // ---------------------------------------------------------------------
    // Tracked mutations
    // ---------------------------------------------------------------------

    pub fn set_entries_inheriting(&mut self, value: bool) {
        if self.entries_inheriting == value {
            return;
        }
        match self.changes.entries_inheriting {
            None => self.changes.entries_inheriting = Some(self.entries_inheriting),
            Some(before) if before == value => self.changes.entries_inheriting = None,
            Some(_) => {}
        }
        self.entries_inheriting = value;
    }

    pub fn set_parent_acl(&mut self, parent: Option<AclRef>) {
        let unchanged = match (&self.parent, &parent) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        if unchanged {
            return;
        }
        let before = self.parent.as_ref().and_then(|p| p.borrow().id());
        let after = parent.as_ref().and_then(|p| p.borrow().id());
        match self.changes.parent {
            None => {
                if before != after {
                    self.changes.parent = Some(before);
                }
            }
            Some(original) if original == after => self.changes.parent = None,
            Some(_) => {}
        }
        self.parent = parent;
    }

    pub fn insert_class_ace(
        &mut self,
        index: usize,
        sid: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
    ) -> AclResult<()> {
        self.insert_ace(Scope::Class, None, index, sid, mask, granting, strategy)
    }

    pub fn insert_class_field_ace(
        &mut self,
        field: &str,
        index: usize,
        sid: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
    ) -> AclResult<()> {
        self.insert_ace(Scope::Class, Some(field), index, sid, mask, granting, strategy)
    }

    pub fn insert_object_ace(
        &mut self,
        index: usize,
        sid: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
    ) -> AclResult<()> {
        self.insert_ace(Scope::Object, None, index, sid, mask, granting, strategy)
    }

    pub fn insert_object_field_ace(
        &mut self,
        field: &str,
        index: usize,
        sid: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
    ) -> AclResult<()> {
        self.insert_ace(Scope::Object, Some(field), index, sid, mask, granting, strategy)
    }

    pub fn update_class_ace(
        &mut self,
        index: usize,
        mask: u32,
        strategy: Option<StrategyKind>,
    ) -> AclResult<()> {
        self.update_ace(Scope::Class, None, index, mask, strategy)
    }

    pub fn update_class_field_ace(
        &mut self,
        field: &str,
        index: usize,
        mask: u32,
        strategy: Option<StrategyKind>,
    ) -> AclResult<()> {
        self.update_ace(Scope::Class, Some(field), index, mask, strategy)
    }

    pub fn update_object_ace(
        &mut self,
        index: usize,
        mask: u32,
        strategy: Option<StrategyKind>,
    ) -> AclResult<()> {
        self.update_ace(Scope::Object, None, index, mask, strategy)
    }

    pub fn update_object_field_ace(
        &mut self,
        field: &str,
        index: usize,
        mask: u32,
        strategy: Option<StrategyKind>,
    ) -> AclResult<()> {
        self.update_ace(Scope::Object, Some(field), index, mask, strategy)
    }

    pub fn update_class_auditing(
        &mut self,
        index: usize,
        audit_success: bool,
        audit_failure: bool,
    ) -> AclResult<()> {
        self.update_auditing(Scope::Class, None, index, audit_success, audit_failure)
    }

    pub fn update_class_field_auditing(
        &mut self,
        field: &str,
        index: usize,
        audit_success: bool,
        audit_failure: bool,
    ) -> AclResult<()> {
        self.update_auditing(Scope::Class, Some(field), index, audit_success, audit_failure)
    }

    pub fn update_object_auditing(
        &mut self,
        index: usize,
        audit_success: bool,
        audit_failure: bool,
    ) -> AclResult<()> {
        self.update_auditing(Scope::Object, None, index, audit_success, audit_failure)
    }

    pub fn update_object_field_auditing(
        &mut self,
        field: &str,
        index: usize,
        audit_success: bool,
        audit_failure: bool,
    ) -> AclResult<()> {
        self.update_auditing(Scope::Object, Some(field), index, audit_success, audit_failure)
    }

    pub fn delete_class_ace(&mut self, index: usize) -> AclResult<()> {
        self.delete_ace(Scope::Class, None, index)
    }

    pub fn delete_class_field_ace(&mut self, field: &str, index: usize) -> AclResult<()> {
        self.delete_ace(Scope::Class, Some(field), index)
    }

    pub fn delete_object_ace(&mut self, index: usize) -> AclResult<()> {
        self.delete_ace(Scope::Object, None, index)
    }

    pub fn delete_object_field_ace(&mut self, field: &str, index: usize) -> AclResult<()> {
        self.delete_ace(Scope::Object, Some(field), index)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn insert_ace(
        &mut self,
        scope: Scope,
        field: Option<&str>,
        index: usize,
        sid: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
    ) -> AclResult<()> {
        if let Some(field) = field {
            if field.is_empty() {
                return Err(AclError::invalid_input("field name must not be empty"));
            }
        }
        let len = self.collection(scope, field).len();
        if index > len {
            return Err(AclError::OutOfBounds { index, len });
        }
        self.snapshot_group(scope, field.is_some());
        let entry = Entry::new(None, sid, mask, granting, strategy, field.map(str::to_string));
        self.collection_mut(scope, field).insert(index, entry);
        self.prune_group(scope, field.is_some());
        Ok(())
    }

    fn update_ace(
        &mut self,
        scope: Scope,
        field: Option<&str>,
        index: usize,
        mask: u32,
        strategy: Option<StrategyKind>,
    ) -> AclResult<()> {
        self.with_tracked_entry(scope, field, index, |entry| {
            entry.set_mask(mask);
            if let Some(strategy) = strategy {
                entry.set_strategy(strategy);
            }
        })
    }

    fn update_auditing(
        &mut self,
        scope: Scope,
        field: Option<&str>,
        index: usize,
        audit_success: bool,
        audit_failure: bool,
    ) -> AclResult<()> {
        self.with_tracked_entry(scope, field, index, |entry| {
            entry.set_auditing(audit_success, audit_failure);
        })
    }

    /// Applies a field-level mutation to one entry, keeping the per-ACE
    /// diff for persisted entries (unpersisted entries are flushed whole
    /// from the collection, so no diff is needed).
    fn with_tracked_entry(
        &mut self,
        scope: Scope,
        field: Option<&str>,
        index: usize,
        apply: impl FnOnce(&mut Entry),
    ) -> AclResult<()> {
        let len = self.collection(scope, field).len();
        if index >= len {
            return Err(AclError::OutOfBounds { index, len });
        }
        let entry = &mut self.collection_mut(scope, field)[index];
        let id = entry.id();
        let before = id.map(|_| AceBefore::of(entry));
        apply(entry);
        if let (Some(id), Some(before)) = (id, before) {
            let entry = &self.collection(scope, field)[index];
            match self.changes.ace_diffs.get(&id) {
                None => {
                    if !before.matches(entry) {
                        self.changes.ace_diffs.insert(id, before);
                    }
                }
                Some(original) => {
                    if original.matches(entry) {
                        self.changes.ace_diffs.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    fn delete_ace(&mut self, scope: Scope, field: Option<&str>, index: usize) -> AclResult<()> {
        let len = self.collection(scope, field).len();
        if index >= len {
            return Err(AclError::OutOfBounds { index, len });
        }
        self.snapshot_group(scope, field.is_some());
        let removed = self.collection_mut(scope, field).remove(index);
        if let Some(id) = removed.id() {
            self.changes.ace_diffs.remove(&id);
        }
        // Drop emptied field vectors so a pruned diff compares clean.
        if let Some(field) = field {
            let map = match scope {
                Scope::Class => &mut self.class_field_aces,
                Scope::Object => &mut self.object_field_aces,
            };
            if map.get(field).is_some_and(Vec::is_empty) {
                map.remove(field);
            }
        }
        self.prune_group(scope, field.is_some());
        Ok(())
    }

    fn collection(&self, scope: Scope, field: Option<&str>) -> &[Entry] {
        match (scope, field) {
            (Scope::Class, None) => &self.class_aces,
            (Scope::Object, None) => &self.object_aces,
            (Scope::Class, Some(field)) => self.class_field_aces(field),
            (Scope::Object, Some(field)) => self.object_field_aces(field),
        }
    }

    fn collection_mut(&mut self, scope: Scope, field: Option<&str>) -> &mut Vec<Entry> {
        match (scope, field) {
            (Scope::Class, None) => &mut self.class_aces,
            (Scope::Object, None) => &mut self.object_aces,
            (Scope::Class, Some(field)) => {
                self.class_field_aces.entry(field.to_string()).or_default()
            }
            (Scope::Object, Some(field)) => {
                self.object_field_aces.entry(field.to_string()).or_default()
            }
        }
    }

    fn snapshot_group(&mut self, scope: Scope, field_scoped: bool) {
        match (scope, field_scoped) {
            (Scope::Class, false) => {
                self.changes
                    .class_aces
                    .get_or_insert_with(|| self.class_aces.clone());
            }
            (Scope::Class, true) => {
                self.changes
                    .class_field_aces
                    .get_or_insert_with(|| self.class_field_aces.clone());
            }
            (Scope::Object, false) => {
                self.changes
                    .object_aces
                    .get_or_insert_with(|| self.object_aces.clone());
            }
            (Scope::Object, true) => {
                self.changes
                    .object_field_aces
                    .get_or_insert_with(|| self.object_field_aces.clone());
            }
        }
    }

    fn prune_group(&mut self, scope: Scope, field_scoped: bool) {
        match (scope, field_scoped) {
            (Scope::Class, false) => {
                if self.changes.class_aces.as_ref() == Some(&self.class_aces) {
                    self.changes.class_aces = None;
                }
            }
            (Scope::Class, true) => {
                if self.changes.class_field_aces.as_ref() == Some(&self.class_field_aces) {
                    self.changes.class_field_aces = None;
                }
            }
            (Scope::Object, false) => {
                if self.changes.object_aces.as_ref() == Some(&self.object_aces) {
                    self.changes.object_aces = None;
                }
            }
            (Scope::Object, true) => {
                if self.changes.object_field_aces.as_ref() == Some(&self.object_field_aces) {
                    self.changes.object_field_aces = None;
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Crate-internal hydration and flush support. None of these record a
    // diff; they exist for the storage layer only.
    // ---------------------------------------------------------------------

    pub(crate) fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn clear_changes(&mut self) {
        self.changes = ChangeSet::default();
    }

    pub(crate) fn replace_class_aces(&mut self, aces: Vec<Entry>) {
        self.class_aces = aces;
    }

    pub(crate) fn replace_class_field_aces(&mut self, aces: HashMap<String, Vec<Entry>>) {
        self.class_field_aces = aces;
    }

    pub(crate) fn replace_object_aces(&mut self, aces: Vec<Entry>) {
        self.object_aces = aces;
    }

    pub(crate) fn replace_object_field_aces(&mut self, aces: HashMap<String, Vec<Entry>>) {
        self.object_field_aces = aces;
    }

    pub(crate) fn class_field_ace_map(&self) -> &HashMap<String, Vec<Entry>> {
        &self.class_field_aces
    }

    pub(crate) fn object_field_ace_map(&self) -> &HashMap<String, Vec<Entry>> {
        &self.object_field_aces
    }

    pub(crate) fn class_aces_mut(&mut self) -> &mut Vec<Entry> {
        &mut self.class_aces
    }

    pub(crate) fn class_field_aces_map_mut(&mut self) -> &mut HashMap<String, Vec<Entry>> {
        &mut self.class_field_aces
    }

    pub(crate) fn object_aces_mut(&mut self) -> &mut Vec<Entry> {
        &mut self.object_aces
    }

    pub(crate) fn object_field_aces_map_mut(&mut self) -> &mut HashMap<String, Vec<Entry>> {
        &mut self.object_field_aces
    }

    pub(crate) fn set_parent_raw(&mut self, parent: Option<AclRef>) {
        self.parent = parent;
    }

    // ---------------------------------------------------------------------
    // Cache snapshots
    // ---------------------------------------------------------------------

    /// Flattens this ACL (parent chain included) to owned serializable
    /// data for a cache backend.
    pub fn to_snapshot(&self) -> AclResult<AclSnapshot> {
        let id = self.id.ok_or(AclError::NotPersisted)?;
        let parent = match &self.parent {
            Some(parent) => Some(Box::new(parent.borrow().to_snapshot()?)),
            None => None,
        };
        Ok(AclSnapshot {
            id,
            object_identity: self.object_identity.clone(),
            entries_inheriting: self.entries_inheriting,
            class_aces: self.class_aces.clone(),
            class_field_aces: self.class_field_aces.clone(),
            object_aces: self.object_aces.clone(),
            object_field_aces: self.object_field_aces.clone(),
            parent,
            loaded_sids: self.loaded_sids.clone(),
        })
    }

    pub fn from_snapshot(snapshot: AclSnapshot) -> AclRef {
        let mut acl = Acl::new(
            Some(snapshot.id),
            snapshot.object_identity,
            snapshot.entries_inheriting,
            snapshot.loaded_sids,
        );
        acl.class_aces = snapshot.class_aces;
        acl.class_field_aces = snapshot.class_field_aces;
        acl.object_aces = snapshot.object_aces;
        acl.object_field_aces = snapshot.object_field_aces;
        acl.parent = snapshot.parent.map(|p| Acl::from_snapshot(*p));
        Rc::new(RefCell::new(acl))
    }
}

/// An [`Acl`] flattened to owned data, the unit a cache backend stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclSnapshot {
    pub id: i64,
    pub object_identity: ObjectIdentity,
    pub entries_inheriting: bool,
    pub class_aces: Vec<Entry>,
    pub class_field_aces: HashMap<String, Vec<Entry>>,
    pub object_aces: Vec<Entry>,
    pub object_field_aces: HashMap<String, Vec<Entry>>,
    pub parent: Option<Box<AclSnapshot>>,
    pub loaded_sids: Option<Vec<SecurityIdentity>>,
}

impl AclSnapshot {
    pub fn sid_loaded(&self, sids: &[SecurityIdentity]) -> bool {
        match &self.loaded_sids {
            None => true,
            Some(loaded) => sids.iter().all(|sid| loaded.contains(sid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl() -> Acl {
        Acl::new(
            Some(1),
            ObjectIdentity::new("1", "post").unwrap(),
            true,
            None,
        )
    }

    fn sid(name: &str) -> SecurityIdentity {
        SecurityIdentity::user(name).unwrap()
    }

    #[test]
    fn insert_respects_index_order() {
        let mut acl = acl();
        acl.insert_class_ace(0, sid("a"), 1, true, StrategyKind::All)
            .unwrap();
        acl.insert_class_ace(0, sid("b"), 2, true, StrategyKind::All)
            .unwrap();
        acl.insert_class_ace(1, sid("c"), 4, true, StrategyKind::All)
            .unwrap();

        let names: Vec<_> = acl
            .class_aces()
            .iter()
            .map(|e| e.security_identity().identifier().to_string())
            .collect();
        assert_eq!(names, ["b", "c", "a"]);
    }

    #[test]
    fn insert_out_of_bounds_is_rejected() {
        let mut acl = acl();
        let err = acl
            .insert_object_ace(1, sid("a"), 1, true, StrategyKind::All)
            .unwrap_err();
        assert!(matches!(err, AclError::OutOfBounds { index: 1, len: 0 }));
    }

    #[test]
    fn toggling_entries_inheriting_back_prunes_the_diff() {
        let mut acl = acl();
        assert!(!acl.is_dirty());

        acl.set_entries_inheriting(false);
        assert!(acl.is_dirty());

        acl.set_entries_inheriting(true);
        assert!(!acl.is_dirty());
    }

    #[test]
    fn insert_then_delete_prunes_the_collection_diff() {
        let mut acl = acl();
        acl.insert_object_ace(0, sid("a"), 1, true, StrategyKind::All)
            .unwrap();
        assert!(acl.is_dirty());

        acl.delete_object_ace(0).unwrap();
        assert!(!acl.is_dirty());
    }

    #[test]
    fn field_ace_insert_then_delete_prunes() {
        let mut acl = acl();
        acl.insert_object_field_ace("title", 0, sid("a"), 1, true, StrategyKind::All)
            .unwrap();
        assert_eq!(acl.object_field_aces("title").len(), 1);

        acl.delete_object_field_ace("title", 0).unwrap();
        assert!(acl.object_field_aces("title").is_empty());
        assert!(!acl.is_dirty());
    }

    #[test]
    fn updating_an_unpersisted_ace_records_no_ace_diff() {
        let mut acl = acl();
        acl.insert_class_ace(0, sid("a"), 1, true, StrategyKind::All)
            .unwrap();
        acl.update_class_ace(0, 3, None).unwrap();

        assert!(acl.changes().ace_diffs.is_empty());
        assert_eq!(acl.class_aces()[0].mask(), 3);
    }

    #[test]
    fn reverting_a_persisted_ace_update_prunes_its_diff() {
        let mut acl = acl();
        acl.replace_class_aces(vec![Entry::hydrated(
            7,
            sid("a"),
            1,
            true,
            StrategyKind::All,
            false,
            false,
            None,
        )]);

        acl.update_class_ace(0, 3, None).unwrap();
        assert!(acl.changes().ace_diffs.contains_key(&7));

        acl.update_class_ace(0, 1, None).unwrap();
        assert!(acl.changes().ace_diffs.is_empty());
        assert!(!acl.is_dirty());
    }

    #[test]
    fn reparenting_back_prunes_the_parent_diff() {
        let parent = Rc::new(RefCell::new(Acl::new(
            Some(9),
            ObjectIdentity::new("9", "post").unwrap(),
            true,
            None,
        )));
        let mut acl = acl();

        acl.set_parent_acl(Some(parent));
        assert!(acl.is_dirty());

        acl.set_parent_acl(None);
        assert!(!acl.is_dirty());
    }

    #[test]
    fn snapshot_round_trip_preserves_the_parent_chain() {
        let parent = Rc::new(RefCell::new(Acl::new(
            Some(9),
            ObjectIdentity::new("9", "post").unwrap(),
            true,
            None,
        )));
        let mut acl = acl();
        acl.insert_object_ace(0, sid("a"), 4, false, StrategyKind::Any)
            .unwrap();
        acl.set_parent_acl(Some(parent));

        let snapshot = acl.to_snapshot().unwrap();
        let restored = Acl::from_snapshot(snapshot);
        let restored = restored.borrow();

        assert_eq!(restored.id(), Some(1));
        assert_eq!(restored.object_aces().len(), 1);
        assert!(!restored.object_aces()[0].is_granting());
        let parent = restored.parent_acl().unwrap().borrow();
        assert_eq!(parent.id(), Some(9));
    }
}
