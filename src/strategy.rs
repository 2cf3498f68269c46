//! The authorization algorithm that walks an ACL's entries and parent
//! chain to produce a grant/deny decision.

use crate::errors::{AclError, AclResult};
use crate::model::{Acl, Entry, SecurityIdentity, StrategyKind};

/// Receives audit events for ACEs flagged with `audit_success` or
/// `audit_failure`.
pub trait AuditLogger {
    fn log(&self, granted: bool, entry: &Entry);
}

/// Default audit sink writing structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, granted: bool, entry: &Entry) {
        tracing::info!(
            granted,
            sid = %entry.security_identity(),
            mask = entry.mask(),
            ace_id = entry.id(),
            "ace audit"
        );
    }
}

/// Walks the entry collections of an ACL in precedence order:
/// object(-field) entries, then class(-field) entries, then the parent
/// chain when `entries_inheriting` is set. Within one collection the scan
/// is deny-first: the first applicable entry for the first mask/sid pair
/// decides, and an applicable deny stops the scan entirely even if a later
/// sid would have been granted. Callers put more specific identities
/// first.
pub struct PermissionGrantingStrategy {
    audit_logger: Option<Box<dyn AuditLogger>>,
}

impl Default for PermissionGrantingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGrantingStrategy {
    /// Audits flagged ACEs through [`TracingAuditLogger`]; use
    /// [`with_audit_logger`](Self::with_audit_logger) for another sink.
    pub fn new() -> Self {
        Self {
            audit_logger: Some(Box::new(TracingAuditLogger)),
        }
    }

    pub fn with_audit_logger(audit_logger: Box<dyn AuditLogger>) -> Self {
        Self {
            audit_logger: Some(audit_logger),
        }
    }

    /// Decides whether the given identities hold the required permission
    /// masks on the ACL. `Err(NoAceFound)` after the full cascade means no
    /// entry applied anywhere; deciding what that means is the caller's
    /// policy (typically: deny).
    pub fn is_granted(
        &self,
        acl: &Acl,
        masks: &[u32],
        sids: &[SecurityIdentity],
        administrative: bool,
    ) -> AclResult<bool> {
        match self.has_sufficient_permissions(acl.object_aces(), masks, sids, administrative) {
            Err(AclError::NoAceFound) => {}
            decided => return decided,
        }
        match self.has_sufficient_permissions(acl.class_aces(), masks, sids, administrative) {
            Err(AclError::NoAceFound) => {}
            decided => return decided,
        }
        if acl.is_entries_inheriting() {
            if let Some(parent) = acl.parent_acl() {
                return self.is_granted(&parent.borrow(), masks, sids, administrative);
            }
        }
        Err(AclError::NoAceFound)
    }

    /// Same cascade as [`is_granted`](Self::is_granted), starting from the
    /// entries scoped to one named field.
    pub fn is_field_granted(
        &self,
        acl: &Acl,
        field: &str,
        masks: &[u32],
        sids: &[SecurityIdentity],
        administrative: bool,
    ) -> AclResult<bool> {
        match self.has_sufficient_permissions(acl.object_field_aces(field), masks, sids, administrative)
        {
            Err(AclError::NoAceFound) => {}
            decided => return decided,
        }
        match self.has_sufficient_permissions(acl.class_field_aces(field), masks, sids, administrative)
        {
            Err(AclError::NoAceFound) => {}
            decided => return decided,
        }
        if acl.is_entries_inheriting() {
            if let Some(parent) = acl.parent_acl() {
                return self.is_field_granted(&parent.borrow(), field, masks, sids, administrative);
            }
        }
        Err(AclError::NoAceFound)
    }

    fn has_sufficient_permissions(
        &self,
        entries: &[Entry],
        masks: &[u32],
        sids: &[SecurityIdentity],
        administrative: bool,
    ) -> AclResult<bool> {
        let mut first_rejected: Option<&Entry> = None;

        'masks: for &required in masks {
            for sid in sids {
                for entry in entries {
                    if entry.security_identity() == sid && Self::is_ace_applicable(required, entry) {
                        if entry.is_granting() {
                            if !administrative && entry.is_audit_success() {
                                self.audit(true, entry);
                            }
                            tracing::debug!(sid = %sid, mask = required, "permission granted");
                            return Ok(true);
                        }
                        // Deny-first: the first applicable rejection ends
                        // the scan for every remaining sid and mask.
                        if first_rejected.is_none() {
                            first_rejected = Some(entry);
                        }
                        break 'masks;
                    }
                }
            }
        }

        if let Some(entry) = first_rejected {
            if !administrative && entry.is_audit_failure() {
                self.audit(false, entry);
            }
            tracing::debug!(sid = %entry.security_identity(), "permission denied");
            return Ok(false);
        }
        Err(AclError::NoAceFound)
    }

    fn is_ace_applicable(required: u32, entry: &Entry) -> bool {
        match entry.strategy() {
            StrategyKind::All => required == (entry.mask() & required),
            StrategyKind::Any => 0 != (entry.mask() & required),
            StrategyKind::Equal => required == entry.mask(),
        }
    }

    fn audit(&self, granted: bool, entry: &Entry) {
        if let Some(logger) = &self.audit_logger {
            logger.log(granted, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::model::ObjectIdentity;

    fn acl_with(
        object_aces: Vec<Entry>,
        class_aces: Vec<Entry>,
        entries_inheriting: bool,
    ) -> Acl {
        let mut acl = Acl::new(
            Some(1),
            ObjectIdentity::new("1", "post").unwrap(),
            entries_inheriting,
            None,
        );
        acl.replace_object_aces(object_aces);
        acl.replace_class_aces(class_aces);
        acl
    }

    fn user(name: &str) -> SecurityIdentity {
        SecurityIdentity::user(name).unwrap()
    }

    fn role(name: &str) -> SecurityIdentity {
        SecurityIdentity::role(name).unwrap()
    }

    fn ace(sid: SecurityIdentity, mask: u32, granting: bool, strategy: StrategyKind) -> Entry {
        Entry::new(None, sid, mask, granting, strategy, None)
    }

    fn audited_ace(
        sid: SecurityIdentity,
        mask: u32,
        granting: bool,
        audit_success: bool,
        audit_failure: bool,
    ) -> Entry {
        Entry::hydrated(
            1,
            sid,
            mask,
            granting,
            StrategyKind::All,
            audit_success,
            audit_failure,
            None,
        )
    }

    struct RecordingLogger {
        events: Rc<RefCell<Vec<(bool, u32)>>>,
    }

    impl AuditLogger for RecordingLogger {
        fn log(&self, granted: bool, entry: &Entry) {
            self.events.borrow_mut().push((granted, entry.mask()));
        }
    }

    fn recording_strategy() -> (PermissionGrantingStrategy, Rc<RefCell<Vec<(bool, u32)>>>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let strategy = PermissionGrantingStrategy::with_audit_logger(Box::new(RecordingLogger {
            events: events.clone(),
        }));
        (strategy, events)
    }

    #[test]
    fn object_aces_dominate_class_aces() {
        let sid = user("johannes");
        let acl = acl_with(
            vec![ace(sid.clone(), 1, false, StrategyKind::All)],
            vec![ace(sid.clone(), 1, true, StrategyKind::All)],
            true,
        );

        let strategy = PermissionGrantingStrategy::new();
        assert!(!strategy.is_granted(&acl, &[1], &[sid], false).unwrap());
    }

    #[test]
    fn inheritance_falls_back_to_the_parent() {
        let sid = user("johannes");
        let parent = Rc::new(RefCell::new(acl_with(
            vec![ace(sid.clone(), 1, true, StrategyKind::All)],
            vec![],
            true,
        )));

        let mut acl = acl_with(vec![], vec![], true);
        acl.set_parent_acl(Some(parent.clone()));

        let strategy = PermissionGrantingStrategy::new();
        assert!(strategy
            .is_granted(&acl, &[1], &[sid.clone()], false)
            .unwrap());

        let mut isolated = acl_with(vec![], vec![], false);
        isolated.set_parent_acl(Some(parent));
        let err = strategy
            .is_granted(&isolated, &[1], &[sid], false)
            .unwrap_err();
        assert!(matches!(err, AclError::NoAceFound));
    }

    #[test]
    fn first_applicable_entry_for_the_first_sid_wins() {
        let johannes = user("johannes");
        let role_user = role("ROLE_USER");
        let acl = acl_with(
            vec![],
            vec![
                ace(role_user.clone(), 1, true, StrategyKind::All),
                ace(johannes.clone(), 1, false, StrategyKind::All),
                ace(johannes.clone(), 1, true, StrategyKind::All),
            ],
            true,
        );

        // Most specific identity first: the deny for johannes is found
        // before the later grant for johannes or the ROLE_USER grant.
        let strategy = PermissionGrantingStrategy::new();
        assert!(!strategy
            .is_granted(&acl, &[1], &[johannes, role_user], false)
            .unwrap());
    }

    #[test]
    fn all_strategy_requires_every_bit() {
        let sid = user("a");
        let acl = acl_with(
            vec![ace(sid.clone(), 0b011, true, StrategyKind::All)],
            vec![],
            false,
        );
        let strategy = PermissionGrantingStrategy::new();

        assert!(strategy
            .is_granted(&acl, &[0b001], &[sid.clone()], false)
            .unwrap());
        let err = strategy
            .is_granted(&acl, &[0b100], &[sid], false)
            .unwrap_err();
        assert!(matches!(err, AclError::NoAceFound));
    }

    #[test]
    fn any_strategy_requires_one_bit() {
        let sid = user("a");
        let acl = acl_with(
            vec![ace(sid.clone(), 0b011, true, StrategyKind::Any)],
            vec![],
            false,
        );
        let strategy = PermissionGrantingStrategy::new();

        assert!(strategy
            .is_granted(&acl, &[0b101], &[sid.clone()], false)
            .unwrap());
        assert!(matches!(
            strategy.is_granted(&acl, &[0b100], &[sid], false),
            Err(AclError::NoAceFound)
        ));
    }

    #[test]
    fn equal_strategy_requires_exact_mask() {
        let sid = user("a");
        let acl = acl_with(
            vec![ace(sid.clone(), 0b011, true, StrategyKind::Equal)],
            vec![],
            false,
        );
        let strategy = PermissionGrantingStrategy::new();

        assert!(matches!(
            strategy.is_granted(&acl, &[0b001], &[sid.clone()], false),
            Err(AclError::NoAceFound)
        ));
        assert!(strategy.is_granted(&acl, &[0b011], &[sid], false).unwrap());
    }

    #[test]
    fn field_entries_cascade_like_object_entries() {
        let sid = user("a");
        let mut acl = acl_with(vec![], vec![], true);
        acl.replace_object_field_aces(
            [(
                "title".to_string(),
                vec![ace(sid.clone(), 1, false, StrategyKind::All)],
            )]
            .into(),
        );
        acl.replace_class_field_aces(
            [(
                "title".to_string(),
                vec![ace(sid.clone(), 1, true, StrategyKind::All)],
            )]
            .into(),
        );

        let strategy = PermissionGrantingStrategy::new();
        assert!(!strategy
            .is_field_granted(&acl, "title", &[1], &[sid.clone()], false)
            .unwrap());
        assert!(matches!(
            strategy.is_field_granted(&acl, "body", &[1], &[sid], false),
            Err(AclError::NoAceFound)
        ));
    }

    #[test]
    fn flagged_entries_reach_the_audit_logger() {
        let sid = user("a");
        let (strategy, events) = recording_strategy();

        let granting = acl_with(
            vec![audited_ace(sid.clone(), 1, true, true, false)],
            vec![],
            false,
        );
        assert!(strategy
            .is_granted(&granting, &[1], &[sid.clone()], false)
            .unwrap());

        let denying = acl_with(
            vec![audited_ace(sid.clone(), 2, false, false, true)],
            vec![],
            false,
        );
        assert!(!strategy.is_granted(&denying, &[2], &[sid], false).unwrap());

        assert_eq!(*events.borrow(), vec![(true, 1), (false, 2)]);
    }

    #[test]
    fn unflagged_entries_are_not_audited() {
        let sid = user("a");
        let (strategy, events) = recording_strategy();

        let acl = acl_with(
            vec![audited_ace(sid.clone(), 1, true, false, false)],
            vec![],
            false,
        );
        assert!(strategy.is_granted(&acl, &[1], &[sid], false).unwrap());
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn administrative_checks_bypass_auditing() {
        let sid = user("a");
        let (strategy, events) = recording_strategy();

        let granting = acl_with(
            vec![audited_ace(sid.clone(), 1, true, true, true)],
            vec![],
            false,
        );
        assert!(strategy
            .is_granted(&granting, &[1], &[sid.clone()], true)
            .unwrap());

        let denying = acl_with(
            vec![audited_ace(sid.clone(), 1, false, true, true)],
            vec![],
            false,
        );
        assert!(!strategy.is_granted(&denying, &[1], &[sid], true).unwrap());

        assert!(events.borrow().is_empty());
    }

    #[test]
    fn a_user_sid_never_matches_an_equally_named_role() {
        let acl = acl_with(
            vec![ace(role("admin"), 1, true, StrategyKind::All)],
            vec![],
            false,
        );
        let strategy = PermissionGrantingStrategy::new();

        assert!(matches!(
            strategy.is_granted(&acl, &[1], &[user("admin")], false),
            Err(AclError::NoAceFound)
        ));
    }
}
