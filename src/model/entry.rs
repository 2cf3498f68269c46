use serde::{Deserialize, Serialize};

use crate::errors::{AclError, AclResult};
use crate::model::SecurityIdentity;

/// Comparison strategy an ACE is evaluated with against a required mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Every required bit must be set in the entry mask.
    All,
    /// At least one required bit must be set in the entry mask.
    Any,
    /// Entry mask and required mask must be bitwise identical.
    Equal,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::Equal => "equal",
        }
    }

    /// Parses the storage representation. Unknown values indicate corrupt
    /// rows and surface as integrity errors.
    pub fn from_storage(value: &str) -> AclResult<Self> {
        match value {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            "equal" => Ok(Self::Equal),
            other => Err(AclError::integrity(format!(
                "unknown granting strategy {:?}",
                other
            ))),
        }
    }
}

/// One permission grant/deny record.
///
/// A `field` of `Some` scopes the entry to one named property of the
/// object or class instead of the whole thing. Entries are owned by their
/// ACL; everything here is read-only outside the crate, and mutation goes
/// through the owning ACL's tracked insert/update/delete operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    id: Option<i64>,
    security_identity: SecurityIdentity,
    mask: u32,
    granting: bool,
    strategy: StrategyKind,
    audit_success: bool,
    audit_failure: bool,
    field: Option<String>,
}

impl Entry {
    pub(crate) fn new(
        id: Option<i64>,
        security_identity: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
        field: Option<String>,
    ) -> Self {
        Self {
            id,
            security_identity,
            mask,
            granting,
            strategy,
            audit_success: false,
            audit_failure: false,
            field,
        }
    }

    pub(crate) fn hydrated(
        id: i64,
        security_identity: SecurityIdentity,
        mask: u32,
        granting: bool,
        strategy: StrategyKind,
        audit_success: bool,
        audit_failure: bool,
        field: Option<String>,
    ) -> Self {
        Self {
            id: Some(id),
            security_identity,
            mask,
            granting,
            strategy,
            audit_success,
            audit_failure,
            field,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn security_identity(&self) -> &SecurityIdentity {
        &self.security_identity
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn is_granting(&self) -> bool {
        self.granting
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn is_audit_success(&self) -> bool {
        self.audit_success
    }

    pub fn is_audit_failure(&self) -> bool {
        self.audit_failure
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub(crate) fn set_mask(&mut self, mask: u32) {
        self.mask = mask;
    }

    pub(crate) fn set_strategy(&mut self, strategy: StrategyKind) {
        self.strategy = strategy;
    }

    pub(crate) fn set_auditing(&mut self, audit_success: bool, audit_failure: bool) {
        self.audit_success = audit_success;
        self.audit_failure = audit_failure;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_storage_round_trip() {
        for kind in [StrategyKind::All, StrategyKind::Any, StrategyKind::Equal] {
            assert_eq!(StrategyKind::from_storage(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_strategy_is_an_integrity_error() {
        let err = StrategyKind::from_storage("most").unwrap_err();
        assert!(matches!(err, AclError::Integrity(_)));
    }
}
