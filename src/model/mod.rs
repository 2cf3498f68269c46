mod acl;
mod entry;
mod oid;
mod sid;

pub use acl::{Acl, AclRef, AclSnapshot};
pub use entry::{Entry, StrategyKind};
pub use oid::{DomainObject, ObjectIdentity};
pub use sid::SecurityIdentity;

pub(crate) use acl::ChangeSet;
