use serde::{Deserialize, Serialize};

use crate::errors::{AclError, AclResult};

/// Identifies a securable resource by type and identifier, independently of
/// any live object instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    identifier: String,
    object_type: String,
}

/// Capability for domain objects that can be mapped to an [`ObjectIdentity`].
pub trait DomainObject {
    /// Storage-level type name, usually the entity name.
    fn object_type(&self) -> &str;

    /// Unique identifier of this instance, `None` while unsaved.
    fn object_identifier(&self) -> Option<String>;
}

impl ObjectIdentity {
    pub fn new(identifier: impl Into<String>, object_type: impl Into<String>) -> AclResult<Self> {
        let identifier = identifier.into();
        let object_type = object_type.into();
        if identifier.is_empty() || object_type.is_empty() {
            return Err(AclError::invalid_input(
                "object identity requires a non-empty identifier and type",
            ));
        }
        Ok(Self {
            identifier,
            object_type,
        })
    }

    pub fn from_domain_object(object: &dyn DomainObject) -> AclResult<Self> {
        let object_type = object.object_type();
        if object_type.is_empty() {
            return Err(AclError::invalid_domain_object("object has an empty type"));
        }
        let identifier = object.object_identifier().ok_or_else(|| {
            AclError::invalid_domain_object(format!(
                "object of type {} exposes no identifier",
                object_type
            ))
        })?;
        if identifier.is_empty() {
            return Err(AclError::invalid_domain_object(format!(
                "object of type {} exposes an empty identifier",
                object_type
            )));
        }
        Ok(Self {
            identifier,
            object_type: object_type.to_string(),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }
}

impl std::fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.object_type, self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Post {
        id: Option<i64>,
    }

    impl DomainObject for Post {
        fn object_type(&self) -> &str {
            "post"
        }

        fn object_identifier(&self) -> Option<String> {
            self.id.map(|id| id.to_string())
        }
    }

    #[test]
    fn equality_covers_both_fields() {
        let a = ObjectIdentity::new("1", "post").unwrap();
        let b = ObjectIdentity::new("1", "post").unwrap();
        let c = ObjectIdentity::new("1", "comment").unwrap();
        let d = ObjectIdentity::new("2", "post").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn from_domain_object_uses_the_capability() {
        let post = Post { id: Some(42) };
        let oid = ObjectIdentity::from_domain_object(&post).unwrap();
        assert_eq!(oid.identifier(), "42");
        assert_eq!(oid.object_type(), "post");
    }

    #[test]
    fn unsaved_domain_object_is_rejected() {
        let post = Post { id: None };
        let err = ObjectIdentity::from_domain_object(&post).unwrap_err();
        assert!(matches!(err, AclError::InvalidDomainObject(_)));
    }
}
