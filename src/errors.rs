use crate::model::ObjectIdentity;

pub type AclResult<T> = Result<T, AclError>;

#[derive(thiserror::Error, Debug)]
pub enum AclError {
    #[error("no ACL found for {0}")]
    AclNotFound(ObjectIdentity),
    #[error("an ACL already exists for {0}")]
    AclAlreadyExists(ObjectIdentity),
    #[error("no applicable ACE was found")]
    NoAceFound,
    #[error("invalid domain object: {0}")]
    InvalidDomainObject(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("ACE index {index} out of bounds (collection has {len} entries)")]
    OutOfBounds { index: usize, len: usize },
    #[error("data integrity violation: {0}")]
    Integrity(String),
    #[error("ACL has not been persisted yet")]
    NotPersisted,
    #[error("cache error: {0}")]
    Cache(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AclError {
    pub fn invalid_domain_object(message: impl Into<String>) -> Self {
        Self::InvalidDomainObject(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<anyhow::Error> for AclError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AclError {
    fn from(value: serde_json::Error) -> Self {
        Self::Cache(value.to_string())
    }
}
