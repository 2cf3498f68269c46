//! DDL for the five ACL tables.
//!
//! The engine owns its schema; embedders call [`create_schema`] once on a
//! fresh database instead of shipping migration files.

use sqlx::SqlitePool;

use crate::errors::AclResult;

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS classes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_type TEXT NOT NULL,
        UNIQUE (class_type)
    )",
    "CREATE TABLE IF NOT EXISTS security_identities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identifier TEXT NOT NULL,
        username INTEGER NOT NULL,
        UNIQUE (identifier, username)
    )",
    "CREATE TABLE IF NOT EXISTS object_identities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id INTEGER NOT NULL REFERENCES classes (id),
        object_identifier TEXT NOT NULL,
        parent_object_identity_id INTEGER REFERENCES object_identities (id),
        entries_inheriting INTEGER NOT NULL,
        UNIQUE (object_identifier, class_id)
    )",
    "CREATE TABLE IF NOT EXISTS object_identity_ancestors (
        object_identity_id INTEGER NOT NULL REFERENCES object_identities (id),
        ancestor_id INTEGER NOT NULL REFERENCES object_identities (id),
        PRIMARY KEY (object_identity_id, ancestor_id)
    )",
    "CREATE TABLE IF NOT EXISTS entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        class_id INTEGER NOT NULL REFERENCES classes (id),
        object_identity_id INTEGER REFERENCES object_identities (id),
        field_name TEXT,
        ace_order INTEGER NOT NULL,
        security_identity_id INTEGER NOT NULL REFERENCES security_identities (id),
        mask INTEGER NOT NULL,
        granting INTEGER NOT NULL,
        granting_strategy TEXT NOT NULL,
        audit_success INTEGER NOT NULL,
        audit_failure INTEGER NOT NULL,
        UNIQUE (class_id, object_identity_id, security_identity_id, field_name),
        UNIQUE (class_id, object_identity_id, field_name, ace_order)
    )",
];

const DROP_TABLES: &[&str] = &[
    "DROP TABLE IF EXISTS entries",
    "DROP TABLE IF EXISTS object_identity_ancestors",
    "DROP TABLE IF EXISTS object_identities",
    "DROP TABLE IF EXISTS security_identities",
    "DROP TABLE IF EXISTS classes",
];

pub async fn create_schema(pool: &SqlitePool) -> AclResult<()> {
    for ddl in CREATE_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

pub async fn drop_schema(pool: &SqlitePool) -> AclResult<()> {
    for ddl in DROP_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
