//! Storage errors shared by every repository in this crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: &'static str, id: String },

    #[error("{entity_type} {id} already exists")]
    Duplicate { entity_type: &'static str, id: String },

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: i64, found: i64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

#[cfg(feature = "postgres")]
impl StoreError {
    /// Maps a Postgres unique-violation (`23505`) into `Duplicate`; every
    /// other database error passes through as `Database`.
    pub fn from_insert_error(e: sqlx::Error, entity_type: &'static str, id: impl Into<String>) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                return StoreError::Duplicate { entity_type, id: id.into() };
            }
        }
        StoreError::Database(e)
    }
}
