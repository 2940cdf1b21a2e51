//! Read access to the relational catalog.
//!
//! The stages never build SQL themselves. They ask a [`CatalogSource`] for
//! changed ids, linked films, or the rows of a batch, which keeps them
//! testable against an in-memory catalog.

mod memory;
mod postgres;

pub use self::memory::{FilmRecord, GenreRecord, MemoryCatalog, PersonRecord};
pub use self::postgres::{PgCatalogSource, PostgresConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use catalog_indexer_shared::{ChangedRow, EntityKind, FilmworkRow, GenreRow, PersonFilmRow};

/// Errors raised while reading the catalog.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The connection could not be established or was lost.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// The database rejected the query.
    #[error("Database query error: {0}")]
    QueryError(String),

    /// A row could not be decoded into the expected types.
    #[error("Row decode error: {0}")]
    DecodeError(String),
}

impl SourceError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryError(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Only connection-level failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::ConnectionError(_))
    }
}

/// Position inside an ordered scan: rows strictly after
/// `(modified, id)` are returned. Without an id only `modified` is compared,
/// which is how a scan resumes from a stored watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub modified: DateTime<Utc>,
    pub id: Option<Uuid>,
}

impl PageCursor {
    /// Start after a watermark.
    pub fn after(modified: DateTime<Utc>) -> Self {
        Self { modified, id: None }
    }

    /// Move past `row`.
    pub fn advance_past(&mut self, row: &ChangedRow) {
        self.modified = row.modified;
        self.id = Some(row.id);
    }

    /// Whether `row` sorts after this cursor in `(modified, id)` order.
    pub fn precedes(&self, row: &ChangedRow) -> bool {
        match self.id {
            Some(id) => (row.modified, row.id) > (self.modified, id),
            None => row.modified > self.modified,
        }
    }
}

/// Film relation tables that fan a secondary entity out to films.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Genre,
    Person,
}

impl Relation {
    /// The relation that links `kind` to films, if any.
    pub fn for_entity(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Genre => Some(Relation::Genre),
            EntityKind::Person => Some(Relation::Person),
            EntityKind::Filmwork => None,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Relation::Genre => "genre_film_work",
            Relation::Person => "person_film_work",
        }
    }

    /// Column of the relation table holding the secondary entity's id.
    pub fn entity_column(&self) -> &'static str {
        match self {
            Relation::Genre => "genre_id",
            Relation::Person => "person_id",
        }
    }
}

/// Queries the pipeline stages need from the catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Rows of `kind`'s table after `after`, ascending by `(modified, id)`.
    async fn changed_rows(
        &self,
        kind: EntityKind,
        after: &PageCursor,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError>;

    /// Distinct films linked through `relation` to any of `ids`, after
    /// `after`, ascending by `(modified, id)`.
    async fn linked_filmworks(
        &self,
        relation: Relation,
        ids: &[Uuid],
        after: &PageCursor,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError>;

    /// Denormalized film rows: films outer-joined with their people and genres.
    async fn filmwork_rows(&self, ids: &[Uuid]) -> Result<Vec<FilmworkRow>, SourceError>;

    /// One row per genre.
    async fn genre_rows(&self, ids: &[Uuid]) -> Result<Vec<GenreRow>, SourceError>;

    /// People outer-joined with their film relations.
    async fn person_rows(&self, ids: &[Uuid]) -> Result<Vec<PersonFilmRow>, SourceError>;

    /// Cheap round trip to verify connectivity.
    async fn health_check(&self) -> Result<(), SourceError>;
}
