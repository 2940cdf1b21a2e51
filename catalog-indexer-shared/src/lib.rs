//! # Catalog Indexer Shared
//!
//! Types shared between the catalog indexer crates: the relational rows read
//! from the catalog, the documents written to the search index, and the
//! entity kinds that tie the two together.

pub mod documents;
pub mod rows;

pub use documents::{
    FilmworkDocument, GenreDocument, IndexDocument, NamedEntity, PersonDocument,
};
pub use rows::{ChangedRow, FilmworkRow, GenreRow, PersonFilmRow, PersonRole};

use chrono::{DateTime, Utc};
use std::fmt;

/// Seconds between `0001-01-01T00:00:00Z` and the Unix epoch.
const EPOCH_MIN_SECONDS: i64 = -62_135_596_800;

/// The lowest watermark value: `0001-01-01T00:00:00Z`.
///
/// Fresh watermarks start here, so every catalog row is newer than it.
pub fn epoch_min() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(EPOCH_MIN_SECONDS, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// The catalog entities that have their own table and their own index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Film works, the top-level aggregate.
    Filmwork,
    /// Genres.
    Genre,
    /// People.
    Person,
}

impl EntityKind {
    /// Name of the relational table holding this entity.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Filmwork => "film_work",
            EntityKind::Genre => "genre",
            EntityKind::Person => "person",
        }
    }

    /// Name of the search index holding this entity's documents.
    pub fn index_name(&self) -> &'static str {
        match self {
            EntityKind::Filmwork => "movies",
            EntityKind::Genre => "genres",
            EntityKind::Person => "persons",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
