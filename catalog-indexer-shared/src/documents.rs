//! Documents stored in the search indices.
//!
//! Field names follow the index mappings used by the read API, which is why
//! a film's rating and directors go out as `imdb_rating` and `director`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EntityKind;

/// A reference to a genre or person inside a film document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: Uuid,
    pub name: String,
}

impl NamedEntity {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Document in the `movies` index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmworkDocument {
    pub id: Uuid,
    #[serde(rename = "imdb_rating")]
    pub rating: Option<f64>,
    pub title: String,
    pub description: Option<String>,
    pub genres: Vec<NamedEntity>,
    pub actors: Vec<NamedEntity>,
    pub writers: Vec<NamedEntity>,
    #[serde(rename = "director")]
    pub directors: Vec<NamedEntity>,
}

/// Document in the `genres` index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenreDocument {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// Document in the `persons` index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonDocument {
    pub id: Uuid,
    pub name: String,
    pub film_ids: Vec<Uuid>,
}

/// Any document the loader can upload.
///
/// Serializes as the inner document; the bulk request carries the id
/// separately as the document `_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndexDocument {
    Filmwork(FilmworkDocument),
    Genre(GenreDocument),
    Person(PersonDocument),
}

impl IndexDocument {
    /// The document id, which is also the entity id.
    pub fn id(&self) -> Uuid {
        match self {
            IndexDocument::Filmwork(doc) => doc.id,
            IndexDocument::Genre(doc) => doc.id,
            IndexDocument::Person(doc) => doc.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            IndexDocument::Filmwork(_) => EntityKind::Filmwork,
            IndexDocument::Genre(_) => EntityKind::Genre,
            IndexDocument::Person(_) => EntityKind::Person,
        }
    }
}

impl From<FilmworkDocument> for IndexDocument {
    fn from(doc: FilmworkDocument) -> Self {
        IndexDocument::Filmwork(doc)
    }
}

impl From<GenreDocument> for IndexDocument {
    fn from(doc: GenreDocument) -> Self {
        IndexDocument::Genre(doc)
    }
}

impl From<PersonDocument> for IndexDocument {
    fn from(doc: PersonDocument) -> Self {
        IndexDocument::Person(doc)
    }
}
