//! Rows read from the relational catalog.
//!
//! Relation columns are optional because the merge queries use outer joins:
//! a film without genres or people still yields one row with nulls.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An id and its modification timestamp, as produced by change scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRow {
    pub id: Uuid,
    pub modified: DateTime<Utc>,
}

impl ChangedRow {
    pub fn new(id: Uuid, modified: DateTime<Utc>) -> Self {
        Self { id, modified }
    }
}

/// One denormalized film row: the film's scalar columns plus at most one
/// person relation and one genre relation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilmworkRow {
    pub film_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub person_id: Option<Uuid>,
    pub person_name: Option<String>,
    pub person_role: Option<String>,
    pub genre_id: Option<Uuid>,
    pub genre_name: Option<String>,
}

/// One genre row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreRow {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// One (person, film) relation row. `film_id` is null for people that are
/// not linked to any film.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonFilmRow {
    pub person_id: Uuid,
    pub full_name: Option<String>,
    pub film_id: Option<Uuid>,
}

/// The part a person plays in a film.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonRole {
    Actor,
    Writer,
    Director,
}

/// Role tags as stored in `person_film_work.role`. Both the long form and the
/// two-letter codes of older catalog dumps are accepted.
const ROLE_TAGS: [(&str, PersonRole); 6] = [
    ("actor", PersonRole::Actor),
    ("writer", PersonRole::Writer),
    ("director", PersonRole::Director),
    ("ac", PersonRole::Actor),
    ("wr", PersonRole::Writer),
    ("dr", PersonRole::Director),
];

impl PersonRole {
    /// Look up a role by its catalog tag, ignoring case and surrounding blanks.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        ROLE_TAGS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(tag))
            .map(|(_, role)| *role)
    }

    /// The canonical tag for this role.
    pub fn tag(&self) -> &'static str {
        match self {
            PersonRole::Actor => "actor",
            PersonRole::Writer => "writer",
            PersonRole::Director => "director",
        }
    }
}
