//! In-memory catalog used as a test double for [`CatalogSource`]. The
//! indexer binary always reads from PostgreSQL; nothing selects this source
//! at runtime.
//!
//! Holds the five catalog tables in maps and answers the same queries as the
//! PostgreSQL source, with outer-join semantics for the merge queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CatalogSource, PageCursor, Relation, SourceError};
use catalog_indexer_shared::{ChangedRow, EntityKind, FilmworkRow, GenreRow, PersonFilmRow};

/// A `film_work` row.
#[derive(Debug, Clone, PartialEq)]
pub struct FilmRecord {
    pub id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub modified: DateTime<Utc>,
}

/// A `genre` row.
#[derive(Debug, Clone, PartialEq)]
pub struct GenreRecord {
    pub id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub modified: DateTime<Utc>,
}

/// A `person` row.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    films: BTreeMap<Uuid, FilmRecord>,
    genres: BTreeMap<Uuid, GenreRecord>,
    persons: BTreeMap<Uuid, PersonRecord>,
    // (film, genre)
    genre_links: Vec<(Uuid, Uuid)>,
    // (film, person, role)
    person_links: Vec<(Uuid, Uuid, String)>,
}

impl Tables {
    fn modified_of(&self, kind: EntityKind) -> Vec<ChangedRow> {
        match kind {
            EntityKind::Filmwork => self
                .films
                .values()
                .map(|f| ChangedRow::new(f.id, f.modified))
                .collect(),
            EntityKind::Genre => self
                .genres
                .values()
                .map(|g| ChangedRow::new(g.id, g.modified))
                .collect(),
            EntityKind::Person => self
                .persons
                .values()
                .map(|p| ChangedRow::new(p.id, p.modified))
                .collect(),
        }
    }
}

fn page(mut rows: Vec<ChangedRow>, after: &PageCursor, limit: usize) -> Vec<ChangedRow> {
    rows.retain(|row| after.precedes(row));
    rows.sort_by_key(|row| (row.modified, row.id));
    rows.truncate(limit);
    rows
}

/// Test double for [`CatalogSource`] with failure injection and a query
/// counter.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<Tables>,
    failures: AtomicUsize,
    queries: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a film.
    pub async fn upsert_film(&self, film: FilmRecord) {
        self.tables.write().await.films.insert(film.id, film);
    }

    /// Insert or replace a genre.
    pub async fn upsert_genre(&self, genre: GenreRecord) {
        self.tables.write().await.genres.insert(genre.id, genre);
    }

    /// Insert or replace a person.
    pub async fn upsert_person(&self, person: PersonRecord) {
        self.tables.write().await.persons.insert(person.id, person);
    }

    /// Add a `genre_film_work` row.
    pub async fn link_genre(&self, film_id: Uuid, genre_id: Uuid) {
        self.tables.write().await.genre_links.push((film_id, genre_id));
    }

    /// Add a `person_film_work` row.
    pub async fn link_person(&self, film_id: Uuid, person_id: Uuid, role: impl Into<String>) {
        self.tables
            .write()
            .await
            .person_links
            .push((film_id, person_id, role.into()));
    }

    /// Make the next `count` queries fail with a connection error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of queries answered or failed so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(SourceError::connection("connection reset by peer")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn changed_rows(
        &self,
        kind: EntityKind,
        after: &PageCursor,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError> {
        self.check_failure()?;
        let tables = self.tables.read().await;
        Ok(page(tables.modified_of(kind), after, limit))
    }

    async fn linked_filmworks(
        &self,
        relation: Relation,
        ids: &[Uuid],
        after: &PageCursor,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError> {
        self.check_failure()?;
        let tables = self.tables.read().await;
        let wanted: HashSet<&Uuid> = ids.iter().collect();

        let film_ids: HashSet<Uuid> = match relation {
            Relation::Genre => tables
                .genre_links
                .iter()
                .filter(|(_, genre)| wanted.contains(genre))
                .map(|(film, _)| *film)
                .collect(),
            Relation::Person => tables
                .person_links
                .iter()
                .filter(|(_, person, _)| wanted.contains(person))
                .map(|(film, _, _)| *film)
                .collect(),
        };

        let rows = film_ids
            .iter()
            .filter_map(|id| tables.films.get(id))
            .map(|f| ChangedRow::new(f.id, f.modified))
            .collect();
        Ok(page(rows, after, limit))
    }

    async fn filmwork_rows(&self, ids: &[Uuid]) -> Result<Vec<FilmworkRow>, SourceError> {
        self.check_failure()?;
        let tables = self.tables.read().await;
        let mut rows = Vec::new();

        for film in ids.iter().filter_map(|id| tables.films.get(id)) {
            let people: Vec<Option<&(Uuid, Uuid, String)>> = {
                let linked: Vec<_> = tables
                    .person_links
                    .iter()
                    .filter(|(f, _, _)| *f == film.id)
                    .map(Some)
                    .collect();
                if linked.is_empty() { vec![None] } else { linked }
            };
            let genres: Vec<Option<Uuid>> = {
                let linked: Vec<_> = tables
                    .genre_links
                    .iter()
                    .filter(|(f, _)| *f == film.id)
                    .map(|(_, g)| Some(*g))
                    .collect();
                if linked.is_empty() { vec![None] } else { linked }
            };

            for link in &people {
                let person = link.and_then(|(_, p, _)| tables.persons.get(p));
                for genre_id in &genres {
                    let genre = genre_id.and_then(|g| tables.genres.get(&g));
                    rows.push(FilmworkRow {
                        film_id: film.id,
                        title: film.title.clone(),
                        description: film.description.clone(),
                        rating: film.rating,
                        person_id: person.map(|p| p.id),
                        person_name: person.and_then(|p| p.full_name.clone()),
                        person_role: link.map(|(_, _, role)| role.clone()),
                        genre_id: genre.map(|g| g.id),
                        genre_name: genre.and_then(|g| g.name.clone()),
                    });
                }
            }
        }

        Ok(rows)
    }

    async fn genre_rows(&self, ids: &[Uuid]) -> Result<Vec<GenreRow>, SourceError> {
        self.check_failure()?;
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.genres.get(id))
            .map(|g| GenreRow {
                id: g.id,
                name: g.name.clone(),
                description: g.description.clone(),
            })
            .collect())
    }

    async fn person_rows(&self, ids: &[Uuid]) -> Result<Vec<PersonFilmRow>, SourceError> {
        self.check_failure()?;
        let tables = self.tables.read().await;
        let mut rows = Vec::new();

        for person in ids.iter().filter_map(|id| tables.persons.get(id)) {
            let films: Vec<Uuid> = tables
                .person_links
                .iter()
                .filter(|(_, p, _)| *p == person.id)
                .map(|(f, _, _)| *f)
                .collect();

            if films.is_empty() {
                rows.push(PersonFilmRow {
                    person_id: person.id,
                    full_name: person.full_name.clone(),
                    film_id: None,
                });
            }
            rows.extend(films.into_iter().map(|film_id| PersonFilmRow {
                person_id: person.id,
                full_name: person.full_name.clone(),
                film_id: Some(film_id),
            }));
        }

        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        self.check_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn film(id: u128, secs: i64) -> FilmRecord {
        FilmRecord {
            id: Uuid::from_u128(id),
            title: Some(format!("Film {}", id)),
            description: None,
            rating: None,
            modified: ts(secs),
        }
    }

    #[tokio::test]
    async fn test_changed_rows_are_paged_in_order() {
        let catalog = MemoryCatalog::new();
        catalog.upsert_film(film(3, 30)).await;
        catalog.upsert_film(film(1, 10)).await;
        catalog.upsert_film(film(2, 20)).await;

        let first = catalog
            .changed_rows(EntityKind::Filmwork, &PageCursor::after(ts(0)), 2)
            .await
            .unwrap();
        assert_eq!(first.iter().map(|r| r.modified).collect::<Vec<_>>(), vec![ts(10), ts(20)]);

        let mut cursor = PageCursor::after(ts(0));
        cursor.advance_past(&first[1]);
        let second = catalog.changed_rows(EntityKind::Filmwork, &cursor, 2).await.unwrap();
        assert_eq!(second, vec![ChangedRow::new(Uuid::from_u128(3), ts(30))]);
    }

    #[tokio::test]
    async fn test_film_rows_are_outer_joined() {
        let catalog = MemoryCatalog::new();
        catalog.upsert_film(film(1, 10)).await;
        catalog.upsert_film(film(2, 10)).await;
        let genre = Uuid::from_u128(100);
        catalog
            .upsert_genre(GenreRecord {
                id: genre,
                name: Some("Drama".into()),
                description: None,
                modified: ts(1),
            })
            .await;
        for person in [200u128, 201] {
            catalog
                .upsert_person(PersonRecord {
                    id: Uuid::from_u128(person),
                    full_name: Some(format!("P{}", person)),
                    modified: ts(1),
                })
                .await;
            catalog.link_person(Uuid::from_u128(1), Uuid::from_u128(person), "actor").await;
        }
        catalog.link_genre(Uuid::from_u128(1), genre).await;

        let rows = catalog
            .filmwork_rows(&[Uuid::from_u128(1), Uuid::from_u128(2)])
            .await
            .unwrap();

        assert_eq!(rows.iter().filter(|r| r.film_id == Uuid::from_u128(1)).count(), 2);
        let lonely: Vec<_> = rows.iter().filter(|r| r.film_id == Uuid::from_u128(2)).collect();
        assert_eq!(lonely.len(), 1);
        assert!(lonely[0].person_id.is_none() && lonely[0].genre_id.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let catalog = MemoryCatalog::new();
        catalog.fail_next(1);

        assert!(catalog.health_check().await.unwrap_err().is_transient());
        assert!(catalog.health_check().await.is_ok());
        assert_eq!(catalog.query_count(), 2);
    }
}
