use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use super::{display_name, sorted_unique, TransformOutput};
use catalog_indexer_shared::{FilmworkDocument, FilmworkRow, NamedEntity, PersonRole};

#[derive(Default)]
struct FilmGroup {
    id: Uuid,
    title: Option<String>,
    description: Option<String>,
    rating: Option<f64>,
    genres: Vec<NamedEntity>,
    actors: Vec<NamedEntity>,
    writers: Vec<NamedEntity>,
    directors: Vec<NamedEntity>,
    // Sets, because the join's cross product repeats every relation.
    unnamed: HashSet<Uuid>,
    unknown_roles: HashSet<Uuid>,
}

impl FilmGroup {
    fn new(row: &FilmworkRow) -> Self {
        Self {
            id: row.film_id,
            title: row.title.clone(),
            description: row.description.clone(),
            rating: row.rating,
            ..Self::default()
        }
    }

    fn add_person(&mut self, row: &FilmworkRow) {
        let Some(person_id) = row.person_id else {
            return;
        };

        let Some(name) = display_name(row.person_name.as_deref()) else {
            if self.unnamed.insert(person_id) {
                warn!(film_id = %self.id, person_id = %person_id, "Skipping person without a name");
            }
            return;
        };

        let tag = row.person_role.as_deref().unwrap_or_default();
        let Some(role) = PersonRole::from_tag(tag) else {
            if self.unknown_roles.insert(person_id) {
                warn!(film_id = %self.id, person_id = %person_id, role = %tag, "Ignoring unknown role");
            }
            return;
        };

        let person = NamedEntity::new(person_id, name);
        match role {
            PersonRole::Actor => self.actors.push(person),
            PersonRole::Writer => self.writers.push(person),
            PersonRole::Director => self.directors.push(person),
        }
    }

    fn add_genre(&mut self, row: &FilmworkRow) {
        let Some(genre_id) = row.genre_id else {
            return;
        };
        match display_name(row.genre_name.as_deref()) {
            Some(name) => self.genres.push(NamedEntity::new(genre_id, name)),
            None => {
                if self.unnamed.insert(genre_id) {
                    warn!(film_id = %self.id, genre_id = %genre_id, "Skipping genre without a name");
                }
            }
        }
    }
}

/// Films: one document per film id, with genres and people by role.
pub(super) fn build(rows: Vec<FilmworkRow>) -> TransformOutput {
    let mut groups: Vec<FilmGroup> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for row in &rows {
        let position = *index.entry(row.film_id).or_insert_with(|| {
            groups.push(FilmGroup::new(row));
            groups.len() - 1
        });
        let group = &mut groups[position];
        group.add_person(row);
        group.add_genre(row);
    }

    let mut output = TransformOutput::default();
    for group in groups {
        output.skipped += group.unnamed.len();

        let Some(title) = display_name(group.title.as_deref()).map(str::to_string) else {
            warn!(film_id = %group.id, "Skipping film without a title");
            output.skipped += 1;
            continue;
        };

        output.documents.push(
            FilmworkDocument {
                id: group.id,
                rating: group.rating,
                title,
                description: group.description,
                genres: sorted_unique(group.genres),
                actors: sorted_unique(group.actors),
                writers: sorted_unique(group.writers),
                directors: sorted_unique(group.directors),
            }
            .into(),
        );
    }

    output
}
