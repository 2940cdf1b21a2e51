use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::{display_name, TransformOutput};
use catalog_indexer_shared::{PersonDocument, PersonFilmRow};

struct PersonGroup {
    id: Uuid,
    name: Option<String>,
    film_ids: Vec<Uuid>,
}

/// People: one document per person with the sorted, distinct ids of the
/// films they appear in.
pub(super) fn build(rows: Vec<PersonFilmRow>) -> TransformOutput {
    let mut groups: Vec<PersonGroup> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        let position = *index.entry(row.person_id).or_insert_with(|| {
            groups.push(PersonGroup {
                id: row.person_id,
                name: row.full_name.clone(),
                film_ids: Vec::new(),
            });
            groups.len() - 1
        });
        if let Some(film_id) = row.film_id {
            groups[position].film_ids.push(film_id);
        }
    }

    let mut output = TransformOutput::default();
    for mut group in groups {
        let Some(name) = display_name(group.name.as_deref()).map(str::to_string) else {
            warn!(person_id = %group.id, "Skipping person without a name");
            output.skipped += 1;
            continue;
        };
        group.film_ids.sort_unstable();
        group.film_ids.dedup();
        output.documents.push(
            PersonDocument {
                id: group.id,
                name,
                film_ids: group.film_ids,
            }
            .into(),
        );
    }

    output
}
