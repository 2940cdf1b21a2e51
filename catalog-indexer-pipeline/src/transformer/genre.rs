use std::collections::HashSet;
use tracing::warn;

use super::{display_name, TransformOutput};
use catalog_indexer_shared::{GenreDocument, GenreRow};

/// Genres: one document per distinct genre id.
pub(super) fn build(rows: Vec<GenreRow>) -> TransformOutput {
    let mut output = TransformOutput::default();
    let mut seen = HashSet::with_capacity(rows.len());

    for row in rows {
        if !seen.insert(row.id) {
            continue;
        }
        let Some(name) = display_name(row.name.as_deref()).map(str::to_string) else {
            warn!(genre_id = %row.id, "Skipping genre without a name");
            output.skipped += 1;
            continue;
        };
        output.documents.push(
            GenreDocument {
                id: row.id,
                name,
                description: row.description,
            }
            .into(),
        );
    }

    output
}
