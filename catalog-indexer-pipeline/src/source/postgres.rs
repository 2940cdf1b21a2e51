//! PostgreSQL implementation of [`CatalogSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{CatalogSource, PageCursor, Relation, SourceError};
use catalog_indexer_shared::{ChangedRow, EntityKind, FilmworkRow, GenreRow, PersonFilmRow};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the catalog database.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Schema holding the catalog tables.
    pub schema: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            schema: "content".to_string(),
        }
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Catalog reader over a single PostgreSQL connection.
///
/// The connection is opened on first use and reopened after it closes or
/// fails at the connection level, so a retried query always gets a fresh
/// session.
pub struct PgCatalogSource {
    config: PostgresConfig,
    schema: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl PgCatalogSource {
    /// Create a source without connecting.
    pub fn new(config: PostgresConfig) -> Self {
        let schema = quote_ident(&config.schema);
        Self {
            config,
            schema,
            client: Mutex::new(None),
        }
    }

    /// Create a source and open its connection.
    pub async fn connect(config: PostgresConfig) -> Result<Self, SourceError> {
        let source = Self::new(config);
        source.client().await?;
        Ok(source)
    }

    async fn client(&self) -> Result<Arc<Client>, SourceError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            warn!("PostgreSQL connection closed, reconnecting");
        }

        let client = Arc::new(self.open().await?);
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn open(&self) -> Result<Client, SourceError> {
        let mut pg = PgConfig::new();
        pg.host(&self.config.host);
        pg.port(self.config.port);
        pg.user(&self.config.user);
        if !self.config.password.is_empty() {
            pg.password(&self.config.password);
        }
        pg.dbname(&self.config.dbname);
        pg.application_name("catalog-indexer");
        pg.connect_timeout(CONNECT_TIMEOUT);

        let (client, connection) = pg.connect(NoTls).await.map_err(|e| classify(&e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        info!(
            host = %self.config.host,
            port = self.config.port,
            dbname = %self.config.dbname,
            "Connected to PostgreSQL"
        );
        Ok(client)
    }

    async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, SourceError> {
        let client = self.client().await?;
        match client.query(sql, params).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                let err = classify(&e);
                if err.is_transient() {
                    // Force a reconnect on the next call.
                    *self.client.lock().await = None;
                }
                Err(err)
            }
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Sort a database error into connection-level or query-level.
fn classify(e: &tokio_postgres::Error) -> SourceError {
    if is_connection_state(e.code().map(|state| state.code())) {
        SourceError::connection(e.to_string())
    } else {
        SourceError::query(e.to_string())
    }
}

/// SQLSTATE classes 08 (connection exception) and 57P (operator
/// intervention, e.g. server shutdown) are connection-level, as are errors
/// with no SQLSTATE at all (I/O, timeouts, closed sessions).
fn is_connection_state(code: Option<&str>) -> bool {
    match code {
        Some(code) => code.starts_with("08") || code.starts_with("57P"),
        None => true,
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, SourceError> {
    row.try_get(name)
        .map_err(|e| SourceError::decode(format!("column '{}': {}", name, e)))
}

fn changed_row(row: &Row) -> Result<ChangedRow, SourceError> {
    Ok(ChangedRow::new(
        column::<Uuid>(row, "id")?,
        column::<DateTime<Utc>>(row, "modified")?,
    ))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl CatalogSource for PgCatalogSource {
    #[instrument(skip(self, after), fields(table = %kind))]
    async fn changed_rows(
        &self,
        kind: EntityKind,
        after: &PageCursor,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError> {
        let table = self.table(kind.table_name());
        let limit = limit_param(limit);

        let rows = match after.id {
            None => {
                let sql = format!(
                    "SELECT id, modified FROM {} WHERE modified > $1 ORDER BY modified, id LIMIT $2",
                    table
                );
                self.query(&sql, &[&after.modified, &limit]).await?
            }
            Some(id) => {
                let sql = format!(
                    "SELECT id, modified FROM {} WHERE (modified, id) > ($1, $2) \
                     ORDER BY modified, id LIMIT $3",
                    table
                );
                self.query(&sql, &[&after.modified, &id, &limit]).await?
            }
        };

        debug!(rows = rows.len(), "Fetched changed rows");
        rows.iter().map(changed_row).collect()
    }

    #[instrument(skip(self, ids, after), fields(relation = relation.table_name(), ids = ids.len()))]
    async fn linked_filmworks(
        &self,
        relation: Relation,
        ids: &[Uuid],
        after: &PageCursor,
        limit: usize,
    ) -> Result<Vec<ChangedRow>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let from = format!(
            "SELECT DISTINCT fw.id, fw.modified FROM {} fw JOIN {} rel ON rel.film_work_id = fw.id \
             WHERE rel.{} = ANY($1)",
            self.table("film_work"),
            self.table(relation.table_name()),
            relation.entity_column()
        );
        let limit = limit_param(limit);

        let rows = match after.id {
            None => {
                let sql = format!(
                    "{} AND fw.modified > $2 ORDER BY fw.modified, fw.id LIMIT $3",
                    from
                );
                self.query(&sql, &[&ids, &after.modified, &limit]).await?
            }
            Some(id) => {
                let sql = format!(
                    "{} AND (fw.modified, fw.id) > ($2, $3) ORDER BY fw.modified, fw.id LIMIT $4",
                    from
                );
                self.query(&sql, &[&ids, &after.modified, &id, &limit]).await?
            }
        };

        debug!(rows = rows.len(), "Fetched linked films");
        rows.iter().map(changed_row).collect()
    }

    async fn filmwork_rows(&self, ids: &[Uuid]) -> Result<Vec<FilmworkRow>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT fw.id AS film_id, fw.title, fw.description, fw.rating::float8 AS rating, \
                    pfw.role::text AS person_role, p.id AS person_id, p.full_name AS person_name, \
                    g.id AS genre_id, g.name AS genre_name \
             FROM {fw} fw \
             LEFT JOIN {pfw} pfw ON pfw.film_work_id = fw.id \
             LEFT JOIN {p} p ON p.id = pfw.person_id \
             LEFT JOIN {gfw} gfw ON gfw.film_work_id = fw.id \
             LEFT JOIN {g} g ON g.id = gfw.genre_id \
             WHERE fw.id = ANY($1)",
            fw = self.table("film_work"),
            pfw = self.table("person_film_work"),
            p = self.table("person"),
            gfw = self.table("genre_film_work"),
            g = self.table("genre"),
        );

        let rows = self.query(&sql, &[&ids]).await?;
        rows.iter()
            .map(|row| -> Result<FilmworkRow, SourceError> {
                Ok(FilmworkRow {
                    film_id: column(row, "film_id")?,
                    title: column(row, "title")?,
                    description: column(row, "description")?,
                    rating: column(row, "rating")?,
                    person_id: column(row, "person_id")?,
                    person_name: column(row, "person_name")?,
                    person_role: column(row, "person_role")?,
                    genre_id: column(row, "genre_id")?,
                    genre_name: column(row, "genre_name")?,
                })
            })
            .collect()
    }

    async fn genre_rows(&self, ids: &[Uuid]) -> Result<Vec<GenreRow>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, name, description FROM {} WHERE id = ANY($1)",
            self.table("genre")
        );

        let rows = self.query(&sql, &[&ids]).await?;
        rows.iter()
            .map(|row| -> Result<GenreRow, SourceError> {
                Ok(GenreRow {
                    id: column(row, "id")?,
                    name: column(row, "name")?,
                    description: column(row, "description")?,
                })
            })
            .collect()
    }

    async fn person_rows(&self, ids: &[Uuid]) -> Result<Vec<PersonFilmRow>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT p.id AS person_id, p.full_name, pfw.film_work_id AS film_id \
             FROM {} p LEFT JOIN {} pfw ON pfw.person_id = p.id \
             WHERE p.id = ANY($1)",
            self.table("person"),
            self.table("person_film_work")
        );

        let rows = self.query(&sql, &[&ids]).await?;
        rows.iter()
            .map(|row| -> Result<PersonFilmRow, SourceError> {
                Ok(PersonFilmRow {
                    person_id: column(row, "person_id")?,
                    full_name: column(row, "full_name")?,
                    film_id: column(row, "film_id")?,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}
