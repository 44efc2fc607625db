//! `PostgreSQL` implementation of the `SongSelector` trait.
//!
//! The filter narrows the catalog; a `limit` keeps only the N most viewed
//! matches before one is drawn at random.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use songquiz_core::error::GameError;
use songquiz_core::options::SongFilter;
use songquiz_core::ports::{SelectedSong, SongSelector};

/// Catalog-backed song selector.
#[derive(Debug, Clone)]
pub struct PgSongSelector {
    pool: PgPool,
}

impl PgSongSelector {
    /// Creates a new `PgSongSelector`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_error(err: sqlx::Error) -> GameError {
    GameError::SongQuery(err.to_string())
}

fn candidate_query(filter: &SongFilter) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT id, name, artist, media_ref FROM (SELECT id, name, artist, media_ref FROM songs WHERE TRUE",
    );
    if let Some(year) = filter.beginning_year {
        qb.push(" AND release_year >= ").push_bind(year);
    }
    if let Some(year) = filter.end_year {
        qb.push(" AND release_year <= ").push_bind(year);
    }
    if !filter.genders.is_empty() {
        let genders: Vec<&str> = filter.genders.iter().map(|g| g.as_str()).collect();
        qb.push(" AND gender = ANY(").push_bind(genders).push(")");
    }
    if !filter.group_ids.is_empty() {
        qb.push(" AND group_id = ANY(")
            .push_bind(filter.group_ids.as_slice())
            .push(")");
    }
    if !filter.excluded_group_ids.is_empty() {
        qb.push(" AND NOT (group_id = ANY(")
            .push_bind(filter.excluded_group_ids.as_slice())
            .push("))");
    }
    qb.push(" ORDER BY views DESC");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(i64::from(limit));
    }
    qb.push(") AS candidates ORDER BY RANDOM() LIMIT 1");
    qb
}

#[async_trait]
impl SongSelector for PgSongSelector {
    async fn select_random_song(
        &self,
        filter: &SongFilter,
    ) -> Result<Option<SelectedSong>, GameError> {
        let row: Option<(i64, String, String, String)> = candidate_query(filter)
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        let Some((id, name, artist, media_ref)) = row else {
            debug!(?filter, "no song matches filter");
            return Ok(None);
        };

        let aliases: Vec<(String,)> =
            sqlx::query_as("SELECT alias FROM song_aliases WHERE song_id = $1 ORDER BY alias")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;

        Ok(Some(SelectedSong {
            name,
            artist,
            media_ref,
            aliases: aliases.into_iter().map(|(alias,)| alias).collect(),
        }))
    }
}
