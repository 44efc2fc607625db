//! `PostgreSQL` implementation of the `PersistenceStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use songquiz_core::error::GameError;
use songquiz_core::ids::{PlayerId, RoomId};
use songquiz_core::ports::{
    PersistenceStore, PlayerProfile, RecentActivity, RoomCounter, SessionStats,
};

/// PostgreSQL-backed statistics and options store.
#[derive(Debug, Clone)]
pub struct PgPersistenceStore {
    pool: PgPool,
}

impl PgPersistenceStore {
    /// Creates a new `PgPersistenceStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn persistence_error(err: sqlx::Error) -> GameError {
    GameError::Persistence(err.to_string())
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[async_trait]
impl PersistenceStore for PgPersistenceStore {
    async fn record_session(&self, stats: &SessionStats) -> Result<(), GameError> {
        sqlx::query(
            r"
                INSERT INTO game_sessions (
                    session_id, room_id, start_date, num_participants,
                    avg_guess_seconds, session_length_minutes, rounds_played
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(stats.session_id)
        .bind(stats.room_id.as_str())
        .bind(stats.started_at)
        .bind(i64::from(stats.participant_count))
        .bind(stats.average_guess_seconds)
        .bind(stats.session_length_minutes)
        .bind(i64::from(stats.rounds_played))
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;

        debug!(session_id = %stats.session_id, room_id = %stats.room_id, "session recorded");
        Ok(())
    }

    async fn increment_counter(
        &self,
        room_id: &RoomId,
        counter: RoomCounter,
    ) -> Result<(), GameError> {
        let column = counter.column();
        let sql = format!(
            r"
                INSERT INTO room_counters (room_id, {column})
                VALUES              ($1, 1)
                ON CONFLICT         (room_id)
                DO UPDATE SET       {column} = room_counters.{column} + 1"
        );
        sqlx::query(&sql)
            .bind(room_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(persistence_error)?;
        Ok(())
    }

    async fn touch_room(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), GameError> {
        sqlx::query(
            r"
                INSERT INTO room_counters (room_id, last_active)
                VALUES              ($1, $2)
                ON CONFLICT         (room_id)
                DO UPDATE SET       last_active = $2",
        )
        .bind(room_id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    async fn record_player_guess(
        &self,
        player_id: &PlayerId,
        at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        sqlx::query(
            r"
                INSERT INTO player_stats (player_id, songs_guessed, first_play, last_active)
                VALUES              ($1, 1, $2, $2)
                ON CONFLICT         (player_id)
                DO UPDATE SET       songs_guessed = player_stats.songs_guessed + 1,
                                    last_active = $2",
        )
        .bind(player_id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }

    async fn record_player_games(
        &self,
        player_ids: &[PlayerId],
        at: DateTime<Utc>,
    ) -> Result<(), GameError> {
        if player_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = player_ids.iter().map(PlayerId::as_str).collect();
        sqlx::query(
            r"
                INSERT INTO player_stats (player_id, games_played, first_play, last_active)
                SELECT              id, 1, $2, $2
                FROM                UNNEST($1::VARCHAR[]) AS t (id)
                ON CONFLICT         (player_id)
                DO UPDATE SET       games_played = player_stats.games_played + 1,
                                    last_active = $2",
        )
        .bind(&ids)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;

        debug!(players = ids.len(), "player games recorded");
        Ok(())
    }

    async fn load_player_profile(
        &self,
        player_id: &PlayerId,
    ) -> Result<Option<PlayerProfile>, GameError> {
        let row: Option<(i64, i64, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r"
                SELECT songs_guessed, games_played, first_play, last_active
                FROM   player_stats
                WHERE  player_id = $1",
        )
        .bind(player_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence_error)?;

        Ok(row.map(
            |(songs_guessed, games_played, first_play, last_active)| PlayerProfile {
                player_id: player_id.clone(),
                songs_guessed: count(songs_guessed),
                games_played: count(games_played),
                first_play,
                last_active,
            },
        ))
    }

    async fn recent_activity(&self, since: DateTime<Utc>) -> Result<RecentActivity, GameError> {
        let (sessions, rounds_played): (i64, i64) = sqlx::query_as(
            r"
                SELECT COUNT(*), COALESCE(SUM(rounds_played), 0)::BIGINT
                FROM   game_sessions
                WHERE  start_date > $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(persistence_error)?;

        let (active_players,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM player_stats WHERE last_active > $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .map_err(persistence_error)?;

        Ok(RecentActivity {
            sessions: count(sessions),
            rounds_played: count(rounds_played),
            active_players: count(active_players),
        })
    }

    async fn load_room_options(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<serde_json::Value>, GameError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT options FROM room_options WHERE room_id = $1")
                .bind(room_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(persistence_error)?;
        Ok(row.map(|(options,)| options))
    }

    async fn save_room_options(
        &self,
        room_id: &RoomId,
        blob: &serde_json::Value,
    ) -> Result<(), GameError> {
        sqlx::query(
            r"
                INSERT INTO room_options (room_id, options, updated_at)
                VALUES              ($1, $2, NOW())
                ON CONFLICT         (room_id)
                DO UPDATE SET       options = $2, updated_at = NOW()",
        )
        .bind(room_id.as_str())
        .bind(blob)
        .execute(&self.pool)
        .await
        .map_err(persistence_error)?;
        Ok(())
    }
}
