//! PostgreSQL store
//!
//! Statuses are stored as their upper-case names. The partial unique index on
//! `memberships (player_id) WHERE status IN ('WAITING', 'ACTIVE')` backs the
//! one-open-membership rule, so concurrent joins that slip past the row checks
//! still fail with a unique violation.

use crate::storage::{
    ClosedCompetitions, CompetitionStore, NewMembership, StoreError, StoreResult,
};
use crate::types::{
    Competition, CompetitionId, CompetitionStatus, Membership, MembershipStatus, Player, PlayerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const UNIQUE_VIOLATION: &str = "23505";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

const MEMBERSHIP_COLUMNS: &str = "id, player_id, competition_id, status, score, joined_at, updated_at, level, country_code";
const COMPETITION_COLUMNS: &str = "competition_id, started_at, ends_at, level, country_code, status";

/// [`CompetitionStore`] backed by a Postgres connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, retrying up to `retries` extra times, then apply the schema
    pub async fn connect(url: &str, max_connections: u32, retries: u32) -> StoreResult<Self> {
        let mut attempt = 0;
        let pool = loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Database connection failed (attempt {}/{}): {}",
                        attempt,
                        retries + 1,
                        e
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let store = Self::new(pool);
        store.migrate().await?;
        info!("Connected to database");
        Ok(store)
    }

    /// Apply the schema; every statement is idempotent
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Database schema is up to date");
        Ok(())
    }
}

fn corrupt(message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        message: message.into(),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE))
}

fn player_from_row(row: &PgRow) -> StoreResult<Player> {
    Ok(Player {
        player_id: row.try_get("player_id")?,
        level: row.try_get("level")?,
        country_code: row.try_get("country_code")?,
    })
}

fn competition_from_row(row: &PgRow) -> StoreResult<Competition> {
    let status: String = row.try_get("status")?;
    Ok(Competition {
        competition_id: row.try_get("competition_id")?,
        started_at: row.try_get("started_at")?,
        ends_at: row.try_get("ends_at")?,
        level: row.try_get("level")?,
        country_code: row.try_get("country_code")?,
        status: status.parse::<CompetitionStatus>().map_err(corrupt)?,
    })
}

fn membership_from_row(row: &PgRow) -> StoreResult<Membership> {
    let status: String = row.try_get("status")?;
    Ok(Membership {
        id: row.try_get("id")?,
        player_id: row.try_get("player_id")?,
        competition_id: row.try_get("competition_id")?,
        status: status.parse::<MembershipStatus>().map_err(corrupt)?,
        score: row.try_get("score")?,
        joined_at: row.try_get("joined_at")?,
        updated_at: row.try_get("updated_at")?,
        level: row.try_get("level")?,
        country_code: row.try_get("country_code")?,
    })
}

#[async_trait]
impl CompetitionStore for PgStore {
    async fn get_player(&self, player_id: &str) -> StoreResult<Option<Player>> {
        let row = sqlx::query("SELECT player_id, level, country_code FROM players WHERE player_id = $1")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(player_from_row).transpose()
    }

    async fn create_player(&self, player: Player) -> StoreResult<()> {
        let result = sqlx::query("INSERT INTO players (player_id, level, country_code) VALUES ($1, $2, $3)")
            .bind(&player.player_id)
            .bind(player.level)
            .bind(&player.country_code)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                entity: "player",
                key: player.player_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_player(&self, player: Player) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE players SET level = $2, country_code = $3 WHERE player_id = $1")
            .bind(&player.player_id)
            .bind(player.level)
            .bind(&player.country_code)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_active_competition(&self) -> StoreResult<Option<Competition>> {
        let sql = format!(
            "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE status = 'ACTIVE' ORDER BY started_at LIMIT 1"
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(competition_from_row).transpose()
    }

    async fn create_competition(&self, competition: Competition) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO competitions (competition_id, started_at, ends_at, level, country_code, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(competition.competition_id)
        .bind(competition.started_at)
        .bind(competition.ends_at)
        .bind(competition.level)
        .bind(&competition.country_code)
        .bind(competition.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                entity: "competition",
                key: competition.competition_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_competition(&self, competition_id: CompetitionId) -> StoreResult<Option<Competition>> {
        let sql = format!("SELECT {COMPETITION_COLUMNS} FROM competitions WHERE competition_id = $1");
        let row = sqlx::query(&sql)
            .bind(competition_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(competition_from_row).transpose()
    }

    async fn update_competition(&self, competition: Competition) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE competitions
                SET started_at = $2, ends_at = $3, level = $4, country_code = $5, status = $6
              WHERE competition_id = $1",
        )
        .bind(competition.competition_id)
        .bind(competition.started_at)
        .bind(competition.ends_at)
        .bind(competition.level)
        .bind(&competition.country_code)
        .bind(competition.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_expired_competitions(&self, now: DateTime<Utc>) -> StoreResult<ClosedCompetitions> {
        let mut tx = self.pool.begin().await?;

        let competition_ids: Vec<CompetitionId> = sqlx::query_scalar(
            "UPDATE competitions
                SET status = 'COMPLETED'
              WHERE status = 'ACTIVE' AND ends_at <= $1
          RETURNING competition_id",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let completed = sqlx::query(
            "UPDATE memberships m
                SET status = 'COMPLETED'
               FROM competitions c
              WHERE m.competition_id = c.competition_id
                AND m.status = 'ACTIVE'
                AND c.status = 'COMPLETED'
                AND c.ends_at <= $1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ClosedCompetitions {
            competition_ids,
            memberships_completed: completed.rows_affected(),
        })
    }

    async fn get_waiting_memberships(&self, limit: usize) -> StoreResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
              WHERE status = 'WAITING'
              ORDER BY joined_at, id
              LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn activate_memberships(
        &self,
        player_ids: &[PlayerId],
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM competitions WHERE competition_id = $1)")
                .bind(competition_id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            return Err(StoreError::NotFound {
                entity: "competition",
                key: competition_id.to_string(),
            });
        }

        let result = sqlx::query(
            "UPDATE memberships
                SET status = 'ACTIVE', competition_id = $1, updated_at = $2
              WHERE status = 'WAITING' AND player_id = ANY($3)",
        )
        .bind(competition_id)
        .bind(now)
        .bind(player_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn is_player_waiting(&self, player_id: &str) -> StoreResult<bool> {
        let waiting: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM memberships WHERE player_id = $1 AND status = 'WAITING')",
        )
        .bind(player_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(waiting)
    }

    async fn get_active_membership(&self, player_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Membership>> {
        let row = sqlx::query(
            "SELECT m.id, m.player_id, m.competition_id, m.status, m.score, m.joined_at,
                    m.updated_at, m.level, m.country_code
               FROM memberships m
               JOIN competitions c ON c.competition_id = m.competition_id
              WHERE m.player_id = $1
                AND m.status = 'ACTIVE'
                AND c.status = 'ACTIVE'
                AND c.ends_at > $2
              LIMIT 1",
        )
        .bind(player_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn get_latest_membership(&self, player_id: &str) -> StoreResult<Option<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
              WHERE player_id = $1
              ORDER BY updated_at DESC, id DESC
              LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn create_membership(&self, membership: NewMembership, now: DateTime<Utc>) -> StoreResult<Membership> {
        let mut tx = self.pool.begin().await?;

        let open: Vec<(i64, String, bool)> = sqlx::query_as(
            "SELECT m.id, m.status, COALESCE(c.status = 'ACTIVE' AND c.ends_at > $2, FALSE)
               FROM memberships m
               LEFT JOIN competitions c ON c.competition_id = m.competition_id
              WHERE m.player_id = $1 AND m.status IN ('WAITING', 'ACTIVE')
                FOR UPDATE OF m",
        )
        .bind(&membership.player_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut stale = Vec::new();
        for (id, status, running) in open {
            match status.parse::<MembershipStatus>().map_err(corrupt)? {
                MembershipStatus::Waiting => {
                    return Err(StoreError::AlreadyWaiting {
                        player_id: membership.player_id,
                    })
                }
                MembershipStatus::Active if running => {
                    return Err(StoreError::AlreadyActive {
                        player_id: membership.player_id,
                    })
                }
                _ => stale.push(id),
            }
        }

        if !stale.is_empty() {
            debug!(player_id = %membership.player_id, "Completing {} stale active memberships", stale.len());
            sqlx::query("UPDATE memberships SET status = 'COMPLETED' WHERE id = ANY($1)")
                .bind(&stale)
                .execute(&mut *tx)
                .await?;
        }

        let sql = format!(
            "INSERT INTO memberships (player_id, status, score, joined_at, updated_at, level, country_code)
             VALUES ($1, 'WAITING', 0, $2, $2, $3, $4)
             RETURNING {MEMBERSHIP_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(&membership.player_id)
            .bind(membership.joined_at)
            .bind(membership.level)
            .bind(&membership.country_code)
            .fetch_one(&mut *tx)
            .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::AlreadyWaiting {
                    player_id: membership.player_id,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let created = membership_from_row(&row)?;
        tx.commit().await.map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyWaiting {
                    player_id: created.player_id.clone(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(created)
    }

    async fn add_score(&self, player_id: &str, delta: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE memberships m
                SET score = m.score + $2, updated_at = $3
               FROM competitions c
              WHERE m.competition_id = c.competition_id
                AND m.player_id = $1
                AND m.status = 'ACTIVE'
                AND c.status = 'ACTIVE'
                AND c.ends_at > $3",
        )
        .bind(player_id)
        .bind(delta)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_out_of_range(&e) {
                StoreError::ScoreOverflow {
                    player_id: player_id.to_string(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_leaderboard(&self, competition_id: CompetitionId) -> StoreResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships
              WHERE competition_id = $1
              ORDER BY score DESC, player_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(competition_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }
}
