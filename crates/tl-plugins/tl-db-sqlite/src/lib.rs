//! # tl-db-sqlite Implementation
//!
//! One database for both durable ports. The audit archive stores each
//! resolution as one row plus one row per score override, with the full
//! record kept as JSON for replay. The live tables hold tipster profiles,
//! open queue items, confirmed sightings and resolution credits.

use std::collections::VecDeque;
use std::str::FromStr;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tl_core::error::{AppError, Result};
use tl_core::models::{
    CaseId, OpenItem, QueueItemId, RecentTip, ResolutionRecord, ReviewOutcome, ScoreTarget, Sighting,
    TipId, TipsterProfile, TriageSnapshot,
};
use tl_core::traits::{DecisionArchive, TriageRepository};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resolutions (
    queue_item_id     BLOB PRIMARY KEY,
    tip_id            BLOB NOT NULL,
    case_id           BLOB NOT NULL,
    decision_id       BLOB NOT NULL,
    reviewer_id       TEXT NOT NULL,
    outcome           TEXT NOT NULL,
    credibility_score INTEGER NOT NULL,
    sla_breached      BOOLEAN NOT NULL,
    resolved_at       TEXT NOT NULL,
    record            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_resolutions_tip ON resolutions (tip_id);
CREATE TABLE IF NOT EXISTS score_overrides (
    tip_id      BLOB NOT NULL,
    target      TEXT NOT NULL,
    previous    INTEGER,
    value       INTEGER NOT NULL,
    reviewer_id TEXT NOT NULL,
    at          TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tipsters (
    id                TEXT PRIMARY KEY,
    reliability_score REAL NOT NULL,
    is_blocked        BOOLEAN NOT NULL,
    profile           TEXT NOT NULL,
    recent_tips       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS open_items (
    queue_item_id BLOB PRIMARY KEY,
    tip_id        BLOB NOT NULL UNIQUE,
    case_id       BLOB NOT NULL,
    created_at    TEXT NOT NULL,
    item          TEXT NOT NULL,
    tip           TEXT NOT NULL,
    verification  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sightings (
    tip_id   BLOB PRIMARY KEY,
    case_id  BLOB NOT NULL,
    sighting TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS resolution_credits (
    tip_id      BLOB PRIMARY KEY,
    credited_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

pub struct SqliteTriageStore {
    pool: SqlitePool,
}

// Helper for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn db_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("row already stored: {db}"))
        }
        _ => AppError::Internal(format!("sqlite: {err}")),
    }
}

fn encode<T: serde::Serialize + ?Sized>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AppError::Internal(format!("serializing {what}: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| AppError::Internal(format!("corrupt {what} row: {e}")))
}

fn outcome_tag(outcome: ReviewOutcome) -> &'static str {
    match outcome {
        ReviewOutcome::Verified => "verified",
        ReviewOutcome::Rejected => "rejected",
        ReviewOutcome::NeedsMoreInfo => "needs_more_info",
        ReviewOutcome::Escalated => "escalated",
    }
}

fn target_tag(target: ScoreTarget) -> String {
    match target {
        ScoreTarget::Credibility => "credibility".to_string(),
        ScoreTarget::Subscore(field) => format!("{field:?}"),
    }
}

impl SqliteTriageStore {
    /// Opens (creating if needed) the database and ensures the schema exists.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_error)?
            .create_if_missing(true);
        // An in-memory database only lives as long as its single connection.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(db_error)?;
        info!("triage store ready at {}", database_url);
        Ok(Self { pool })
    }

    async fn find_record(&self, column: &str, id: Uuid) -> Result<Option<ResolutionRecord>> {
        let sql = format!("SELECT record FROM resolutions WHERE {column} = ?");
        let row = sqlx::query(&sql)
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => decode("resolution", row.get::<&str, _>("record")).map(Some),
            None => Ok(None),
        }
    }

    pub async fn override_count(&self, tip_id: TipId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM score_overrides WHERE tip_id = ?")
            .bind(uuid_to_blob(tip_id))
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.get("n"))
    }

    async fn load_tipsters(&self) -> Result<Vec<TipsterProfile>> {
        let rows = sqlx::query("SELECT profile, recent_tips FROM tipsters")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| {
                let mut profile: TipsterProfile = decode("tipster", row.get::<&str, _>("profile"))?;
                let recent: VecDeque<RecentTip> = decode("tipster", row.get::<&str, _>("recent_tips"))?;
                profile.recent_tips = recent;
                Ok(profile)
            })
            .collect()
    }

    async fn load_open_items(&self) -> Result<Vec<OpenItem>> {
        let rows = sqlx::query("SELECT item, tip, verification FROM open_items ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| {
                Ok(OpenItem {
                    item: decode("open item", row.get::<&str, _>("item"))?,
                    tip: decode("open item", row.get::<&str, _>("tip"))?,
                    verification: decode("open item", row.get::<&str, _>("verification"))?,
                })
            })
            .collect()
    }

    async fn load_sightings(&self) -> Result<Vec<(CaseId, Sighting)>> {
        let rows = sqlx::query("SELECT case_id, sighting FROM sightings ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| {
                let case_id = Uuid::from_slice(row.get::<&[u8], _>("case_id"))
                    .map_err(|e| AppError::Internal(format!("corrupt sighting row: {e}")))?;
                Ok((case_id, decode("sighting", row.get::<&str, _>("sighting"))?))
            })
            .collect()
    }
}

#[async_trait]
impl DecisionArchive for SqliteTriageStore {
    /// Resolution row and its override audit trail commit together.
    async fn archive(&self, record: &ResolutionRecord) -> Result<()> {
        let json = encode("resolution", record)?;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // 1. Insert the resolution
        sqlx::query(
            "INSERT INTO resolutions (queue_item_id, tip_id, case_id, decision_id, reviewer_id, outcome, credibility_score, sla_breached, resolved_at, record) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(record.item.id))
        .bind(uuid_to_blob(record.item.tip_id))
        .bind(uuid_to_blob(record.item.case_id))
        .bind(uuid_to_blob(record.decision.id))
        .bind(&record.decision.reviewer_id)
        .bind(outcome_tag(record.decision.outcome))
        .bind(i64::from(record.item.credibility_score))
        .bind(record.item.sla_breached)
        .bind(record.decision.decided_at)
        .bind(json)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        // 2. Insert the override audit trail
        for entry in &record.verification.overrides {
            sqlx::query(
                "INSERT INTO score_overrides (tip_id, target, previous, value, reviewer_id, at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid_to_blob(record.verification.tip_id))
            .bind(target_tag(entry.target))
            .bind(entry.previous.map(i64::from))
            .bind(i64::from(entry.value))
            .bind(&entry.reviewer_id)
            .bind(entry.at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        debug!("archived resolution of queue item {}", record.item.id);
        Ok(())
    }

    async fn find_by_item(&self, item_id: QueueItemId) -> Result<Option<ResolutionRecord>> {
        self.find_record("queue_item_id", item_id).await
    }

    async fn find_by_tip(&self, tip_id: TipId) -> Result<Option<ResolutionRecord>> {
        self.find_record("tip_id", tip_id).await
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM resolutions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        let n: i64 = row.get("n");
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

#[async_trait]
impl TriageRepository for SqliteTriageStore {
    async fn save_tipster(&self, profile: &TipsterProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO tipsters (id, reliability_score, is_blocked, profile, recent_tips) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET reliability_score = excluded.reliability_score, is_blocked = excluded.is_blocked, profile = excluded.profile, recent_tips = excluded.recent_tips",
        )
        .bind(&profile.id.0)
        .bind(profile.reliability_score)
        .bind(profile.is_blocked)
        .bind(encode("tipster", profile)?)
        .bind(encode("tipster", &profile.recent_tips)?)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn save_open_item(&self, open: &OpenItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO open_items (queue_item_id, tip_id, case_id, created_at, item, tip, verification) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(queue_item_id) DO UPDATE SET item = excluded.item, tip = excluded.tip, verification = excluded.verification",
        )
        .bind(uuid_to_blob(open.item.id))
        .bind(uuid_to_blob(open.item.tip_id))
        .bind(uuid_to_blob(open.item.case_id))
        .bind(open.item.created_at)
        .bind(encode("open item", &open.item)?)
        .bind(encode("open item", &open.tip)?)
        .bind(encode("open item", &open.verification)?)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn remove_open_item(&self, item_id: QueueItemId) -> Result<()> {
        sqlx::query("DELETE FROM open_items WHERE queue_item_id = ?")
            .bind(uuid_to_blob(item_id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn record_sighting(&self, case_id: CaseId, sighting: &Sighting) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO sightings (tip_id, case_id, sighting) VALUES (?, ?, ?)")
            .bind(uuid_to_blob(sighting.tip_id))
            .bind(uuid_to_blob(case_id))
            .bind(encode("sighting", sighting)?)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn mark_resolution_credited(&self, tip_id: TipId) -> Result<bool> {
        let done = sqlx::query("INSERT OR IGNORE INTO resolution_credits (tip_id) VALUES (?)")
            .bind(uuid_to_blob(tip_id))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(done.rows_affected() == 1)
    }

    async fn load(&self) -> Result<TriageSnapshot> {
        Ok(TriageSnapshot {
            tipsters: self.load_tipsters().await?,
            open_items: self.load_open_items().await?,
            sightings: self.load_sightings().await?,
        })
    }
}
