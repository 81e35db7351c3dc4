//! SQLite storage backend for BountyIndex.
//!
//! Persists the projection (agents, bounties, reviews), the applied-credit
//! ledger and the checkpoint key/value table to a single SQLite file. Uses
//! `sqlx` with WAL mode so the read API can query while the engine writes.
//!
//! Every mutation is one statement, except `credit_agent`, which is a short
//! transaction (record the credit, read the counters, write the checked sums).
//!
//! Amounts are `u128` and do not fit SQLite's 64-bit INTEGER, so `reward`,
//! `total_earnings` and credited earnings are stored as decimal TEXT and
//! never summed in SQL.
//!
//! # Usage
//! ```rust,no_run
//! use bountyindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./bounties.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use bountyindex_core::checkpoint::CheckpointStore;
use bountyindex_core::error::IndexerError;
use bountyindex_core::projection::{
    Agent, AgentUpdate, Amount, Bounty, BountyStatus, BountyUpdate, Credit, NewAgent, NewBounty,
    ProjectionCounts, ProjectionStore, Review, UpdateOutcome, BASELINE_REPUTATION,
};
use bountyindex_core::types::EventKey;

/// Applies a keyed update only if the event is newer than the row's last event.
const NEWER_THAN_LAST: &str =
    "(last_block < ? OR (last_block = ? AND last_log_index < ?))";

/// SQLite-backed projection and checkpoint storage.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn db(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn to_i64(field: &str, value: u64) -> Result<i64, IndexerError> {
    i64::try_from(value)
        .map_err(|_| IndexerError::Storage(format!("{field} value {value} does not fit INTEGER")))
}

fn parse_amount(column: &str, text: &str) -> Result<Amount, IndexerError> {
    text.parse::<Amount>()
        .map_err(|e| IndexerError::Storage(format!("corrupt {column} column '{text}': {e}")))
}

enum Bind {
    Text(String),
    Int(i64),
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./bounties.db"`) or a full
    /// SQLite URL (`"sqlite:./bounties.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(db)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is its own database, so the
    /// pool is pinned to one connection that is never recycled. All data is
    /// lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// The underlying pool, shared with read-side consumers.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        // WAL mode: readers don't block the engine's writes
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS agents (
                id                 INTEGER PRIMARY KEY,
                owner              TEXT,
                wallet             TEXT,
                token_uri          TEXT,
                name               TEXT,
                description        TEXT,
                image              TEXT,
                skills             TEXT    NOT NULL DEFAULT '[]',
                reputation_score   INTEGER NOT NULL,
                completed_bounties INTEGER NOT NULL DEFAULT 0,
                total_earnings     TEXT    NOT NULL DEFAULT '0',
                registered_at      INTEGER NOT NULL,
                last_block         INTEGER NOT NULL,
                last_log_index     INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS bounties (
                id             INTEGER PRIMARY KEY,
                creator_id     INTEGER,
                hunter_id      INTEGER,
                reward         TEXT,
                token          TEXT,
                deadline       INTEGER,
                metadata_uri   TEXT,
                status         TEXT    NOT NULL,
                submission_ref TEXT,
                created_at     INTEGER NOT NULL,
                claimed_at     INTEGER,
                submitted_at   INTEGER,
                last_block     INTEGER NOT NULL,
                last_log_index INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS reviews (
                block_number INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                bounty_id    INTEGER NOT NULL,
                agent_id     INTEGER,
                rating       INTEGER,
                feedback_uri TEXT,
                created_at   INTEGER NOT NULL,
                PRIMARY KEY (block_number, log_index)
            );",
            "CREATE TABLE IF NOT EXISTS agent_credits (
                block_number INTEGER NOT NULL,
                log_index    INTEGER NOT NULL,
                agent_id     INTEGER NOT NULL,
                completed    INTEGER NOT NULL,
                earnings     TEXT    NOT NULL,
                PRIMARY KEY (block_number, log_index)
            );",
            "CREATE TABLE IF NOT EXISTS checkpoints (
                key        TEXT    PRIMARY KEY,
                value      TEXT    NOT NULL,
                updated_at INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_reviews_bounty ON reviews (bounty_id);",
            "CREATE INDEX IF NOT EXISTS idx_bounties_status ON bounties (status);",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await.map_err(db)?;
        }
        Ok(())
    }

    async fn exists(&self, table: &str, id: u64) -> Result<bool, IndexerError> {
        let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(to_i64("id", id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        Ok(row.is_some())
    }

    /// Run a keyed `UPDATE … SET {assignments}` and classify a no-op as
    /// stale or missing.
    async fn keyed_update(
        &self,
        table: &str,
        id: u64,
        assignments: &str,
        binds: Vec<Bind>,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let sql = format!(
            "UPDATE {table} SET {assignments}, last_block = ?, last_log_index = ?
             WHERE id = ? AND {NEWER_THAN_LAST}"
        );
        let block = to_i64("block_number", key.block_number)?;
        let log_index = i64::from(key.log_index);

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = match bind {
                Bind::Text(s) => query.bind(s),
                Bind::Int(i) => query.bind(i),
            };
        }
        let affected = query
            .bind(block)
            .bind(log_index)
            .bind(to_i64("id", id)?)
            .bind(block)
            .bind(block)
            .bind(log_index)
            .execute(&self.pool)
            .await
            .map_err(db)?
            .rows_affected();

        if affected > 0 {
            debug!(table, id, key = %key, "row updated");
            return Ok(UpdateOutcome::Applied);
        }
        if self.exists(table, id).await? {
            Ok(UpdateOutcome::Stale)
        } else {
            Ok(UpdateOutcome::Missing)
        }
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn opt_u64(row: &SqliteRow, column: &str) -> Result<Option<u64>, IndexerError> {
    Ok(row.try_get::<Option<i64>, _>(column).map_err(db)?.map(|v| v as u64))
}

fn opt_amount(row: &SqliteRow, column: &str) -> Result<Option<Amount>, IndexerError> {
    row.try_get::<Option<String>, _>(column)
        .map_err(db)?
        .map(|text| parse_amount(column, &text))
        .transpose()
}

fn event_key(row: &SqliteRow, block: &str, log_index: &str) -> Result<EventKey, IndexerError> {
    Ok(EventKey::new(
        row.try_get::<i64, _>(block).map_err(db)? as u64,
        row.try_get::<i64, _>(log_index).map_err(db)? as u32,
    ))
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, IndexerError> {
    let skills: String = row.try_get("skills").map_err(db)?;
    Ok(Agent {
        id: row.try_get::<i64, _>("id").map_err(db)? as u64,
        owner: row.try_get("owner").map_err(db)?,
        wallet: row.try_get("wallet").map_err(db)?,
        token_uri: row.try_get("token_uri").map_err(db)?,
        name: row.try_get("name").map_err(db)?,
        description: row.try_get("description").map_err(db)?,
        image: row.try_get("image").map_err(db)?,
        skills: serde_json::from_str(&skills)
            .map_err(|e| IndexerError::Storage(format!("corrupt skills column: {e}")))?,
        reputation_score: row.try_get::<i64, _>("reputation_score").map_err(db)? as u64,
        completed_bounties: row.try_get::<i64, _>("completed_bounties").map_err(db)? as u64,
        total_earnings: parse_amount(
            "total_earnings",
            &row.try_get::<String, _>("total_earnings").map_err(db)?,
        )?,
        registered_at: row.try_get("registered_at").map_err(db)?,
        last_event: event_key(row, "last_block", "last_log_index")?,
    })
}

fn bounty_from_row(row: &SqliteRow) -> Result<Bounty, IndexerError> {
    let status: String = row.try_get("status").map_err(db)?;
    Ok(Bounty {
        id: row.try_get::<i64, _>("id").map_err(db)? as u64,
        creator_id: opt_u64(row, "creator_id")?,
        hunter_id: opt_u64(row, "hunter_id")?,
        reward: opt_amount(row, "reward")?,
        token: row.try_get("token").map_err(db)?,
        deadline: row.try_get("deadline").map_err(db)?,
        metadata_uri: row.try_get("metadata_uri").map_err(db)?,
        status: status.parse::<BountyStatus>()?,
        submission_ref: row.try_get("submission_ref").map_err(db)?,
        created_at: row.try_get("created_at").map_err(db)?,
        claimed_at: row.try_get("claimed_at").map_err(db)?,
        submitted_at: row.try_get("submitted_at").map_err(db)?,
        last_event: event_key(row, "last_block", "last_log_index")?,
    })
}

fn review_from_row(row: &SqliteRow) -> Result<Review, IndexerError> {
    Ok(Review {
        event: event_key(row, "block_number", "log_index")?,
        bounty_id: row.try_get::<i64, _>("bounty_id").map_err(db)? as u64,
        agent_id: opt_u64(row, "agent_id")?,
        rating: row.try_get::<Option<i64>, _>("rating").map_err(db)?.map(|r| r as u8),
        feedback_uri: row.try_get("feedback_uri").map_err(db)?,
        created_at: row.try_get("created_at").map_err(db)?,
    })
}

// ─── ProjectionStore impl ────────────────────────────────────────────────────

#[async_trait]
impl ProjectionStore for SqliteStorage {
    async fn insert_agent(&self, agent: &NewAgent, key: EventKey) -> Result<bool, IndexerError> {
        let affected = sqlx::query(
            "INSERT OR IGNORE INTO agents
             (id, owner, token_uri, reputation_score, registered_at, last_block, last_log_index)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_i64("id", agent.id)?)
        .bind(&agent.owner)
        .bind(&agent.token_uri)
        .bind(to_i64("reputation_score", BASELINE_REPUTATION)?)
        .bind(agent.registered_at)
        .bind(to_i64("block_number", key.block_number)?)
        .bind(i64::from(key.log_index))
        .execute(&self.pool)
        .await
        .map_err(db)?
        .rows_affected();

        debug!(id = agent.id, inserted = affected > 0, "agent insert");
        Ok(affected > 0)
    }

    async fn update_agent(
        &self,
        id: u64,
        update: &AgentUpdate,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let (column, value) = match update {
            AgentUpdate::Name(v) => ("name", Bind::Text(v.clone())),
            AgentUpdate::Description(v) => ("description", Bind::Text(v.clone())),
            AgentUpdate::Image(v) => ("image", Bind::Text(v.clone())),
            AgentUpdate::Wallet(v) => ("wallet", Bind::Text(v.clone())),
            AgentUpdate::Skills(v) => {
                let json = serde_json::to_string(v)
                    .map_err(|e| IndexerError::Storage(format!("encode skills: {e}")))?;
                ("skills", Bind::Text(json))
            }
            AgentUpdate::Reputation(score) => {
                ("reputation_score", Bind::Int(to_i64("reputation_score", *score)?))
            }
        };
        let assignments = format!("{column} = ?");
        self.keyed_update("agents", id, &assignments, vec![value], key)
            .await
    }

    async fn credit_agent(
        &self,
        id: u64,
        credit: Credit,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let agent_id = to_i64("id", id)?;
        let completed = to_i64("completed", credit.completed)?;

        let mut tx = self.pool.begin().await.map_err(db)?;

        // Writes first, so the transaction takes the write lock up front.
        let recorded = sqlx::query(
            "INSERT OR IGNORE INTO agent_credits
             (block_number, log_index, agent_id, completed, earnings)
             SELECT ?, ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM agents WHERE id = ?)",
        )
        .bind(to_i64("block_number", key.block_number)?)
        .bind(i64::from(key.log_index))
        .bind(agent_id)
        .bind(completed)
        .bind(credit.earnings.to_string())
        .bind(agent_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?
        .rows_affected();

        if recorded == 0 {
            tx.rollback().await.map_err(db)?;
            return if self.exists("agents", id).await? {
                Ok(UpdateOutcome::Stale)
            } else {
                Ok(UpdateOutcome::Missing)
            };
        }

        let row = sqlx::query("SELECT completed_bounties, total_earnings FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        let current_completed = row.try_get::<i64, _>("completed_bounties").map_err(db)? as u64;
        let current_earnings = parse_amount(
            "total_earnings",
            &row.try_get::<String, _>("total_earnings").map_err(db)?,
        )?;

        let (total_completed, total_earnings) =
            match credit.add_to(current_completed, current_earnings) {
                Ok(totals) => totals,
                Err(e) => {
                    tx.rollback().await.map_err(db)?;
                    return Err(e);
                }
            };

        sqlx::query(
            "UPDATE agents SET completed_bounties = ?, total_earnings = ? WHERE id = ?",
        )
        .bind(to_i64("completed_bounties", total_completed)?)
        .bind(total_earnings.to_string())
        .bind(agent_id)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        debug!(id, key = %key, completed, earnings = %credit.earnings, "agent credited");
        Ok(UpdateOutcome::Applied)
    }

    async fn agent(&self, id: u64) -> Result<Option<Agent>, IndexerError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(to_i64("id", id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn insert_bounty(&self, bounty: &NewBounty, key: EventKey) -> Result<bool, IndexerError> {
        let affected = sqlx::query(
            "INSERT OR IGNORE INTO bounties
             (id, creator_id, reward, token, deadline, metadata_uri, status, created_at,
              last_block, last_log_index)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_i64("id", bounty.id)?)
        .bind(bounty.creator_id.map(|v| to_i64("creator_id", v)).transpose()?)
        .bind(bounty.reward.map(|v| v.to_string()))
        .bind(&bounty.token)
        .bind(bounty.deadline)
        .bind(&bounty.metadata_uri)
        .bind(BountyStatus::Open.as_str())
        .bind(bounty.created_at)
        .bind(to_i64("block_number", key.block_number)?)
        .bind(i64::from(key.log_index))
        .execute(&self.pool)
        .await
        .map_err(db)?
        .rows_affected();

        debug!(id = bounty.id, inserted = affected > 0, "bounty insert");
        Ok(affected > 0)
    }

    async fn update_bounty(
        &self,
        id: u64,
        update: &BountyUpdate,
        key: EventKey,
    ) -> Result<UpdateOutcome, IndexerError> {
        let (assignments, binds) = match update {
            BountyUpdate::Claimed { hunter_id, at } => (
                "hunter_id = ?, claimed_at = ?, status = ?",
                vec![
                    Bind::Int(to_i64("hunter_id", *hunter_id)?),
                    Bind::Int(*at),
                    Bind::Text(BountyStatus::Claimed.as_str().into()),
                ],
            ),
            BountyUpdate::Submitted {
                submission_ref: Some(reference),
                at,
            } => (
                "submission_ref = ?, submitted_at = ?, status = ?",
                vec![
                    Bind::Text(reference.clone()),
                    Bind::Int(*at),
                    Bind::Text(BountyStatus::Submitted.as_str().into()),
                ],
            ),
            BountyUpdate::Submitted {
                submission_ref: None,
                at,
            } => (
                "submitted_at = ?, status = ?",
                vec![
                    Bind::Int(*at),
                    Bind::Text(BountyStatus::Submitted.as_str().into()),
                ],
            ),
            BountyUpdate::Status(status) => {
                ("status = ?", vec![Bind::Text(status.as_str().into())])
            }
        };
        self.keyed_update("bounties", id, assignments, binds, key)
            .await
    }

    async fn bounty(&self, id: u64) -> Result<Option<Bounty>, IndexerError> {
        let row = sqlx::query("SELECT * FROM bounties WHERE id = ?")
            .bind(to_i64("id", id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(bounty_from_row).transpose()
    }

    async fn insert_review(&self, review: &Review) -> Result<bool, IndexerError> {
        let affected = sqlx::query(
            "INSERT OR IGNORE INTO reviews
             (block_number, log_index, bounty_id, agent_id, rating, feedback_uri, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(to_i64("block_number", review.event.block_number)?)
        .bind(i64::from(review.event.log_index))
        .bind(to_i64("bounty_id", review.bounty_id)?)
        .bind(review.agent_id.map(|v| to_i64("agent_id", v)).transpose()?)
        .bind(review.rating.map(i64::from))
        .bind(&review.feedback_uri)
        .bind(review.created_at)
        .execute(&self.pool)
        .await
        .map_err(db)?
        .rows_affected();

        debug!(bounty_id = review.bounty_id, key = %review.event, inserted = affected > 0, "review insert");
        Ok(affected > 0)
    }

    async fn reviews_for_bounty(&self, bounty_id: u64) -> Result<Vec<Review>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM reviews WHERE bounty_id = ? ORDER BY block_number, log_index",
        )
        .bind(to_i64("bounty_id", bounty_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(review_from_row).collect()
    }

    async fn counts(&self) -> Result<ProjectionCounts, IndexerError> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM agents)   AS agents,
                    (SELECT COUNT(*) FROM bounties) AS bounties,
                    (SELECT COUNT(*) FROM reviews)  AS reviews",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;

        Ok(ProjectionCounts {
            agents: row.try_get::<i64, _>("agents").map_err(db)? as u64,
            bounties: row.try_get::<i64, _>("bounties").map_err(db)? as u64,
            reviews: row.try_get::<i64, _>("reviews").map_err(db)? as u64,
        })
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT value FROM checkpoints WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.map(|r| r.try_get::<String, _>("value").map_err(db))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO checkpoints (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        debug!(key, value, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn new_bounty(id: u64) -> NewBounty {
        NewBounty {
            id,
            creator_id: Some(1),
            reward: Some(500),
            token: Some("0x0000000000000000000000000000000000000000".into()),
            deadline: Some(1_800_000_000),
            metadata_uri: Some("ipfs://bounty".into()),
            created_at: 1_700_000_000,
        }
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.set("indexer:lastBlock", "100").await.unwrap();
        store.set("indexer:lastBlock", "200").await.unwrap();
        assert_eq!(
            store.get("indexer:lastBlock").await.unwrap().as_deref(),
            Some("200")
        );
    }

    #[tokio::test]
    async fn checkpoint_missing_and_delete() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.get("indexer:lastBlock").await.unwrap().is_none());
        store.set("indexer:lastBlock", "5").await.unwrap();
        store.delete("indexer:lastBlock").await.unwrap();
        assert!(store.get("indexer:lastBlock").await.unwrap().is_none());
    }

    // ── Projection ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn bounty_insert_is_idempotent() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.insert_bounty(&new_bounty(4), EventKey::new(10, 1)).await.unwrap());
        assert!(!store.insert_bounty(&new_bounty(4), EventKey::new(10, 1)).await.unwrap());

        let bounty = store.bounty(4).await.unwrap().unwrap();
        assert_eq!(bounty.status, BountyStatus::Open);
        assert_eq!(bounty.reward, Some(500));
        assert_eq!(bounty.last_event, EventKey::new(10, 1));
        assert_eq!(store.counts().await.unwrap().bounties, 1);
    }

    #[tokio::test]
    async fn keyed_update_classifies_outcomes() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.insert_bounty(&new_bounty(4), EventKey::new(10, 1)).await.unwrap();

        let claim = BountyUpdate::Claimed { hunter_id: 2, at: 1_700_000_100 };
        let applied = store.update_bounty(4, &claim, EventKey::new(11, 0)).await.unwrap();
        let replayed = store.update_bounty(4, &claim, EventKey::new(11, 0)).await.unwrap();
        let missing = store.update_bounty(99, &claim, EventKey::new(11, 0)).await.unwrap();

        assert_eq!(applied, UpdateOutcome::Applied);
        assert_eq!(replayed, UpdateOutcome::Stale);
        assert_eq!(missing, UpdateOutcome::Missing);

        let bounty = store.bounty(4).await.unwrap().unwrap();
        assert_eq!(bounty.status, BountyStatus::Claimed);
        assert_eq!(bounty.hunter_id, Some(2));
        assert_eq!(bounty.claimed_at, Some(1_700_000_100));
    }

    #[tokio::test]
    async fn agent_fields_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let agent = NewAgent {
            id: 7,
            owner: Some("0xowner".into()),
            token_uri: Some("ipfs://agent".into()),
            registered_at: 1_700_000_000,
        };
        store.insert_agent(&agent, EventKey::new(3, 0)).await.unwrap();

        let skills = AgentUpdate::Skills(vec!["rust".into(), "solidity".into()]);
        store.update_agent(7, &skills, EventKey::new(4, 0)).await.unwrap();
        store
            .update_agent(7, &AgentUpdate::Reputation(91), EventKey::new(5, 0))
            .await
            .unwrap();

        let stored = store.agent(7).await.unwrap().unwrap();
        assert_eq!(stored.skills, vec!["rust", "solidity"]);
        assert_eq!(stored.reputation_score, 91);
        assert_eq!(stored.token_uri.as_deref(), Some("ipfs://agent"));
        assert_eq!(stored.last_event, EventKey::new(5, 0));
    }

    #[tokio::test]
    async fn credit_dedupes_and_reports_missing() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .insert_agent(&NewAgent::placeholder(2, 0), EventKey::ZERO)
            .await
            .unwrap();

        let key = EventKey::new(20, 4);
        assert_eq!(
            store.credit_agent(2, Credit::completion(100), key).await.unwrap(),
            UpdateOutcome::Applied
        );
        assert_eq!(
            store.credit_agent(2, Credit::completion(100), key).await.unwrap(),
            UpdateOutcome::Stale
        );
        assert_eq!(
            store.credit_agent(3, Credit::earnings(5), EventKey::new(20, 5)).await.unwrap(),
            UpdateOutcome::Missing
        );

        let agent = store.agent(2).await.unwrap().unwrap();
        assert_eq!(agent.completed_bounties, 1);
        assert_eq!(agent.total_earnings, 100);
    }

    #[tokio::test]
    async fn earnings_past_i64_stay_exact() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .insert_agent(&NewAgent::placeholder(2, 0), EventKey::ZERO)
            .await
            .unwrap();

        let half = (i64::MAX as u128) / 2 + 1;
        store.credit_agent(2, Credit::earnings(half), EventKey::new(1, 0)).await.unwrap();
        store.credit_agent(2, Credit::earnings(half), EventKey::new(1, 1)).await.unwrap();

        let agent = store.agent(2).await.unwrap().unwrap();
        assert_eq!(agent.total_earnings, 2 * half);
    }

    #[tokio::test]
    async fn overflowing_credit_rolls_back() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .insert_agent(&NewAgent::placeholder(2, 0), EventKey::ZERO)
            .await
            .unwrap();
        store
            .credit_agent(2, Credit::earnings(u128::MAX - 10), EventKey::new(1, 0))
            .await
            .unwrap();

        let err = store
            .credit_agent(2, Credit::earnings(11), EventKey::new(2, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));

        // Nothing recorded: the row is readable and unchanged, and the same
        // event is not mistaken for an applied credit.
        let agent = store.agent(2).await.unwrap().unwrap();
        assert_eq!(agent.total_earnings, u128::MAX - 10);
        assert!(store
            .credit_agent(2, Credit::earnings(11), EventKey::new(2, 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn reviews_keyed_by_event() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let review = Review {
            event: EventKey::new(30, 2),
            bounty_id: 4,
            agent_id: Some(2),
            rating: Some(5),
            feedback_uri: None,
            created_at: 0,
        };
        assert!(store.insert_review(&review).await.unwrap());
        assert!(!store.insert_review(&review).await.unwrap());
        let reviews = store.reviews_for_bounty(4).await.unwrap();
        assert_eq!(reviews, vec![review]);
    }
}
