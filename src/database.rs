use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::{Result, ReviewError};
use crate::models::*;
use crate::scheduler::{DEFAULT_EASE_FACTOR, DEFAULT_INTERVAL_DAYS};
use crate::store::ReviewStore;
use crate::log_db_operation;

/// SQLite-backed [`ReviewStore`].
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(&DatabaseConfig::with_url(database_url)).await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives and dies with a single connection: pin the
        // pool to exactly one so every query sees the same schema and rows.
        let max_connections = if is_in_memory(&config.url) {
            1
        } else {
            config.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcard_sets (
                id TEXT PRIMARY KEY,
                document_id TEXT,
                user_id TEXT NOT NULL,
                cards TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcard_reviews (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                flashcard_set_id TEXT NOT NULL,
                card_index INTEGER NOT NULL CHECK (card_index >= 0),
                ease_factor REAL NOT NULL DEFAULT 2.5 CHECK (ease_factor >= 1.3),
                interval_days INTEGER NOT NULL DEFAULT 1 CHECK (interval_days >= 1),
                next_review_date TEXT NOT NULL,
                last_reviewed TEXT,
                times_reviewed INTEGER NOT NULL DEFAULT 0 CHECK (times_reviewed >= 0),
                UNIQUE (user_id, flashcard_set_id, card_index),
                FOREIGN KEY (flashcard_set_id) REFERENCES flashcard_sets(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_flashcard_reviews_due
                ON flashcard_reviews (user_id, flashcard_set_id, next_review_date);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_flashcard_sets_document ON flashcard_sets (document_id);",
        )
        .execute(&self.pool)
        .await?;

        log_db_operation!(info, "migrate", "schema ready");
        Ok(())
    }

    fn row_to_flashcard_set(row: &SqliteRow) -> Result<FlashcardSet> {
        let cards_json: String = row.try_get("cards")?;
        let cards: Vec<Card> = serde_json::from_str(&cards_json)
            .map_err(|e| ReviewError::Internal(format!("corrupt card list: {}", e)))?;

        Ok(FlashcardSet {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            document_id: row
                .try_get::<Option<String>, _>("document_id")?
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
            cards,
            created_at: parse_db_timestamp(&row.try_get::<String, _>("created_at")?)?,
        })
    }

    fn row_to_review_state(row: &SqliteRow) -> Result<ReviewState> {
        Ok(ReviewState {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            user_id: parse_uuid(&row.try_get::<String, _>("user_id")?)?,
            flashcard_set_id: parse_uuid(&row.try_get::<String, _>("flashcard_set_id")?)?,
            card_index: row.try_get("card_index")?,
            ease_factor: row.try_get("ease_factor")?,
            interval: row.try_get("interval_days")?,
            next_review_date: parse_db_timestamp(&row.try_get::<String, _>("next_review_date")?)?,
            last_reviewed: row
                .try_get::<Option<String>, _>("last_reviewed")?
                .as_deref()
                .map(parse_db_timestamp)
                .transpose()?,
            times_reviewed: row.try_get("times_reviewed")?,
        })
    }
}

#[async_trait]
impl ReviewStore for Database {
    async fn create_flashcard_set(&self, set: &FlashcardSet) -> Result<()> {
        let cards_json = serde_json::to_string(&set.cards)
            .map_err(|e| ReviewError::Internal(format!("could not encode cards: {}", e)))?;

        sqlx::query(
            "INSERT INTO flashcard_sets (id, document_id, user_id, cards, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(set.id.to_string())
        .bind(set.document_id.map(|id| id.to_string()))
        .bind(set.user_id.to_string())
        .bind(cards_json)
        .bind(to_db_timestamp(&set.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_flashcard_set(&self, set_id: Uuid) -> Result<Option<FlashcardSet>> {
        let row = sqlx::query("SELECT * FROM flashcard_sets WHERE id = ?1")
            .bind(set_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_flashcard_set).transpose()
    }

    async fn delete_flashcard_set(&self, set_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flashcard_sets WHERE id = ?1")
            .bind(set_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_sets_for_document(&self, user_id: Uuid, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM flashcard_sets WHERE document_id = ?1 AND user_id = ?2")
            .bind(document_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn initialize_review_states(
        &self,
        set_id: Uuid,
        user_id: Uuid,
        card_count: i64,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let start = Instant::now();
        let now = to_db_timestamp(&now);
        let mut inserted = 0;

        // One transaction: either every missing row lands or none do.
        let mut tx = self.pool.begin().await?;
        for card_index in 0..card_count {
            let result = sqlx::query(
                r#"
                INSERT INTO flashcard_reviews (id, user_id, flashcard_set_id, card_index,
                                               ease_factor, interval_days, next_review_date,
                                               last_reviewed, times_reviewed)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 0)
                ON CONFLICT (user_id, flashcard_set_id, card_index) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id.to_string())
            .bind(set_id.to_string())
            .bind(card_index)
            .bind(DEFAULT_EASE_FACTOR)
            .bind(DEFAULT_INTERVAL_DAYS)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        log_db_operation!(
            debug,
            "initialize_review_states",
            count = inserted,
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(inserted)
    }

    async fn get_review_state(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        card_index: i64,
    ) -> Result<Option<ReviewState>> {
        let row = sqlx::query(
            "SELECT * FROM flashcard_reviews WHERE user_id = ?1 AND flashcard_set_id = ?2 AND card_index = ?3",
        )
        .bind(user_id.to_string())
        .bind(set_id.to_string())
        .bind(card_index)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_review_state).transpose()
    }

    async fn update_review_state(&self, previous: &ReviewState, next: &ReviewState) -> Result<bool> {
        // times_reviewed doubles as the row version
        let result = sqlx::query(
            r#"
            UPDATE flashcard_reviews
            SET ease_factor = ?1,
                interval_days = ?2,
                next_review_date = ?3,
                last_reviewed = ?4,
                times_reviewed = times_reviewed + 1
            WHERE id = ?5 AND times_reviewed = ?6
            "#,
        )
        .bind(next.ease_factor)
        .bind(next.interval)
        .bind(to_db_timestamp(&next.next_review_date))
        .bind(next.last_reviewed.as_ref().map(to_db_timestamp))
        .bind(previous.id.to_string())
        .bind(previous.times_reviewed)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_due_review_states(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewState>> {
        let start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT * FROM flashcard_reviews
            WHERE user_id = ?1
              AND flashcard_set_id = ?2
              AND next_review_date <= ?3
            ORDER BY next_review_date ASC, card_index ASC
            "#,
        )
        .bind(user_id.to_string())
        .bind(set_id.to_string())
        .bind(to_db_timestamp(&now))
        .fetch_all(&self.pool)
        .await?;

        let states = rows
            .iter()
            .map(Self::row_to_review_state)
            .collect::<Result<Vec<_>>>()?;

        log_db_operation!(
            debug,
            "get_due_review_states",
            set_id = set_id,
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(states)
    }

    async fn aggregate_stats(&self, user_id: Uuid, set_id: Uuid, now: DateTime<Utc>) -> Result<SetStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_cards,
                COUNT(CASE WHEN next_review_date <= ?3 THEN 1 END) AS due_today,
                COALESCE(AVG(times_reviewed), 0.0) AS avg_reviews,
                COUNT(CASE WHEN times_reviewed = 0 THEN 1 END) AS new_cards,
                COUNT(CASE WHEN times_reviewed > 0 THEN 1 END) AS learning_cards
            FROM flashcard_reviews
            WHERE user_id = ?1 AND flashcard_set_id = ?2
            "#,
        )
        .bind(user_id.to_string())
        .bind(set_id.to_string())
        .bind(to_db_timestamp(&now))
        .fetch_one(&self.pool)
        .await?;

        Ok(SetStats {
            total_cards: row.try_get("total_cards")?,
            due_today: row.try_get("due_today")?,
            avg_reviews: row.try_get("avg_reviews")?,
            new_cards: row.try_get("new_cards")?,
            learning_cards: row.try_get("learning_cards")?,
        })
    }

    async fn user_progress(&self, user_id: Uuid, mastery_threshold: i64) -> Result<FlashcardProgress> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(CASE WHEN times_reviewed = 0 THEN 1 END) AS new_cards,
                COUNT(CASE WHEN times_reviewed > 0 AND times_reviewed < ?2 THEN 1 END) AS learning,
                COUNT(CASE WHEN times_reviewed >= ?2 THEN 1 END) AS mastered
            FROM flashcard_reviews
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id.to_string())
        .bind(mastery_threshold)
        .fetch_one(&self.pool)
        .await?;

        Ok(FlashcardProgress {
            total: row.try_get("total")?,
            new: row.try_get("new_cards")?,
            learning: row.try_get("learning")?,
            mastered: row.try_get("mastered")?,
        })
    }

    async fn review_activity(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<DailyActivity>> {
        let rows = sqlx::query(
            r#"
            SELECT substr(last_reviewed, 1, 10) AS day, COUNT(*) AS flashcards
            FROM flashcard_reviews
            WHERE user_id = ?1
              AND last_reviewed IS NOT NULL
              AND last_reviewed >= ?2
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(user_id.to_string())
        .bind(to_db_timestamp(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DailyActivity> {
                Ok(DailyActivity {
                    date: row.try_get("day")?,
                    flashcards: row.try_get("flashcards")?,
                })
            })
            .collect()
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Fixed-width UTC form so that SQL string comparison matches time order.
pub fn to_db_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReviewError::Internal(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ReviewError::Internal(format!("invalid id '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    async fn create_test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    async fn seed_set(db: &Database, user_id: Uuid, card_count: usize) -> FlashcardSet {
        let set = FlashcardSet {
            id: Uuid::new_v4(),
            document_id: Some(Uuid::new_v4()),
            user_id,
            cards: (0..card_count)
                .map(|i| Card {
                    front: format!("Q{}", i),
                    back: format!("A{}", i),
                })
                .collect(),
            created_at: t0(),
        };
        db.create_flashcard_set(&set).await.unwrap();
        set
    }

    #[tokio::test]
    async fn test_flashcard_set_round_trip() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 3).await;

        let loaded = db.get_flashcard_set(set.id).await.unwrap().unwrap();
        assert_eq!(loaded.cards, set.cards);
        assert_eq!(loaded.user_id, user_id);
        assert_eq!(loaded.document_id, set.document_id);
        assert_eq!(loaded.created_at, t0());

        assert!(db.get_flashcard_set(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_creates_default_rows() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 4).await;

        let inserted = db.initialize_review_states(set.id, user_id, 4, t0()).await.unwrap();
        assert_eq!(inserted, 4);

        for index in 0..4 {
            let state = db.get_review_state(user_id, set.id, index).await.unwrap().unwrap();
            assert_eq!(state.card_index, index);
            assert_eq!(state.interval, 1);
            assert_eq!(state.ease_factor, 2.5);
            assert_eq!(state.times_reviewed, 0);
            assert_eq!(state.next_review_date, t0());
            assert!(state.last_reviewed.is_none());
        }
        assert!(db.get_review_state(user_id, set.id, 4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 3).await;
        db.initialize_review_states(set.id, user_id, 3, t0()).await.unwrap();

        let before = db.get_review_state(user_id, set.id, 1).await.unwrap().unwrap();
        let mut progressed = before.clone();
        progressed.ease_factor = 2.65;
        progressed.interval = 4;
        progressed.next_review_date = t0() + ChronoDuration::days(4);
        progressed.last_reviewed = Some(t0());
        assert!(db.update_review_state(&before, &progressed).await.unwrap());

        let inserted = db
            .initialize_review_states(set.id, user_id, 3, t0() + ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(inserted, 0);

        let after = db.get_review_state(user_id, set.id, 1).await.unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.times_reviewed, 1);
        assert_eq!(after.interval, 4);
        assert_eq!(after.ease_factor, 2.65);
    }

    #[tokio::test]
    async fn test_update_rejects_stale_snapshot() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 1).await;
        db.initialize_review_states(set.id, user_id, 1, t0()).await.unwrap();

        let snapshot = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
        let mut next = snapshot.clone();
        next.interval = 3;
        next.next_review_date = t0() + ChronoDuration::days(3);
        next.last_reviewed = Some(t0());

        assert!(db.update_review_state(&snapshot, &next).await.unwrap());
        // Same snapshot again: version moved on, so nothing is written.
        assert!(!db.update_review_state(&snapshot, &next).await.unwrap());

        let stored = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
        assert_eq!(stored.times_reviewed, 1);
    }

    #[tokio::test]
    async fn test_due_states_are_ordered_and_filtered() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 3).await;
        db.initialize_review_states(set.id, user_id, 3, t0()).await.unwrap();

        // card 0 -> due in 2 days, card 2 -> due one hour ago
        for (index, due) in [(0, t0() + ChronoDuration::days(2)), (2, t0() - ChronoDuration::hours(1))] {
            let snapshot = db.get_review_state(user_id, set.id, index).await.unwrap().unwrap();
            let mut next = snapshot.clone();
            next.next_review_date = due;
            assert!(db.update_review_state(&snapshot, &next).await.unwrap());
        }

        let due = db.get_due_review_states(user_id, set.id, t0()).await.unwrap();
        let indices: Vec<i64> = due.iter().map(|s| s.card_index).collect();
        assert_eq!(indices, vec![2, 1]);

        let later = db
            .get_due_review_states(user_id, set.id, t0() + ChronoDuration::days(2))
            .await
            .unwrap();
        assert_eq!(later.len(), 3);
        assert_eq!(later.last().unwrap().card_index, 0);

        let other_user = db.get_due_review_states(Uuid::new_v4(), set.id, t0()).await.unwrap();
        assert!(other_user.is_empty());
    }

    #[tokio::test]
    async fn test_delete_set_cascades_to_reviews() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 2).await;
        db.initialize_review_states(set.id, user_id, 2, t0()).await.unwrap();

        assert!(db.delete_flashcard_set(set.id).await.unwrap());
        assert!(!db.delete_flashcard_set(set.id).await.unwrap());
        assert!(db.get_review_state(user_id, set.id, 0).await.unwrap().is_none());

        let stats = db.aggregate_stats(user_id, set.id, t0()).await.unwrap();
        assert_eq!(stats.total_cards, 0);
    }

    #[tokio::test]
    async fn test_delete_sets_for_document() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 2).await;
        let document_id = set.document_id.unwrap();
        db.initialize_review_states(set.id, user_id, 2, t0()).await.unwrap();

        let stranger = Uuid::new_v4();
        assert_eq!(db.delete_sets_for_document(stranger, document_id).await.unwrap(), 0);
        assert!(db.get_flashcard_set(set.id).await.unwrap().is_some());

        assert_eq!(db.delete_sets_for_document(user_id, document_id).await.unwrap(), 1);
        assert!(db.get_flashcard_set(set.id).await.unwrap().is_none());
        assert!(db.get_review_state(user_id, set.id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aggregate_stats_on_empty_set() {
        let db = create_test_db().await;
        let stats = db.aggregate_stats(Uuid::new_v4(), Uuid::new_v4(), t0()).await.unwrap();
        assert_eq!(
            stats,
            SetStats {
                total_cards: 0,
                due_today: 0,
                avg_reviews: 0.0,
                new_cards: 0,
                learning_cards: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_check_constraints_guard_invariants() {
        let db = create_test_db().await;
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 1).await;
        db.initialize_review_states(set.id, user_id, 1, t0()).await.unwrap();

        let snapshot = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
        let mut broken = snapshot.clone();
        broken.ease_factor = 1.0;
        let result = db.update_review_state(&snapshot, &broken).await;
        assert!(matches!(result, Err(ReviewError::Storage(_))));

        let unchanged = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
        assert_eq!(unchanged, snapshot);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let fractional = whole + ChronoDuration::nanoseconds(1_500);
        assert_eq!(to_db_timestamp(&whole), "2026-05-04T12:00:00.000000Z");
        assert_eq!(to_db_timestamp(&fractional), "2026-05-04T12:00:00.000001Z");
        assert!(to_db_timestamp(&whole) < to_db_timestamp(&fractional));
        assert_eq!(parse_db_timestamp(&to_db_timestamp(&whole)).unwrap(), whole);
    }

    #[tokio::test]
    async fn test_in_memory_pool_shares_one_database() {
        let db = Database::connect(&DatabaseConfig::with_url("sqlite::memory:")).await.unwrap();
        let user_id = Uuid::new_v4();
        let set = seed_set(&db, user_id, 3).await;

        let reads = futures_util::future::join_all(
            (0..8).map(|_| db.get_flashcard_set(set.id)),
        )
        .await;

        assert!(reads.iter().all(|r| matches!(r, Ok(Some(_)))));
        assert_eq!(db.pool.size(), 1);
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite:file:test?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite:study_scheduler.db"));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let result = Database::new("invalid://url").await;
        assert!(result.is_err());
    }
}
