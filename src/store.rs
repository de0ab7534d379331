use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::*;

/// Durable state behind the scheduler: flashcard sets and per-card review rows.
///
/// Implementations own no scheduling logic. Every method is a single
/// round-trip; `initialize_review_states` runs in one transaction.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn create_flashcard_set(&self, set: &FlashcardSet) -> Result<()>;

    async fn get_flashcard_set(&self, set_id: Uuid) -> Result<Option<FlashcardSet>>;

    /// Returns `false` when no set had that id. Review rows go with it.
    async fn delete_flashcard_set(&self, set_id: Uuid) -> Result<bool>;

    /// Deletes only the sets of `document_id` owned by `user_id`.
    async fn delete_sets_for_document(&self, user_id: Uuid, document_id: Uuid) -> Result<u64>;

    /// Creates default rows for indices `0..card_count`, skipping indices that
    /// already have one. Returns how many rows were inserted.
    async fn initialize_review_states(
        &self,
        set_id: Uuid,
        user_id: Uuid,
        card_count: i64,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn get_review_state(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        card_index: i64,
    ) -> Result<Option<ReviewState>>;

    /// Writes `next` only if the row still matches the `times_reviewed` of
    /// `previous`. Returns `false` when another writer got there first.
    async fn update_review_state(&self, previous: &ReviewState, next: &ReviewState) -> Result<bool>;

    /// Rows with `next_review_date <= now`, oldest due date first.
    async fn get_due_review_states(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewState>>;

    async fn aggregate_stats(&self, user_id: Uuid, set_id: Uuid, now: DateTime<Utc>) -> Result<SetStats>;

    async fn user_progress(&self, user_id: Uuid, mastery_threshold: i64) -> Result<FlashcardProgress>;

    async fn review_activity(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<DailyActivity>>;
}
