use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use study_scheduler::{
    Card, CreateFlashcardSetRequest, DailyActivity, Database, Difficulty, FlashcardProgress,
    FlashcardSet, ManualClock, ReviewError, ReviewService, ReviewState, ReviewStore, Result,
    SetStats,
};
use uuid::Uuid;

/// How the wrapper interferes with `update_review_state`.
#[derive(Clone, Copy)]
enum Interference {
    /// Another writer lands first on the first attempt only.
    RaceOnce,
    /// Every attempt reports a lost race without touching the row.
    AlwaysStale,
}

struct ContendedStore {
    inner: Database,
    mode: Interference,
    updates: AtomicUsize,
}

#[async_trait]
impl ReviewStore for ContendedStore {
    async fn create_flashcard_set(&self, set: &FlashcardSet) -> Result<()> {
        self.inner.create_flashcard_set(set).await
    }

    async fn get_flashcard_set(&self, set_id: Uuid) -> Result<Option<FlashcardSet>> {
        self.inner.get_flashcard_set(set_id).await
    }

    async fn delete_flashcard_set(&self, set_id: Uuid) -> Result<bool> {
        self.inner.delete_flashcard_set(set_id).await
    }

    async fn delete_sets_for_document(&self, user_id: Uuid, document_id: Uuid) -> Result<u64> {
        self.inner.delete_sets_for_document(user_id, document_id).await
    }

    async fn initialize_review_states(
        &self,
        set_id: Uuid,
        user_id: Uuid,
        card_count: i64,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.inner
            .initialize_review_states(set_id, user_id, card_count, now)
            .await
    }

    async fn get_review_state(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        card_index: i64,
    ) -> Result<Option<ReviewState>> {
        self.inner.get_review_state(user_id, set_id, card_index).await
    }

    async fn update_review_state(&self, previous: &ReviewState, next: &ReviewState) -> Result<bool> {
        let attempt = self.updates.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Interference::RaceOnce if attempt == 0 => {
                // the competing writer applies the same transition first
                assert!(self.inner.update_review_state(previous, next).await?);
                self.inner.update_review_state(previous, next).await
            }
            Interference::RaceOnce => self.inner.update_review_state(previous, next).await,
            Interference::AlwaysStale => Ok(false),
        }
    }

    async fn get_due_review_states(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewState>> {
        self.inner.get_due_review_states(user_id, set_id, now).await
    }

    async fn aggregate_stats(&self, user_id: Uuid, set_id: Uuid, now: DateTime<Utc>) -> Result<SetStats> {
        self.inner.aggregate_stats(user_id, set_id, now).await
    }

    async fn user_progress(&self, user_id: Uuid, mastery_threshold: i64) -> Result<FlashcardProgress> {
        self.inner.user_progress(user_id, mastery_threshold).await
    }

    async fn review_activity(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<DailyActivity>> {
        self.inner.review_activity(user_id, since).await
    }
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 20, 18, 0, 0).unwrap())
}

fn request(card_count: usize) -> CreateFlashcardSetRequest {
    CreateFlashcardSetRequest {
        document_id: None,
        cards: (0..card_count)
            .map(|i| Card {
                front: format!("front {}", i),
                back: format!("back {}", i),
            })
            .collect(),
    }
}

async fn contended_service(mode: Interference) -> (ReviewService, Database) {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let store = ContendedStore {
        inner: db.clone(),
        mode,
        updates: AtomicUsize::new(0),
    };
    (ReviewService::new(Arc::new(store), Arc::new(clock())), db)
}

#[tokio::test]
async fn test_lost_race_is_retried_on_fresh_state() {
    let (service, db) = contended_service(Interference::RaceOnce).await;
    let user_id = Uuid::new_v4();
    let set = service.create_flashcard_set(user_id, request(1)).await.unwrap();

    let outcome = service
        .submit_review(user_id, set.id, 0, "good")
        .await
        .unwrap();

    let state = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
    // competing good (1 -> 3), then ours on top of it (3 -> 8)
    assert_eq!(state.times_reviewed, 2);
    assert_eq!(state.interval, 8);
    assert_eq!(outcome.interval, 8);
}

#[tokio::test]
async fn test_repeated_conflict_surfaces_and_leaves_row_untouched() {
    let (service, db) = contended_service(Interference::AlwaysStale).await;
    let user_id = Uuid::new_v4();
    let set = service.create_flashcard_set(user_id, request(1)).await.unwrap();
    let before = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();

    let result = service.submit_review(user_id, set.id, 0, "easy").await;
    assert!(matches!(result, Err(ReviewError::ConcurrencyConflict(_))));

    let after = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_concurrent_reviews_of_different_cards() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let service = ReviewService::new(Arc::new(db.clone()), Arc::new(clock()));
    let user_id = Uuid::new_v4();
    let set = service.create_flashcard_set(user_id, request(10)).await.unwrap();

    let results = join_all((0..10).map(|index| {
        let service = service.clone();
        async move { service.apply_review(user_id, set.id, index, Difficulty::Good).await }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    let due = service.get_due_cards(user_id, set.id).await.unwrap();
    assert_eq!(due.total_due, 0);
    let stats = service.get_stats(user_id, set.id).await.unwrap();
    assert_eq!(stats.learning_cards, 10);
    assert!((stats.avg_reviews - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_concurrent_reviews_of_same_card_never_lose_updates() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let service = ReviewService::new(Arc::new(db.clone()), Arc::new(clock()));
    let user_id = Uuid::new_v4();
    let set = service.create_flashcard_set(user_id, request(1)).await.unwrap();

    let results = join_all((0..8).map(|_| {
        let service = service.clone();
        async move { service.apply_review(user_id, set.id, 0, Difficulty::Hard).await }
    }))
    .await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count() as i64;
    assert!(succeeded >= 1);
    assert!(
        results
            .iter()
            .all(|r| r.is_ok() || matches!(r, Err(ReviewError::ConcurrencyConflict(_))))
    );

    let state = db.get_review_state(user_id, set.id, 0).await.unwrap().unwrap();
    assert_eq!(state.times_reviewed, succeeded);
}
