use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ReviewConfig;
use crate::errors::{Result, ReviewError};
use crate::models::*;
use crate::scheduler::{Difficulty, Sm2Scheduler};
use crate::store::ReviewStore;
use crate::{log_service_error, log_service_start, log_service_success, log_service_warn};

const SERVICE: &str = "review_service";

/// Attempts at the read-modify-write of a review row before giving up.
const MAX_REVIEW_ATTEMPTS: usize = 2;

/// Scheduling operations over an injected store and clock.
#[derive(Clone)]
pub struct ReviewService {
    store: Arc<dyn ReviewStore>,
    clock: Arc<dyn Clock>,
    scheduler: Sm2Scheduler,
    config: ReviewConfig,
}

impl ReviewService {
    pub fn new(store: Arc<dyn ReviewStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            scheduler: Sm2Scheduler::new(),
            config: ReviewConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReviewConfig) -> Self {
        self.config = config;
        self
    }

    // Stored timestamps have microsecond precision; keep "now" at the same grain.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    async fn load_owned_set(&self, user_id: Uuid, set_id: Uuid) -> Result<FlashcardSet> {
        let set = self
            .store
            .get_flashcard_set(set_id)
            .await?
            .ok_or_else(|| ReviewError::NotFound(format!("flashcard set {}", set_id)))?;

        if set.user_id != user_id {
            return Err(ReviewError::Forbidden(format!(
                "flashcard set {} belongs to another user",
                set_id
            )));
        }
        Ok(set)
    }

    /// Persist a freshly generated set and seed review state for its owner.
    pub async fn create_flashcard_set(
        &self,
        user_id: Uuid,
        request: CreateFlashcardSetRequest,
    ) -> Result<FlashcardSet> {
        if request.cards.is_empty() {
            return Err(ReviewError::InvalidInput(
                "a flashcard set needs at least one card".to_string(),
            ));
        }

        let set = FlashcardSet {
            id: Uuid::new_v4(),
            document_id: request.document_id,
            user_id,
            cards: request.cards,
            created_at: self.now(),
        };
        log_service_start!(SERVICE, "create_flashcard_set", set_id = set.id, card_count = set.cards.len());

        self.store.create_flashcard_set(&set).await?;
        self.initialize_set(set.id, user_id, set.cards.len() as i64).await?;

        Ok(set)
    }

    pub async fn get_flashcard_set(&self, user_id: Uuid, set_id: Uuid) -> Result<FlashcardSet> {
        self.load_owned_set(user_id, set_id).await
    }

    pub async fn delete_flashcard_set(&self, user_id: Uuid, set_id: Uuid) -> Result<()> {
        self.load_owned_set(user_id, set_id).await?;
        if !self.store.delete_flashcard_set(set_id).await? {
            return Err(ReviewError::NotFound(format!("flashcard set {}", set_id)));
        }
        log_service_success!(SERVICE, "delete_flashcard_set", format!("deleted set {}", set_id));
        Ok(())
    }

    /// Cascade hook for the document-deletion flow. Other users' sets for the
    /// same document are left alone.
    pub async fn delete_sets_for_document(&self, user_id: Uuid, document_id: Uuid) -> Result<u64> {
        let deleted = self.store.delete_sets_for_document(user_id, document_id).await?;
        log_service_success!(
            SERVICE,
            "delete_sets_for_document",
            format!("deleted {} sets for document {}", deleted, document_id)
        );
        Ok(deleted)
    }

    /// Seed default review state for cards `0..card_count`. Safe to repeat:
    /// existing rows keep their progress. Returns the number of new rows.
    pub async fn initialize_set(&self, set_id: Uuid, user_id: Uuid, card_count: i64) -> Result<u64> {
        log_service_start!(SERVICE, "initialize_set", set_id = set_id, card_count = card_count);
        let set = self.load_owned_set(user_id, set_id).await?;

        if card_count < 0 || card_count as usize > set.cards.len() {
            return Err(ReviewError::InvalidInput(format!(
                "card count {} is outside 0..={} for set {}",
                card_count,
                set.cards.len(),
                set_id
            )));
        }

        let created = self
            .store
            .initialize_review_states(set_id, user_id, card_count, self.now())
            .await?;
        log_service_success!(
            SERVICE,
            "initialize_set",
            format!("{} of {} review states created", created, card_count)
        );
        Ok(created)
    }

    /// Cards whose next review date has passed, most overdue first.
    pub async fn get_due_cards(&self, user_id: Uuid, set_id: Uuid) -> Result<DueCardsResponse> {
        log_service_start!(SERVICE, "get_due_cards", set_id = set_id);
        let set = self.load_owned_set(user_id, set_id).await?;
        let states = self
            .store
            .get_due_review_states(user_id, set_id, self.now())
            .await?;

        let due_cards = states
            .into_iter()
            .map(|state| {
                let card = usize::try_from(state.card_index)
                    .ok()
                    .and_then(|index| set.cards.get(index))
                    .ok_or_else(|| {
                        ReviewError::Internal(format!(
                            "review {} points at card {} but set {} has {} cards",
                            state.id,
                            state.card_index,
                            set_id,
                            set.cards.len()
                        ))
                    })?;
                Ok(DueCard {
                    front: card.front.clone(),
                    back: card.back.clone(),
                    card_index: state.card_index,
                    review_id: state.id,
                    times_reviewed: state.times_reviewed,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DueCardsResponse {
            total_due: due_cards.len(),
            total_cards: set.cards.len(),
            due_cards,
        })
    }

    /// Record a rating given as text ("again", "hard", "good", "easy").
    pub async fn submit_review(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        card_index: i64,
        difficulty: &str,
    ) -> Result<ReviewOutcome> {
        let difficulty = difficulty.parse::<Difficulty>()?;
        self.apply_review(user_id, set_id, card_index, difficulty).await
    }

    /// Schedule the card's next review. The row is rewritten only if nobody
    /// else updated it since it was read; one lost race is retried.
    pub async fn apply_review(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        card_index: i64,
        difficulty: Difficulty,
    ) -> Result<ReviewOutcome> {
        let start = Instant::now();
        log_service_start!(SERVICE, "submit_review", set_id = set_id, card_index = card_index);

        let set = self.load_owned_set(user_id, set_id).await?;
        if card_index < 0 || card_index as usize >= set.cards.len() {
            return Err(ReviewError::InvalidInput(format!(
                "card index {} is outside 0..{} for set {}",
                card_index,
                set.cards.len(),
                set_id
            )));
        }

        for attempt in 1..=MAX_REVIEW_ATTEMPTS {
            let current = self
                .store
                .get_review_state(user_id, set_id, card_index)
                .await?
                .ok_or_else(|| {
                    ReviewError::NotFound(format!(
                        "review state for card {} in set {}",
                        card_index, set_id
                    ))
                })?;

            let next = self.scheduler.review(&current, difficulty, self.now())?;

            if self.store.update_review_state(&current, &next).await? {
                log_service_success!(
                    SERVICE,
                    "submit_review",
                    set_id = set_id,
                    duration_ms = start.elapsed().as_millis() as u64
                );
                return Ok(ReviewOutcome {
                    next_review_date: next.next_review_date,
                    interval: next.interval,
                });
            }

            log_service_warn!(
                SERVICE,
                "submit_review",
                format!(
                    "card {} was updated concurrently (attempt {} of {})",
                    card_index, attempt, MAX_REVIEW_ATTEMPTS
                )
            );
        }

        let error = ReviewError::ConcurrencyConflict(format!(
            "card {} in set {} kept changing during review",
            card_index, set_id
        ));
        log_service_error!(SERVICE, "submit_review", set_id = set_id, error = error);
        Err(error)
    }

    pub async fn get_stats(&self, user_id: Uuid, set_id: Uuid) -> Result<SetStats> {
        log_service_start!(SERVICE, "get_stats", set_id = set_id);
        self.load_owned_set(user_id, set_id).await?;
        self.store.aggregate_stats(user_id, set_id, self.now()).await
    }

    /// New / learning / mastered counts across all of the user's sets.
    pub async fn get_progress(&self, user_id: Uuid) -> Result<FlashcardProgress> {
        self.store
            .user_progress(user_id, self.config.mastery_threshold)
            .await
    }

    /// Cards reviewed per UTC day within the configured trailing window.
    pub async fn get_activity(&self, user_id: Uuid) -> Result<Vec<DailyActivity>> {
        let window_days = self.config.activity_window_days;
        let since = Duration::try_days(window_days)
            .and_then(|window| self.now().checked_sub_signed(window))
            .ok_or_else(|| {
                ReviewError::Internal(format!(
                    "activity window of {} days reaches outside the calendar",
                    window_days
                ))
            })?;
        self.store.review_activity(user_id, since).await
    }
}
