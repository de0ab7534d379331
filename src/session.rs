use uuid::Uuid;

use crate::errors::Result;
use crate::models::{DueCard, ReviewOutcome, SetStats};
use crate::review_service::ReviewService;
use crate::scheduler::Difficulty;

/// One pass over the cards that were due when the session started.
///
/// Owned by the caller. Cards that become due mid-session are picked up by
/// the next session, not this one.
pub struct StudySession {
    service: ReviewService,
    user_id: Uuid,
    set_id: Uuid,
    queue: Vec<DueCard>,
    position: usize,
    reviewed: usize,
    total_cards: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub reviewed: usize,
    pub skipped: usize,
    pub stats: SetStats,
}

impl StudySession {
    pub async fn start(service: ReviewService, user_id: Uuid, set_id: Uuid) -> Result<Self> {
        let due = service.get_due_cards(user_id, set_id).await?;
        Ok(Self {
            service,
            user_id,
            set_id,
            queue: due.due_cards,
            position: 0,
            reviewed: 0,
            total_cards: due.total_cards,
        })
    }

    pub fn set_id(&self) -> Uuid {
        self.set_id
    }

    /// Card to present next, `None` once the queue is exhausted.
    pub fn current(&self) -> Option<&DueCard> {
        self.queue.get(self.position)
    }

    /// Nothing was due when the session started.
    pub fn is_caught_up(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.position >= self.queue.len()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.position)
    }

    /// (cards handled so far, cards due at session start)
    pub fn progress(&self) -> (usize, usize) {
        (self.position.min(self.queue.len()), self.queue.len())
    }

    pub fn total_cards(&self) -> usize {
        self.total_cards
    }

    /// Rate the current card and move on. On error the session stays on the
    /// same card so the caller can retry.
    pub async fn rate(&mut self, difficulty: Difficulty) -> Result<Option<ReviewOutcome>> {
        let Some(card) = self.current() else {
            return Ok(None);
        };

        let outcome = self
            .service
            .apply_review(self.user_id, self.set_id, card.card_index, difficulty)
            .await?;

        self.position += 1;
        self.reviewed += 1;
        Ok(Some(outcome))
    }

    /// Move past the current card without rating it; it stays due.
    pub fn skip(&mut self) {
        if self.position < self.queue.len() {
            self.position += 1;
        }
    }

    /// End the session and re-query the set's stats.
    pub async fn finish(self) -> Result<SessionSummary> {
        let stats = self.service.get_stats(self.user_id, self.set_id).await?;
        Ok(SessionSummary {
            reviewed: self.reviewed,
            skipped: self.position.min(self.queue.len()) - self.reviewed,
            stats,
        })
    }
}
