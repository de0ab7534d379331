use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Front/back pair inside a flashcard set. Cards carry no review state of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardSet {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub user_id: Uuid,
    pub cards: Vec<Card>, // addressed by 0-based index, immutable after generation
    pub created_at: DateTime<Utc>,
}

/// Scheduling state of one card for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewState {
    pub id: Uuid,
    pub user_id: Uuid,
    pub flashcard_set_id: Uuid,
    pub card_index: i64,
    pub ease_factor: f64,
    pub interval: i64, // whole days
    pub next_review_date: DateTime<Utc>,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub times_reviewed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCard {
    pub front: String,
    pub back: String,
    pub card_index: i64,
    pub review_id: Uuid,
    pub times_reviewed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCardsResponse {
    pub due_cards: Vec<DueCard>,
    pub total_due: usize,
    pub total_cards: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewRequest {
    pub card_index: i64,
    pub difficulty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub next_review_date: DateTime<Utc>,
    pub interval: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStats {
    pub total_cards: i64,
    pub due_today: i64,
    pub avg_reviews: f64,
    pub new_cards: i64,
    pub learning_cards: i64,
}

/// Progress across every set a user studies, bucketed by review count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardProgress {
    pub total: i64,
    pub new: i64,
    pub learning: i64,
    pub mastered: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivity {
    pub date: String, // YYYY-MM-DD, UTC
    pub flashcards: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlashcardSetRequest {
    pub document_id: Option<Uuid>,
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeSetRequest {
    pub card_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeSetResponse {
    pub created: u64,
}
