use chrono::{DateTime, Datelike, Days, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, ReviewError};
use crate::models::ReviewState;

pub const DEFAULT_EASE_FACTOR: f64 = 2.5;
pub const MINIMUM_EASE_FACTOR: f64 = 1.3;
pub const DEFAULT_INTERVAL_DAYS: i64 = 1;

/// Last year the fixed-width timestamp column can hold; later years gain a sign prefix.
pub const MAX_STORABLE_YEAR: i32 = 9999;

const AGAIN_EASE_PENALTY: f64 = 0.2;
const HARD_EASE_PENALTY: f64 = 0.15;
const HARD_INTERVAL_MULTIPLIER: f64 = 1.2;
const EASY_BONUS: f64 = 1.3;
const EASY_EASE_BONUS: f64 = 0.15;

/// Qualitative rating a learner gives after seeing the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Again,
        Difficulty::Hard,
        Difficulty::Good,
        Difficulty::Easy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Again => "again",
            Difficulty::Hard => "hard",
            Difficulty::Good => "good",
            Difficulty::Easy => "easy",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ReviewError;

    /// Accepts the four names in any case, or the numeric ratings 1-4.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "again" | "1" => Ok(Difficulty::Again),
            "hard" | "2" => Ok(Difficulty::Hard),
            "good" | "3" => Ok(Difficulty::Good),
            "easy" | "4" => Ok(Difficulty::Easy),
            _ => Err(ReviewError::InvalidInput(format!(
                "difficulty must be one of again, hard, good, easy; got '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleOutcome {
    pub interval: i64,
    pub ease_factor: f64,
}

/// Simplified SM-2 scheduler.
///
/// Transitions for a card with interval `i` and ease `e`:
///
/// | rating | next interval          | next ease          |
/// |--------|------------------------|--------------------|
/// | again  | 1                      | max(1.3, e - 0.2)  |
/// | hard   | max(1, round(i * 1.2)) | max(1.3, e - 0.15) |
/// | good   | round(i * e)           | e                  |
/// | easy   | round(i * e * 1.3)     | e + 0.15           |
///
/// `round` is round-half-away-from-zero (`f64::round`), so 2.5 becomes 3.
/// Ease growth on `easy` has no upper bound; a due date past year 9999 is
/// rejected instead of stored.
#[derive(Debug, Clone)]
pub struct Sm2Scheduler {
    initial_ease: f64,
    minimum_ease: f64,
}

impl Default for Sm2Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sm2Scheduler {
    pub fn new() -> Self {
        Self {
            initial_ease: DEFAULT_EASE_FACTOR,
            minimum_ease: MINIMUM_EASE_FACTOR,
        }
    }

    pub fn initial_ease(&self) -> f64 {
        self.initial_ease
    }

    /// Pure interval/ease transition. Same inputs always give the same outcome.
    pub fn next_schedule(
        &self,
        interval: i64,
        ease_factor: f64,
        difficulty: Difficulty,
    ) -> ScheduleOutcome {
        let interval_f = interval as f64;
        match difficulty {
            Difficulty::Again => ScheduleOutcome {
                interval: 1,
                ease_factor: (ease_factor - AGAIN_EASE_PENALTY).max(self.minimum_ease),
            },
            Difficulty::Hard => ScheduleOutcome {
                interval: round_half_away_from_zero(interval_f * HARD_INTERVAL_MULTIPLIER).max(1),
                ease_factor: (ease_factor - HARD_EASE_PENALTY).max(self.minimum_ease),
            },
            Difficulty::Good => ScheduleOutcome {
                interval: round_half_away_from_zero(interval_f * ease_factor),
                ease_factor,
            },
            Difficulty::Easy => ScheduleOutcome {
                interval: round_half_away_from_zero(interval_f * ease_factor * EASY_BONUS),
                ease_factor: ease_factor + EASY_EASE_BONUS,
            },
        }
    }

    /// Apply a rating to a review state at `now`, producing the state to persist.
    pub fn review(
        &self,
        state: &ReviewState,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> Result<ReviewState> {
        let outcome = self.next_schedule(state.interval, state.ease_factor, difficulty);

        // Calendar days, not elapsed seconds.
        let next_review_date = u64::try_from(outcome.interval)
            .ok()
            .and_then(|days| now.checked_add_days(Days::new(days)))
            .filter(|date| date.year() <= MAX_STORABLE_YEAR)
            .ok_or_else(|| {
                ReviewError::InvalidInput(format!(
                    "interval of {} days puts the next review out of range",
                    outcome.interval
                ))
            })?;

        Ok(ReviewState {
            ease_factor: outcome.ease_factor,
            interval: outcome.interval,
            next_review_date,
            last_reviewed: Some(now),
            times_reviewed: state.times_reviewed + 1,
            ..state.clone()
        })
    }
}

fn round_half_away_from_zero(value: f64) -> i64 {
    value.round() as i64
}
