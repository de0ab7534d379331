use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    errors::{ErrorContext, ReviewError},
    models::*,
    review_service::ReviewService,
};

use crate::{log_api_start, log_api_success, log_api_warn};

/// Header carrying the caller's identity. Authentication happens upstream.
pub const USER_ID_HEADER: &str = "x-user-id";

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Clone)]
pub struct AppState {
    pub review_service: ReviewService,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Caller identity taken from the `X-User-Id` header.
pub struct UserId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            log_api_warn!("authenticate", "request without X-User-Id header");
            return Err(ReviewError::Unauthorized("missing X-User-Id header".to_string()).to_response());
        };

        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(UserId)
            .ok_or_else(|| {
                log_api_warn!("authenticate", "malformed X-User-Id header");
                ReviewError::Unauthorized("X-User-Id must be a UUID".to_string()).to_response()
            })
    }
}

// Flashcard set endpoints
pub async fn create_flashcard_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<CreateFlashcardSetRequest>,
) -> ApiResult<FlashcardSet> {
    log_api_start!("create_flashcard_set", user_id = user_id);

    match state.review_service.create_flashcard_set(user_id, request).await {
        Ok(set) => {
            log_api_success!("create_flashcard_set", set_id = set.id, count = set.cards.len(), "set created");
            Ok(Json(ApiResponse::success(set)))
        }
        Err(e) => {
            let context = ErrorContext::new("create_flashcard_set", "flashcard_set");
            Err(e.to_response_with_context(context))
        }
    }
}

pub async fn get_flashcard_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<Uuid>,
) -> ApiResult<FlashcardSet> {
    log_api_start!("get_flashcard_set", set_id = set_id);

    state
        .review_service
        .get_flashcard_set(user_id, set_id)
        .await
        .map(|set| Json(ApiResponse::success(set)))
        .map_err(|e| {
            let context = ErrorContext::new("get_flashcard_set", "flashcard_set")
                .with_id(&set_id.to_string());
            e.to_response_with_context(context)
        })
}

pub async fn delete_flashcard_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<Uuid>,
) -> ApiResult<bool> {
    log_api_start!("delete_flashcard_set", set_id = set_id);

    match state.review_service.delete_flashcard_set(user_id, set_id).await {
        Ok(()) => {
            log_api_success!("delete_flashcard_set", set_id = set_id, "set deleted");
            Ok(Json(ApiResponse::success(true)))
        }
        Err(e) => {
            let context = ErrorContext::new("delete_flashcard_set", "flashcard_set")
                .with_id(&set_id.to_string());
            Err(e.to_response_with_context(context))
        }
    }
}

pub async fn delete_document_sets(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(document_id): Path<Uuid>,
) -> ApiResult<Value> {
    log_api_start!("delete_document_sets", user_id = user_id);

    match state
        .review_service
        .delete_sets_for_document(user_id, document_id)
        .await
    {
        Ok(deleted) => Ok(Json(ApiResponse::success(json!({ "deleted": deleted })))),
        Err(e) => {
            let context = ErrorContext::new("delete_document_sets", "document")
                .with_id(&document_id.to_string());
            Err(e.to_response_with_context(context))
        }
    }
}

// Review endpoints
pub async fn initialize_set(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<Uuid>,
    Json(request): Json<InitializeSetRequest>,
) -> ApiResult<InitializeSetResponse> {
    log_api_start!("initialize_set", set_id = set_id);

    match state
        .review_service
        .initialize_set(set_id, user_id, request.card_count)
        .await
    {
        Ok(created) => {
            log_api_success!("initialize_set", set_id = set_id, count = created, "review states seeded");
            Ok(Json(ApiResponse::success(InitializeSetResponse { created })))
        }
        Err(e) => {
            let context = ErrorContext::new("initialize_set", "flashcard_set")
                .with_id(&set_id.to_string());
            Err(e.to_response_with_context(context))
        }
    }
}

pub async fn get_due_cards(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<Uuid>,
) -> ApiResult<DueCardsResponse> {
    log_api_start!("get_due_cards", set_id = set_id);

    match state.review_service.get_due_cards(user_id, set_id).await {
        Ok(due) => {
            log_api_success!("get_due_cards", set_id = set_id, count = due.total_due, "due cards fetched");
            Ok(Json(ApiResponse::success(due)))
        }
        Err(e) => {
            let context = ErrorContext::new("get_due_cards", "flashcard_set")
                .with_id(&set_id.to_string());
            Err(e.to_response_with_context(context))
        }
    }
}

pub async fn submit_review(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<Uuid>,
    Json(request): Json<SubmitReviewRequest>,
) -> ApiResult<ReviewOutcome> {
    log_api_start!("submit_review", set_id = set_id);

    match state
        .review_service
        .submit_review(user_id, set_id, request.card_index, &request.difficulty)
        .await
    {
        Ok(outcome) => {
            log_api_success!(
                "submit_review",
                set_id = set_id,
                format!("card {} due again in {} days", request.card_index, outcome.interval)
            );
            Ok(Json(ApiResponse::success(outcome)))
        }
        Err(e) => {
            let context = ErrorContext::new("submit_review", "review")
                .with_id(&format!("{}/{}", set_id, request.card_index));
            Err(e.to_response_with_context(context))
        }
    }
}

pub async fn get_set_stats(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(set_id): Path<Uuid>,
) -> ApiResult<SetStats> {
    log_api_start!("get_set_stats", set_id = set_id);

    state
        .review_service
        .get_stats(user_id, set_id)
        .await
        .map(|stats| Json(ApiResponse::success(stats)))
        .map_err(|e| {
            let context = ErrorContext::new("get_set_stats", "flashcard_set")
                .with_id(&set_id.to_string());
            e.to_response_with_context(context)
        })
}

// Stats endpoints
pub async fn get_flashcard_progress(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<FlashcardProgress> {
    log_api_start!("get_flashcard_progress", user_id = user_id);

    state
        .review_service
        .get_progress(user_id)
        .await
        .map(|progress| Json(ApiResponse::success(progress)))
        .map_err(|e| {
            let context = ErrorContext::new("get_flashcard_progress", "user")
                .with_id(&user_id.to_string())
                .with_user_message("Could not load flashcard progress");
            e.to_response_with_context(context)
        })
}

pub async fn get_activity(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Vec<DailyActivity>> {
    log_api_start!("get_activity", user_id = user_id);

    state
        .review_service
        .get_activity(user_id)
        .await
        .map(|activity| Json(ApiResponse::success(activity)))
        .map_err(|e| {
            let context = ErrorContext::new("get_activity", "user")
                .with_id(&user_id.to_string())
                .with_user_message("Could not load review activity");
            e.to_response_with_context(context)
        })
}

pub async fn health() -> Json<ApiResponse<Value>> {
    log_api_start!("health");
    Json(ApiResponse::success(json!({ "status": "ok" })))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Flashcard set routes
        .route("/api/flashcard-sets", post(create_flashcard_set))
        .route("/api/flashcard-sets/:id", get(get_flashcard_set))
        .route("/api/flashcard-sets/:id", delete(delete_flashcard_set))
        .route("/api/documents/:id/flashcard-sets", delete(delete_document_sets))
        // Review routes
        .route("/api/flashcard-sets/:id/initialize", post(initialize_set))
        .route("/api/flashcard-sets/:id/due", get(get_due_cards))
        .route("/api/flashcard-sets/:id/review", post(submit_review))
        .route("/api/flashcard-sets/:id/stats", get(get_set_stats))
        // Stats routes
        .route("/api/stats/flashcard-progress", get(get_flashcard_progress))
        .route("/api/stats/activity", get(get_activity))
        .with_state(state)
}
