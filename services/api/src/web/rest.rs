//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::protocol::{
    AnalyticsView, AnswerView, ContentHeaderView, ContentView, DailyPerformanceView,
    GenerateRequest, GenerateResponse, GradedItemView, HealthResponse, HistoryQuery,
    ListQuery, ProgressQuery, ProgressView, QuotaResponse, QuotaView, ResultsView, ReviewRequest,
    ScoreView, SubmitRequest, SubscriptionEventPayload, SubscriptionEventResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use revision_core::domain::{
    ContentFilter, ContentType, GenerationRequest, Principal, SubmittedAnswer,
};
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        generate_handler,
        list_content_handler,
        get_content_handler,
        submit_handler,
        results_handler,
        review_handler,
        dashboard_handler,
        progress_handler,
        history_handler,
        analytics_handler,
        quota_handler,
        crate::web::webhook::subscription_event_handler,
        health_handler,
    ),
    components(
        schemas(
            GenerateRequest, GenerateResponse, ContentHeaderView, ContentView, SubmitRequest,
            ScoreView, ResultsView, ReviewRequest, AnswerView, ProgressView, QuotaResponse,
            QuotaView, SubscriptionEventPayload, SubscriptionEventResponse, HealthResponse,
            DailyPerformanceView, GradedItemView, AnalyticsView,
        )
    ),
    tags(
        (name = "Revision API", description = "Generate study material, submit answers and track progress.")
    )
)]
pub struct ApiDoc;

const DEFAULT_HISTORY_DAYS: u32 = 30;

fn parse_content_type(raw: &str) -> Result<ContentType, ApiError> {
    raw.parse::<ContentType>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

//=========================================================================================
// Generation and Content Handlers
//=========================================================================================

/// Generate a new flashcard set, quiz or mock exam.
///
/// Consumes one unit of today's quota for the content type. The quota is
/// returned if generation fails.
#[utoipa::path(
    post,
    path = "/content/generate",
    request_body = GenerateRequest,
    responses(
        (status = 201, description = "Content generated", body = GenerateResponse),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Daily quota reached; a subscription is needed"),
        (status = 502, description = "The content generator failed")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = GenerationRequest {
        content_type: parse_content_type(&body.content_type)?,
        subject: body.subject,
        topic: body.topic,
        exam_board: body.exam_board,
        count: body.count,
    };

    let generated = state.engine.generate(&principal, request).await?;
    info!(user_id = %principal.user_id, item_id = %generated.item_id, "Content generated");
    Ok((StatusCode::CREATED, Json(GenerateResponse::from(generated))))
}

/// List the caller's content items, newest first.
#[utoipa::path(
    get,
    path = "/content",
    responses(
        (status = 200, description = "Content headers", body = [ContentHeaderView]),
        (status = 400, description = "Unknown content type")
    ),
    params(
        ListQuery,
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn list_content_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ContentHeaderView>>, ApiError> {
    let filter = ContentFilter {
        content_type: query.content_type.as_deref().map(parse_content_type).transpose()?,
        subject: query.subject,
        topic: query.topic,
    };
    let headers = state.engine.list(principal.user_id, &filter).await?;
    Ok(Json(headers.into_iter().map(ContentHeaderView::from).collect()))
}

/// Fetch one content item. Answers stay hidden until the item is submitted.
#[utoipa::path(
    get,
    path = "/content/{id}",
    responses(
        (status = 200, description = "The content item", body = ContentView),
        (status = 403, description = "Not the caller's item")
    ),
    params(
        ("id" = Uuid, Path, description = "Content item id"),
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn get_content_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ContentView>, ApiError> {
    let item = state.engine.fetch(item_id, principal.user_id).await?;
    Ok(Json(item.into()))
}

//=========================================================================================
// Submission, Results and Review Handlers
//=========================================================================================

/// Submit answers for a quiz or mock exam. Each item can be submitted once.
#[utoipa::path(
    post,
    path = "/content/{id}/submit",
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Submission scored", body = ScoreView),
        (status = 400, description = "Invalid answers or a non-gradable item"),
        (status = 403, description = "Not the caller's item"),
        (status = 409, description = "Already submitted")
    ),
    params(
        ("id" = Uuid, Path, description = "Content item id"),
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(item_id): Path<Uuid>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<ScoreView>, ApiError> {
    let answers: Vec<SubmittedAnswer> = body.answers.into_iter().map(Into::into).collect();
    let score = state.engine.submit(item_id, principal.user_id, &answers).await?;
    Ok(Json(score.into()))
}

/// Per-question results of a submitted item.
#[utoipa::path(
    get,
    path = "/content/{id}/results",
    responses(
        (status = 200, description = "Results", body = ResultsView),
        (status = 403, description = "Not the caller's item"),
        (status = 404, description = "Not submitted yet")
    ),
    params(
        ("id" = Uuid, Path, description = "Content item id"),
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn results_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ResultsView>, ApiError> {
    let results = state.engine.results(item_id, principal.user_id).await?;
    Ok(Json(results.into()))
}

/// Mark an answer that is pending review. Graders only.
#[utoipa::path(
    post,
    path = "/answers/{id}/review",
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Answer marked", body = AnswerView),
        (status = 400, description = "Marks out of range"),
        (status = 403, description = "Caller is not a grader"),
        (status = 404, description = "Unknown answer"),
        (status = 409, description = "Answer already has a mark")
    ),
    params(
        ("id" = Uuid, Path, description = "Answer id"),
        ("x-user-id" = Uuid, Header, description = "The verified grader id.")
    )
)]
pub async fn review_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(answer_id): Path<Uuid>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<AnswerView>, ApiError> {
    let answer = state.engine.review(&principal, answer_id, body.marks).await?;
    Ok(Json(answer.into()))
}

//=========================================================================================
// Progress and Quota Handlers
//=========================================================================================

/// Dashboard: totals, per-topic breakdown and weak topics, optionally for one subject.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Dashboard", body = ProgressView)
    ),
    params(
        ("subject" = Option<String>, Query, description = "Restrict to one subject"),
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressView>, ApiError> {
    let summary = state
        .engine
        .dashboard(principal.user_id, query.subject.as_deref())
        .await?;
    Ok(Json(summary.into()))
}

/// Progress summary for a subject and/or topic.
#[utoipa::path(
    get,
    path = "/progress",
    responses(
        (status = 200, description = "Progress summary", body = ProgressView)
    ),
    params(
        ProgressQuery,
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressView>, ApiError> {
    let summary = state
        .engine
        .summarize(principal.user_id, query.subject.as_deref(), query.topic.as_deref())
        .await?;
    Ok(Json(summary.into()))
}

/// Daily graded performance for a subject, oldest day first. Days without graded work are omitted.
#[utoipa::path(
    get,
    path = "/progress/history/{subject}",
    responses(
        (status = 200, description = "Daily performance", body = [DailyPerformanceView]),
        (status = 400, description = "days out of range")
    ),
    params(
        ("subject" = String, Path, description = "The subject"),
        HistoryQuery,
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(subject): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<DailyPerformanceView>>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    let history = state.engine.history(principal.user_id, &subject, days).await?;
    Ok(Json(history.into_iter().map(DailyPerformanceView::from).collect()))
}

/// Per-topic performance and the most recently graded quizzes and mock exams for a subject.
#[utoipa::path(
    get,
    path = "/progress/analytics/{subject}",
    responses(
        (status = 200, description = "Subject analytics", body = AnalyticsView)
    ),
    params(
        ("subject" = String, Path, description = "The subject"),
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn analytics_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(subject): Path<String>,
) -> Result<Json<AnalyticsView>, ApiError> {
    let analytics = state.engine.analytics(principal.user_id, &subject).await?;
    Ok(Json(AnalyticsView::new(subject, analytics)))
}

/// Today's generation allowance for every content type.
#[utoipa::path(
    get,
    path = "/quota",
    responses(
        (status = 200, description = "Quota status", body = QuotaResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The verified user id.")
    )
)]
pub async fn quota_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<QuotaResponse>, ApiError> {
    let quotas = state.engine.quota_status(&principal).await?;
    Ok(Json(QuotaResponse {
        is_subscribed: principal.is_subscribed,
        quotas: quotas.into_iter().map(QuotaView::from).collect(),
    }))
}

/// Liveness check. No identity required.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_cancelled() { "shutting_down" } else { "ok" };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
