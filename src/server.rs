//! HTTP surface: one JSON route per assistant operation.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;

use spendlog_core::{Category, ExpenseId, NewExpense, YearMonth};

use crate::{
    assistant::{Assistant, AssistantError, MonthlyReport, Reply},
    auth::{auth_middleware, AuthState, CallerIdentity},
    config::AuthConfig,
    extraction::{ExtractedExpense, Extractor},
    participants::{Participants, PaymentDetails},
    session::{ChatMessage, Session, SessionId, SessionStore},
    store::{ExpenseStore, Outcome},
};

const DEFAULT_MONTHLY_BUDGET: Decimal = Decimal::from_parts(3000, 0, 0, false, 0);

#[derive(Clone)]
pub struct AppState {
    pub assistant: Assistant,
    pub store: ExpenseStore,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthConfig>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: ExpenseStore,
        extractor: Arc<dyn Extractor>,
        auth: AuthConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            assistant: Assistant::new(store.clone(), extractor),
            store,
            sessions: Arc::new(SessionStore::new()),
            auth: Arc::new(auth),
            metrics,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session not found")]
    SessionNotFound,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Internal(String),
}

impl From<AssistantError> for ApiError {
    fn from(e: AssistantError) -> Self {
        match e {
            AssistantError::PendingExists | AssistantError::NothingPending => ApiError::Conflict(e.to_string()),
            AssistantError::Payment(_) => ApiError::BadRequest(e.to_string()),
            AssistantError::Worker(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SessionNotFound | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let auth_state = AuthState {
        config: state.auth.clone(),
        store: state.store.clone(),
    };

    let sessions = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(end_session))
        .route("/sessions/:id/messages", get(get_messages))
        .route("/sessions/:id/text", post(submit_text))
        .route("/sessions/:id/audio", post(submit_audio))
        .route("/sessions/:id/confirm", post(confirm_pending))
        .route("/sessions/:id/pending", delete(discard_pending))
        .route("/sessions/:id/expenses", post(add_expense))
        .route("/sessions/:id/expenses/:expense_id", delete(delete_expense))
        .route("/sessions/:id/months", get(list_months))
        .route("/sessions/:id/months/:month", get(monthly_report))
        .route("/sessions/:id/months/:month/advice", get(advice))
        .route("/sessions/:id/budgets", get(get_budgets).put(save_budgets))
        .route("/sessions/:id/participants", get(get_participants).put(save_participants))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let api = sessions.route("/register", post(register));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api", api)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

async fn lookup(state: &AppState, id: SessionId, caller: &CallerIdentity) -> ApiResult<Arc<Mutex<Session>>> {
    state
        .sessions
        .get(id, &caller.owner)
        .await
        .ok_or(ApiError::SessionNotFound)
}

fn parse_month(raw: &str) -> ApiResult<YearMonth> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid month '{}': {}", raw, e)))
}

fn outcome(outcome: Outcome) -> ApiResult<Json<Outcome>> {
    if outcome.success {
        Ok(Json(outcome))
    } else {
        Err(ApiError::Rejected(outcome.message))
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    #[serde(default)]
    display_name: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Outcome>)> {
    if !state.auth.allow_registration {
        return Err(ApiError::NotFound("registration is disabled".to_string()));
    }
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.add_user(&body.username, &body.display_name, &body.email, &body.password)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    outcome(result).map(|json| (StatusCode::CREATED, json))
}

#[derive(Serialize)]
struct SessionCreated {
    session_id: SessionId,
}

async fn create_session(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create(&caller.owner).await;
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn end_session(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    if state.sessions.remove(id, &caller.owner).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound)
    }
}

#[derive(Serialize)]
struct Transcript {
    messages: Vec<ChatMessage>,
    pending: Option<ExtractedExpense>,
    payer_options: Vec<String>,
}

async fn get_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Transcript>> {
    let session = lookup(&state, id, &caller).await?;
    let session = session.lock().await;
    let participants = state.assistant.participants(session.owner()).await?;
    Ok(Json(Transcript {
        messages: session.messages().to_vec(),
        pending: session.pending().cloned(),
        payer_options: participants.payer_options(),
    }))
}

#[derive(Deserialize)]
struct TextRequest {
    text: String,
}

async fn submit_text(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
    Json(body): Json<TextRequest>,
) -> ApiResult<Json<Reply>> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    Ok(Json(state.assistant.submit_text(&mut session, text).await?))
}

async fn submit_audio(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
    audio: Bytes,
) -> ApiResult<Json<Reply>> {
    if audio.is_empty() {
        return Err(ApiError::BadRequest("audio body must not be empty".to_string()));
    }
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    Ok(Json(state.assistant.submit_audio(&mut session, audio.to_vec()).await?))
}

async fn confirm_pending(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
    Json(details): Json<PaymentDetails>,
) -> ApiResult<Json<Outcome>> {
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    outcome(state.assistant.confirm_pending(&mut session, details).await?)
}

async fn discard_pending(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Outcome>> {
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    if state.assistant.discard_pending(&mut session) {
        Ok(Json(Outcome::ok("Pending expense discarded.")))
    } else {
        Err(ApiError::NotFound("no expense is awaiting confirmation".to_string()))
    }
}

async fn add_expense(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
    Json(expense): Json<NewExpense>,
) -> ApiResult<(StatusCode, Json<Outcome>)> {
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    outcome(state.assistant.add_expense(&mut session, expense).await?).map(|json| (StatusCode::CREATED, json))
}

async fn delete_expense(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((id, expense_id)): Path<(SessionId, ExpenseId)>,
) -> ApiResult<Json<Outcome>> {
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    if state.assistant.delete_expense(&mut session, expense_id).await? {
        Ok(Json(Outcome::ok(format!("Expense {} deleted.", expense_id))))
    } else {
        Err(ApiError::NotFound(format!("expense {} not found", expense_id)))
    }
}

#[derive(Serialize)]
struct Months {
    months: Vec<YearMonth>,
}

async fn list_months(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Months>> {
    let session = lookup(&state, id, &caller).await?;
    let session = session.lock().await;
    let months = state.assistant.distinct_months(&session).await?;
    Ok(Json(Months { months }))
}

async fn monthly_report(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((id, month)): Path<(SessionId, String)>,
) -> ApiResult<Json<MonthlyReport>> {
    let month = parse_month(&month)?;
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    Ok(Json(state.assistant.monthly_report(&mut session, month).await?))
}

#[derive(Deserialize)]
struct AdviceQuery {
    budget: Option<Decimal>,
}

#[derive(Serialize)]
struct Advice {
    month: YearMonth,
    advice: String,
}

async fn advice(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path((id, month)): Path<(SessionId, String)>,
    Query(query): Query<AdviceQuery>,
) -> ApiResult<Json<Advice>> {
    let month = parse_month(&month)?;
    let budget = query.budget.unwrap_or(DEFAULT_MONTHLY_BUDGET);
    if budget < Decimal::ZERO {
        return Err(ApiError::BadRequest("budget must not be negative".to_string()));
    }
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    let advice = state.assistant.advice(&mut session, month, budget).await?;
    Ok(Json(Advice { month, advice }))
}

async fn get_budgets(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<BTreeMap<Category, Decimal>>> {
    let session = lookup(&state, id, &caller).await?;
    let session = session.lock().await;
    Ok(Json(state.assistant.budgets(&session).await?))
}

async fn save_budgets(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
    Json(budgets): Json<BTreeMap<Category, Decimal>>,
) -> ApiResult<Json<Outcome>> {
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    if state.assistant.save_budgets(&mut session, budgets).await? {
        Ok(Json(Outcome::ok("Budgets saved.")))
    } else {
        Err(ApiError::Rejected(
            "Some budgets could not be saved. Limits must not be negative.".to_string(),
        ))
    }
}

async fn get_participants(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Participants>> {
    let session = lookup(&state, id, &caller).await?;
    let session = session.lock().await;
    Ok(Json(state.assistant.participants(session.owner()).await?))
}

async fn save_participants(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(id): Path<SessionId>,
    Json(participants): Json<Participants>,
) -> ApiResult<Json<Outcome>> {
    let session = lookup(&state, id, &caller).await?;
    let mut session = session.lock().await;
    if state.assistant.save_participants(&mut session, participants).await? {
        Ok(Json(Outcome::ok("Participants saved.")))
    } else {
        Err(ApiError::Rejected("Participant names must not be empty.".to_string()))
    }
}
