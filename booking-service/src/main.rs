mod catalog;
mod config;
mod llm;
mod notify;
mod storage;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use booking_flow::{
    ApprovalOutcome, ApprovalProtocol, Booking, BookingEngine, BookingRepository, ChatEngine,
    Decision, InMemoryBookingRepository, InMemorySessionStore, InMemoryUserDirectory, Mode,
    Notifier, SessionStore, UserDirectory, Vocabulary, approver_acknowledgment,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{HttpCompletionApi, ResilientCaller, build_preamble, load_knowledge};
use crate::notify::WebhookNotifier;
use crate::storage::PostgresStore;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn forbidden_error() -> ApiError {
    (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" })))
}

fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
}

/// Serializes utterances of the same user: within one session messages are
/// processed strictly in arrival order, while different users proceed
/// concurrently.
#[derive(Clone, Default)]
struct SessionGate {
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionGate {
    async fn acquire(&self, user_id: i64) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop this user's lock entry unless another turn still holds or
    /// awaits it, so the map does not grow with every user ever seen.
    fn release(&self, user_id: i64) {
        self.locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Clone)]
struct AppState {
    sessions: Arc<dyn SessionStore>,
    bookings: Arc<dyn BookingRepository>,
    users: Arc<dyn UserDirectory>,
    engine: Arc<BookingEngine>,
    chat: Arc<ChatEngine>,
    approval: Arc<ApprovalProtocol>,
    caller: Arc<ResilientCaller>,
    vocab: Arc<Vocabulary>,
    gate: SessionGate,
    approver_id: Option<i64>,
    knowledge_file: String,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    user_id: i64,
    display_name: Option<String>,
    handle: Option<String>,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    reply: String,
    mode: String,
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    approver_id: i64,
    action: String,
    booking_id: i64,
}

#[derive(Debug, Deserialize)]
struct AdminQuery {
    approver_id: i64,
}

#[derive(Debug, Deserialize)]
struct ReloadRequest {
    approver_id: i64,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "booking_service=debug,booking_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    if config.llm_api_key.is_none() {
        warn!("LLM_API_KEY not set; the assistant will answer with fallback text");
    }
    if config.approver_id.is_none() {
        warn!("APPROVER_ID not set; booking decisions will be ignored");
    }

    let state = build_state(&config).await;

    let app = build_router(state);
    let address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .unwrap_or_else(|e| {
            error!("failed to bind {address}: {e}");
            std::process::exit(1);
        });

    info!("Server running on http://{address}");
    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
    }
}

async fn build_state(config: &Config) -> AppState {
    // Durable storage: Postgres when configured, in-memory otherwise.
    let (bookings, users): (Arc<dyn BookingRepository>, Arc<dyn UserDirectory>) =
        match &config.database_url {
            Some(url) => match PostgresStore::connect(url).await {
                Ok(store) => {
                    info!("Using Postgres booking storage");
                    let store = Arc::new(store);
                    (store.clone(), store)
                }
                Err(e) => {
                    error!("Failed to connect to Postgres: {e}. Falling back to in-memory storage.");
                    (
                        Arc::new(InMemoryBookingRepository::new()),
                        Arc::new(InMemoryUserDirectory::new()),
                    )
                }
            },
            None => {
                info!("Using in-memory storage (set DATABASE_URL to use Postgres)");
                (
                    Arc::new(InMemoryBookingRepository::new()),
                    Arc::new(InMemoryUserDirectory::new()),
                )
            }
        };

    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let vocab = Arc::new(Vocabulary::default());
    let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(
        config.notify_url.clone(),
        config.approver_id,
    ));

    let api = Arc::new(HttpCompletionApi::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
    ));
    let knowledge = load_knowledge(&config.knowledge_file);
    let caller = Arc::new(ResilientCaller::new(api, build_preamble(&knowledge)));

    let engine = Arc::new(BookingEngine::new(
        sessions.clone(),
        bookings.clone(),
        notifier.clone(),
        vocab.clone(),
    ));
    let chat = Arc::new(ChatEngine::new(
        sessions.clone(),
        caller.clone(),
        vocab.clone(),
        catalog::contact_fallback(),
    ));
    let approval = Arc::new(ApprovalProtocol::new(
        bookings.clone(),
        notifier.clone(),
        config.approver_id,
        format!("Call us on {}", catalog::CENTER.phone),
    ));

    AppState {
        sessions,
        bookings,
        users,
        engine,
        chat,
        approval,
        caller,
        vocab,
        gate: SessionGate::default(),
        approver_id: config.approver_id,
        knowledge_file: config.knowledge_file.clone(),
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/message", post(handle_message))
        .route("/approval", post(handle_approval))
        .route("/admin/bookings", get(admin_bookings))
        .route("/admin/stats", get(admin_stats))
        .route("/admin/reload", post(admin_reload))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn handle_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<MessageResponse> {
    if request.content.trim().is_empty() {
        return Err(bad_request_error("content is required"));
    }
    let user_id = request.user_id;

    // Hold the per-user gate for the whole turn: utterances of one session
    // are processed strictly in arrival order.
    let guard = state.gate.acquire(user_id).await;

    let display_name = request.display_name.as_deref().unwrap_or("");
    if let Err(e) = state
        .users
        .record_interaction(user_id, display_name, request.handle.as_deref())
        .await
    {
        // The conversation is more important than the visit counter.
        error!(user_id, error = %e, "failed to record interaction");
    }

    let mode = state
        .sessions
        .get(user_id)
        .await
        .map_err(|e| {
            error!(user_id, error = %e, "failed to load session");
            internal_error("failed to load session")
        })?
        .map(|session| session.mode)
        .unwrap_or(Mode::Idle);

    let reply = match mode {
        Mode::Booking(_) => state.engine.handle(user_id, &request.content).await,
        Mode::Chat => state.chat.handle(user_id, &request.content).await,
        Mode::Idle => route_idle_message(&state, user_id, &request.content).await,
    }
    .map_err(|e| {
        error!(user_id, error = %e, "failed to process message");
        internal_error("failed to process message")
    })?;

    let mode_after = state
        .sessions
        .get(user_id)
        .await
        .ok()
        .flatten()
        .map(|session| session.mode)
        .unwrap_or(Mode::Idle);

    if matches!(mode_after, Mode::Idle) {
        drop(guard);
        state.gate.release(user_id);
    }

    Ok(Json(MessageResponse {
        reply,
        mode: mode_label(mode_after).to_string(),
    }))
}

/// Route an utterance arriving outside any conversation.
async fn route_idle_message(
    state: &AppState,
    user_id: i64,
    content: &str,
) -> booking_flow::Result<String> {
    use booking_flow::Intent;

    match state.vocab.route(content) {
        Intent::StartBooking(_) => state.engine.start(user_id, content).await,
        Intent::StartChat => state.chat.start(user_id).await,
        Intent::ShowCourses => Ok(catalog::courses_text()),
        Intent::ShowStudio => Ok(catalog::packages_text()),
        Intent::Contact => Ok(catalog::contact_text()),
        Intent::Other => {
            // One-shot question without a chat session; no history.
            Ok(state
                .caller
                .ask(content, &[])
                .await
                .unwrap_or_else(catalog::contact_fallback))
        }
    }
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Idle => "idle",
        Mode::Booking(_) => "booking",
        Mode::Chat => "chat",
    }
}

async fn handle_approval(
    State(state): State<AppState>,
    Json(request): Json<ApprovalRequest>,
) -> ApiResult<Value> {
    let decision = Decision::parse(&request.action)
        .ok_or_else(|| bad_request_error("action must be \"approve\" or \"reject\""))?;

    let outcome = state
        .approval
        .apply(request.approver_id, decision, request.booking_id)
        .await
        .map_err(|e| {
            error!(booking_id = request.booking_id, error = %e, "failed to apply decision");
            internal_error("failed to apply decision")
        })?;

    match &outcome {
        // Indistinguishable from success on purpose: nothing about the
        // approval mechanism leaks to other originators.
        ApprovalOutcome::Ignored => Ok(Json(json!({ "status": "ok" }))),
        ApprovalOutcome::NotFound(id) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "booking not found",
                "acknowledgment": approver_acknowledgment(&outcome),
                "booking_id": id,
            })),
        )),
        ApprovalOutcome::Applied {
            booking,
            notification_delivered,
        } => Ok(Json(json!({
            "status": "ok",
            "acknowledgment": approver_acknowledgment(&outcome),
            "booking_id": booking.id,
            "booking_status": booking.status.as_str(),
            "notification_delivered": notification_delivered,
        }))),
    }
}

fn require_approver(state: &AppState, claimed_id: i64) -> Result<(), ApiError> {
    match state.approver_id {
        Some(approver_id) if approver_id == claimed_id => Ok(()),
        _ => Err(forbidden_error()),
    }
}

#[derive(Debug, Serialize)]
struct BookingSummary {
    id: i64,
    owner_id: i64,
    name: String,
    phone: String,
    category: String,
    details: String,
    preferred_time: String,
    status: String,
    created_at: String,
}

impl From<Booking> for BookingSummary {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id,
            owner_id: booking.owner_id,
            name: booking.name,
            phone: booking.phone,
            category: booking.category.as_str().to_string(),
            details: booking.details,
            preferred_time: booking.preferred_time,
            status: booking.status.as_str().to_string(),
            created_at: booking.created_at.to_rfc3339(),
        }
    }
}

async fn admin_bookings(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> ApiResult<Vec<BookingSummary>> {
    require_approver(&state, query.approver_id)?;

    let bookings = state.bookings.list_all().await.map_err(|e| {
        error!(error = %e, "failed to list bookings");
        internal_error("failed to list bookings")
    })?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

async fn admin_stats(
    State(state): State<AppState>,
    Query(query): Query<AdminQuery>,
) -> ApiResult<Value> {
    require_approver(&state, query.approver_id)?;

    let total = state.bookings.count().await.map_err(|e| {
        error!(error = %e, "failed to count bookings");
        internal_error("failed to count bookings")
    })?;
    let pending = state
        .bookings
        .list_pending()
        .await
        .map_err(|e| {
            error!(error = %e, "failed to list pending bookings");
            internal_error("failed to list pending bookings")
        })?
        .len();
    let users = state.users.count().await.map_err(|e| {
        error!(error = %e, "failed to count users");
        internal_error("failed to count users")
    })?;

    Ok(Json(json!({
        "bookings": total,
        "pending": pending,
        "users": users,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

async fn admin_reload(
    State(state): State<AppState>,
    Json(request): Json<ReloadRequest>,
) -> ApiResult<Value> {
    require_approver(&state, request.approver_id)?;

    let knowledge = load_knowledge(&state.knowledge_file);
    state.caller.set_preamble(build_preamble(&knowledge)).await;
    info!("knowledge base reloaded");
    Ok(Json(json!({ "reloaded": true })))
}
