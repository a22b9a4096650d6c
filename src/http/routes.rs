//! HTTP route definitions

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::discovery::{Candidate, DiscoveryFilter};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::store::chats::{other_participant, Chat, ChatError, Message};
use crate::store::games::{Game, GameError, NewGame, Rsvp, RsvpCounts};
use crate::store::media::MediaError;
use crate::store::players::{PlayerError, PlayerProfile, ProfileUpdate};
use crate::store::requests::{ChatRequest, RequestDecision, RequestError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/media/*key", get(media_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/players", get(discover_handler))
        .route("/players/:uid", get(player_handler))
        .route("/profile", put(update_profile_handler))
        .route("/profile/location", put(update_location_handler))
        .route("/profile/image", post(upload_image_handler))
        .route("/requests", post(send_request_handler).get(incoming_requests_handler))
        .route("/requests/:id/respond", post(respond_request_handler))
        .route("/chats", get(chats_handler))
        .route("/chats/:room_id/messages", get(history_handler).post(send_message_handler))
        .route("/games", get(games_handler).post(create_game_handler))
        .route("/games/:id/rsvp", post(rsvp_handler))
        .route("/games/:id", delete(delete_game_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    players: usize,
    requests: usize,
    chats: usize,
    games: usize,
    online: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        players: state.players.len(),
        requests: state.requests.len(),
        chats: state.chats.chat_count(),
        games: state.games.len(),
        online: state.presence.online_count(),
    })
}

// ============================================================================
// Discovery endpoints
// ============================================================================

#[derive(Serialize)]
struct DiscoverResponse {
    players: Vec<Candidate>,
}

async fn discover_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(filter): Query<DiscoveryFilter>,
) -> Json<DiscoverResponse> {
    // Never fails: degraded reads surface as an empty feed.
    Json(DiscoverResponse {
        players: state.discovery.discover(auth.user_id, &filter),
    })
}

async fn player_handler(
    State(state): State<AppState>,
    Path(uid): Path<Uuid>,
) -> Result<Json<PlayerProfile>, AppError> {
    state
        .players
        .get(uid)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Player not found".to_string()))
}

// ============================================================================
// Profile endpoints
// ============================================================================

async fn update_profile_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<PlayerProfile>, AppError> {
    let profile = state.players.update_profile(auth.user_id, update)?;
    state.notifier.info(auth.user_id, "Profile updated!");
    Ok(Json(profile))
}

#[derive(Deserialize)]
struct LocationRequest {
    latitude: f64,
    longitude: f64,
}

async fn update_location_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<LocationRequest>,
) -> Result<Json<PlayerProfile>, AppError> {
    let profile = state
        .players
        .update_location(auth.user_id, req.latitude, req.longitude)?;
    state.notifier.info(auth.user_id, "Location saved!");
    Ok(Json(profile))
}

#[derive(Deserialize)]
struct UploadQuery {
    name: String,
}

#[derive(Serialize)]
struct UploadResponse {
    url: String,
}

async fn upload_image_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let key = state
        .media
        .store_profile_image(auth.user_id, &query.name, content_type, body)?;
    let url = state.media_url(&key);
    state.players.set_image_url(auth.user_id, url.clone())?;

    Ok(Json(UploadResponse { url }))
}

async fn media_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let object = state
        .media
        .get(&key)
        .ok_or_else(|| AppError::NotFound("No such object".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, object.content_type)],
        object.data,
    )
        .into_response())
}

// ============================================================================
// Chat request endpoints
// ============================================================================

#[derive(Deserialize)]
struct SendRequestBody {
    to_uid: Uuid,
    #[serde(default)]
    message: Option<String>,
}

async fn send_request_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(body): Json<SendRequestBody>,
) -> Result<(StatusCode, Json<ChatRequest>), AppError> {
    let target = state
        .players
        .get(body.to_uid)
        .ok_or_else(|| AppError::NotFound("Player not found".to_string()))?;

    let request = state.requests.send(
        auth.user_id,
        &auth.display_name(),
        target.uid,
        Some(target.name),
        target.sport,
        body.message,
    )?;

    state.notifier.info(auth.user_id, "Chat request sent!");
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Serialize)]
struct IncomingRequestsResponse {
    requests: Vec<ChatRequest>,
}

async fn incoming_requests_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<IncomingRequestsResponse> {
    Json(IncomingRequestsResponse {
        requests: state.requests.incoming_pending(auth.user_id),
    })
}

#[derive(Deserialize)]
struct RespondBody {
    decision: RequestDecision,
}

async fn respond_request_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RespondBody>,
) -> Result<Json<ChatRequest>, AppError> {
    let request = state.requests.respond(id, auth.user_id, body.decision)?;

    match body.decision {
        RequestDecision::Accepted => state.notifier.info(auth.user_id, "Request accepted!"),
        RequestDecision::Rejected => state.notifier.info(auth.user_id, "Request rejected."),
    }
    Ok(Json(request))
}

// ============================================================================
// Chat endpoints
// ============================================================================

#[derive(Serialize)]
struct ChatsResponse {
    chats: Vec<Chat>,
}

async fn chats_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<ChatsResponse> {
    Json(ChatsResponse {
        chats: state.chats.chats_for(auth.user_id),
    })
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<Message>,
}

async fn history_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    // Read-scoping: only a participant may fetch a room's history.
    if other_participant(&room_id, auth.user_id).is_none() {
        return Err(AppError::Forbidden("Not a participant of this chat".to_string()));
    }
    Ok(Json(HistoryResponse {
        messages: state.chats.history(&room_id),
    }))
}

#[derive(Deserialize)]
struct SendMessageBody {
    text: String,
}

async fn send_message_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let message = state.chats.send_message(&room_id, auth.user_id, &body.text)?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ============================================================================
// Pickup game endpoints
// ============================================================================

#[derive(Serialize)]
struct GameView {
    #[serde(flatten)]
    game: Game,
    counts: RsvpCounts,
}

impl From<Game> for GameView {
    fn from(game: Game) -> Self {
        Self {
            counts: game.counts(),
            game,
        }
    }
}

#[derive(Serialize)]
struct GamesResponse {
    games: Vec<GameView>,
}

async fn games_handler(State(state): State<AppState>) -> Json<GamesResponse> {
    Json(GamesResponse {
        games: state.games.list().into_iter().map(GameView::from).collect(),
    })
}

async fn create_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(new): Json<NewGame>,
) -> Result<(StatusCode, Json<GameView>), AppError> {
    let game = state.games.create(auth.user_id, &auth.display_name(), new)?;
    state
        .notifier
        .info(auth.user_id, "Game created! Players can now RSVP");
    Ok((StatusCode::CREATED, Json(game.into())))
}

#[derive(Deserialize)]
struct RsvpBody {
    rsvp: Rsvp,
}

async fn rsvp_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RsvpBody>,
) -> Result<Json<GameView>, AppError> {
    let game = state.games.rsvp(id, auth.user_id, body.rsvp)?;
    Ok(Json(game.into()))
}

async fn delete_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.games.delete(id, auth.user_id)?;
    state.notifier.info(auth.user_id, "Game deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::SelfRequest => AppError::BadRequest(err.to_string()),
            RequestError::DuplicatePending | RequestError::AlreadyResolved => {
                AppError::Conflict(err.to_string())
            }
            RequestError::NotFound => AppError::NotFound(err.to_string()),
            RequestError::NotRecipient => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyText | ChatError::BadRoomId => AppError::BadRequest(err.to_string()),
            ChatError::NotParticipant => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<PlayerError> for AppError {
    fn from(err: PlayerError) -> Self {
        match err {
            PlayerError::NotFound => AppError::NotFound(err.to_string()),
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<GameError> for AppError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::NotFound => AppError::NotFound(err.to_string()),
            GameError::MissingFields => AppError::BadRequest(err.to_string()),
            GameError::NotHost => AppError::Forbidden(err.to_string()),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
