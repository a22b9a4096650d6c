//! WebSocket upgrade handler and session loop
//!
//! A connection is the unit of presence: the upgrade marks the user online and
//! arms the offline rollback, so the record converges on "offline" whether the
//! socket closes cleanly or the peer vanishes. The session forwards this
//! user's live feeds (incoming requests, request updates, presence changes,
//! notices) and any chat rooms the client subscribes to.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{verify_jwt, AuthenticatedUser};
use crate::store::chats::other_participant;
use crate::store::requests::RequestEvent;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify the token before upgrading
    match verify_jwt(&query.token, &state.config.auth_jwt_secret) {
        Ok(claims) => {
            info!(user_id = %claims.sub, "WebSocket upgrade for authenticated user");
            let user = AuthenticatedUser {
                user_id: claims.sub,
                claims,
            };
            ws.on_upgrade(move |socket| handle_socket(socket, user, state))
        }
        Err(e) => {
            error!(error = %e, "WebSocket auth failed");
            Response::builder()
                .status(401)
                .body("Unauthorized".into())
                .unwrap_or_default()
        }
    }
}

/// Get or create the profile backing a session from its verified claims, so
/// a user whose first contact is the socket still gets their token identity.
fn ensure_session_profile(state: &AppState, user: &AuthenticatedUser) {
    state.players.ensure_profile(
        user.user_id,
        &user.display_name(),
        user.claims.email.as_deref(),
    );
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthenticatedUser, state: AppState) {
    let user_id = user.user_id;
    info!(user_id = %user_id, "New WebSocket connection");

    ensure_session_profile(&state, &user);

    // Coming online; the guard's drop is the disconnect rollback.
    let presence_guard = state.presence.connect(user_id);

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    // All feeds funnel through one outbound channel.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMsg>(64);

    let mut feed_tasks = vec![
        spawn_request_feed(&state, user_id, out_tx.clone()),
        spawn_presence_feed(&state, out_tx.clone()),
        spawn_notice_feed(&state, user_id, out_tx.clone()),
    ];

    // Writer task: outbound channel -> WebSocket
    let writer_user_id = user_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %writer_user_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: client messages drive chat subscriptions
    let rate_limiter = ConnectionRateLimiter::new();
    let mut chat_tasks: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut graceful = false;

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(user_id = %user_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        handle_client_msg(&state, user_id, msg, &out_tx, &mut chat_tasks).await;
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        let _ = out_tx
                            .send(ServerMsg::Error {
                                code: "bad_message".to_string(),
                                message: "Could not parse message".to_string(),
                            })
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(user_id = %user_id, "Received ping/pong frame");
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                graceful = true;
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Teardown: every subscription is cancelled exactly once.
    for (_, task) in chat_tasks.drain() {
        task.abort();
    }
    for task in feed_tasks.drain(..) {
        task.abort();
    }
    writer_handle.abort();

    if graceful {
        presence_guard.disconnect();
    } else {
        // Dropping the guard applies the registered offline rollback.
        drop(presence_guard);
    }

    info!(user_id = %user_id, "WebSocket connection closed");
}

async fn handle_client_msg(
    state: &AppState,
    user_id: Uuid,
    msg: ClientMsg,
    out_tx: &mpsc::Sender<ServerMsg>,
    chat_tasks: &mut HashMap<String, JoinHandle<()>>,
) {
    match msg {
        ClientMsg::SubscribeChat { room_id } => {
            if other_participant(&room_id, user_id).is_none() {
                let _ = out_tx
                    .send(ServerMsg::Error {
                        code: "forbidden".to_string(),
                        message: "Not a participant of this chat".to_string(),
                    })
                    .await;
                return;
            }
            if chat_tasks.contains_key(&room_id) {
                return;
            }

            let mut sub = state.chats.subscribe(&room_id);
            let tx = out_tx.clone();
            let task_room = room_id.clone();
            let task = tokio::spawn(async move {
                while let Some(message) = sub.next().await {
                    let msg = ServerMsg::MessageAppended {
                        room_id: task_room.clone(),
                        message,
                    };
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                sub.unsubscribe();
            });
            chat_tasks.insert(room_id, task);
        }

        ClientMsg::UnsubscribeChat { room_id } => {
            if let Some(task) = chat_tasks.remove(&room_id) {
                task.abort();
            }
        }

        ClientMsg::Ping { t } => {
            let _ = out_tx.send(ServerMsg::Pong { t }).await;
        }
    }
}

/// Forward request events relevant to this user
fn spawn_request_feed(
    state: &AppState,
    user_id: Uuid,
    tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    let mut sub = state.requests.subscribe();
    tokio::spawn(async move {
        while let Some(event) = sub.next().await {
            let msg = match event {
                RequestEvent::Created(request) if request.to_uid == user_id => {
                    Some(ServerMsg::RequestReceived { request })
                }
                RequestEvent::Updated(request)
                    if request.to_uid == user_id || request.from_uid == user_id =>
                {
                    Some(ServerMsg::RequestUpdated { request })
                }
                _ => None,
            };
            if let Some(msg) = msg {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
        sub.unsubscribe();
    })
}

/// Forward all presence changes (clients render online badges for any player)
fn spawn_presence_feed(state: &AppState, tx: mpsc::Sender<ServerMsg>) -> JoinHandle<()> {
    let mut sub = state.presence.subscribe();
    tokio::spawn(async move {
        while let Some(update) = sub.next().await {
            let msg = ServerMsg::PresenceChanged {
                user_id: update.uid,
                is_online: update.record.is_online,
                last_seen_at: update.record.last_seen_at,
            };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        sub.unsubscribe();
    })
}

/// Forward notices addressed to this user
fn spawn_notice_feed(
    state: &AppState,
    user_id: Uuid,
    tx: mpsc::Sender<ServerMsg>,
) -> JoinHandle<()> {
    let mut sub = state.notifier.subscribe();
    tokio::spawn(async move {
        while let Some(notice) = sub.next().await {
            if notice.user_id != user_id {
                continue;
            }
            let msg = ServerMsg::Notice {
                kind: notice.kind,
                text: notice.text,
            };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        sub.unsubscribe();
    })
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::http::middleware::JwtClaims;

    fn user(name: Option<&str>, email: Option<&str>) -> AuthenticatedUser {
        let uid = Uuid::new_v4();
        AuthenticatedUser {
            user_id: uid,
            claims: JwtClaims {
                sub: uid,
                exp: u64::MAX,
                iat: 0,
                name: name.map(str::to_string),
                email: email.map(str::to_string),
            },
        }
    }

    #[tokio::test]
    async fn session_profile_carries_token_identity() {
        let state = AppState::new(Config::for_tests());
        let asha = user(Some("Asha"), Some("asha@example.com"));

        ensure_session_profile(&state, &asha);

        let profile = state.players.get(asha.user_id).unwrap();
        assert_eq!(profile.name, "Asha");
        assert_eq!(profile.email.as_deref(), Some("asha@example.com"));

        // Nameless tokens still fall back through the email chain.
        let ben = user(None, Some("ben@example.com"));
        ensure_session_profile(&state, &ben);
        assert_eq!(state.players.get(ben.user_id).unwrap().name, "ben@example.com");
    }
}
