use anyhow::Result;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use meetup::protocol::{ACTIVITY_CHANNEL, CableCommand, ChannelParams, SEND_MESSAGE_ACTION};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};

/// In-process stand-in for the meetup backend: JSON API under `/api/v1`
/// and an ActionCable-style WebSocket at `/api/v1/cable`.
pub struct TestBackend {
    pub addr: SocketAddr,
    shared: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<BackendState>>,
    events: broadcast::Sender<CableEvent>,
}

#[derive(Clone, Debug)]
enum CableEvent {
    Posted { room: i64, message: Value },
    Disconnect,
}

#[derive(Default)]
struct BackendState {
    users: Vec<UserRecord>,
    sessions: HashMap<String, i64>,
    activities: Vec<Value>,
    messages: HashMap<i64, Vec<Value>>,
    next_message_id: i64,
    generation_script: VecDeque<Value>,
    generation_requests: Vec<Value>,
    generation_polls: usize,
}

#[derive(Clone)]
struct UserRecord {
    id: i64,
    email: String,
    password: String,
    username: String,
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct CableQuery {
    token: Option<String>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn user_for_token(&self, token: &str) -> Option<UserRecord> {
        let state = self.lock();
        let id = *state.sessions.get(token)?;
        state.users.iter().find(|u| u.id == id).cloned()
    }

    fn authenticate(&self, headers: &HeaderMap) -> Option<UserRecord> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?;
        self.user_for_token(token)
    }

    /// Store and broadcast under one lock so every subscriber sees the same order.
    fn post_message(&self, room: i64, user: &UserRecord, body: &str) -> Value {
        let mut state = self.lock();
        state.next_message_id += 1;
        let message = json!({
            "id": state.next_message_id,
            "body": body,
            "created_at": format!("2025-05-01T12:00:{:02}Z", state.next_message_id % 60),
            "user": { "id": user.id, "username": user.username },
        });
        state
            .messages
            .entry(room)
            .or_default()
            .push(message.clone());
        let _ = self.events.send(CableEvent::Posted {
            room,
            message: message.clone(),
        });
        message
    }

    fn has_activity(&self, id: i64) -> bool {
        self.lock().activities.iter().any(|a| a["id"] == id)
    }
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn unauthorized() -> Response {
    error(
        StatusCode::UNAUTHORIZED,
        json!({ "error": "You need to sign in or sign up before continuing." }),
    )
}

impl TestBackend {
    /// Start the backend on a random local port.
    pub async fn spawn() -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (events, _) = broadcast::channel(256);
        let shared = Shared {
            state: Arc::new(Mutex::new(BackendState::default())),
            events,
        };

        let api = Router::new()
            .route("/users", post(register))
            .route("/users/{username}", get(user_profile))
            .route("/login", post(login))
            .route("/logout", delete(logout))
            .route("/current_user", get(current_user))
            .route("/activities", get(list_activities))
            .route("/activities/{id}", get(get_activity))
            .route("/activities/{id}/join", post(join_activity))
            .route("/activities/{id}/messages", get(room_messages))
            .route("/activities/generate_description", post(generate_description))
            .route("/activities/description_status/{id}", get(description_status))
            .route("/cable", get(cable));
        let app = Router::new()
            .nest("/api/v1", api)
            .with_state(shared.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::warn!(err = %e, "test backend stopped");
            }
        });

        Ok(Self {
            addr,
            shared,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// Add an activity owned by nobody in particular. Returns its id.
    pub fn add_activity(&self, title: &str, max_participants: u32) -> i64 {
        let mut state = self.shared.lock();
        let id = state.activities.len() as i64 + 1;
        state.activities.push(json!({
            "id": id,
            "title": title,
            "description": "",
            "location": "Community hall",
            "start_time": "2025-06-01T18:00:00Z",
            "max_participants": max_participants,
            "minimum_age": 18,
            "maximum_age": 30,
            "creator": { "id": 0, "username": "host" },
            "participants": [],
        }));
        id
    }

    /// Queue poll responses for the generation status endpoint. Once the
    /// script runs out, polls answer `completed`.
    pub fn script_generation(&self, responses: Vec<Value>) {
        self.shared.lock().generation_script.extend(responses);
    }

    /// Activity payloads received by the generation endpoint.
    pub fn generation_requests(&self) -> Vec<Value> {
        self.shared.lock().generation_requests.clone()
    }

    pub fn generation_polls(&self) -> usize {
        self.shared.lock().generation_polls
    }

    /// Messages stored for `room`, oldest first.
    pub fn room_messages(&self, room: i64) -> Vec<Value> {
        self.shared
            .lock()
            .messages
            .get(&room)
            .cloned()
            .unwrap_or_default()
    }

    /// Post a message as a fixed system user, as if sent from elsewhere.
    pub fn seed_message(&self, room: i64, body: &str) -> Value {
        let system = UserRecord {
            id: 0,
            email: "host@example.com".to_string(),
            password: String::new(),
            username: "host".to_string(),
        };
        self.shared.post_message(room, &system, body)
    }

    /// Send a disconnect frame on every open cable and close it.
    pub fn disconnect_cables(&self) {
        let _ = self.shared.events.send(CableEvent::Disconnect);
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        let _ = self.shared.events.send(CableEvent::Disconnect);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// JSON API
// ---------------------------------------------------------------------------

async fn register(State(shared): State<Shared>, Json(body): Json<Credentials>) -> Response {
    let mut state = shared.lock();
    if body.email.trim().is_empty() || body.password.is_empty() {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "errors": ["Email can't be blank", "Password can't be blank"] }),
        );
    }
    if state.users.iter().any(|u| u.email == body.email) {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "errors": ["Email has already been taken"] }),
        );
    }
    let id = state.users.len() as i64 + 1;
    let username = body
        .email
        .split('@')
        .next()
        .unwrap_or_default()
        .to_string();
    state.users.push(UserRecord {
        id,
        email: body.email.clone(),
        password: body.password,
        username,
    });
    (
        StatusCode::CREATED,
        Json(json!({ "id": id, "email": body.email })),
    )
        .into_response()
}

async fn login(State(shared): State<Shared>, Json(body): Json<Credentials>) -> Response {
    let mut state = shared.lock();
    let Some(user) = state
        .users
        .iter()
        .find(|u| u.email == body.email && u.password == body.password)
        .cloned()
    else {
        return error(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "Invalid Email or password." }),
        );
    };
    let token = format!("tok-{}-{}", user.id, state.sessions.len() + 1);
    state.sessions.insert(token.clone(), user.id);
    (
        [(header::AUTHORIZATION, format!("Bearer {token}"))],
        Json(json!({ "message": "Logged in successfully." })),
    )
        .into_response()
}

async fn logout(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    match token {
        Some(token) if shared.lock().sessions.remove(&token).is_some() => {
            Json(json!({ "message": "Logged out successfully." })).into_response()
        }
        _ => unauthorized(),
    }
}

async fn current_user(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let Some(user) = shared.authenticate(&headers) else {
        return unauthorized();
    };
    Json(json!({
        "id": user.id,
        "email": user.email,
        "username": user.username,
        "age": null,
        "personality": null,
    }))
    .into_response()
}

async fn user_profile(State(shared): State<Shared>, Path(username): Path<String>) -> Response {
    let state = shared.lock();
    let Some(user) = state.users.iter().find(|u| u.username == username) else {
        return error(StatusCode::NOT_FOUND, json!({ "error": "User not found" }));
    };
    let joined: Vec<Value> = state
        .activities
        .iter()
        .filter(|a| {
            a["participants"]
                .as_array()
                .is_some_and(|ps| ps.iter().any(|p| p["id"] == user.id))
        })
        .cloned()
        .collect();
    Json(json!({
        "username": user.username,
        "joined_activities": joined,
        "created_activities": [],
    }))
    .into_response()
}

async fn list_activities(State(shared): State<Shared>) -> Response {
    Json(Value::Array(shared.lock().activities.clone())).into_response()
}

async fn get_activity(State(shared): State<Shared>, Path(id): Path<i64>) -> Response {
    let state = shared.lock();
    match state.activities.iter().find(|a| a["id"] == id) {
        Some(activity) => Json(activity.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, json!({ "error": "Activity not found" })),
    }
}

async fn join_activity(
    State(shared): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let Some(user) = shared.authenticate(&headers) else {
        return unauthorized();
    };
    let mut state = shared.lock();
    let Some(activity) = state.activities.iter_mut().find(|a| a["id"] == id) else {
        return error(StatusCode::NOT_FOUND, json!({ "error": "Activity not found" }));
    };
    let max = activity["max_participants"].as_u64().unwrap_or(0) as usize;
    let Some(participants) = activity["participants"].as_array_mut() else {
        return error(StatusCode::INTERNAL_SERVER_ERROR, json!({}));
    };
    if participants.iter().any(|p| p["id"] == user.id) {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "errors": ["You have already joined this activity"] }),
        );
    }
    if participants.len() >= max {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "errors": ["Activity is full"] }),
        );
    }
    participants.push(json!({ "id": user.id, "username": user.username, "age": null }));
    Json(json!({ "message": "Joined activity" })).into_response()
}

async fn room_messages(
    State(shared): State<Shared>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if shared.authenticate(&headers).is_none() {
        return unauthorized();
    }
    match shared.lock().messages.get(&id) {
        Some(messages) if !messages.is_empty() => {
            Json(Value::Array(messages.clone())).into_response()
        }
        _ => error(StatusCode::NOT_FOUND, json!({ "error": "No messages" })),
    }
}

async fn generate_description(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if shared.authenticate(&headers).is_none() {
        return unauthorized();
    }
    let Some(activity) = body.get("activity").filter(|a| a.is_object()) else {
        return error(
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": "activity is required" }),
        );
    };
    let mut state = shared.lock();
    state.generation_requests.push(activity.clone());
    let request_id = format!("gen-{}", state.generation_requests.len());
    (StatusCode::ACCEPTED, Json(json!({ "request_id": request_id }))).into_response()
}

async fn description_status(State(shared): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = shared.lock();
    if !id.starts_with("gen-") {
        return error(StatusCode::NOT_FOUND, json!({ "error": "Unknown request" }));
    }
    state.generation_polls += 1;
    let reply = state.generation_script.pop_front().unwrap_or_else(|| {
        json!({ "status": "completed", "description": "A relaxed evening with new people." })
    });
    match reply.get("http_status").and_then(Value::as_u64) {
        Some(code) => error(
            StatusCode::from_u16(code as u16).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            json!({ "error": "scripted failure" }),
        ),
        None => Json(reply).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Cable
// ---------------------------------------------------------------------------

async fn cable(
    ws: WebSocketUpgrade,
    State(shared): State<Shared>,
    Query(query): Query<CableQuery>,
) -> Response {
    let Some(user) = query
        .token
        .as_deref()
        .and_then(|t| shared.user_for_token(t))
    else {
        return unauthorized();
    };
    ws.on_upgrade(move |socket| handle_cable(socket, shared, user))
}

async fn handle_cable(socket: WebSocket, shared: Shared, user: UserRecord) {
    let (mut sink, mut stream) = socket.split();
    let mut events = shared.events.subscribe();
    // identifier -> room
    let mut subscriptions: HashMap<String, i64> = HashMap::new();

    if send_json(&mut sink, json!({ "type": "welcome" })).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(command) = serde_json::from_str::<CableCommand>(text.as_str()) else {
                    tracing::debug!(frame = %text.as_str(), "ignoring malformed cable frame");
                    continue;
                };
                match command {
                    CableCommand::Subscribe { identifier } => {
                        let room = serde_json::from_str::<ChannelParams>(&identifier)
                            .ok()
                            .filter(|p| p.channel == ACTIVITY_CHANNEL && shared.has_activity(p.activity_id))
                            .map(|p| p.activity_id);
                        let reply = match room {
                            Some(room) => {
                                subscriptions.insert(identifier.clone(), room);
                                json!({ "type": "confirm_subscription", "identifier": identifier })
                            }
                            None => json!({ "type": "reject_subscription", "identifier": identifier }),
                        };
                        if send_json(&mut sink, reply).await.is_err() {
                            break;
                        }
                    }
                    CableCommand::Unsubscribe { identifier } => {
                        subscriptions.remove(&identifier);
                    }
                    CableCommand::Message { identifier, data } => {
                        let Some(&room) = subscriptions.get(&identifier) else {
                            continue;
                        };
                        let Ok(data) = serde_json::from_str::<Value>(&data) else {
                            continue;
                        };
                        let body = data["body"].as_str().unwrap_or_default().trim();
                        if data["action"] == SEND_MESSAGE_ACTION && !body.is_empty() {
                            shared.post_message(room, &user, body);
                        }
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(CableEvent::Posted { room, message }) => {
                        let mut failed = false;
                        for (identifier, _) in subscriptions.iter().filter(|(_, r)| **r == room) {
                            let frame = json!({ "identifier": identifier, "message": message });
                            if send_json(&mut sink, frame).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Ok(CableEvent::Disconnect) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = send_json(
                            &mut sink,
                            json!({ "type": "disconnect", "reason": "server_restart", "reconnect": false }),
                        )
                        .await;
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "cable subscriber lagged");
                    }
                }
            }
        }
    }
}

async fn send_json<S>(sink: &mut S, value: Value) -> Result<(), axum::Error>
where
    S: futures_util::Sink<WsMessage, Error = axum::Error> + Unpin,
{
    sink.send(WsMessage::Text(value.to_string().into())).await
}
