use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::{AgentConfig, AgentReply};
use crate::config::ServerConfig;
use crate::conversation::Turn;
use crate::error::{ChatError, Result};
use crate::hooks::{AgentEvent, TracingObserver};
use crate::session::{ChatSession, ModelFactory};
use crate::tool::ToolRegistry;

type SharedSession<F> = Arc<Mutex<ChatSession<F>>>;

struct SessionSlot<F: ModelFactory> {
    session: SharedSession<F>,
    last_seen: Instant,
}

/// Serves the chat page and the session API behind it.
pub struct ChatServer<F: ModelFactory + 'static> {
    sessions: Arc<RwLock<HashMap<Uuid, SessionSlot<F>>>>,
    factory: Arc<F>,
    tools: Arc<ToolRegistry>,
    agent_config: AgentConfig,
    temperature: Option<f32>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl<F: ModelFactory + 'static> Clone for ChatServer<F> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            factory: Arc::clone(&self.factory),
            tools: Arc::clone(&self.tools),
            agent_config: self.agent_config.clone(),
            temperature: self.temperature,
            idle_ttl: self.idle_ttl,
            max_sessions: self.max_sessions,
        }
    }
}

impl<F: ModelFactory + 'static> ChatServer<F> {
    pub fn new(factory: F, tools: ToolRegistry, agent_config: AgentConfig) -> Self {
        let limits = ServerConfig::default();
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(factory),
            tools: Arc::new(tools),
            agent_config,
            temperature: None,
            idle_ttl: Duration::from_secs(limits.session_idle_secs),
            max_sessions: limits.max_sessions,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Idle sessions are dropped after `idle_ttl`; at most `max_sessions` live at once.
    pub fn with_session_limits(mut self, idle_ttl: Duration, max_sessions: usize) -> Self {
        self.idle_ttl = idle_ttl;
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Looks a session up and counts the lookup as activity.
    async fn session(&self, id: Uuid) -> Result<SharedSession<F>> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(&id)
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;
        slot.last_seen = Instant::now();
        Ok(Arc::clone(&slot.session))
    }

    /// Like `session`, but a session that is answering a message is `SessionBusy`.
    async fn claim(&self, id: Uuid) -> Result<OwnedMutexGuard<ChatSession<F>>> {
        self.session(id)
            .await?
            .try_lock_owned()
            .map_err(|_| ChatError::SessionBusy(id.to_string()))
    }

    async fn touch(&self, id: Uuid) {
        if let Some(slot) = self.sessions.write().await.get_mut(&id) {
            slot.last_seen = Instant::now();
        }
    }

    /// Drops every idle session that is not answering a message, returning how many went.
    pub async fn sweep_idle(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let ttl = self.idle_ttl;
        sessions.retain(|_, slot| {
            slot.last_seen.elapsed() < ttl || slot.session.try_lock().is_err()
        });
        before - sessions.len()
    }

    async fn sweep_forever(self) {
        let period = (self.idle_ttl / 2).max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = self.sweep_idle().await;
            if removed > 0 {
                info!(removed, "idle sessions discarded");
            }
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/health", get(|| async { "ok" }))
            .route("/api/sessions", post(create_session::<F>))
            .route("/api/sessions/:id", delete(delete_session::<F>))
            .route("/api/sessions/:id/credential", put(set_credential::<F>))
            .route(
                "/api/sessions/:id/messages",
                get(list_messages::<F>).post(post_message::<F>),
            )
            .with_state(self)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "chat UI listening");
        self.serve_on(listener).await
    }

    /// Serves on `listener` and discards idle sessions in the background.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let sweeper = tokio::spawn(self.clone().sweep_forever());
        let served = axum::serve(listener, self.router()).await;
        sweeper.abort();
        served?;
        Ok(())
    }
}

struct ApiError(ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::EmptyInput => StatusCode::BAD_REQUEST,
            ChatError::SessionBusy(_) => StatusCode::CONFLICT,
            ChatError::TooManySessions(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Authentication(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(error_body(&self.0))).into_response()
    }
}

fn error_body(err: &ChatError) -> serde_json::Value {
    json!({ "kind": err.kind(), "message": err.to_string() })
}

async fn index() -> Html<&'static str> {
    Html(include_str!("ui.html"))
}

#[derive(Serialize)]
struct SessionCreated {
    id: Uuid,
}

async fn create_session<F: ModelFactory + 'static>(
    State(state): State<ChatServer<F>>,
) -> std::result::Result<(StatusCode, Json<SessionCreated>), ApiError> {
    let mut sessions = state.sessions.write().await;
    if sessions.len() >= state.max_sessions {
        return Err(ChatError::TooManySessions(state.max_sessions).into());
    }
    let id = Uuid::new_v4();
    let session = ChatSession::new(
        Arc::clone(&state.factory),
        Arc::clone(&state.tools),
        state.agent_config.clone(),
    )
    .with_temperature(state.temperature);
    sessions.insert(
        id,
        SessionSlot {
            session: Arc::new(Mutex::new(session)),
            last_seen: Instant::now(),
        },
    );
    info!(session = %id, live = sessions.len(), "session created");
    Ok((StatusCode::CREATED, Json(SessionCreated { id })))
}

async fn delete_session<F: ModelFactory + 'static>(
    State(state): State<ChatServer<F>>,
    Path(id): Path<Uuid>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;
    info!(session = %id, "session discarded");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CredentialRequest {
    api_key: String,
}

async fn set_credential<F: ModelFactory + 'static>(
    State(state): State<ChatServer<F>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CredentialRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    let mut session = state.claim(id).await?;
    session.set_credential(req.api_key);
    info!(session = %id, present = session.has_credential(), "credential updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages<F: ModelFactory + 'static>(
    State(state): State<ChatServer<F>>,
    Path(id): Path<Uuid>,
) -> std::result::Result<Json<Vec<Turn>>, ApiError> {
    let turns = state.claim(id).await?.conversation().all().to_vec();
    Ok(Json(turns))
}

#[derive(Deserialize)]
struct MessageRequest {
    content: String,
}

/// Runs one turn and streams `step` events, then one `answer` or `error` event.
async fn post_message<F: ModelFactory + 'static>(
    State(state): State<ChatServer<F>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    if req.content.trim().is_empty() {
        return Err(ChatError::EmptyInput.into());
    }
    let mut session = state.claim(id).await?;

    let (steps_tx, steps_rx) = mpsc::unbounded_channel::<AgentEvent>();
    let (done_tx, done_rx) = oneshot::channel::<Result<AgentReply>>();
    info!(session = %id, "turn started");

    tokio::spawn(async move {
        let observer = (TracingObserver, steps_tx);
        let outcome = session.submit(&req.content, &observer).await;
        drop(observer);
        state.touch(id).await;
        if done_tx.send(outcome).is_err() {
            debug!(session = %id, "client left before the turn finished");
        }
    });

    let steps = UnboundedReceiverStream::new(steps_rx)
        .map(|event| Ok(sse_json("step", &event)));
    let done = stream::once(async move {
        let event = match done_rx.await {
            Ok(Ok(reply)) => sse_json("answer", &json!({ "content": reply.text() })),
            Ok(Err(err)) => sse_json("error", &error_body(&err)),
            Err(_) => sse_json(
                "error",
                &error_body(&ChatError::Protocol("the turn was aborted".into())),
            ),
        };
        Ok(event)
    });

    Ok(Sse::new(steps.chain(done)).keep_alive(KeepAlive::default()))
}

fn sse_json<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
}
