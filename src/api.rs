//! HTTP surface: REST endpoints plus the realtime websocket.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use futures::{SinkExt, StreamExt};
use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::fleet::{self, FleetManager};
use crate::hub::{CLIENT_QUEUE_CAPACITY, Hub, Message, MessageType, SubscriptionPayload};
use crate::runtime::compose::{self, DockerCompose};

mod models;

use models::{
    ErrorBody, HiddenRequest, LogsParams, PatternRequest, ProtectRequest, ProtectedProjectRequest,
    PruneRequest, PruneResponse, RenameRequest, ScanPaths, StatsParams, StopParams,
};

pub type Manager = FleetManager<DockerCompose>;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub hub: Hub,
}

fn error_response(err: fleet::Error) -> Response {
    let status = match &err {
        fleet::Error::NotFound(_) => StatusCode::NOT_FOUND,
        fleet::Error::Protected { .. } => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let error = match &err {
        fleet::Error::Compose(compose::Error::CommandFailed { stdout, stderr }) => {
            format!("compose command failed: {stderr} {stdout}")
                .trim()
                .to_string()
        }
        other => other.to_string(),
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("{error}");
    }
    (status, Json(ErrorBody { error })).into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<AppState>) -> Response {
    match state.manager.ping().await {
        Ok(()) => (StatusCode::OK, "ready").into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

async fn list_projects(State(state): State<AppState>) -> Response {
    if let Err(err) = state.manager.refresh().await {
        return error_response(err);
    }
    Json(state.manager.list_projects()).into_response()
}

async fn get_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.get_project(&id) {
        Ok(project) => Json(project).into_response(),
        Err(err) => error_response(err),
    }
}

/// Pushes the project's new state to realtime clients after a lifecycle
/// operation.
async fn broadcast_status(state: &AppState, id: &str) {
    if let Ok(project) = state.manager.get_project(id) {
        if let Ok(payload) = serde_json::to_value(&project) {
            state
                .hub
                .broadcast(Message::scoped(MessageType::ProjectStatus, id, Some(payload)))
                .await;
        }
    }
}

async fn start_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.start_project(&id).await {
        Ok(()) => {
            broadcast_status(&state, &id).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn stop_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StopParams>,
) -> Response {
    match state.manager.stop_project(&id, params.force).await {
        Ok(()) => {
            broadcast_status(&state, &id).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn restart_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.restart_project(&id).await {
        Ok(()) => {
            broadcast_status(&state, &id).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn pull_project(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.pull_project(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn protect_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProtectRequest>,
) -> Response {
    match state.manager.set_project_protection(&id, body.protected) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn rename_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Response {
    match state
        .manager
        .set_project_display_name(&id, body.display_name.as_deref())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn hide_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HiddenRequest>,
) -> Response {
    match state.manager.set_project_hidden(&id, body.hidden).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_preferences(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.delete_project_preference(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn project_stats(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.get_project_stats(&id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => error_response(err),
    }
}

async fn container_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LogsParams>,
) -> Response {
    if !params.follow {
        return match state
            .manager
            .get_container_logs(&id, params.tail.as_deref())
            .await
        {
            Ok(bundle) => Json(bundle).into_response(),
            Err(err) => error_response(err),
        };
    }

    let channels = match state
        .manager
        .stream_container_logs(&id, params.tail.as_deref())
        .await
    {
        Ok(channels) => channels,
        Err(err) => return error_response(err),
    };

    let stream = futures::stream::unfold(
        (channels.stdout, channels.stderr),
        |(mut out, mut err)| async move {
            tokio::select! {
                Some(line) = out.recv() => Some((Ok::<_, Infallible>(Bytes::from(line)), (out, err))),
                Some(line) = err.recv() => Some((Ok(Bytes::from(line)), (out, err))),
                else => None,
            }
        },
    );

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn container_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StatsParams>,
) -> Response {
    if !params.stream {
        return match state.manager.get_container_stats(&id).await {
            Ok(stats) => Json(stats).into_response(),
            Err(err) => error_response(err),
        };
    }

    let rx = state.manager.stream_container_stats(&id);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        let value = match item {
            Ok(stats) => serde_json::to_value(&stats).unwrap_or_default(),
            Err(err) => serde_json::json!({"error": err.to_string()}),
        };
        let mut line = value.to_string().into_bytes();
        line.push(b'\n');
        Some((Ok::<_, Infallible>(Bytes::from(line)), rx))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn system_info(State(state): State<AppState>) -> Response {
    match state.manager.system_info().await {
        Ok(info) => Json(info).into_response(),
        Err(err) => error_response(err),
    }
}

async fn system_storage(State(state): State<AppState>) -> Response {
    match state.manager.storage_info().await {
        Ok(info) => Json(info).into_response(),
        Err(err) => error_response(err),
    }
}

async fn system_prune(
    State(state): State<AppState>,
    Json(body): Json<PruneRequest>,
) -> Response {
    match state
        .manager
        .prune(body.images, body.volumes, body.build_cache)
        .await
    {
        Ok(reclaimed) => Json(PruneResponse { reclaimed }).into_response(),
        Err(err) => error_response(err),
    }
}

async fn system_port(State(state): State<AppState>, Path(port): Path<u16>) -> Response {
    Json(state.manager.check_port(port).await).into_response()
}

async fn get_scan_paths(State(state): State<AppState>) -> Response {
    Json(ScanPaths {
        paths: state.manager.scan_paths(),
    })
    .into_response()
}

async fn set_scan_paths(
    State(state): State<AppState>,
    Json(body): Json<ScanPaths>,
) -> Response {
    state.manager.set_scan_paths(body.paths);
    StatusCode::NO_CONTENT.into_response()
}

async fn add_protected_pattern(
    State(state): State<AppState>,
    Json(body): Json<PatternRequest>,
) -> Response {
    state.manager.add_protected_pattern(&body.pattern);
    StatusCode::NO_CONTENT.into_response()
}

async fn remove_protected_pattern(
    State(state): State<AppState>,
    Json(body): Json<PatternRequest>,
) -> Response {
    state.manager.remove_protected_pattern(&body.pattern);
    StatusCode::NO_CONTENT.into_response()
}

async fn add_protected_project(
    State(state): State<AppState>,
    Json(body): Json<ProtectedProjectRequest>,
) -> Response {
    state.manager.add_protected_project(&body.path);
    StatusCode::NO_CONTENT.into_response()
}

async fn remove_protected_project(
    State(state): State<AppState>,
    Json(body): Json<ProtectedProjectRequest>,
) -> Response {
    state.manager.remove_protected_project(&body.path);
    StatusCode::NO_CONTENT.into_response()
}

async fn ws_stats(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // The current project list is pushed once on connect, before the client
    // enters the broadcast rotation.
    if let Ok(payload) = serde_json::to_value(state.manager.list_projects()) {
        let hello = Message::new(MessageType::ProjectList, Some(payload));
        if let Ok(text) = serde_json::to_string(&hello) {
            if sink.send(ws::Message::Text(text.into())).await.is_err() {
                return;
            }
        }
    }

    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_QUEUE_CAPACITY);
    let client_id = state.hub.register(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if sink.send(ws::Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => log::warn!("encoding outbound message: {err}"),
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            ws::Message::Text(text) => match serde_json::from_str::<Message>(&text) {
                Ok(envelope) => handle_client_envelope(&state.hub, client_id, envelope).await,
                Err(err) => log::debug!("ignoring malformed client envelope: {err}"),
            },
            ws::Message::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(client_id).await;
    writer.abort();
}

async fn handle_client_envelope(hub: &Hub, client_id: u64, envelope: Message) {
    let ids = envelope
        .payload
        .and_then(|p| serde_json::from_value::<SubscriptionPayload>(p).ok())
        .map(SubscriptionPayload::into_ids)
        .unwrap_or_default();

    match envelope.kind {
        MessageType::Subscribe => hub.subscribe(client_id, ids).await,
        MessageType::Unsubscribe => hub.unsubscribe(client_id, ids).await,
        other => log::debug!("ignoring client message of type {other:?}"),
    }
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new(state: AppState) -> Self {
        let router = axum::Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/api/projects", get(list_projects))
            .route("/api/projects/{id}", get(get_project))
            .route("/api/projects/{id}/start", post(start_project))
            .route("/api/projects/{id}/stop", post(stop_project))
            .route("/api/projects/{id}/restart", post(restart_project))
            .route("/api/projects/{id}/pull", post(pull_project))
            .route("/api/projects/{id}/protect", post(protect_project))
            .route("/api/projects/{id}/name", put(rename_project))
            .route("/api/projects/{id}/hidden", put(hide_project))
            .route("/api/projects/{id}/stats", get(project_stats))
            .route(
                "/api/projects/{id}/preferences",
                axum::routing::delete(delete_preferences),
            )
            .route("/api/containers/{id}/logs", get(container_logs))
            .route("/api/containers/{id}/stats", get(container_stats))
            .route("/api/system/info", get(system_info))
            .route("/api/system/storage", get(system_storage))
            .route("/api/system/prune", post(system_prune))
            .route("/api/system/port/{port}", get(system_port))
            .route(
                "/api/system/scan-paths",
                get(get_scan_paths).put(set_scan_paths),
            )
            .route(
                "/api/protection/patterns",
                post(add_protected_pattern).delete(remove_protected_pattern),
            )
            .route(
                "/api/protection/projects",
                post(add_protected_project).delete(remove_protected_project),
            )
            .route("/ws/stats", get(ws_stats))
            .layer(CorsLayer::permissive())
            .with_state(state);
        Self { router }
    }

    pub async fn listen(
        self,
        addr: impl ToSocketAddrs,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
