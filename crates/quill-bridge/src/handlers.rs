//! Route handlers
//!
//! Bodies are taken as raw bytes and parsed here so malformed JSON maps to
//! the same `{ "error": ... }` shape as every other failure.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use quill_cache::{CacheEvent, CacheStats};
use quill_core::{
    Command, CommandResponse, CommandStatus, Priority, QueuedCommand, QuillError,
    PROTOCOL_VERSION,
};
use quill_queue::{PreviewResult, QueueStats};
use quill_upstream::{BackupMetadata, CachedDocumentApi, DocumentApi, DocumentSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::resolve::apply_response;
use crate::state::{CurrentFile, SharedState};
use crate::submit::{CommandSpec, SubmitOutcome, SubmitRequest};

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(QuillError::Validation(format!("Invalid request body: {}", e))))
}

/// Like `parse_body`, but an empty body means "all defaults"
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

/// Query string rejections get the JSON error body too
fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    query.map(|Query(query)| query).map_err(|e| {
        ApiError(QuillError::Validation(format!(
            "Invalid query string: {}",
            e.body_text()
        )))
    })
}

fn documents(state: &SharedState) -> ApiResult<&CachedDocumentApi> {
    state.documents.as_ref().ok_or_else(|| {
        ApiError(QuillError::UpstreamUnavailable(
            "no upstream API is configured".to_string(),
        ))
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    pub file: Option<String>,
}

/// A command as the execution agent sees it: the envelope plus scheduling
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCommand {
    #[serde(flatten)]
    pub command: Command,
    pub file_key: String,
    pub status: CommandStatus,
    pub priority: Priority,
    pub timeout_at: DateTime<Utc>,
}

impl From<QueuedCommand> for AgentCommand {
    fn from(queued: QueuedCommand) -> Self {
        Self {
            command: queued.command,
            file_key: queued.file_key,
            status: queued.status,
            priority: queued.priority,
            timeout_at: queued.timeout_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandList {
    pub file_key: String,
    pub commands: Vec<AgentCommand>,
}

/// GET /commands?file= - active commands for the agent's document
pub async fn list_commands(
    State(state): State<SharedState>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> ApiResult<Json<CommandList>> {
    let query = parse_query(query)?;
    let file_key = state.resolve_file_key(query.file.as_deref()).await?;
    let active = if state.config.bridge.mark_delivered_on_poll {
        state.queue.deliver(&file_key).await
    } else {
        state.queue.active_for_file(&file_key).await
    };
    debug!("Agent poll for {}: {} active", file_key, active.len());

    Ok(Json(CommandList {
        file_key,
        commands: active.into_iter().map(AgentCommand::from).collect(),
    }))
}

/// POST /commands
pub async fn submit_command(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SubmitOutcome>)> {
    let request: SubmitRequest = parse_body(&body)?;
    let outcome = state.submit(request).await?;
    let status = if outcome.queued {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// GET /commands/:id
pub async fn get_command(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<QueuedCommand>> {
    state
        .queue
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError(QuillError::CommandNotFound(id)))
}

/// POST /commands/:id/response - the agent reports an outcome
pub async fn post_response(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<QueuedCommand>> {
    if state.queue.status(&id).await.is_none() {
        return Err(ApiError(QuillError::CommandNotFound(id)));
    }
    let response: CommandResponse = parse_body(&body)?;
    let queued = apply_response(&state.queue, &state.cache, &id, response).await?;
    Ok(Json(queued))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedRequest {
    #[serde(default)]
    pub comment_id: Option<String>,
}

/// POST /commands/:id/posted - delivery acknowledgement, optionally
/// linking the comment the agent will reply under
pub async fn mark_posted(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<QueuedCommand>> {
    let request: PostedRequest = parse_optional_body(&body)?;
    let queued = state.queue.mark_posted(&id, request.comment_id).await?;
    Ok(Json(queued))
}

/// GET /current-file
pub async fn get_current_file(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "currentFile": state.current_file().await }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentFileRequest {
    pub file_key: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// POST /current-file - the agent announces the open document
pub async fn set_current_file(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<CurrentFile>> {
    let request: CurrentFileRequest = parse_body(&body)?;
    let current = state
        .set_current_file(&request.file_key, request.file_name)
        .await?;
    Ok(Json(current))
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub commands: Vec<CommandSpec>,
}

/// POST /preview - predicted effect of a batch, nothing queued
pub async fn preview(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<PreviewResult>> {
    let request: PreviewRequest = parse_body(&body)?;
    let commands: Vec<Command> = request
        .commands
        .into_iter()
        .map(CommandSpec::into_command)
        .collect();
    for command in &commands {
        command.validate()?;
    }
    Ok(Json(state.preview.preview(&commands)))
}

/// GET /backups?file=
pub async fn list_backups(
    State(state): State<SharedState>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<BackupMetadata>>> {
    let query = parse_query(query)?;
    let file_key = state.resolve_file_key(query.file.as_deref()).await?;
    let Some(backups) = &state.backups else {
        return Ok(Json(Vec::new()));
    };
    Ok(Json(backups.list(&file_key).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub queue: QueueStats,
    pub cache: CacheStats,
    pub current_file: Option<CurrentFile>,
    pub uptime_secs: u64,
}

/// GET /stats
pub async fn stats(State(state): State<SharedState>) -> Json<BridgeStats> {
    Json(BridgeStats {
        queue: state.queue.stats().await,
        cache: state.cache.stats().await,
        current_file: state.current_file().await,
        uptime_secs: state.uptime_secs(),
    })
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "quill-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": PROTOCOL_VERSION,
        "uptimeSecs": state.uptime_secs(),
    }))
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<SharedState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

/// POST /cache/invalidate
pub async fn cache_invalidate(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let request: InvalidateRequest = parse_body(&body)?;
    if request.pattern.trim().is_empty() {
        return Err(ApiError(QuillError::Validation("pattern is empty".to_string())));
    }
    let removed = state.cache.invalidate(&request.pattern).await;
    Ok(Json(json!({ "removed": removed })))
}

/// POST /cache/events - an external change notification
pub async fn cache_event(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let event: CacheEvent = parse_body(&body)?;
    let removed = state.cache.handle_event(&event).await;
    Ok(Json(json!({ "removed": removed })))
}

/// GET /document?file=
pub async fn get_document(
    State(state): State<SharedState>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> ApiResult<Json<DocumentSnapshot>> {
    let query = parse_query(query)?;
    let file_key = state.resolve_file_key(query.file.as_deref()).await?;
    let snapshot = documents(&state)?.get_file(&file_key).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct NodesQuery {
    pub file: Option<String>,
    pub ids: String,
}

/// GET /document/nodes?file=&ids=1:2,1:3
pub async fn get_nodes(
    State(state): State<SharedState>,
    query: Result<Query<NodesQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let query = parse_query(query)?;
    let file_key = state.resolve_file_key(query.file.as_deref()).await?;
    let ids: Vec<String> = query
        .ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(ApiError(QuillError::Validation("ids is empty".to_string())));
    }
    let nodes = documents(&state)?.get_nodes(&file_key, &ids).await?;
    Ok(Json(nodes))
}
