use std::collections::BTreeMap;

use axum::{
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use neo4rs::query;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    error::{AppError, AppResult},
    ingest, mindmap,
    models::{ChatMessage, Difficulty, Note, ScheduleEntry, Upload},
    notes, rag, scheduler,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct CreateUploadPayload {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSessionPayload {
    rating: String,
    #[serde(default)]
    wrong_count: i64,
    #[serde(default)]
    duration_ms: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSessionResponse {
    next_due: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMindMapPayload {
    #[serde(default)]
    nodes: Value,
    #[serde(default)]
    edges: Value,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Deserialize)]
pub struct AskAiPayload {
    prompt: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagQueryPayload {
    query: String,
    #[serde(default)]
    chat_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagQueryResponse {
    reply: ChatMessage,
    chat_id: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/uploads", post(create_upload_handler))
        .route("/api/notes/process", post(process_notes_handler))
        .route("/api/notes", get(list_notes_handler))
        .route("/api/notes/session/:note_id", post(review_session_handler))
        .route("/api/notes/schedule", get(schedule_handler))
        .route(
            "/api/mindmap/:note_id",
            post(generate_mindmap_handler)
                .get(get_mindmap_handler)
                .put(update_mindmap_handler),
        )
        .route("/api/askai/:note_id", post(askai_handler))
        .route("/api/rag-query", post(rag_query_handler))
        .route("/api/chat/latest", get(latest_chat_handler))
        .route("/api/health", get(health_handler))
        .with_state(app_state)
}

// La autenticación es un colaborador externo: el gateway deja el usuario
// ya verificado en esta cabecera.
fn user_id_from_headers(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::Validation("Falta la cabecera x-user-id".to_string()))
}

// --- Handlers ---

#[axum::debug_handler]
async fn create_upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUploadPayload>,
) -> AppResult<Json<Value>> {
    let user_id = user_id_from_headers(&headers)?;
    if payload.text.trim().is_empty() {
        return Err(AppError::Validation("Texto vacío".to_string()));
    }

    let upload = Upload {
        id: Uuid::new_v4().to_string(),
        owner_id: user_id,
        text: payload.text,
    };
    notes::create_upload(&state.graph, &upload)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(json!({ "uploadId": upload.id })))
}

#[axum::debug_handler]
async fn process_notes_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Note>>> {
    let user_id = user_id_from_headers(&headers)?;
    let processed = ingest::process_uploads(&state.graph, &state.llm_manager, &user_id)
        .await
        .map_err(AppError::Internal)?;

    info!("{} subidas procesadas para el usuario {user_id}.", processed.len());
    Ok(Json(processed))
}

#[axum::debug_handler]
async fn list_notes_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<BTreeMap<String, Vec<Note>>>> {
    let user_id = user_id_from_headers(&headers)?;
    let all = notes::list_notes(&state.graph, &user_id)
        .await
        .map_err(AppError::Internal)?;

    // Agrupadas por categoría para la vista de estudio.
    let mut by_category: BTreeMap<String, Vec<Note>> = BTreeMap::new();
    for note in all {
        by_category.entry(note.category.clone()).or_default().push(note);
    }
    Ok(Json(by_category))
}

#[axum::debug_handler]
async fn review_session_handler(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ReviewSessionPayload>,
) -> AppResult<Json<ReviewSessionResponse>> {
    let user_id = user_id_from_headers(&headers)?;
    let rating = Difficulty::parse(&payload.rating).ok_or_else(|| {
        AppError::Validation(format!(
            "Dificultad desconocida: {} (se espera Easy, Medium o Hard)",
            payload.rating
        ))
    })?;

    let next_due = scheduler::apply_review(
        &state.graph,
        &state.config,
        &user_id,
        &note_id,
        rating,
        payload.wrong_count,
        payload.duration_ms,
    )
    .await?;

    Ok(Json(ReviewSessionResponse { next_due }))
}

#[axum::debug_handler]
async fn schedule_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<ScheduleEntry>>> {
    let user_id = user_id_from_headers(&headers)?;
    let entries = scheduler::due_schedule(&state.graph, &user_id)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(entries))
}

#[axum::debug_handler]
async fn generate_mindmap_handler(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<crate::models::MindMapGraph>> {
    let user_id = user_id_from_headers(&headers)?;
    let note = notes::fetch_note(&state.graph, &user_id, &note_id).await?;

    info!(
        "Generando mapa mental para la nota {note_id} ({} caracteres).",
        note.extracted_text.len()
    );
    let map = mindmap::generate_from_text(&state.llm_manager, &note.extracted_text).await;
    mindmap::save_mindmap(&state.graph, &user_id, &note_id, &map)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(map))
}

#[axum::debug_handler]
async fn get_mindmap_handler(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<mindmap::StoredMindMap>> {
    let user_id = user_id_from_headers(&headers)?;
    let stored = mindmap::load_mindmap(&state.graph, &user_id, &note_id).await?;
    Ok(Json(stored))
}

#[axum::debug_handler]
async fn update_mindmap_handler(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<UpdateMindMapPayload>,
) -> AppResult<Json<mindmap::StoredMindMap>> {
    let user_id = user_id_from_headers(&headers)?;
    let stored = mindmap::update_mindmap(
        &state.graph,
        &user_id,
        &note_id,
        &payload.nodes,
        &payload.edges,
        payload.summary.as_deref(),
    )
    .await?;
    Ok(Json(stored))
}

#[axum::debug_handler]
async fn askai_handler(
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<AskAiPayload>,
) -> AppResult<Json<mindmap::AgentReply>> {
    let user_id = user_id_from_headers(&headers)?;
    let note = notes::fetch_note(&state.graph, &user_id, &note_id).await?;
    let stored = mindmap::load_mindmap(&state.graph, &user_id, &note_id).await?;

    let reply = mindmap::ask_mindmap_agent(
        &state.llm_manager,
        &payload.prompt,
        &note.extracted_text,
        &stored.nodes,
        &stored.edges,
    )
    .await?;
    Ok(Json(reply))
}

#[axum::debug_handler]
async fn rag_query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RagQueryPayload>,
) -> AppResult<Json<RagQueryResponse>> {
    let user_id = user_id_from_headers(&headers)?;
    let (reply, chat_id) = rag::answer(
        &state.graph,
        &state.llm_manager,
        &user_id,
        &payload.query,
        payload.chat_id.as_deref(),
    )
    .await?;
    Ok(Json(RagQueryResponse { reply, chat_id }))
}

#[axum::debug_handler]
async fn latest_chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = user_id_from_headers(&headers)?;
    let chat = rag::latest_chat(&state.graph, &user_id).await?;
    Ok(Json(json!({ "chat": chat })))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.graph.run(query("RETURN 1")).await {
        Ok(_) => Ok(Json(json!({ "status": "ok" }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
