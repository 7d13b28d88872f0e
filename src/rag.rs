//! Consulta RAG sobre las notas del usuario.
//!
//! Flujo:
//!   1. Embedding de la pregunta.
//!   2. Búsqueda vectorial de los 3 chunks más cercanos del usuario.
//!   3. Contexto acotado (chunks con delimitador) + historial del chat.
//!   4. Prompt estricto: el LLM sólo puede responder desde el contexto.
//!   5. Turnos usuario/asistente anexados a la transcripción y persistidos.
//!
//! A diferencia de la generación de mapas, aquí no hay contenido de
//! respaldo seguro: cualquier fallo de recuperación o completion se
//! propaga como un único error de servicio, sin estado parcial.
//!
//! La orquestación depende de tres contratos (recuperador de contexto,
//! almacén de transcripciones y servicio de completion), no de Neo4j ni
//! del proveedor concreto, lo que permite sustituirlos en tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::llm::{LlmManager, TextCompleter};
use crate::models::{Chat, ChatMessage, Role};
use crate::vector_store::{self, RetrievedChunk};

/// Chunks recuperados por consulta.
pub const TOP_K: usize = 3;
/// Delimitador entre chunks dentro del contexto.
pub const CONTEXT_DELIMITER: &str = "\n---\n";
/// Centinela cuando el vector store no devuelve nada.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant context found.";
/// Centinela cuando el LLM no devuelve contenido.
pub const NO_ANSWER_SENTINEL: &str = "Sorry, no answer.";

/// Recupera los chunks más relevantes del usuario para una consulta.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn top_chunks(&self, user_id: &str, query_text: &str) -> Result<Vec<RetrievedChunk>>;
}

/// Persistencia de transcripciones de chat.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Transcripción del usuario; None si no existe o no es suya.
    async fn load_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Option<Chat>>;
    async fn create_chat(&self, user_id: &str) -> AppResult<Chat>;
    async fn save_chat(&self, chat: &Chat) -> AppResult<()>;
}

/// Recuperador real: embedding de la consulta + búsqueda vectorial en Neo4j.
pub struct GraphRetriever<'a> {
    pub graph: &'a Graph,
    pub llm: &'a LlmManager,
}

#[async_trait]
impl ContextRetriever for GraphRetriever<'_> {
    async fn top_chunks(&self, user_id: &str, query_text: &str) -> Result<Vec<RetrievedChunk>> {
        let query_vec = self.llm.embed_query(query_text).await?;
        vector_store::search_user_chunks(self.graph, user_id, &query_vec, TOP_K).await
    }
}

/// Concatena los textos recuperados; centinela literal si no hay ninguno.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Formatea la transcripción previa como líneas `role: content`.
pub fn format_history(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plantilla de recuperación estricta: sólo el contexto entre comillas
/// triples puede usarse para responder.
pub fn build_prompt(query_text: &str, context: &str, history: &str) -> String {
    format!(
        r#"You are a helpful assistant. Use ONLY the context between the triple quotes below to answer the user's question.
If the answer is not in the context, respond with: "I don't know based on the context provided."

Context:
"""
{context}
"""

Conversation history:
{history}

User asks:
{query_text}

Answer:
"#
    )
}

/// Responde una consulta RAG y persiste ambos turnos en la transcripción.
/// Devuelve el mensaje del asistente y el id del chat usado.
pub async fn answer(
    graph: &Graph,
    llm: &LlmManager,
    user_id: &str,
    query_text: &str,
    chat_id: Option<&str>,
) -> AppResult<(ChatMessage, String)> {
    let retriever = GraphRetriever { graph, llm };
    answer_with(graph, &retriever, llm, user_id, query_text, chat_id).await
}

/// Orquestación completa sobre los contratos abstractos.
pub async fn answer_with<S, R, C>(
    store: &S,
    retriever: &R,
    completer: &C,
    user_id: &str,
    query_text: &str,
    chat_id: Option<&str>,
) -> AppResult<(ChatMessage, String)>
where
    S: ChatStore + ?Sized,
    R: ContextRetriever + ?Sized,
    C: TextCompleter + ?Sized,
{
    if query_text.trim().is_empty() {
        return Err(AppError::Validation("Consulta vacía".to_string()));
    }

    // Resolver o crear la transcripción. Un chatId desconocido no es un
    // error: se abre una conversación nueva.
    let mut chat = match chat_id {
        Some(id) => match store.load_chat(id, user_id).await? {
            Some(chat) => chat,
            None => store.create_chat(user_id).await?,
        },
        None => store.create_chat(user_id).await?,
    };

    let retrieval_failed =
        |e: anyhow::Error| AppError::Upstream(format!("Recuperación/generación falló: {e}"));

    // Recuperación de contexto.
    let chunks = retriever
        .top_chunks(user_id, query_text)
        .await
        .map_err(retrieval_failed)?;
    if chunks.is_empty() {
        warn!("Sin chunks relevantes para el usuario {user_id}; se usa el centinela.");
    }

    let context = build_context(&chunks);
    let history = format_history(&chat.messages);
    let prompt = build_prompt(query_text, &context, &history);

    // Completion: la plantilla entera viaja como mensaje de sistema; la
    // consulta ya va dentro, así que el cuerpo sólo cierra el turno.
    let raw = completer
        .complete(&prompt, "Answer:")
        .await
        .map_err(retrieval_failed)?;
    let content = if raw.trim().is_empty() {
        NO_ANSWER_SENTINEL.to_string()
    } else {
        raw
    };

    // Anexar ambos turnos y persistir.
    let now_ms = Utc::now().timestamp_millis();
    chat.messages.push(ChatMessage {
        role: Role::User,
        content: query_text.to_string(),
        created_at_ms: now_ms,
    });
    let assistant = ChatMessage {
        role: Role::Assistant,
        content,
        created_at_ms: now_ms,
    };
    chat.messages.push(assistant.clone());
    store.save_chat(&chat).await?;

    info!(
        "Consulta RAG respondida para el usuario {user_id} (chat {}, {} chunks).",
        chat.id,
        chunks.len()
    );
    Ok((assistant, chat.id))
}

// ---------------------------------------------------------------------
// TRANSCRIPCIONES (:Chat)
// ---------------------------------------------------------------------

fn chat_from_parts(id: String, user_id: String, messages_json: &str) -> Chat {
    Chat {
        id,
        user_id,
        messages: serde_json::from_str(messages_json).unwrap_or_default(),
    }
}

#[async_trait]
impl ChatStore for Graph {
    async fn load_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Option<Chat>> {
        let mut cursor = self
            .execute(
                query(
                    "MATCH (c:Chat {id: $id, user_id: $user_id})
                     RETURN c.id AS id, c.user_id AS user_id, c.messages_json AS messages_json",
                )
                .param("id", chat_id)
                .param("user_id", user_id),
            )
            .await?;

        Ok(cursor.next().await?.and_then(|row| {
            let id: String = row.get("id")?;
            let user_id: String = row.get("user_id")?;
            let messages_json: String =
                row.get("messages_json").unwrap_or_else(|| "[]".to_string());
            Some(chat_from_parts(id, user_id, &messages_json))
        }))
    }

    async fn create_chat(&self, user_id: &str) -> AppResult<Chat> {
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            messages: Vec::new(),
        };
        self.run(
            query(
                "CREATE (c:Chat {id: $id, user_id: $user_id, messages_json: $messages_json,
                                 updated_at: $updated_at})",
            )
            .param("id", chat.id.clone())
            .param("user_id", chat.user_id.clone())
            .param("messages_json", "[]")
            .param("updated_at", Utc::now().timestamp_millis()),
        )
        .await?;
        Ok(chat)
    }

    async fn save_chat(&self, chat: &Chat) -> AppResult<()> {
        let messages_json =
            serde_json::to_string(&chat.messages).map_err(|e| AppError::Internal(e.into()))?;
        self.run(
            query(
                "MATCH (c:Chat {id: $id})
                 SET c.messages_json = $messages_json, c.updated_at = $updated_at",
            )
            .param("id", chat.id.clone())
            .param("messages_json", messages_json)
            .param("updated_at", Utc::now().timestamp_millis()),
        )
        .await?;
        Ok(())
    }
}

/// Última transcripción del usuario, si tiene alguna.
pub async fn latest_chat(graph: &Graph, user_id: &str) -> AppResult<Option<Chat>> {
    let mut cursor = graph
        .execute(
            query(
                "MATCH (c:Chat {user_id: $user_id})
                 RETURN c.id AS id, c.user_id AS user_id, c.messages_json AS messages_json
                 ORDER BY c.updated_at DESC
                 LIMIT 1",
            )
            .param("user_id", user_id),
        )
        .await?;

    Ok(cursor.next().await?.and_then(|row| {
        let id: String = row.get("id")?;
        let user_id: String = row.get("user_id")?;
        let messages_json: String = row.get("messages_json").unwrap_or_else(|| "[]".to_string());
        Some(chat_from_parts(id, user_id, &messages_json))
    }))
}
