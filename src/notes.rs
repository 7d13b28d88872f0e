//! Persistencia de notas de estudio (:Note) en Neo4j.
//!
//! Las tarjetas Q/A se guardan serializadas en `qa_json` y los instantes
//! como milisegundos epoch, para mantener los nodos en propiedades planas.

use anyhow::Result;
use neo4rs::{query, Graph, Row};

use crate::error::{AppError, AppResult};
use crate::models::{Difficulty, Note, QaPair};

fn qa_to_json(qa: &[QaPair]) -> String {
    serde_json::to_string(qa).unwrap_or_else(|_| "[]".to_string())
}

fn note_from_row(row: &Row) -> Option<Note> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let qa_json: String = row.get("qa_json").unwrap_or_else(|| "[]".to_string());
    let qa: Vec<QaPair> = serde_json::from_str(&qa_json).unwrap_or_default();
    let difficulty_raw: String = row
        .get("difficulty")
        .unwrap_or_else(|| "Medium".to_string());

    Some(Note {
        id,
        user_id,
        title: row.get("title").unwrap_or_default(),
        category: row.get("category").unwrap_or_default(),
        extracted_text: row.get("extracted_text").unwrap_or_default(),
        qa,
        processed: row.get("processed").unwrap_or(false),
        interval_days: row.get("interval_days").unwrap_or(1),
        last_reviewed_ms: row.get("last_reviewed"),
        next_due_ms: row.get("next_due"),
        incorrect_count: row.get("incorrect_count").unwrap_or(0),
        total_time_ms: row.get("total_time_ms").unwrap_or(0),
        difficulty: Difficulty::parse(&difficulty_raw).unwrap_or(Difficulty::Medium),
        mastered: row.get("mastered").unwrap_or(false),
    })
}

const NOTE_RETURN: &str = "RETURN n.id AS id, n.user_id AS user_id, n.title AS title,
        n.category AS category, n.extracted_text AS extracted_text,
        n.qa_json AS qa_json, n.processed AS processed,
        n.interval_days AS interval_days, n.last_reviewed AS last_reviewed,
        n.next_due AS next_due, n.incorrect_count AS incorrect_count,
        n.total_time_ms AS total_time_ms, n.difficulty AS difficulty,
        n.mastered AS mastered";

/// Crea o actualiza una nota completa.
pub async fn upsert_note(graph: &Graph, note: &Note) -> Result<()> {
    graph
        .run(
            query(
                "MERGE (n:Note {id: $id})
                 SET n.user_id = $user_id, n.title = $title, n.category = $category,
                     n.extracted_text = $extracted_text, n.qa_json = $qa_json,
                     n.processed = $processed, n.interval_days = $interval_days,
                     n.incorrect_count = $incorrect_count, n.total_time_ms = $total_time_ms,
                     n.difficulty = $difficulty, n.mastered = $mastered",
            )
            .param("id", note.id.clone())
            .param("user_id", note.user_id.clone())
            .param("title", note.title.clone())
            .param("category", note.category.clone())
            .param("extracted_text", note.extracted_text.clone())
            .param("qa_json", qa_to_json(&note.qa))
            .param("processed", note.processed)
            .param("interval_days", note.interval_days)
            .param("incorrect_count", note.incorrect_count)
            .param("total_time_ms", note.total_time_ms)
            .param("difficulty", note.difficulty.as_str())
            .param("mastered", note.mastered),
        )
        .await?;
    Ok(())
}

/// Busca una nota del usuario; `NotFound` si no existe o no es suya.
pub async fn fetch_note(graph: &Graph, user_id: &str, note_id: &str) -> AppResult<Note> {
    let cypher = format!("MATCH (n:Note {{id: $id, user_id: $user_id}}) {NOTE_RETURN}");
    let mut cursor = graph
        .execute(
            query(&cypher)
                .param("id", note_id)
                .param("user_id", user_id),
        )
        .await?;

    match cursor.next().await? {
        Some(row) => note_from_row(&row)
            .ok_or_else(|| AppError::Parse(format!("Nota {note_id} con propiedades corruptas"))),
        None => Err(AppError::NotFound(format!("Nota {note_id}"))),
    }
}

/// Todas las notas de un usuario, en orden estable por id.
pub async fn list_notes(graph: &Graph, user_id: &str) -> Result<Vec<Note>> {
    let cypher = format!("MATCH (n:Note {{user_id: $user_id}}) {NOTE_RETURN} ORDER BY n.id");
    let mut cursor = graph
        .execute(query(&cypher).param("user_id", user_id))
        .await?;

    let mut notes = Vec::new();
    while let Some(row) = cursor.next().await? {
        if let Some(note) = note_from_row(&row) {
            notes.push(note);
        }
    }
    Ok(notes)
}

/// Persiste el estado de repaso tras una sesión. El resto de campos de la
/// nota no se tocan: sólo el planificador muta estos.
pub async fn save_review_state(graph: &Graph, note: &Note) -> Result<()> {
    let base = "MATCH (n:Note {id: $id, user_id: $user_id})
                SET n.interval_days = $interval_days,
                    n.incorrect_count = $incorrect_count,
                    n.total_time_ms = $total_time_ms,
                    n.difficulty = $difficulty,
                    n.mastered = $mastered,
                    n.last_reviewed = $last_reviewed";

    // El repaso siempre fija last_reviewed antes de llamar aquí.
    let last_reviewed = note.last_reviewed_ms.unwrap_or_default();

    // next_due se pone a null cuando la nota queda dominada.
    let q = match note.next_due_ms {
        Some(due) => query(&format!("{base}, n.next_due = $next_due")).param("next_due", due),
        None => query(&format!("{base}, n.next_due = null")),
    }
    .param("last_reviewed", last_reviewed);

    graph
        .run(
            q.param("id", note.id.clone())
                .param("user_id", note.user_id.clone())
                .param("interval_days", note.interval_days)
                .param("incorrect_count", note.incorrect_count)
                .param("total_time_ms", note.total_time_ms)
                .param("difficulty", note.difficulty.as_str())
                .param("mastered", note.mastered),
        )
        .await?;
    Ok(())
}

/// Textos subidos de un usuario que aún no se han convertido en nota.
pub async fn pending_uploads(graph: &Graph, user_id: &str) -> Result<Vec<crate::models::Upload>> {
    let mut cursor = graph
        .execute(
            query(
                "MATCH (u:Upload {owner_id: $owner_id})
                 WHERE u.processed = false OR u.processed IS NULL
                 RETURN u.id AS id, u.owner_id AS owner_id, u.text AS text
                 ORDER BY u.id",
            )
            .param("owner_id", user_id),
        )
        .await?;

    let mut uploads = Vec::new();
    while let Some(row) = cursor.next().await? {
        let (Some(id), Some(owner_id)) = (row.get::<String>("id"), row.get::<String>("owner_id"))
        else {
            continue;
        };
        uploads.push(crate::models::Upload {
            id,
            owner_id,
            text: row.get("text").unwrap_or_default(),
        });
    }
    Ok(uploads)
}

pub async fn mark_upload_processed(graph: &Graph, upload_id: &str) -> Result<()> {
    graph
        .run(
            query("MATCH (u:Upload {id: $id}) SET u.processed = true")
                .param("id", upload_id),
        )
        .await?;
    Ok(())
}

/// Registra un texto subido (colaborador de extracción externo ya lo dejó
/// en texto plano).
pub async fn create_upload(graph: &Graph, upload: &crate::models::Upload) -> Result<()> {
    graph
        .run(
            query(
                "MERGE (u:Upload {id: $id})
                 SET u.owner_id = $owner_id, u.text = $text, u.processed = false",
            )
            .param("id", upload.id.clone())
            .param("owner_id", upload.owner_id.clone())
            .param("text", upload.text.clone()),
        )
        .await?;
    Ok(())
}
