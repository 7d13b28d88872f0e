//! Procesado de textos subidos: genera la ficha de memoria (categoría,
//! título y flashcards) con el LLM y deja los chunks embebidos en el
//! vector store para la recuperación RAG posterior.
//!
//! La extracción de texto desde PDF/imagen es un colaborador externo:
//! aquí ya se recibe texto plano.

use anyhow::Result;
use neo4rs::Graph;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{LlmManager, TextCompleter, LLM_RETRY_LIMIT};
use crate::models::{Difficulty, Note, QaPair};
use crate::normalize::safe_json_parse;
use crate::notes;
use crate::vector_store::{self, ChunkRecord};

/// Tamaño objetivo de chunk en caracteres.
pub const CHUNK_SIZE: usize = 500;
/// Solapamiento entre chunks consecutivos.
pub const CHUNK_OVERLAP: usize = 50;

const MEMORY_RULES: &str = r#"You are a memory coach. Based on the note content below:

1. Categorize the note as "category".
2. Generate a 2-word concise title as "title".
3. Create 5-7 Q&A flashcards as an array "qa", each with "question" and "answer".
4. Return ONLY a valid JSON object. No extra text.

Example format:
{
  "category": "Physics",
  "title": "DC Motors",
  "qa": [
    {"question":"What is a DC motor?","answer":"A machine that converts DC electrical energy into mechanical energy."},
    {"question":"Name main components of a DC motor.","answer":"Stator, Rotor, Commutator, Brushes, Shaft, Windings."}
  ]
}"#;

/// Ficha de memoria generada para una nota.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryData {
    pub category: String,
    pub title: String,
    pub qa: Vec<QaPair>,
}

fn memory_fallback(text: &str) -> MemoryData {
    let head: String = text.chars().take(20).collect();
    MemoryData {
        category: "Uncategorized".to_string(),
        title: if head.is_empty() {
            "Untitled".to_string()
        } else {
            head
        },
        qa: Vec::new(),
    }
}

fn string_field(obj: &Value, key: &str) -> Option<String> {
    let s = obj.get(key)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// Los LLM pequeños renombran claves con facilidad: se aceptan alias.
fn qa_from_value(item: &Value, idx: usize) -> QaPair {
    let question = string_field(item, "question")
        .or_else(|| string_field(item, "q"))
        .or_else(|| string_field(item, "prompt"))
        .unwrap_or_else(|| format!("Question {}", idx + 1));
    let answer = string_field(item, "answer")
        .or_else(|| string_field(item, "a"))
        .or_else(|| string_field(item, "response"))
        .unwrap_or_else(|| "No answer provided.".to_string());
    QaPair { question, answer }
}

/// Genera categoría, título y flashcards para un texto. Reintenta ante
/// fallos o fichas sin flashcards; agotados los reintentos devuelve el
/// fallback {Uncategorized, primeros 20 caracteres, sin flashcards}.
pub async fn generate_memory_data<C: TextCompleter + ?Sized>(llm: &C, text: &str) -> MemoryData {
    let fallback = memory_fallback(text);
    let input = format!("Note content:\n{text}");

    for attempt in 0..=LLM_RETRY_LIMIT {
        let raw = match llm.complete(MEMORY_RULES, &input).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Intento {attempt} de ficha de memoria falló: {err}");
                continue;
            }
        };

        let Some(parsed) = safe_json_parse(&raw) else {
            warn!("Intento {attempt}: respuesta de ficha de memoria no parseable.");
            continue;
        };

        let qa_items = parsed.get("qa").and_then(|v| v.as_array());
        let Some(qa_items) = qa_items.filter(|items| !items.is_empty()) else {
            warn!("Intento {attempt}: ficha sin flashcards, reintentando.");
            continue;
        };

        let qa = qa_items
            .iter()
            .enumerate()
            .map(|(idx, item)| qa_from_value(item, idx))
            .collect();
        return MemoryData {
            category: string_field(&parsed, "category").unwrap_or_else(|| fallback.category.clone()),
            title: string_field(&parsed, "title").unwrap_or_else(|| fallback.title.clone()),
            qa,
        };
    }

    warn!("Ficha de memoria agotó los reintentos; se usa el fallback.");
    fallback
}

/// Trocea un texto respetando párrafos, con solapamiento entre chunks
/// para no perder contexto en los cortes.
pub fn split_into_chunks(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        // Un párrafo sin cortes internos puede superar por sí solo el
        // máximo: se trocea por ventana de caracteres con solapamiento.
        if paragraph.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = paragraph.chars().collect();
            let step = max_chars.saturating_sub(overlap).max(1);
            let mut start = 0;
            while start < chars.len() {
                let end = (start + max_chars).min(chars.len());
                chunks.push(chars[start..end].iter().collect());
                if end == chars.len() {
                    break;
                }
                start += step;
            }
            continue;
        }
        let current_len = current.chars().count();
        if current_len + paragraph.chars().count() + 2 > max_chars && !current.is_empty() {
            chunks.push(current.clone());
            // La cola del chunk anterior abre el siguiente.
            current = current
                .chars()
                .skip(current_len.saturating_sub(overlap))
                .collect();
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Trocea, embebe en bloque y persiste los chunks de una nota en el
/// vector store del usuario. Devuelve cuántos chunks quedaron indexados.
pub async fn index_note_for_rag(
    graph: &Graph,
    llm: &LlmManager,
    user_id: &str,
    note_id: &str,
    text: &str,
) -> Result<usize> {
    let raw_chunks = split_into_chunks(text, CHUNK_SIZE, CHUNK_OVERLAP);
    if raw_chunks.is_empty() {
        warn!("Nota {note_id} sin texto útil; no se indexa.");
        return Ok(0);
    }

    let pairs: Vec<(String, String)> = raw_chunks
        .into_iter()
        .enumerate()
        .map(|(i, text)| (format!("{note_id}-{i}"), text))
        .collect();
    let embedded = llm.embed_chunks(&pairs).await?;

    for (index, chunk) in embedded.iter().enumerate() {
        vector_store::upsert_chunk(
            graph,
            &ChunkRecord {
                id: chunk.id.clone(),
                user_id: user_id.to_string(),
                note_id: note_id.to_string(),
                chunk_index: index as i64,
                text: chunk.text.clone(),
                embedding: chunk.vector.clone(),
            },
        )
        .await?;
    }

    info!("Nota {note_id} indexada con {} chunks.", embedded.len());
    Ok(embedded.len())
}

/// Convierte los textos subidos pendientes del usuario en notas con su
/// ficha de memoria, y los deja indexados para RAG.
pub async fn process_uploads(
    graph: &Graph,
    llm: &LlmManager,
    user_id: &str,
) -> Result<Vec<Note>> {
    let uploads = notes::pending_uploads(graph, user_id).await?;
    let mut processed = Vec::new();

    for upload in uploads {
        let memory = generate_memory_data(llm, &upload.text).await;

        let note = Note {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: memory.title,
            category: memory.category,
            extracted_text: upload.text.clone(),
            qa: memory.qa,
            processed: true,
            interval_days: 1,
            last_reviewed_ms: None,
            next_due_ms: None,
            incorrect_count: 0,
            total_time_ms: 0,
            difficulty: Difficulty::Medium,
            mastered: false,
        };

        notes::upsert_note(graph, &note).await?;
        notes::mark_upload_processed(graph, &upload.id).await?;

        // Un fallo de indexación no tumba el procesado: la nota ya existe.
        if let Err(err) = index_note_for_rag(graph, llm, user_id, &note.id, &upload.text).await {
            warn!("No se pudo indexar la nota {}: {err}", note.id);
        }

        processed.push(note);
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCompleter {
        reply: Result<String, String>,
        calls: AtomicUsize,
    }

    impl StubCompleter {
        fn new(reply: Result<String, String>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextCompleter for StubCompleter {
        async fn complete(&self, _preamble: &str, _input: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!(e.clone())),
            }
        }
    }

    #[test]
    fn troceo_respeta_el_tamano_y_solapa() {
        let paragraph = "palabra ".repeat(30).trim().to_string(); // ~240 chars
        let text = format!("{paragraph}\n\n{paragraph}\n\n{paragraph}");
        let chunks = split_into_chunks(&text, CHUNK_SIZE, CHUNK_OVERLAP);

        assert!(chunks.len() >= 2, "esperaba varios chunks, hubo {}", chunks.len());
        // El segundo chunk arranca con la cola del primero.
        let tail: String = {
            let first = &chunks[0];
            let len = first.chars().count();
            first.chars().skip(len - CHUNK_OVERLAP).collect()
        };
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn parrafo_gigante_se_trocea_por_ventana() {
        // Sin saltos de párrafo: la ventana de caracteres debe acotar.
        let text = "x".repeat(1200);
        let chunks = split_into_chunks(&text, CHUNK_SIZE, CHUNK_OVERLAP);

        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.chars().count() <= CHUNK_SIZE, "chunk de {} chars", c.chars().count());
        }
        // Ventanas consecutivas solapan en CHUNK_OVERLAP caracteres.
        let tail: String = chunks[0]
            .chars()
            .skip(CHUNK_SIZE - CHUNK_OVERLAP)
            .collect();
        assert!(chunks[1].starts_with(&tail));
        // Todo el texto queda cubierto.
        let covered: usize = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let len = c.chars().count();
                if i == 0 {
                    len
                } else {
                    len.saturating_sub(CHUNK_OVERLAP)
                }
            })
            .sum();
        assert_eq!(covered, 1200);
    }

    #[test]
    fn troceo_ignora_parrafos_vacios() {
        assert!(split_into_chunks("", CHUNK_SIZE, CHUNK_OVERLAP).is_empty());
        assert!(split_into_chunks("\n\n\n\n   \n\n", CHUNK_SIZE, CHUNK_OVERLAP).is_empty());
        assert_eq!(
            split_into_chunks("sólo un párrafo", CHUNK_SIZE, CHUNK_OVERLAP),
            vec!["sólo un párrafo".to_string()]
        );
    }

    #[tokio::test]
    async fn ficha_cae_al_fallback_tras_reintentos() {
        let stub = StubCompleter::new(Err("servicio caído".to_string()));
        let memory = generate_memory_data(&stub, "Circuitos eléctricos básicos").await;

        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        assert_eq!(memory.category, "Uncategorized");
        assert_eq!(memory.title, "Circuitos eléctricos"); // primeros 20 caracteres
        assert!(memory.qa.is_empty());
    }

    #[tokio::test]
    async fn ficha_sin_flashcards_tambien_reintenta() {
        let stub = StubCompleter::new(Ok(
            r#"{ "category": "Physics", "title": "DC Motors", "qa": [] }"#.to_string(),
        ));
        let memory = generate_memory_data(&stub, "texto").await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        assert!(memory.qa.is_empty());
        assert_eq!(memory.category, "Uncategorized");
    }

    #[tokio::test]
    async fn ficha_acepta_alias_de_claves() {
        let stub = StubCompleter::new(Ok(r#"{
            "category": "Physics",
            "title": "DC Motors",
            "qa": [
                { "q": "¿Qué es?", "a": "Una máquina." },
                { "prompt": "¿Partes?", "response": "Estator y rotor." },
                { "question": "" }
            ]
        }"#
        .to_string()));
        let memory = generate_memory_data(&stub, "texto").await;

        assert_eq!(memory.category, "Physics");
        assert_eq!(memory.qa.len(), 3);
        assert_eq!(memory.qa[0].question, "¿Qué es?");
        assert_eq!(memory.qa[1].answer, "Estator y rotor.");
        assert_eq!(memory.qa[2].question, "Question 3");
        assert_eq!(memory.qa[2].answer, "No answer provided.");
    }
}
