//! Generación, persistencia y edición asistida de mapas mentales.
//!
//! Flujo de una generación: REQUEST → PARSE → VALIDATE → (RETRY | LAYOUT).
//! El LLM puede devolver cualquier cosa; el candidato pasa por el
//! normalizador contra un fallback mínimo y, si la llamada falla, se
//! reintenta un número acotado de veces. Agotados los reintentos se
//! devuelve el fallback sin tocar: la generación nunca falla de cara al
//! caller.

use anyhow::Result;
use neo4rs::{query, Graph};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::error::{AppError, AppResult};
use crate::layout;
use crate::llm::{TextCompleter, LLM_RETRY_LIMIT};
use crate::models::{MindMapGraph, MindMapNode};
use crate::normalize::{normalize, safe_json_parse};

const GENERATION_RULES: &str = r#"You are a mind map generator for study notes.

Rules:
- Central node = main topic
- 4-10 main branches around center (if possible)
- Sub-branches 3-4 levels max
- Node labels = descriptive (5-15 words)
- Edge labels = descriptive (3-10 words), avoid "is/has/type of"
- Output ONLY a valid JSON object and nothing else, in this exact format:

{
  "summary": "Short summary (max 1-2 sentences)",
  "nodes": [
    { "id": "1", "label": "Main topic", "level": 0 }
  ],
  "edges": [
    { "id": "e1-2", "source": "1", "target": "2", "label": "provides overview of ..." }
  ]
}

If you cannot generate many branches because the text is short, still return at least one node AND at least one edge (self-edge if necessary)."#;

/// Mapa mínimo siempre válido: un nodo con los primeros 20 caracteres del
/// texto (o "Main Topic" si está vacío) y cero aristas.
pub fn fallback_graph(note_text: &str) -> MindMapGraph {
    let head: String = note_text.chars().take(20).collect();
    let label = if head.is_empty() {
        "Main Topic".to_string()
    } else {
        head
    };
    MindMapGraph {
        nodes: vec![MindMapNode::new("1", label)],
        edges: vec![],
        summary: "Auto-generated fallback mindmap".to_string(),
    }
}

/// Genera un mapa mental a partir del texto de una nota.
///
/// Nunca devuelve error: tras agotar los reintentos se devuelve el
/// fallback sin normalizar ni colocar.
pub async fn generate_from_text<C: TextCompleter + ?Sized>(
    llm: &C,
    note_text: &str,
) -> MindMapGraph {
    let fallback = fallback_graph(note_text);
    let input = format!("Lesson Text:\n{note_text}");
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 0..=LLM_RETRY_LIMIT {
        let raw = match llm.complete(GENERATION_RULES, &input).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Intento {attempt} de generación de mapa mental falló: {err}");
                last_err = Some(err);
                continue;
            }
        };

        // Respuesta no parseable -> Null, y el normalizador parte del fallback.
        let candidate = safe_json_parse(&raw).unwrap_or(Value::Null);
        let mut map = normalize(&candidate, &fallback);

        if map.nodes.is_empty() {
            warn!("Intento {attempt}: mapa sin nodos tras normalizar, reintentando.");
            continue;
        }

        layout::radial_arrange(&mut map.nodes, &map.edges);
        layout::apply_palette(&mut map.nodes);
        return map;
    }

    if let Some(err) = last_err {
        error!("Generación de mapa mental agotó los reintentos: {err}");
    }
    fallback
}

// ---------------------------------------------------------------------
// PERSISTENCIA (clave única user_id:note_id)
// ---------------------------------------------------------------------

/// Mapa tal y como está almacenado: nodos y aristas como JSON crudo, para
/// respetar lo que el editor guardó sin re-tipar.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMindMap {
    pub nodes: Value,
    pub edges: Value,
    pub summary: String,
}

fn map_key(user_id: &str, note_id: &str) -> String {
    format!("{user_id}:{note_id}")
}

/// Inserta o reemplaza el mapa de una nota (upsert atómico por clave).
pub async fn save_mindmap(
    graph: &Graph,
    user_id: &str,
    note_id: &str,
    map: &MindMapGraph,
) -> Result<()> {
    let nodes_json = serde_json::to_string(&map.nodes)?;
    let edges_json = serde_json::to_string(&map.edges)?;
    upsert_raw(
        graph,
        user_id,
        note_id,
        &nodes_json,
        &edges_json,
        Some(&map.summary),
    )
    .await
}

async fn upsert_raw(
    graph: &Graph,
    user_id: &str,
    note_id: &str,
    nodes_json: &str,
    edges_json: &str,
    summary: Option<&str>,
) -> Result<()> {
    let base = "MERGE (m:MindMap {key: $key})
                SET m.user_id = $user_id, m.note_id = $note_id,
                    m.nodes_json = $nodes_json, m.edges_json = $edges_json";
    let q = match summary {
        Some(summary) => {
            query(&format!("{base}, m.summary = $summary")).param("summary", summary)
        }
        None => query(base),
    };
    graph
        .run(
            q.param("key", map_key(user_id, note_id))
                .param("user_id", user_id)
                .param("note_id", note_id)
                .param("nodes_json", nodes_json)
                .param("edges_json", edges_json),
        )
        .await?;
    Ok(())
}

/// Recupera el mapa guardado de una nota; `NotFound` si no existe.
pub async fn load_mindmap(
    graph: &Graph,
    user_id: &str,
    note_id: &str,
) -> AppResult<StoredMindMap> {
    let mut cursor = graph
        .execute(
            query(
                "MATCH (m:MindMap {key: $key})
                 RETURN m.nodes_json AS nodes_json, m.edges_json AS edges_json,
                        m.summary AS summary",
            )
            .param("key", map_key(user_id, note_id)),
        )
        .await?;

    let Some(row) = cursor.next().await? else {
        return Err(AppError::NotFound(format!(
            "Mapa mental de la nota {note_id}"
        )));
    };

    let nodes_json: String = row.get("nodes_json").unwrap_or_else(|| "[]".to_string());
    let edges_json: String = row.get("edges_json").unwrap_or_else(|| "[]".to_string());
    Ok(StoredMindMap {
        nodes: serde_json::from_str(&nodes_json).unwrap_or(Value::Array(vec![])),
        edges: serde_json::from_str(&edges_json).unwrap_or(Value::Array(vec![])),
        summary: row.get("summary").unwrap_or_default(),
    })
}

/// Actualización manual desde el editor: se valida que nodos y aristas
/// sean arrays y se guardan tal cual, sin re-normalizar ni re-colocar
/// (el editor ya trabaja con coordenadas válidas).
pub async fn update_mindmap(
    graph: &Graph,
    user_id: &str,
    note_id: &str,
    nodes: &Value,
    edges: &Value,
    summary: Option<&str>,
) -> AppResult<StoredMindMap> {
    if !nodes.is_array() || !edges.is_array() {
        return Err(AppError::Validation(
            "Se requieren arrays \"nodes\" y \"edges\"".to_string(),
        ));
    }

    upsert_raw(
        graph,
        user_id,
        note_id,
        &nodes.to_string(),
        &edges.to_string(),
        summary,
    )
    .await
    .map_err(AppError::Internal)?;

    load_mindmap(graph, user_id, note_id).await
}

// ---------------------------------------------------------------------
// AGENTE DE EDICIÓN ("ask AI")
// ---------------------------------------------------------------------

const AGENT_RULES: &str = r#"You are an AI assistant inside a mind map app.

Your job:
- Help students improve or understand their mind map.
- If user asks a question, explain.
- If user asks to change or add something, return an UPDATE.

Rules:
- NEVER return multiple JSON blocks.
- NEVER include notes, markdown, or explanation outside of JSON.
- ALWAYS return ONE VALID JSON OBJECT with this format:

{
  "type": "explanation" | "update" | "error",
  "message": "Your message here.",
  ...(if "update") "nodes": [...], "edges": [...]
}"#;

/// Respuesta del agente de mapas mentales.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentReply {
    Explanation {
        message: String,
    },
    Update {
        message: String,
        #[serde(default)]
        nodes: Value,
        #[serde(default)]
        edges: Value,
    },
    Error {
        message: String,
    },
}

/// Consulta al agente sobre el mapa actual. Los fallos de red se
/// propagan; una respuesta no interpretable se degrada al variante
/// `Error` sin romper al caller.
pub async fn ask_mindmap_agent<C: TextCompleter + ?Sized>(
    llm: &C,
    user_prompt: &str,
    note_text: &str,
    nodes: &Value,
    edges: &Value,
) -> AppResult<AgentReply> {
    let input = format!(
        "USER PROMPT:\n{user_prompt}\n\nNOTE TEXT:\n{note_text}\n\nCURRENT NODES:\n{nodes}\n\nCURRENT EDGES:\n{edges}"
    );

    let raw = llm
        .complete(AGENT_RULES, &input)
        .await
        .map_err(|e| AppError::Upstream(format!("Agente de mapas mentales: {e}")))?;

    let reply = safe_json_parse(&raw)
        .and_then(|v| serde_json::from_value::<AgentReply>(v).ok())
        .filter(|r| !matches!(r, AgentReply::Error { .. }));

    Ok(reply.unwrap_or_else(|| {
        warn!("Respuesta del agente no interpretable: {raw}");
        AgentReply::Error {
            message: "Invalid response from AI.".to_string(),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCompleter {
        replies: Vec<Result<String, String>>,
        calls: AtomicUsize,
    }

    impl StubCompleter {
        fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextCompleter for StubCompleter {
        async fn complete(&self, _preamble: &str, _input: &str) -> Result<String> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.replies.is_empty() {
                return Err(anyhow::anyhow!("sin respuesta"));
            }
            match self.replies.get(i.min(self.replies.len() - 1)) {
                Some(Ok(s)) => Ok(s.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!(e.clone())),
                None => Err(anyhow::anyhow!("sin respuesta")),
            }
        }
    }

    #[test]
    fn fallback_trunca_a_veinte_caracteres() {
        let map = fallback_graph("Fotosíntesis: proceso por el cual las plantas...");
        assert_eq!(map.nodes.len(), 1);
        assert_eq!(map.nodes[0].label.chars().count(), 20);
        assert!(map.edges.is_empty());

        let empty = fallback_graph("");
        assert_eq!(empty.nodes[0].label, "Main Topic");
    }

    #[tokio::test]
    async fn tres_fallos_de_red_devuelven_el_fallback_sin_tocar() {
        let stub = StubCompleter::new(vec![Err("timeout".to_string())]);
        let map = generate_from_text(&stub, "Texto de la lección").await;

        // 1 intento + 2 reintentos, y el fallback exacto: sin aristas ni layout.
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        assert_eq!(map, fallback_graph("Texto de la lección"));
    }

    #[tokio::test]
    async fn json_invalido_degrada_al_fallback_normalizado() {
        let stub = StubCompleter::new(vec![Ok("esto no es JSON".to_string())]);
        let map = generate_from_text(&stub, "Tema central").await;

        // Sin reintentos: el normalizador garantiza un resultado válido.
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(map.nodes.len(), 1);
        assert_eq!(map.edges.len(), 1);
        assert_eq!(map.edges[0].label, "self");
        assert!(map.nodes[0].x.is_some() && map.nodes[0].y.is_some());
        assert!(map.nodes[0].bg.is_some());
    }

    #[tokio::test]
    async fn respuesta_valida_sale_colocada_y_coloreada() {
        let reply = r#"Claro, aquí está: {
            "summary": "Dos conceptos",
            "nodes": [
                { "id": "1", "label": "Tema", "level": 0 },
                { "id": "2", "label": "Detalle" }
            ],
            "edges": [{ "id": "e1", "source": "1", "target": "2", "label": "expands on" }]
        }"#;
        let stub = StubCompleter::new(vec![Ok(reply.to_string())]);
        let map = generate_from_text(&stub, "Tema").await;

        assert_eq!(map.summary, "Dos conceptos");
        assert_eq!(map.nodes.len(), 2);
        for n in &map.nodes {
            assert!(n.x.is_some() && n.y.is_some(), "nodo {} sin posición", n.id);
            assert!(n.bg.is_some() && n.text.is_some());
        }
        // Raíz al centro del lienzo.
        assert_eq!(map.nodes[0].x, Some(layout::CENTER_X));
        assert_eq!(map.nodes[0].y, Some(layout::CENTER_Y));
    }

    #[tokio::test]
    async fn agente_devuelve_error_ante_respuesta_no_interpretable() {
        let stub = StubCompleter::new(vec![Ok("no hay JSON aquí".to_string())]);
        let reply = ask_mindmap_agent(
            &stub,
            "añade un nodo",
            "texto",
            &serde_json::json!([]),
            &serde_json::json!([]),
        )
        .await
        .unwrap();
        assert!(matches!(reply, AgentReply::Error { .. }));
    }

    #[tokio::test]
    async fn agente_acepta_explicacion_y_update() {
        let stub = StubCompleter::new(vec![Ok(
            r#"{ "type": "explanation", "message": "Este nodo resume el tema." }"#.to_string(),
        )]);
        let reply = ask_mindmap_agent(
            &stub,
            "explica",
            "texto",
            &serde_json::json!([]),
            &serde_json::json!([]),
        )
        .await
        .unwrap();
        assert!(matches!(reply, AgentReply::Explanation { .. }));

        let stub = StubCompleter::new(vec![Ok(
            r#"{ "type": "update", "message": "Añadido.", "nodes": [], "edges": [] }"#.to_string(),
        )]);
        let reply = ask_mindmap_agent(
            &stub,
            "añade",
            "texto",
            &serde_json::json!([]),
            &serde_json::json!([]),
        )
        .await
        .unwrap();
        assert!(matches!(reply, AgentReply::Update { .. }));
    }
}
