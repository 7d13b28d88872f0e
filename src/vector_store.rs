//! Integración con Neo4j como vector store para los `:Chunk` de notas.
//!
//! Cada chunk pertenece a un usuario y a una nota (`user_id`, `note_id`,
//! `chunk_index`). El índice vectorial es global; el espacio por-usuario
//! se consigue post-filtrando por `user_id` sobre una sobre-búsqueda.
//!
//! API pública:
//!   - `ensure_chunk_vector_index(&Graph)`
//!   - `upsert_chunk(&Graph, &ChunkRecord)`
//!   - `search_user_chunks(&Graph, &str, &[f64], usize)`.

use anyhow::{anyhow, Result};
use neo4rs::{query, Graph};
use tracing::info;

const INDEX_NAME: &str = "chunkEmbeddingIndex";
// Factor de sobre-búsqueda: el índice no sabe filtrar por usuario, así
// que pedimos más vecinos y filtramos después.
const OVERFETCH: usize = 10;

/// Chunk persistido en el vector store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub user_id: String,
    pub note_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f64>,
}

/// Chunk recuperado por similitud, con su metadato de procedencia.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub score: f64,
    pub text: String,
    pub note_id: String,
    pub chunk_index: i64,
}

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista.
pub async fn ensure_chunk_vector_index(graph: &Graph) -> Result<()> {
    // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", INDEX_NAME),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{INDEX_NAME}' ya existe.");
        return Ok(());
    }

    // Crear índice vectorial para :Chunk(embedding)
    let cypher = format!(
        "\
CREATE VECTOR INDEX {INDEX_NAME}
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: 1536,
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{INDEX_NAME}' creado.");

    Ok(())
}

/// Inserta o actualiza un chunk con su embedding y metadatos.
pub async fn upsert_chunk(graph: &Graph, chunk: &ChunkRecord) -> Result<()> {
    graph
        .run(
            query(
                "MERGE (c:Chunk {id: $id})
                 SET c.user_id = $user_id, c.note_id = $note_id,
                     c.chunk_index = $chunk_index, c.text = $text,
                     c.embedding = $embedding",
            )
            .param("id", chunk.id.clone())
            .param("user_id", chunk.user_id.clone())
            .param("note_id", chunk.note_id.clone())
            .param("chunk_index", chunk.chunk_index)
            .param("text", chunk.text.clone())
            .param("embedding", chunk.embedding.clone()),
        )
        .await?;
    Ok(())
}

/// Búsqueda vectorial (semantic search) restringida a los chunks de un
/// usuario, ordenada por similitud descendente y acotada a `top_k`.
pub async fn search_user_chunks(
    graph: &Graph,
    user_id: &str,
    query_vec: &[f64],
    top_k: usize,
) -> Result<Vec<RetrievedChunk>> {
    let fetch_k = (top_k.max(1) * OVERFETCH) as i64;

    let mut cursor = graph
        .execute(
            query(
                "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                 YIELD node, score
                 WHERE node.user_id = $user_id
                 RETURN score, node.text AS text, node.note_id AS note_id,
                        node.chunk_index AS chunk_index
                 ORDER BY score DESC",
            )
            .param("index_name", INDEX_NAME)
            .param("k", fetch_k)
            .param("embedding", query_vec.to_vec())
            .param("user_id", user_id),
        )
        .await?;

    let mut output = Vec::new();
    while let Some(row) = cursor.next().await? {
        if output.len() >= top_k {
            break;
        }
        let score: f64 = row
            .get("score")
            .ok_or_else(|| anyhow!("Falta campo 'score' en resultado de Neo4j"))?;
        let text: String = row
            .get("text")
            .ok_or_else(|| anyhow!("Falta campo 'text' en resultado de Neo4j"))?;
        let note_id: String = row.get("note_id").unwrap_or_default();
        let chunk_index: i64 = row.get("chunk_index").unwrap_or_default();

        output.push(RetrievedChunk {
            score,
            text,
            note_id,
            chunk_index,
        });
    }

    Ok(output)
}
