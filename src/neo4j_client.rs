use crate::config::AppConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints básicos para las etiquetas usadas en el grafo:
/// :Note, :Upload, :MindMap, :Chat y :Chunk.
///
/// El MindMap se identifica por una clave compuesta `user_id:note_id`
/// materializada en la propiedad `key` (un mapa por nota y usuario).
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // Note.id único
        "CREATE CONSTRAINT note_id IF NOT EXISTS
         FOR (n:Note)
         REQUIRE n.id IS UNIQUE",
        // Upload.id único
        "CREATE CONSTRAINT upload_id IF NOT EXISTS
         FOR (u:Upload)
         REQUIRE u.id IS UNIQUE",
        // MindMap.key único (user_id:note_id)
        "CREATE CONSTRAINT mindmap_key IF NOT EXISTS
         FOR (m:MindMap)
         REQUIRE m.key IS UNIQUE",
        // Chat.id único
        "CREATE CONSTRAINT chat_id IF NOT EXISTS
         FOR (c:Chat)
         REQUIRE c.id IS UNIQUE",
        // Chunk.id único
        "CREATE CONSTRAINT chunk_id IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.id IS UNIQUE",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado (constraints básicos creados).");
    Ok(())
}
