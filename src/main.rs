// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod error;
mod ingest;
mod layout;
mod llm;
mod mindmap;
mod models;
mod neo4j_client;
mod normalize;
mod notes;
mod rag;
mod scheduler;
mod vector_store;

use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar a Neo4j y asegurar esquemas
    let graph = neo4j_client::connect_from_config(&cfg)
        .await
        .expect("Error conectando a Neo4j");
    neo4j_client::ensure_schema(&graph)
        .await
        .expect("Error asegurando el esquema de Neo4j");
    vector_store::ensure_chunk_vector_index(&graph)
        .await
        .expect("Error asegurando el índice vectorial");

    // 4. Inicializar gestor de LLMs
    let llm_manager = llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager");

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        graph: Arc::new(graph),
        llm_manager,
    };

    // 6. Configurar el router de la API
    let app = api::create_router(app_state.clone()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto de escucha");
    info!("🚀 Servidor escuchando en http://{server_addr}");

    axum::serve(listener, app)
        .await
        .expect("El servidor terminó con error");

    info!("✅ Servidor cerrado correctamente.");
}
