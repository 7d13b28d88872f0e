use std::sync::Arc;

use neo4rs::Graph;

use crate::{config::AppConfig, llm::LlmManager};

/// Estado compartido entre todos los handlers de la API.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub graph: Arc<Graph>,
    pub llm_manager: LlmManager,
}
