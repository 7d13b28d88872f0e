//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + política de repaso).

use std::env;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    /// Timeout por llamada al servicio de completions/embeddings, en segundos.
    pub llm_timeout_secs: u64,

    // Política de repaso espaciado. Son reglas de negocio, no constantes
    // universales, así que se dejan configurables por entorno.
    /// Intervalo (días) a partir del cual una nota se considera dominada.
    pub mastery_max_interval_days: i64,
    /// Atajo de dominio: con calidad 5 y un intervalo resultante >= este
    /// umbral, la nota también queda dominada.
    pub mastery_shortcut_days: i64,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_timeout_secs = parse_env_i64("LLM_TIMEOUT_SECS", 60)? as u64;

        let mastery_max_interval_days = parse_env_i64("MASTERY_MAX_INTERVAL_DAYS", 60)?;
        let mastery_shortcut_days = parse_env_i64("MASTERY_SHORTCUT_DAYS", 30)?;

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_timeout_secs,
            mastery_max_interval_days,
            mastery_shortcut_days,
        })
    }
}

fn parse_env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<i64>()
            .map_err(|_| anyhow!("Valor no numérico en {key}: {raw}")),
        Err(_) => Ok(default),
    }
}
