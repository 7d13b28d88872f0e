//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El servicio se trata como poco fiable: puede devolver texto vacío,
//! JSON parcial o tardar demasiado. Cada llamada lleva timeout propio y
//! los orquestadores deciden la política de reintento.

use std::sync::OnceLock;
use std::time::Duration;

use crate::config::{AppConfig, LlmProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use rig::providers::openai;

/// Reintentos máximos por llamada generativa (cada intento es independiente).
pub const LLM_RETRY_LIMIT: u32 = 2;

/// Cliente OpenAI compartido a nivel de proceso, inicializado una sola vez.
fn openai_client() -> &'static openai::Client {
    static CLIENT: OnceLock<openai::Client> = OnceLock::new();
    CLIENT.get_or_init(openai::Client::from_env)
}

/// Resultado de un embedding de un chunk.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub text: String,
    pub vector: Vec<f64>,
}

/// Contrato mínimo del servicio de completion de texto. Los orquestadores
/// (mapas mentales, flashcards, RAG) dependen de este trait, no del
/// proveedor concreto, lo que permite sustituirlo en tests.
#[async_trait]
pub trait TextCompleter: Send + Sync {
    /// Envía `input` con el preámbulo dado y devuelve el texto de la respuesta.
    async fn complete(&self, preamble: &str, input: &str) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub timeout: Duration,
}

#[async_trait]
impl TextCompleter for LlmManager {
    async fn complete(&self, preamble: &str, input: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(preamble, input).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            timeout: Duration::from_secs(cfg.llm_timeout_secs),
        })
    }

    fn chat_model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    /// Calcula embeddings para una lista de (id, texto).
    ///
    /// Nota: sólo implementado para OpenAI. Para otros proveedores
    /// se podrían añadir ramas adicionales al `match`.
    pub async fn embed_chunks(
        &self,
        chunks: &[(String, String)],
    ) -> Result<Vec<EmbeddedChunk>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(chunks).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    /// Embedding de un único texto (la query del usuario, por ejemplo).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f64>> {
        let embedded = self
            .embed_chunks(&[("query".to_string(), text.to_string())])
            .await?;
        embedded
            .into_iter()
            .next()
            .map(|e| e.vector)
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la query"))
    }

    async fn embed_with_openai(
        &self,
        chunks: &[(String, String)],
    ) -> Result<Vec<EmbeddedChunk>> {
        use rig::providers::openai::TEXT_EMBEDDING_3_SMALL;
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai_client();

        // Modelo de embeddings: config o default
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };

        let embedding_model = client.embedding_model(model_name);

        // Extraemos sólo los textos
        let texts: Vec<String> = chunks.iter().map(|(_, text)| text.clone()).collect();

        // Embeddings en bloque (.embed_texts viene de EmbeddingModel)
        let embeddings = tokio::time::timeout(self.timeout, embedding_model.embed_texts(texts))
            .await
            .map_err(|_| anyhow!("Timeout generando embeddings"))??;

        if embeddings.len() != chunks.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de chunks ({})",
                embeddings.len(),
                chunks.len()
            ));
        }

        // Reconstruimos EmbeddedChunk con id + texto + vector
        let mut result = Vec::new();
        for ((id, text), emb) in chunks.iter().zip(embeddings.iter()) {
            result.push(EmbeddedChunk {
                id: id.clone(),
                text: text.clone(),
                vector: emb.vec.clone(),
            });
        }

        Ok(result)
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn complete_with_openai(&self, preamble: &str, input: &str) -> Result<String> {
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai_client();

        let agent = client
            .agent(self.chat_model_name())
            .preamble(preamble)
            .build();

        let answer = tokio::time::timeout(self.timeout, agent.prompt(input))
            .await
            .map_err(|_| anyhow!("Timeout esperando al servicio de completion"))??;
        Ok(answer)
    }
}
