//! Taxonomía de errores de la aplicación.
//!
//! Cuatro familias con semántica distinta de cara al caller:
//!   - `Validation`: entrada del caller malformada. Se rechaza sin reintentos.
//!   - `Upstream`: servicio externo (LLM, vector store, Neo4j) caído o con
//!     error. En generación de mapas se reintenta con fallback; en RAG se
//!     propaga porque no existe un contenido de respaldo seguro.
//!   - `Parse`: el servicio externo devolvió algo no parseable. En la
//!     práctica queda absorbido por la política de reintentos de generación.
//!   - `NotFound`: nota/mapa/chat inexistente. Se propaga sin reintentos.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Entrada inválida: {0}")]
    Validation(String),

    #[error("Servicio externo falló: {0}")]
    Upstream(String),

    #[error("Respuesta externa no parseable: {0}")]
    Parse(String),

    #[error("No encontrado: {0}")]
    NotFound(String),

    #[error("Error interno: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Parse(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// Un fallo de Neo4j es, para el caller, un servicio externo caído.
impl From<neo4rs::Error> for AppError {
    fn from(e: neo4rs::Error) -> Self {
        AppError::Upstream(format!("Neo4j: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_por_familia() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Upstream("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
