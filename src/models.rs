//! Modelos de dominio (notas repasables, mapas mentales, chats y chunks).

use serde::{Deserialize, Serialize};

/// Dificultad percibida de un repaso. El caller la mapea a calidad
/// numérica (Easy→5, Medium→3, Hard→1) antes de entrar al planificador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn quality(self) -> u8 {
        match self {
            Difficulty::Easy => 5,
            Difficulty::Medium => 3,
            Difficulty::Hard => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Easy" => Some(Difficulty::Easy),
            "Medium" => Some(Difficulty::Medium),
            "Hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

/// Tarjeta de memoria pregunta/respuesta generada a partir de una nota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Representa un nodo (:Note) en Neo4j: una nota de estudio con su estado
/// de repetición espaciada.
///
/// Invariante: `next_due_ms` es `None` si y sólo si `mastered == true`
/// (la nota salió del ciclo de repaso). En caso contrario,
/// `next_due = last_reviewed + interval_days` en días.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub category: String,
    pub extracted_text: String,
    pub qa: Vec<QaPair>,
    pub processed: bool,
    pub interval_days: i64,
    pub last_reviewed_ms: Option<i64>,
    pub next_due_ms: Option<i64>,
    pub incorrect_count: i64,
    pub total_time_ms: i64,
    pub difficulty: Difficulty,
    pub mastered: bool,
}

/// Entrada de la vista de agenda: notas con repaso pendiente en la ventana
/// [ahora, ahora + 30 días].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub note_id: String,
    pub title: String,
    pub next_due_ms: i64,
    pub interval_days: i64,
}

/// Representa un texto subido por el usuario, pendiente de convertirse en nota.
#[derive(Debug, Clone)]
pub struct Upload {
    pub id: String,
    pub owner_id: String,
    pub text: String,
}

// --- Mapa mental ---

/// Nodo de un mapa mental. `level`, coordenadas y colores son opcionales
/// hasta que el motor de layout los asigna; tras `radial_arrange` toda
/// posición queda definida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MindMapNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            level: None,
            x: None,
            y: None,
            bg: None,
            text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
}

/// Grafo de mapa mental validado: tras la normalización siempre tiene al
/// menos un nodo y una arista (auto-arista si el grafo es unitario).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapGraph {
    pub nodes: Vec<MindMapNode>,
    pub edges: Vec<MindMapEdge>,
    pub summary: String,
}

// --- Chat ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub created_at_ms: i64,
}

/// Transcripción de conversación de un usuario. Sólo crece: los
/// orquestadores añaden turnos, nunca se reescriben los existentes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calidad_por_dificultad() {
        assert_eq!(Difficulty::Easy.quality(), 5);
        assert_eq!(Difficulty::Medium.quality(), 3);
        assert_eq!(Difficulty::Hard.quality(), 1);
    }

    #[test]
    fn dificultad_parse_roundtrip() {
        for d in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            assert_eq!(Difficulty::parse(d.as_str()), Some(d));
        }
        assert_eq!(Difficulty::parse("easy"), None);
    }
}
