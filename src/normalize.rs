//! Validación y reparación de mapas mentales devueltos por el LLM.
//!
//! La salida del LLM se trata como un objeto arbitrario y posiblemente
//! malformado: `normalize` es una función total que, con un fallback no
//! vacío, siempre produce un grafo con al menos un nodo y una arista.
//! Nunca lanza; cada paso tolera campos ausentes o con tipo incorrecto.

use std::collections::HashSet;

use serde_json::Value;

use crate::models::{MindMapEdge, MindMapGraph, MindMapNode};

/// Intenta parsear JSON directamente; si falla, extrae el primer bloque
/// `{...}` (del primer `{` al último `}`) e intenta de nuevo.
pub fn safe_json_parse(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn trimmed_non_empty(v: &Value) -> Option<String> {
    let s = v.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// Equivalente al filtro de valores "falsy" sobre entradas de aristas.
fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn fallback_values<T: serde::Serialize>(items: &[T]) -> Vec<Value> {
    serde_json::to_value(items)
        .ok()
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
}

/// Normaliza un candidato arbitrario contra un grafo de respaldo válido.
///
/// Garantía: si `fallback` tiene al menos un nodo, la salida tiene al
/// menos un nodo y al menos una arista (auto-arista para grafos de un
/// solo nodo). La operación es idempotente.
pub fn normalize(candidate: &Value, fallback: &MindMapGraph) -> MindMapGraph {
    let obj = candidate.as_object();

    // 1-2) Nodos: del candidato si es un array; si no, los del fallback.
    let raw_nodes: Vec<Value> = obj
        .and_then(|o| o.get("nodes"))
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_else(|| fallback_values(&fallback.nodes));

    // 3) Nodos con id y label garantizados; level sólo si viene como
    //    entero no negativo (el layout asigna el resto). Coordenadas y
    //    colores previos se preservan.
    let nodes: Vec<MindMapNode> = raw_nodes
        .iter()
        .enumerate()
        .map(|(idx, n)| {
            let id = n
                .get("id")
                .and_then(value_to_string)
                .unwrap_or_else(|| (idx + 1).to_string());
            let label = n
                .get("label")
                .and_then(trimmed_non_empty)
                .unwrap_or_else(|| format!("Node {id}"));
            MindMapNode {
                id,
                label,
                level: n.get("level").and_then(|v| v.as_u64()).map(|l| l as u32),
                x: n.get("x").and_then(|v| v.as_f64()),
                y: n.get("y").and_then(|v| v.as_f64()),
                bg: n.get("bg").and_then(trimmed_non_empty),
                text: n.get("text").and_then(trimmed_non_empty),
            }
        })
        .collect();

    let first_node_id = nodes
        .first()
        .map(|n| n.id.clone())
        .unwrap_or_else(|| "1".to_string());

    // 4) Aristas: del candidato si es un array; si el candidato no era un
    //    objeto, las del fallback; en otro caso, vacío.
    let raw_edges: Vec<Value> = match obj {
        Some(o) => o
            .get("edges")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        None => fallback_values(&fallback.edges),
    };

    // 5) Rellenar campos ausentes, descartando entradas nulas/falsy.
    let mut edges: Vec<MindMapEdge> = raw_edges
        .iter()
        .filter(|v| !is_falsy(v))
        .enumerate()
        .map(|(i, e)| {
            let id = e
                .get("id")
                .and_then(value_to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("e{}", i + 1));
            let source = e
                .get("source")
                .and_then(value_to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| first_node_id.clone());
            let target = e
                .get("target")
                .and_then(value_to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| source.clone());
            let label = e
                .get("label")
                .and_then(trimmed_non_empty)
                .unwrap_or_else(|| "relates to".to_string());
            MindMapEdge {
                id,
                source,
                target,
                label,
            }
        })
        .collect();

    // Toda arista debe referenciar nodos existentes: una fuente colgante
    // se redirige al primer nodo y un destino colgante a su fuente.
    let known_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in &mut edges {
        if !known_ids.contains(edge.source.as_str()) {
            edge.source = first_node_id.clone();
        }
        if !known_ids.contains(edge.target.as_str()) {
            edge.target = edge.source.clone();
        }
    }

    // 6) Sin aristas: sintetizar unas seguras.
    if edges.is_empty() {
        if nodes.len() == 1 {
            // Auto-arista si sólo hay un nodo.
            let id = &nodes[0].id;
            edges.push(MindMapEdge {
                id: format!("e-{id}-{id}"),
                source: id.clone(),
                target: id.clone(),
                label: "self".to_string(),
            });
        } else if nodes.len() > 1 {
            // Raíz = nodo con level 0 si existe, si no el primero;
            // conectar raíz -> resto.
            let root_id = nodes
                .iter()
                .find(|n| n.level == Some(0))
                .map(|n| n.id.clone())
                .unwrap_or_else(|| first_node_id.clone());
            let mut counter = 1;
            for node in &nodes {
                if node.id == root_id {
                    continue;
                }
                let label = if node.label.is_empty() {
                    "relates to".to_string()
                } else {
                    let head: Vec<&str> = node.label.split_whitespace().take(4).collect();
                    format!("relates to {}", head.join(" "))
                };
                edges.push(MindMapEdge {
                    id: format!("e-{counter}-{root_id}-{}", node.id),
                    source: root_id.clone(),
                    target: node.id.clone(),
                    label,
                });
                counter += 1;
            }
        }
    }

    // 7) Resumen: el del candidato si es una cadena no vacía.
    let summary = obj
        .and_then(|o| o.get("summary"))
        .and_then(trimmed_non_empty)
        .unwrap_or_else(|| fallback.summary.clone());

    MindMapGraph {
        nodes,
        edges,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fallback() -> MindMapGraph {
        MindMapGraph {
            nodes: vec![MindMapNode::new("1", "Main Topic")],
            edges: vec![],
            summary: "Auto-generated fallback mindmap".to_string(),
        }
    }

    #[test]
    fn totalidad_con_entradas_degeneradas() {
        let cases = vec![
            Value::Null,
            json!({}),
            json!([]),
            json!(42),
            json!("texto plano"),
            json!({ "nodes": "no-un-array", "edges": 7 }),
            json!({ "nodes": [null, {}, { "id": 3 }] }),
        ];
        for candidate in cases {
            let out = normalize(&candidate, &fallback());
            assert!(!out.nodes.is_empty(), "sin nodos para {candidate}");
            assert!(!out.edges.is_empty(), "sin aristas para {candidate}");
        }
    }

    #[test]
    fn idempotencia() {
        let candidates = vec![
            Value::Null,
            json!({ "nodes": [{ "label": "  A  " }, { "id": "b", "label": "B", "level": 0 }] }),
            json!({
                "nodes": [{ "id": "1", "label": "Uno" }, { "id": "2", "label": "Dos" }],
                "edges": [{ "source": "1", "target": "2" }],
                "summary": "resumen"
            }),
        ];
        for candidate in candidates {
            let once = normalize(&candidate, &fallback());
            let value = serde_json::to_value(&once).unwrap();
            let twice = normalize(&value, &fallback());
            assert_eq!(once, twice, "no idempotente para {candidate}");
        }
    }

    #[test]
    fn nodo_unico_recibe_auto_arista() {
        let out = normalize(&json!({ "nodes": [{ "id": "n1", "label": "Solo" }] }), &fallback());
        assert_eq!(out.edges.len(), 1);
        let edge = &out.edges[0];
        assert_eq!(edge.source, "n1");
        assert_eq!(edge.target, "n1");
        assert_eq!(edge.label, "self");
    }

    #[test]
    fn varios_nodos_sin_aristas_conectan_desde_la_raiz() {
        let candidate = json!({
            "nodes": [
                { "id": "a", "label": "Hoja con una etiqueta bastante larga" },
                { "id": "r", "label": "Raíz", "level": 0 },
                { "id": "b", "label": "Otra hoja" }
            ]
        });
        let out = normalize(&candidate, &fallback());
        assert_eq!(out.edges.len(), 2);
        for edge in &out.edges {
            assert_eq!(edge.source, "r");
        }
        // Etiqueta = "relates to" + primeras 4 palabras del destino.
        assert_eq!(out.edges[0].label, "relates to Hoja con una etiqueta");
        assert_eq!(out.edges[1].label, "relates to Otra hoja");
    }

    #[test]
    fn campos_de_arista_se_rellenan() {
        let candidate = json!({
            "nodes": [{ "id": "1", "label": "Uno" }, { "id": "2", "label": "Dos" }],
            "edges": [null, { "target": "2", "label": "   " }]
        });
        let out = normalize(&candidate, &fallback());
        assert_eq!(out.edges.len(), 1);
        let edge = &out.edges[0];
        assert_eq!(edge.id, "e1"); // el índice se calcula tras descartar nulos
        assert_eq!(edge.source, "1");
        assert_eq!(edge.target, "2");
        assert_eq!(edge.label, "relates to");
    }

    #[test]
    fn referencias_colgantes_se_reparan() {
        let candidate = json!({
            "nodes": [{ "id": "1", "label": "Uno" }, { "id": "2", "label": "Dos" }],
            "edges": [{ "id": "e1", "source": "99", "target": "fantasma", "label": "x" }]
        });
        let out = normalize(&candidate, &fallback());
        assert_eq!(out.edges[0].source, "1");
        assert_eq!(out.edges[0].target, "1");
    }

    #[test]
    fn resumen_cae_al_fallback() {
        let out = normalize(&json!({ "nodes": [{ "id": "1", "label": "A" }], "summary": "" }), &fallback());
        assert_eq!(out.summary, "Auto-generated fallback mindmap");

        let out = normalize(
            &json!({ "nodes": [{ "id": "1", "label": "A" }], "summary": "propio" }),
            &fallback(),
        );
        assert_eq!(out.summary, "propio");
    }

    #[test]
    fn ids_y_labels_por_defecto() {
        let candidate = json!({ "nodes": [{}, { "id": 7 }, { "label": "Con etiqueta" }] });
        let out = normalize(&candidate, &fallback());
        assert_eq!(out.nodes[0].id, "1");
        assert_eq!(out.nodes[0].label, "Node 1");
        assert_eq!(out.nodes[1].id, "7");
        assert_eq!(out.nodes[1].label, "Node 7");
        assert_eq!(out.nodes[2].id, "3");
        assert_eq!(out.nodes[2].label, "Con etiqueta");
    }
}
