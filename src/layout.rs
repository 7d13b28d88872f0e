//! Motor de layout radial para mapas mentales.
//!
//! Layout fijo, no dirigido por fuerzas: la raíz al centro del lienzo,
//! las ramas principales en un círculo y las sub-ramas en arcos alrededor
//! de su padre. Determinista: la misma entrada (mismo orden de nodos y
//! aristas) produce exactamente las mismas coordenadas.

use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::models::{MindMapEdge, MindMapNode};

pub const CENTER_X: f64 = 500.0;
pub const CENTER_Y: f64 = 350.0;

const MAIN_RADIUS: f64 = 220.0;
const SUB_RADIUS: f64 = 120.0;
const SUB_SUB_RADIUS: f64 = 80.0;
// Anillo para nodos desconectados o más profundos que el nivel 3.
const FALLBACK_RADIUS: f64 = MAIN_RADIUS + 100.0;

/// Paleta suave de colores (fondo, texto) indexada por `level % 8`.
pub const LEVEL_COLORS: [(&str, &str); 8] = [
    ("#ffe082", "#795548"),
    ("#b3e5fc", "#01579b"),
    ("#c8e6c9", "#2e7d32"),
    ("#f8bbd0", "#ad1457"),
    ("#d1c4e9", "#4527a0"),
    ("#fff9c4", "#fbc02d"),
    ("#e0e0e0", "#424242"),
    ("#ffccbc", "#bf360c"),
];

/// Asigna niveles jerárquicos por recorrido en anchura desde la raíz.
///
/// Raíz = primer nodo sin arista entrante (desempate por orden de
/// inserción). Si no existe (grafo totalmente cíclico), el primer nodo
/// queda a nivel 0 y el resto a 1 como caso degenerado. Los nodos no
/// alcanzables desde la raíz quedan a nivel 1.
pub fn assign_levels(nodes: &mut [MindMapNode], edges: &[MindMapEdge]) {
    let root_idx = nodes
        .iter()
        .position(|n| !edges.iter().any(|e| e.target == n.id));

    let Some(root_idx) = root_idx else {
        for (i, node) in nodes.iter_mut().enumerate() {
            if node.level.is_none() {
                node.level = Some(if i == 0 { 0 } else { 1 });
            }
        }
        return;
    };

    nodes[root_idx].level = Some(0);
    let mut queue = VecDeque::from([root_idx]);

    while let Some(current) = queue.pop_front() {
        let current_id = nodes[current].id.clone();
        let current_level = nodes[current].level.unwrap_or(0);
        for edge in edges.iter().filter(|e| e.source == current_id) {
            if let Some(child) = nodes.iter().position(|n| n.id == edge.target) {
                if nodes[child].level.is_none() {
                    nodes[child].level = Some(current_level + 1);
                    queue.push_back(child);
                }
            }
        }
    }

    // Niveles todavía sin asignar (nodos inalcanzables) -> 1.
    for node in nodes.iter_mut() {
        if node.level.is_none() {
            node.level = Some(1);
        }
    }
}

/// Asigna coordenadas 2D a todos los nodos.
///
/// Tras esta llamada ningún nodo queda sin posición: los que el recorrido
/// jerárquico no cubre reciben una posición determinista sobre un anillo
/// exterior, en función de su índice en el array.
pub fn radial_arrange(nodes: &mut [MindMapNode], edges: &[MindMapEdge]) {
    if nodes.is_empty() {
        return;
    }
    assign_levels(nodes, edges);

    if let Some(root_idx) = nodes.iter().position(|n| n.level == Some(0)) {
        nodes[root_idx].x = Some(CENTER_X);
        nodes[root_idx].y = Some(CENTER_Y);

        let main_branches: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.level == Some(1))
            .map(|(i, _)| i)
            .collect();
        let angle_step = 2.0 * PI / (main_branches.len().max(1) as f64);

        for (i, &mi) in main_branches.iter().enumerate() {
            // Primera rama arriba, avanzando en sentido horario.
            let angle = i as f64 * angle_step - PI / 2.0;
            let main_x = CENTER_X + angle.cos() * MAIN_RADIUS;
            let main_y = CENTER_Y + angle.sin() * MAIN_RADIUS;
            nodes[mi].x = Some(main_x);
            nodes[mi].y = Some(main_y);
            let main_id = nodes[mi].id.clone();

            let sub_branches: Vec<usize> = nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| {
                    n.level == Some(2)
                        && edges.iter().any(|e| e.source == main_id && e.target == n.id)
                })
                .map(|(idx, _)| idx)
                .collect();
            let sub_step = PI / (sub_branches.len().max(1) as f64 + 1.0);

            for (j, &si) in sub_branches.iter().enumerate() {
                // Arco de π radianes centrado en el ángulo saliente del padre.
                let sub_angle = angle - PI / 2.0 + (j as f64 + 1.0) * sub_step;
                let sub_x = main_x + sub_angle.cos() * SUB_RADIUS;
                let sub_y = main_y + sub_angle.sin() * SUB_RADIUS;
                nodes[si].x = Some(sub_x);
                nodes[si].y = Some(sub_y);
                let sub_id = nodes[si].id.clone();

                let sub_sub_branches: Vec<usize> = nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| {
                        n.level == Some(3)
                            && edges.iter().any(|e| e.source == sub_id && e.target == n.id)
                    })
                    .map(|(idx, _)| idx)
                    .collect();
                let sub_sub_step = PI / (sub_sub_branches.len().max(1) as f64 + 1.0);

                for (k, &ssi) in sub_sub_branches.iter().enumerate() {
                    let sub_sub_angle = sub_angle - PI / 2.0 + (k as f64 + 1.0) * sub_sub_step;
                    nodes[ssi].x = Some(sub_x + sub_sub_angle.cos() * SUB_SUB_RADIUS);
                    nodes[ssi].y = Some(sub_y + sub_sub_angle.sin() * SUB_SUB_RADIUS);
                }
            }
        }
    }

    // Totalidad: posición determinista para cualquier nodo sin colocar.
    for (i, node) in nodes.iter_mut().enumerate() {
        if node.x.is_none() || node.y.is_none() {
            node.x = Some(CENTER_X + (i as f64).cos() * FALLBACK_RADIUS);
            node.y = Some(CENTER_Y + (i as f64).sin() * FALLBACK_RADIUS);
        }
    }
}

/// Colorea cada nodo según su nivel, ciclando sobre la paleta.
pub fn apply_palette(nodes: &mut [MindMapNode]) {
    for node in nodes.iter_mut() {
        let (bg, text) = LEVEL_COLORS[node.level.unwrap_or(0) as usize % LEVEL_COLORS.len()];
        node.bg = Some(bg.to_string());
        node.text = Some(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, label: &str) -> MindMapNode {
        MindMapNode::new(id, label)
    }

    fn edge(id: &str, source: &str, target: &str) -> MindMapEdge {
        MindMapEdge {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            label: "relates to".to_string(),
        }
    }

    fn sample() -> (Vec<MindMapNode>, Vec<MindMapEdge>) {
        let nodes = vec![
            node("r", "Raíz"),
            node("a", "Rama A"),
            node("b", "Rama B"),
            node("a1", "Sub A1"),
            node("a1x", "Detalle"),
        ];
        let edges = vec![
            edge("e1", "r", "a"),
            edge("e2", "r", "b"),
            edge("e3", "a", "a1"),
            edge("e4", "a1", "a1x"),
        ];
        (nodes, edges)
    }

    #[test]
    fn niveles_por_bfs_desde_la_raiz() {
        let (mut nodes, edges) = sample();
        assign_levels(&mut nodes, &edges);
        assert_eq!(nodes[0].level, Some(0));
        assert_eq!(nodes[1].level, Some(1));
        assert_eq!(nodes[2].level, Some(1));
        assert_eq!(nodes[3].level, Some(2));
        assert_eq!(nodes[4].level, Some(3));
    }

    #[test]
    fn grafo_ciclico_usa_el_caso_degenerado() {
        let mut nodes = vec![node("a", "A"), node("b", "B"), node("c", "C")];
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "c"),
            edge("e3", "c", "a"),
        ];
        assign_levels(&mut nodes, &edges);
        assert_eq!(nodes[0].level, Some(0));
        assert_eq!(nodes[1].level, Some(1));
        assert_eq!(nodes[2].level, Some(1));
    }

    #[test]
    fn nodos_inalcanzables_quedan_a_nivel_uno() {
        let mut nodes = vec![node("r", "Raíz"), node("isla", "Isla")];
        let edges = vec![edge("e1", "r", "r2-inexistente")];
        assign_levels(&mut nodes, &edges);
        assert_eq!(nodes[0].level, Some(0));
        assert_eq!(nodes[1].level, Some(1));
    }

    #[test]
    fn raiz_al_centro_y_ramas_en_circulo() {
        let (mut nodes, edges) = sample();
        radial_arrange(&mut nodes, &edges);

        assert_eq!(nodes[0].x, Some(CENTER_X));
        assert_eq!(nodes[0].y, Some(CENTER_Y));

        // Primera rama principal en la vertical superior (ángulo -π/2).
        let ax = nodes[1].x.unwrap();
        let ay = nodes[1].y.unwrap();
        assert!((ax - CENTER_X).abs() < 1e-9);
        assert!((ay - (CENTER_Y - 220.0)).abs() < 1e-9);

        // Distancia al centro = radio principal para toda rama de nivel 1.
        let bx = nodes[2].x.unwrap();
        let by = nodes[2].y.unwrap();
        let dist = ((bx - CENTER_X).powi(2) + (by - CENTER_Y).powi(2)).sqrt();
        assert!((dist - 220.0).abs() < 1e-9);
    }

    #[test]
    fn determinismo_bit_a_bit() {
        let (mut first, edges) = sample();
        let (mut second, _) = sample();
        radial_arrange(&mut first, &edges);
        radial_arrange(&mut second, &edges);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.x.unwrap().to_bits(), b.x.unwrap().to_bits());
            assert_eq!(a.y.unwrap().to_bits(), b.y.unwrap().to_bits());
        }
    }

    #[test]
    fn totalidad_incluso_con_ciclos_y_desconectados() {
        let mut nodes = vec![
            node("a", "A"),
            node("b", "B"),
            node("suelto", "Desconectado"),
        ];
        let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "a")];
        radial_arrange(&mut nodes, &edges);
        for n in &nodes {
            assert!(n.x.is_some() && n.y.is_some(), "nodo {} sin posición", n.id);
        }
    }

    #[test]
    fn nodo_sin_cobertura_cae_al_anillo_exterior() {
        // Nivel 4: el recorrido jerárquico no lo coloca.
        let mut nodes = vec![
            node("r", "Raíz"),
            node("a", "A"),
            node("b", "B"),
            node("c", "C"),
            node("d", "Profundo"),
        ];
        let edges = vec![
            edge("e1", "r", "a"),
            edge("e2", "a", "b"),
            edge("e3", "b", "c"),
            edge("e4", "c", "d"),
        ];
        radial_arrange(&mut nodes, &edges);
        let d = &nodes[4];
        let expected_x = CENTER_X + (4.0_f64).cos() * 320.0;
        let expected_y = CENTER_Y + (4.0_f64).sin() * 320.0;
        assert_eq!(d.x, Some(expected_x));
        assert_eq!(d.y, Some(expected_y));
    }

    #[test]
    fn paleta_por_nivel_modulo_ocho() {
        let mut nodes: Vec<MindMapNode> = (0..10)
            .map(|i| {
                let mut n = node(&i.to_string(), "n");
                n.level = Some(i);
                n
            })
            .collect();
        apply_palette(&mut nodes);
        assert_eq!(nodes[0].bg.as_deref(), Some("#ffe082"));
        assert_eq!(nodes[8].bg.as_deref(), Some("#ffe082"));
        assert_eq!(nodes[9].bg.as_deref(), Some("#b3e5fc"));
    }
}
