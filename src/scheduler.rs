//! Planificador de repetición espaciada.
//!
//! El núcleo es puro: `compute_next_interval` y `review_outcome` no tocan
//! I/O. `apply_review` y `due_schedule` son el borde con Neo4j.
//!
//! Reglas: la calidad del repaso (5/3/1, derivada de Easy/Medium/Hard)
//! se mapea a un factor de facilidad (2.5/2.0/1.3). Si hubo fallos en la
//! sesión se aplica una única penalización plana de 0.8, independiente de
//! cuántos fallos fueran. El siguiente intervalo se redondea al entero
//! más cercano, con mínimo de 1 día.

use anyhow::Result;
use chrono::Utc;
use neo4rs::{query, Graph};
use tracing::info;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Difficulty, ScheduleEntry};
use crate::notes;

pub const MS_PER_DAY: i64 = 86_400_000;
/// Ventana de la vista de agenda: repasos pendientes en los próximos 30 días.
pub const SCHEDULE_WINDOW_DAYS: i64 = 30;

fn ease_factor(quality: u8) -> Option<f64> {
    match quality {
        5 => Some(2.5),
        3 => Some(2.0),
        1 => Some(1.3),
        _ => None,
    }
}

/// Siguiente intervalo de repaso en días.
///
/// Rechaza en el borde cualquier calidad fuera de {1, 3, 5}: el factor de
/// facilidad no está definido para otros valores.
pub fn compute_next_interval(
    prev_interval_days: f64,
    quality: u8,
    wrong_count: i64,
) -> AppResult<i64> {
    if prev_interval_days <= 0.0 {
        return Err(AppError::Validation(format!(
            "Intervalo previo no positivo: {prev_interval_days}"
        )));
    }
    if wrong_count < 0 {
        return Err(AppError::Validation(format!(
            "Contador de fallos negativo: {wrong_count}"
        )));
    }
    let mut ef = ease_factor(quality).ok_or_else(|| {
        AppError::Validation(format!(
            "Calidad de repaso inválida: {quality} (se espera 1, 3 o 5)"
        ))
    })?;
    if wrong_count > 0 {
        ef *= 0.8; // penalización plana por haber fallado, da igual cuántas veces
    }
    Ok(((prev_interval_days * ef).round() as i64).max(1))
}

/// Resultado de aplicar la política de fin de sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub interval_days: i64,
    pub next_due_ms: Option<i64>,
    pub mastered: bool,
}

/// Calcula el intervalo siguiente y decide si la nota queda dominada.
///
/// Dominada cuando el intervalo supera `max_interval_days`, o cuando la
/// calidad fue 5 y el intervalo resultante alcanza `shortcut_days`. Una
/// nota dominada sale del ciclo: `next_due_ms = None`.
pub fn review_outcome(
    prev_interval_days: i64,
    quality: u8,
    wrong_count: i64,
    now_ms: i64,
    max_interval_days: i64,
    shortcut_days: i64,
) -> AppResult<ReviewOutcome> {
    let interval_days = compute_next_interval(prev_interval_days as f64, quality, wrong_count)?;
    let mastered =
        interval_days > max_interval_days || (quality == 5 && interval_days >= shortcut_days);
    let next_due_ms = if mastered {
        None
    } else {
        Some(now_ms + interval_days * MS_PER_DAY)
    };
    Ok(ReviewOutcome {
        interval_days,
        next_due_ms,
        mastered,
    })
}

/// Aplica un resultado de sesión de repaso sobre una nota y lo persiste.
/// Devuelve la próxima fecha de repaso (None si quedó dominada).
pub async fn apply_review(
    graph: &Graph,
    cfg: &AppConfig,
    user_id: &str,
    note_id: &str,
    rating: Difficulty,
    wrong_count: i64,
    duration_ms: i64,
) -> AppResult<Option<i64>> {
    if duration_ms < 0 {
        return Err(AppError::Validation(format!(
            "Duración negativa: {duration_ms}"
        )));
    }

    let mut note = notes::fetch_note(graph, user_id, note_id).await?;

    let now_ms = Utc::now().timestamp_millis();
    let outcome = review_outcome(
        note.interval_days,
        rating.quality(),
        wrong_count,
        now_ms,
        cfg.mastery_max_interval_days,
        cfg.mastery_shortcut_days,
    )?;

    note.last_reviewed_ms = Some(now_ms);
    note.interval_days = outcome.interval_days;
    note.next_due_ms = outcome.next_due_ms;
    note.incorrect_count += wrong_count;
    note.total_time_ms += duration_ms;
    note.difficulty = rating;
    note.mastered = outcome.mastered;

    notes::save_review_state(graph, &note)
        .await
        .map_err(AppError::Internal)?;

    info!(
        "Repaso de nota {note_id}: intervalo {} días, dominada: {}",
        outcome.interval_days, outcome.mastered
    );
    Ok(outcome.next_due_ms)
}

/// Notas no dominadas con repaso pendiente en [ahora, ahora + 30 días],
/// ordenadas por fecha de vencimiento ascendente.
pub async fn due_schedule(graph: &Graph, user_id: &str) -> Result<Vec<ScheduleEntry>> {
    let now_ms = Utc::now().timestamp_millis();
    let until_ms = now_ms + SCHEDULE_WINDOW_DAYS * MS_PER_DAY;

    let mut cursor = graph
        .execute(
            query(
                "MATCH (n:Note {user_id: $user_id})
                 WHERE n.mastered = false AND n.next_due IS NOT NULL
                   AND n.next_due >= $from AND n.next_due <= $until
                 RETURN n.id AS note_id, n.title AS title,
                        n.next_due AS next_due, n.interval_days AS interval_days
                 ORDER BY n.next_due ASC",
            )
            .param("user_id", user_id)
            .param("from", now_ms)
            .param("until", until_ms),
        )
        .await?;

    let mut entries = Vec::new();
    while let Some(row) = cursor.next().await? {
        let (Some(note_id), Some(next_due_ms)) =
            (row.get::<String>("note_id"), row.get::<i64>("next_due"))
        else {
            continue;
        };
        entries.push(ScheduleEntry {
            note_id,
            title: row.get("title").unwrap_or_default(),
            next_due_ms,
            interval_days: row.get("interval_days").unwrap_or(1),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervalos_de_referencia() {
        assert_eq!(compute_next_interval(10.0, 5, 0).unwrap(), 25);
        // 2.5 * 0.8 = 2.0 -> 10 * 2.0
        assert_eq!(compute_next_interval(10.0, 5, 1).unwrap(), 20);
        // 4 * 1.3 = 5.2 -> redondea a 5
        assert_eq!(compute_next_interval(4.0, 1, 0).unwrap(), 5);
    }

    #[test]
    fn resultado_siempre_entero_positivo() {
        for prev in [0.5, 1.0, 2.0, 7.0, 10.0, 33.0, 365.0] {
            for quality in [1u8, 3, 5] {
                for wrong in [0i64, 1, 2, 10] {
                    let next = compute_next_interval(prev, quality, wrong).unwrap();
                    assert!(next >= 1, "prev={prev} q={quality} wrong={wrong}");
                }
            }
        }
    }

    #[test]
    fn calidad_invalida_se_rechaza_en_el_borde() {
        for quality in [0u8, 2, 4, 6, 255] {
            let err = compute_next_interval(10.0, quality, 0).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[test]
    fn entradas_negativas_se_rechazan() {
        assert!(matches!(
            compute_next_interval(0.0, 5, 0),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            compute_next_interval(10.0, 5, -1),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn penalizacion_plana_independiente_de_la_magnitud() {
        let one = compute_next_interval(10.0, 3, 1).unwrap();
        let many = compute_next_interval(10.0, 3, 50).unwrap();
        assert_eq!(one, many);
    }

    #[test]
    fn nota_facil_con_intervalo_largo_queda_dominada() {
        // 30 días * 2.5 = 75 > 60: sale del ciclo de repaso.
        let out = review_outcome(30, 5, 0, 1_000, 60, 30).unwrap();
        assert_eq!(out.interval_days, 75);
        assert!(out.mastered);
        assert_eq!(out.next_due_ms, None);
    }

    #[test]
    fn atajo_de_dominio_por_calidad_cinco() {
        // 12 * 2.5 = 30 >= 30 con calidad 5: dominada aunque no pase de 60.
        let out = review_outcome(12, 5, 0, 0, 60, 30).unwrap();
        assert_eq!(out.interval_days, 30);
        assert!(out.mastered);
    }

    #[test]
    fn repaso_normal_programa_proxima_fecha() {
        let now = 1_700_000_000_000;
        let out = review_outcome(10, 5, 0, now, 60, 30).unwrap();
        assert_eq!(out.interval_days, 25);
        assert!(!out.mastered);
        assert_eq!(out.next_due_ms, Some(now + 25 * MS_PER_DAY));
    }

    #[test]
    fn calidad_tres_no_activa_el_atajo() {
        // 20 * 2.0 = 40 >= 30, pero la calidad no es 5 y 40 <= 60.
        let out = review_outcome(20, 3, 0, 0, 60, 30).unwrap();
        assert_eq!(out.interval_days, 40);
        assert!(!out.mastered);
    }
}
