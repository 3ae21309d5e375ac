use crate::config::GradingSettings;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_exists, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const MAX_UPSERT_ENTRIES: usize = 5000;

#[derive(Debug, Clone, PartialEq)]
enum GradeEdit {
    Score(f64),
    Absent,
    Clear,
}

fn parse_entry(
    entry: &serde_json::Value,
    settings: &GradingSettings,
) -> Result<(String, GradeEdit), String> {
    let Some(obj) = entry.as_object() else {
        return Err("entries must be objects".to_string());
    };
    let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
        return Err("entry missing studentId".to_string());
    };
    let is_absent = match obj.get("isAbsent") {
        None => false,
        Some(v) if v.is_null() => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| "isAbsent must be a boolean".to_string())?,
    };
    if is_absent {
        return Ok((student_id.to_string(), GradeEdit::Absent));
    }
    match obj.get("score") {
        None => Ok((student_id.to_string(), GradeEdit::Clear)),
        Some(v) if v.is_null() => Ok((student_id.to_string(), GradeEdit::Clear)),
        Some(v) => {
            let Some(score) = v.as_f64().filter(|n| n.is_finite()) else {
                return Err("score must be a number or null".to_string());
            };
            if score < 0.0 || score > settings.scale_max {
                return Err(format!(
                    "score must be within [0, {}]",
                    settings.scale_max
                ));
            }
            Ok((student_id.to_string(), GradeEdit::Score(score)))
        }
    }
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sequence_id = match required_str(req, "sequenceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "entries must be an array", None);
    };
    if entries.len() > MAX_UPSERT_ENTRIES {
        return err(
            &req.id,
            "bad_params",
            format!("at most {} entries per call", MAX_UPSERT_ENTRIES),
            Some(json!({ "count": entries.len() })),
        );
    }

    let classroom_id: Option<String> = match conn
        .query_row(
            "SELECT classroom_id FROM subjects WHERE id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(classroom_id) = classroom_id else {
        return err(&req.id, "not_found", "subject not found", None);
    };
    if let Err(e) = ensure_exists(conn, req, "sequences", &sequence_id, "sequence") {
        return e;
    }
    let settings = match GradingSettings::load(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let roster: HashSet<String> = {
        let mut stmt = match conn.prepare("SELECT id FROM students WHERE classroom_id = ?") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let ids = stmt
            .query_map([&classroom_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>());
        match ids {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    // Validate everything before writing anything.
    let mut edits: Vec<(String, GradeEdit)> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let (student_id, edit) = match parse_entry(entry, &settings) {
            Ok(v) => v,
            Err(msg) => return err(&req.id, "bad_params", msg, Some(json!({ "index": i }))),
        };
        if !roster.contains(&student_id) {
            return err(
                &req.id,
                "bad_params",
                "student is not in this subject's classroom",
                Some(json!({ "index": i, "studentId": student_id })),
            );
        }
        edits.push((student_id, edit));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let now = chrono::Utc::now().to_rfc3339();
    let mut upserted = 0_usize;
    let mut cleared = 0_usize;
    for (student_id, edit) in &edits {
        let res = match edit {
            GradeEdit::Clear => tx
                .execute(
                    "DELETE FROM grades WHERE student_id = ? AND subject_id = ? AND sequence_id = ?",
                    (student_id, &subject_id, &sequence_id),
                )
                .map(|n| cleared += n),
            GradeEdit::Score(_) | GradeEdit::Absent => {
                let (score, is_absent) = match edit {
                    GradeEdit::Score(v) => (Some(*v), 0_i64),
                    _ => (None, 1_i64),
                };
                tx.execute(
                    "INSERT INTO grades(id, student_id, subject_id, sequence_id, score, is_absent, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(student_id, subject_id, sequence_id) DO UPDATE SET
                       score = excluded.score,
                       is_absent = excluded.is_absent,
                       updated_at = excluded.updated_at",
                    (
                        Uuid::new_v4().to_string(),
                        student_id,
                        &subject_id,
                        &sequence_id,
                        score,
                        is_absent,
                        &now,
                    ),
                )
                .map(|_| upserted += 1)
            }
        };
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "studentId": student_id })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    debug!(subject_id = %subject_id, sequence_id = %sequence_id, upserted, cleared, "grades written");
    ok(&req.id, json!({ "upserted": upserted, "cleared": cleared }))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT g.student_id, g.subject_id, g.sequence_id, g.score, g.is_absent, g.updated_at
         FROM grades g
         JOIN subjects su ON su.id = g.subject_id
         JOIN sequences sq ON sq.id = g.sequence_id
         WHERE su.classroom_id = ? AND sq.term_id = ?
         ORDER BY su.sort_order, sq.sort_order, g.student_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&classroom_id, &term_id), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "sequenceId": r.get::<_, String>(2)?,
                "score": r.get::<_, Option<f64>>(3)?,
                "isAbsent": r.get::<_, i64>(4)? != 0,
                "updatedAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        _ => None,
    }
}
