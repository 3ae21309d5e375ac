use crate::calc::{RankEntry, SubjectStats};
use crate::config::GradingSettings;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report_card::{self, ClassStats, ReportCard, ReportCardInput, StudentReport};
use crate::snapshot::{self, Period};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// One student's card plus the class context printed alongside it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentCard {
    classroom_id: String,
    term_id: String,
    sequence_ids: Vec<String>,
    student_id: String,
    report: StudentReport,
    rank: Option<RankEntry>,
    class_size: usize,
    class_stats: ClassStats,
    summary: BTreeMap<String, SubjectStats>,
}

fn parse_period(req: &Request) -> Result<Period, serde_json::Value> {
    match (optional_str(req, "termId"), optional_str(req, "sequenceId")) {
        (Some(t), None) => Ok(Period::Term(t)),
        (None, Some(s)) => Ok(Period::Sequence(s)),
        (Some(_), Some(_)) => Err(err(
            &req.id,
            "bad_params",
            "pass either termId or sequenceId, not both",
            None,
        )),
        (None, None) => Err(err(&req.id, "bad_params", "missing termId", None)),
    }
}

fn to_result(req: &Request, value: Result<serde_json::Value, serde_json::Error>) -> serde_json::Value {
    match value {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

fn compute_from_workspace(state: &AppState, req: &Request) -> Result<ReportCard, serde_json::Value> {
    let conn = db_conn(state, req)?;
    let classroom_id = required_str(req, "classroomId")?;
    let period = parse_period(req)?;
    let settings = GradingSettings::load(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let input = snapshot::load_report_card_input(conn, &classroom_id, &period)
        .map_err(|e| calc_err(&req.id, e))?;
    report_card::compute_report_card(&input, &settings).map_err(|e| calc_err(&req.id, e))
}

fn handle_report_card_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    match compute_from_workspace(state, req) {
        Ok(card) => to_result(req, serde_json::to_value(&card)),
        Err(e) => e,
    }
}

fn handle_report_card_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut card = match compute_from_workspace(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(report) = card.students_report.remove(&student_id) else {
        return err(
            &req.id,
            "not_found",
            "student is not an active member of this classroom",
            Some(json!({ "studentId": student_id })),
        );
    };
    let rank = card.global_ranks.get(&student_id).copied();
    let student_card = StudentCard {
        classroom_id: card.classroom_id,
        term_id: card.term_id,
        sequence_ids: card.sequence_ids,
        student_id,
        report,
        rank,
        class_size: card.class_stats.ranked_count,
        class_stats: card.class_stats,
        summary: card.summary,
    };
    to_result(req, serde_json::to_value(&student_card))
}

fn handle_report_card_compute_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("snapshot") else {
        return err(&req.id, "bad_params", "missing snapshot", None);
    };
    let input: ReportCardInput = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid snapshot: {}", e), None),
    };

    let mut settings = match state.db.as_ref().map(GradingSettings::load) {
        Some(Ok(s)) => s,
        Some(Err(e)) => return err(&req.id, "db_query_failed", e.to_string(), None),
        None => GradingSettings::default(),
    };
    if let Some(patch) = req.params.get("grading") {
        let Some(obj) = patch.as_object() else {
            return err(&req.id, "bad_params", "grading must be an object", None);
        };
        if let Err(msg) = settings.merge_patch(obj) {
            return err(&req.id, "bad_params", msg, None);
        }
    }

    match report_card::compute_report_card(&input, &settings) {
        Ok(card) => to_result(req, serde_json::to_value(&card)),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reportCard.compute" => Some(handle_report_card_compute(state, req)),
        "reportCard.student" => Some(handle_report_card_student(state, req)),
        "reportCard.computeSnapshot" => Some(handle_report_card_compute_snapshot(state, req)),
        _ => None,
    }
}
