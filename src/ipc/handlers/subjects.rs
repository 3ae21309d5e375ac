use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    coefficient_param, db_conn, ensure_exists, optional_str, required_name, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subject_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, sort_order FROM subject_groups WHERE classroom_id = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&classroom_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "order": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(groups) => ok(&req.id, json!({ "subjectGroups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subject_groups_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_name(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "classrooms", &classroom_id, "classroom") {
        return e;
    }
    let sort_order = match req.params.get("order").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => match db::next_sort_order(conn, "subject_groups", &classroom_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subject_groups(id, classroom_id, name, sort_order) VALUES(?, ?, ?, ?)",
        (&group_id, &classroom_id, &name, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subject_groups" })),
        );
    }
    ok(
        &req.id,
        json!({ "subjectGroupId": group_id, "order": sort_order }),
    )
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, course_name, teacher_name, coefficient, group_id, sort_order
         FROM subjects
         WHERE classroom_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&classroom_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "courseName": r.get::<_, String>(1)?,
                "teacherName": r.get::<_, Option<String>>(2)?,
                "coefficient": r.get::<_, f64>(3)?,
                "groupId": r.get::<_, Option<String>>(4)?,
                "order": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let classroom_id = match required_str(req, "classroomId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_name = match required_name(req, "courseName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_name = optional_str(req, "teacherName");
    let coefficient = match coefficient_param(req, "coefficient") {
        Ok(v) => v.unwrap_or(1.0),
        Err(e) => return e,
    };
    let group_id = optional_str(req, "groupId");
    if let Err(e) = ensure_exists(conn, req, "classrooms", &classroom_id, "classroom") {
        return e;
    }
    if let Some(gid) = group_id.as_deref() {
        let owner: Option<String> = match conn
            .query_row(
                "SELECT classroom_id FROM subject_groups WHERE id = ?",
                [gid],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if owner.as_deref() != Some(classroom_id.as_str()) {
            return err(
                &req.id,
                "bad_params",
                "groupId does not belong to this classroom",
                Some(json!({ "groupId": gid })),
            );
        }
    }
    let sort_order = match req.params.get("order").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => match db::next_sort_order(conn, "subjects", &classroom_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, classroom_id, group_id, course_name, teacher_name, coefficient, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            &classroom_id,
            &group_id,
            &course_name,
            &teacher_name,
            coefficient,
            sort_order,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    ok(
        &req.id,
        json!({ "subjectId": subject_id, "coefficient": coefficient, "order": sort_order }),
    )
}

fn handle_subjects_update_coefficient(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let coefficient = match coefficient_param(req, "coefficient") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing coefficient", None),
        Err(e) => return e,
    };
    match conn.execute(
        "UPDATE subjects SET coefficient = ? WHERE id = ?",
        (coefficient, &subject_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "subject not found", None),
        Ok(_) => ok(&req.id, json!({ "subjectId": subject_id, "coefficient": coefficient })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_exists(conn, req, "subjects", &subject_id, "subject") {
        return e;
    }
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM grades WHERE subject_id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM subjects WHERE id = ?", [&subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjectGroups.list" => Some(handle_subject_groups_list(state, req)),
        "subjectGroups.create" => Some(handle_subject_groups_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.updateCoefficient" => Some(handle_subjects_update_coefficient(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
