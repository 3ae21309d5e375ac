use crate::config::GradingSettings;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match GradingSettings::load(conn) {
        Ok(grading) => ok(&req.id, json!({ "grading": grading })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("grading").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "grading must be an object", None);
    };

    let mut current = match GradingSettings::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = current.merge_patch(patch) {
        return err(&req.id, "bad_params", msg, None);
    }
    // scaleMax never drops below a stored score.
    let highest = match db::max_stored_score(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(highest) = highest.filter(|h| *h > current.scale_max) {
        return err(
            &req.id,
            "bad_params",
            "scaleMax is below a stored grade",
            Some(json!({ "scaleMax": current.scale_max, "highestScore": highest })),
        );
    }
    if let Err(e) = current.save(conn) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(scale_max = current.scale_max, pass_mark = current.pass_mark, "grading settings updated");
    ok(&req.id, json!({ "grading": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
