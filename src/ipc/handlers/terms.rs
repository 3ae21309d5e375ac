use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_name};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

const MAX_SEQUENCES_PER_TERM: usize = 6;

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT t.id, t.name, t.sort_order, s.id, s.name
         FROM terms t
         LEFT JOIN sequences s ON s.term_id = t.id
         ORDER BY t.sort_order, t.id, s.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut terms: Vec<serde_json::Value> = Vec::new();
    for (term_id, name, order, seq_id, seq_name) in rows {
        let is_new = terms
            .last()
            .map(|t| t["id"].as_str() != Some(term_id.as_str()))
            .unwrap_or(true);
        if is_new {
            terms.push(json!({ "id": term_id, "name": name, "order": order, "sequences": [] }));
        }
        if let (Some(seq_id), Some(seq_name), Some(term)) = (seq_id, seq_name, terms.last_mut()) {
            if let Some(seqs) = term["sequences"].as_array_mut() {
                seqs.push(json!({ "id": seq_id, "name": seq_name }));
            }
        }
    }
    ok(&req.id, json!({ "terms": terms }))
}

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_name(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sequence_names: Vec<String> = match req.params.get("sequences") {
        None => vec!["SEQ1".to_string(), "SEQ2".to_string()],
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return err(&req.id, "bad_params", "sequences must be an array of names", None);
            };
            let mut names = Vec::with_capacity(arr.len());
            for item in arr {
                match item.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                    Some(s) => names.push(s.to_string()),
                    None => {
                        return err(
                            &req.id,
                            "bad_params",
                            "sequence names must be non-empty strings",
                            None,
                        )
                    }
                }
            }
            names
        }
    };
    if sequence_names.is_empty() || sequence_names.len() > MAX_SEQUENCES_PER_TERM {
        return err(
            &req.id,
            "bad_params",
            format!(
                "a term needs between 1 and {} sequences",
                MAX_SEQUENCES_PER_TERM
            ),
            Some(json!({ "count": sequence_names.len() })),
        );
    }

    let sort_order: i64 = match req.params.get("order").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => match conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM terms",
            [],
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let term_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO terms(id, name, sort_order) VALUES(?, ?, ?)",
        (&term_id, &name, sort_order),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "terms" })),
        );
    }
    let mut sequences: Vec<serde_json::Value> = Vec::with_capacity(sequence_names.len());
    for (i, seq_name) in sequence_names.iter().enumerate() {
        let seq_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO sequences(id, term_id, name, sort_order) VALUES(?, ?, ?, ?)",
            (&seq_id, &term_id, seq_name, i as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "sequences" })),
            );
        }
        sequences.push(json!({ "id": seq_id, "name": seq_name }));
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "termId": term_id, "name": name, "sequences": sequences }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.create" => Some(handle_terms_create(state, req)),
        _ => None,
    }
}
