use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, RosterContext};
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_term(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = RosterContext {
        conn,
        class_id: &class_id,
    };
    let snapshot = match roster::load_snapshot(&ctx, &[&term_id]) {
        Ok(s) => s,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let model = roster::build_term_roster(&snapshot, &class_id, &term_id);
    ok(&req.id, json!({ "roster": model }))
}

fn handle_semester(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term1_id = match required_str(req, "term1Id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term2_id = match required_str(req, "term2Id") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = RosterContext {
        conn,
        class_id: &class_id,
    };
    let snapshot = match roster::load_snapshot(&ctx, &[&term1_id, &term2_id]) {
        Ok(s) => s,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let model = roster::build_semester_roster(&snapshot, &class_id, &term1_id, &term2_id);
    ok(&req.id, json!({ "roster": model }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.term" => Some(handle_term(state, req)),
        "roster.semester" => Some(handle_semester(state, req)),
        _ => None,
    }
}
