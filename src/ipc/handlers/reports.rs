//! Delimited-text renderers over the roster models. Formatting only: every
//! number here comes out of the roster builder untouched.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, RosterContext, SemesterRosterModel, TermRosterModel};
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

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn term_roster_csv(model: &TermRosterModel) -> String {
    let mut header = vec!["Student".to_string()];
    if let Some(first) = model.rows.first() {
        for s in &first.subjects {
            header.push(s.subject_name.clone());
            header.push(format!("{} Grade", s.subject_name));
        }
    }
    header.push("Average".to_string());
    header.push("Grade".to_string());
    header.push("Rank".to_string());

    let mut out = csv_line(&header);
    out.push('\n');
    for row in &model.rows {
        let mut fields = vec![row.student_name.clone()];
        for s in &row.subjects {
            fields.push(s.total.to_string());
            fields.push(s.grade.to_string());
        }
        fields.push(row.average.to_string());
        fields.push(row.grade.to_string());
        fields.push(row.rank_label.clone());
        out.push_str(&csv_line(&fields));
        out.push('\n');
    }
    out
}

/// Three lines per student: Term 1, Term 2, Average, each with the
/// dimension's own rank.
fn semester_roster_csv(model: &SemesterRosterModel) -> String {
    let mut header = vec!["Student".to_string(), "Dimension".to_string()];
    if let Some(first) = model.rows.first() {
        for s in &first.subjects {
            header.push(s.subject_name.clone());
        }
    }
    header.push("Score".to_string());
    header.push("Grade".to_string());
    header.push("Rank".to_string());

    let mut out = csv_line(&header);
    out.push('\n');
    for row in &model.rows {
        type Pick = fn(&roster::SemesterSubjectScore) -> f64;
        let dims: [(&str, &roster::DimensionSummary, Pick); 3] = [
            ("Term 1", &row.term1, |s| s.term1_total),
            ("Term 2", &row.term2, |s| s.term2_total),
            ("Average", &row.average, |s| s.average_total),
        ];
        for (label, summary, pick) in dims {
            let mut fields = vec![row.student_name.clone(), label.to_string()];
            for s in &row.subjects {
                fields.push(pick(s).to_string());
            }
            fields.push(summary.score.to_string());
            fields.push(summary.grade.to_string());
            fields.push(summary.rank_label.clone());
            out.push_str(&csv_line(&fields));
            out.push('\n');
        }
    }
    out
}

fn handle_roster_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    ok(&req.id, json!({ "csv": term_roster_csv(&model) }))
}

fn handle_semester_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    ok(&req.id, json!({ "csv": semester_roster_csv(&model) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.rosterCsv" => Some(handle_roster_csv(state, req)),
        "reports.semesterCsv" => Some(handle_semester_csv(state, req)),
        _ => None,
    }
}
