use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::weights::{self, ExamType, WEIGHT_TOTAL_TARGET};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

/// Existing (examType, maxScore) pairs for the grade+subject, minus the
/// sub-exam being edited (if any).
fn existing_pairs(
    conn: &Connection,
    grade_id: &str,
    subject_id: &str,
    exclude_id: Option<&str>,
) -> Result<Vec<(ExamType, f64)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, exam_type, max_score FROM sub_exams
         WHERE grade_id = ? AND subject_id = ?",
    )?;
    let rows = stmt
        .query_map((grade_id, subject_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|(id, _, _)| Some(id.as_str()) != exclude_id)
        .filter_map(|(_, t, max)| ExamType::parse(&t).map(|t| (t, max)))
        .collect())
}

fn weight_total_fields(total: f64) -> (f64, Option<String>) {
    let warning = if (total - WEIGHT_TOTAL_TARGET).abs() > f64::EPSILON {
        Some(format!(
            "sub-exam max scores total {} for this subject; expected {}",
            total, WEIGHT_TOTAL_TARGET
        ))
    } else {
        None
    };
    (total, warning)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let rows = match db::list_sub_exams(conn, &grade_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    let total: f64 = rows.iter().map(|r| r.max_score).sum();
    let (weight_total, warning) = weight_total_fields(total);
    ok(
        &req.id,
        json!({
            "subExams": rows,
            "weightTotal": weight_total,
            "warning": warning,
        }),
    )
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_type_raw = match required_str(req, "examType") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(exam_type) = ExamType::parse(&exam_type_raw) else {
        return err(
            &req.id,
            "bad_params",
            "examType must be one of: quiz, assignment, mid_exam, general_test",
            Some(json!({ "examType": exam_type_raw })),
        );
    };
    let max_score = req.params.get("maxScore").and_then(|v| v.as_f64());
    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| exam_type.as_str().to_string());

    let existing = match existing_pairs(conn, &grade_id, &subject_id, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let existing_types: Vec<ExamType> = existing.iter().map(|(t, _)| *t).collect();

    if let Err(ve) = weights::validate_sub_exam(exam_type, max_score, &existing_types) {
        return err(&req.id, ve.code(), ve.message(), Some(ve.details()));
    }
    let max_score = max_score.expect("validated above");

    let sub_exam_id = Uuid::new_v4().to_string();
    // Invariant: weight is denominated in points, equal to max_score.
    if let Err(e) = conn.execute(
        "INSERT INTO sub_exams(id, grade_id, subject_id, exam_type, title, max_score, weight)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &sub_exam_id,
            &grade_id,
            &subject_id,
            exam_type.as_str(),
            &title,
            max_score,
            max_score,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let existing_max: Vec<f64> = existing.iter().map(|(_, m)| *m).collect();
    let (weight_total, warning) =
        weight_total_fields(weights::projected_weight_total(&existing_max, max_score));
    ok(
        &req.id,
        json!({
            "subExamId": sub_exam_id,
            "weightTotal": weight_total,
            "warning": warning,
        }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sub_exam_id = match required_str(req, "subExamId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, String, String, String, f64)> = match conn
        .query_row(
            "SELECT grade_id, subject_id, exam_type, title, max_score
             FROM sub_exams WHERE id = ?",
            [&sub_exam_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((grade_id, subject_id, exam_type_raw, old_title, old_max)) = row else {
        return err(&req.id, "not_found", "sub-exam not found", None);
    };
    let Some(exam_type) = ExamType::parse(&exam_type_raw) else {
        return err(&req.id, "bad_params", "stored examType is unknown", None);
    };

    let max_score = req
        .params
        .get("maxScore")
        .and_then(|v| v.as_f64())
        .unwrap_or(old_max);
    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(old_title);

    let existing = match existing_pairs(conn, &grade_id, &subject_id, Some(&sub_exam_id)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let existing_types: Vec<ExamType> = existing.iter().map(|(t, _)| *t).collect();
    if let Err(ve) = weights::validate_sub_exam(exam_type, Some(max_score), &existing_types) {
        return err(&req.id, ve.code(), ve.message(), Some(ve.details()));
    }

    if let Err(e) = conn.execute(
        "UPDATE sub_exams SET title = ?, max_score = ?, weight = ? WHERE id = ?",
        (&title, max_score, max_score, &sub_exam_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let existing_max: Vec<f64> = existing.iter().map(|(_, m)| *m).collect();
    let (weight_total, warning) =
        weight_total_fields(weights::projected_weight_total(&existing_max, max_score));
    ok(
        &req.id,
        json!({
            "subExamId": sub_exam_id,
            "weightTotal": weight_total,
            "warning": warning,
        }),
    )
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sub_exam_id = match required_str(req, "subExamId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Recorded scores are left behind; aggregation skips the orphans.
    match conn.execute("DELETE FROM sub_exams WHERE id = ?", [&sub_exam_id]) {
        Ok(0) => err(&req.id, "not_found", "sub-exam not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subExams.list" => Some(handle_list(state, req)),
        "subExams.create" => Some(handle_create(state, req)),
        "subExams.update" => Some(handle_update(state, req)),
        "subExams.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
