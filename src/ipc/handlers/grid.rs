use std::collections::HashMap;

use crate::autosave::{CellKey, Reconciler, WriteCommand, DEFAULT_DEBOUNCE_MS};
use crate::calc::{self, round_off_1_decimal, Grade, ScoreEntry, SubExamDef};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, GridSession, Request};
use crate::rank::{competition_rank, ordinal, RankEntry};
use crate::weights::ExamType;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Tests drive the debounce clock through `nowMs`; live callers omit it.
fn now_ms(req: &Request) -> i64 {
    req.params
        .get("nowMs")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let grade_id: Option<String> = match conn
        .query_row("SELECT grade_id FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(grade_id) = grade_id else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let mut students_stmt = match conn
        .prepare("SELECT id, name FROM students WHERE class_id = ? ORDER BY sort_order, name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students: Vec<(String, String)> = match students_stmt
        .query_map([&class_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let sub_exam_rows = match db::list_sub_exams(conn, &grade_id, &subject_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    let sub_exams: Vec<SubExamDef> = sub_exam_rows
        .iter()
        .filter_map(|r| {
            ExamType::parse(&r.exam_type).map(|exam_type| SubExamDef {
                id: r.id.clone(),
                exam_type,
                title: r.title.clone(),
                max_score: r.max_score,
            })
        })
        .collect();

    let bounds: HashMap<String, f64> = sub_exams
        .iter()
        .map(|se| (se.id.clone(), se.max_score))
        .collect();
    let mut recon = Reconciler::new(bounds, DEFAULT_DEBOUNCE_MS);

    // Seed confirmed values from the store so the no-op optimization has a
    // baseline on a freshly opened surface.
    let seeded = match db::list_scores_by_class_subject_term(conn, &class_id, &subject_id, &term_id)
    {
        Ok(rows) => {
            let n = rows.len();
            for row in rows {
                recon.seed(CellKey::new(row.student_id, row.sub_exam_id), row.score);
            }
            n
        }
        Err(e) => return err(&req.id, e.code, e.message, None),
    };

    state.grid = Some(GridSession {
        class_id,
        subject_id,
        term_id,
        students,
        sub_exams: sub_exams.clone(),
        recon,
    });

    ok(
        &req.id,
        json!({
            "seededCells": seeded,
            "subExams": sub_exams,
            "debounceMs": DEFAULT_DEBOUNCE_MS,
        }),
    )
}

fn handle_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(grid) = state.grid.as_mut() else {
        return err(&req.id, "no_grid", "open a grid first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sub_exam_id = match required_str(req, "subExamId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(value) = req.params.get("value").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing/invalid value", None);
    };

    let key = CellKey::new(student_id, sub_exam_id);
    grid.recon.edit(key.clone(), value, now_ms(req));
    let cell = grid.recon.cell(&key).expect("cell exists after edit");
    ok(&req.id, json!({ "cell": cell_json(&key, cell) }))
}

fn cell_json(key: &CellKey, cell: &crate::autosave::AutosaveCell) -> serde_json::Value {
    json!({
        "studentId": key.student_id,
        "subExamId": key.sub_exam_id,
        "pendingValue": cell.pending_value,
        "confirmedValue": cell.confirmed_value,
        "status": cell.status,
        "invalid": cell.invalid,
    })
}

/// Performs the drained writes against the store and settles each cell on
/// its own outcome. A failed cell is reported and left unsaved; it never
/// fails the batch.
fn perform_writes(
    conn: &Connection,
    grid: &mut GridSession,
    commands: Vec<WriteCommand>,
) -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
    let mut saved = Vec::new();
    let mut failed = Vec::new();
    for cmd in commands {
        match db::record_score(
            conn,
            &cmd.key.student_id,
            &cmd.key.sub_exam_id,
            &grid.term_id,
            cmd.value,
            None,
        ) {
            Ok(row) => {
                grid.recon.settle_ok(&cmd.key, row.score);
                saved.push(json!({
                    "studentId": cmd.key.student_id,
                    "subExamId": cmd.key.sub_exam_id,
                    "value": row.score,
                }));
            }
            Err(e) => {
                tracing::warn!(
                    student_id = %cmd.key.student_id,
                    sub_exam_id = %cmd.key.sub_exam_id,
                    code = e.code,
                    "score write failed; cell reverts to unsaved"
                );
                grid.recon.settle_err(&cmd.key);
                failed.push(json!({
                    "studentId": cmd.key.student_id,
                    "subExamId": cmd.key.sub_exam_id,
                    "code": e.code,
                    "message": e.message,
                }));
            }
        }
    }
    (saved, failed)
}

fn handle_tick(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = now_ms(req);
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(grid) = state.grid.as_mut() else {
        return err(&req.id, "no_grid", "open a grid first", None);
    };

    let commands = grid.recon.due_writes(now);
    let dispatched = commands.len();
    let (saved, failed) = perform_writes(conn, grid, commands);
    ok(
        &req.id,
        json!({
            "dispatched": dispatched,
            "saved": saved,
            "failed": failed,
        }),
    )
}

fn handle_save_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(grid) = state.grid.as_mut() else {
        return err(&req.id, "no_grid", "open a grid first", None);
    };

    let commands = grid.recon.flush_all();
    let dispatched = commands.len();
    let (saved, failed) = perform_writes(conn, grid, commands);
    ok(
        &req.id,
        json!({
            "dispatched": dispatched,
            "saved": saved,
            "failed": failed,
        }),
    )
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(grid) = state.grid.as_ref() else {
        return err(&req.id, "no_grid", "open a grid first", None);
    };
    let mut cells: Vec<serde_json::Value> = grid
        .recon
        .cells()
        .map(|(k, c)| cell_json(k, c))
        .collect();
    cells.sort_by(|a, b| {
        let ka = (
            a["studentId"].as_str().unwrap_or(""),
            a["subExamId"].as_str().unwrap_or(""),
        );
        let kb = (
            b["studentId"].as_str().unwrap_or(""),
            b["subExamId"].as_str().unwrap_or(""),
        );
        ka.cmp(&kb)
    });
    ok(
        &req.id,
        json!({
            "cells": cells,
            "inFlight": grid.recon.in_flight_count(),
        }),
    )
}

/// Live totals over the optimistic snapshot: in-progress edits count before
/// their writes settle, and cells still saving never block the roster math.
fn handle_live(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(grid) = state.grid.as_ref() else {
        return err(&req.id, "no_grid", "open a grid first", None);
    };

    let mut scores_by_student: HashMap<&str, Vec<ScoreEntry>> = HashMap::new();
    let snapshot = grid.recon.snapshot();
    for (key, value) in &snapshot {
        scores_by_student
            .entry(key.student_id.as_str())
            .or_default()
            .push(ScoreEntry {
                sub_exam_id: key.sub_exam_id.clone(),
                score: *value,
            });
    }

    let mut totals: HashMap<&str, calc::SubjectTermTotal> = HashMap::new();
    for (student_id, _) in &grid.students {
        let scores = scores_by_student
            .get(student_id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        totals.insert(
            student_id.as_str(),
            calc::subject_term_total(scores, &grid.sub_exams),
        );
    }

    let entries: Vec<RankEntry> = grid
        .students
        .iter()
        .map(|(id, name)| RankEntry {
            student_id: id.clone(),
            name: name.clone(),
            score: totals[id.as_str()].percentage,
        })
        .collect();
    let ranks = competition_rank(&entries);

    let rows: Vec<serde_json::Value> = grid
        .students
        .iter()
        .map(|(id, name)| {
            let t = &totals[id.as_str()];
            json!({
                "studentId": id,
                "name": name,
                "total": round_off_1_decimal(t.total),
                "maxTotal": t.max_total,
                "percentage": round_off_1_decimal(t.percentage),
                "grade": Grade::band(t.percentage).letter(),
                "contributingCount": t.contributing_count,
                "rank": ranks[id],
                "rankLabel": ordinal(ranks[id]),
            })
        })
        .collect();

    ok(&req.id, json!({ "rows": rows }))
}

fn handle_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let had_session = state.grid.take().is_some();
    ok(&req.id, json!({ "closed": had_session }))
}

/// Direct upsert path. The store re-checks bounds; the grid's client-side
/// gate is an optimization, not the validation boundary.
fn handle_scores_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sub_exam_id = match required_str(req, "subExamId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing/invalid score", None);
    };
    let notes = req.params.get("notes").and_then(|v| v.as_str());

    match db::record_score(conn, &student_id, &sub_exam_id, &term_id, score, notes) {
        Ok(row) => ok(&req.id, json!({ "score": row })),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grid.open" => Some(handle_open(state, req)),
        "grid.edit" => Some(handle_edit(state, req)),
        "grid.tick" => Some(handle_tick(state, req)),
        "grid.saveAll" => Some(handle_save_all(state, req)),
        "grid.status" => Some(handle_status(state, req)),
        "grid.live" => Some(handle_live(state, req)),
        "grid.close" => Some(handle_close(state, req)),
        "scores.record" => Some(handle_scores_record(state, req)),
        _ => None,
    }
}
