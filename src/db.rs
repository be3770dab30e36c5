use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE(grade_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sub_exams(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            title TEXT NOT NULL,
            max_score REAL NOT NULL,
            weight REAL NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sub_exams_pair ON sub_exams(grade_id, subject_id)",
        [],
    )?;

    // No foreign key on sub_exam_id: deleting a sub-exam orphans its scores
    // and aggregation skips them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            sub_exam_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            score REAL NOT NULL,
            notes TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, sub_exam_id, term_id)
        )",
        [],
    )?;
    ensure_scores_notes(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_sub_exam_term ON scores(sub_exam_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_scores_notes(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "scores", "notes")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE scores ADD COLUMN notes TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        StoreError {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub student_id: String,
    pub sub_exam_id: String,
    pub term_id: String,
    pub score: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubExamRow {
    pub id: String,
    pub grade_id: String,
    pub subject_id: String,
    pub exam_type: String,
    pub title: String,
    pub max_score: f64,
    pub weight: f64,
}

/// Upsert on (student, subExam, term). The bound check is repeated here:
/// the client-side gate in the entry surface is an optimization, not the
/// validation boundary.
pub fn record_score(
    conn: &Connection,
    student_id: &str,
    sub_exam_id: &str,
    term_id: &str,
    score: f64,
    notes: Option<&str>,
) -> Result<ScoreRow, StoreError> {
    let max_score: Option<f64> = conn
        .query_row(
            "SELECT max_score FROM sub_exams WHERE id = ?",
            [sub_exam_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    let Some(max_score) = max_score else {
        return Err(StoreError::new("not_found", "sub-exam not found"));
    };
    if !(0.0..=max_score).contains(&score) {
        return Err(StoreError::new(
            "score_out_of_range",
            format!("score {} outside [0, {}]", score, max_score),
        ));
    }

    let score_id = Uuid::new_v4().to_string();
    let updated_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO scores(id, student_id, sub_exam_id, term_id, score, notes, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, sub_exam_id, term_id) DO UPDATE SET
           score = excluded.score,
           notes = excluded.notes,
           updated_at = excluded.updated_at",
        (
            &score_id,
            student_id,
            sub_exam_id,
            term_id,
            score,
            notes,
            &updated_at,
        ),
    )
    .map_err(|e| StoreError::new("db_insert_failed", e.to_string()))?;

    Ok(ScoreRow {
        student_id: student_id.to_string(),
        sub_exam_id: sub_exam_id.to_string(),
        term_id: term_id.to_string(),
        score,
        notes: notes.map(|n| n.to_string()),
    })
}

/// Bulk fetch seeding the entry surface: every recorded score for the
/// class's students on the subject's sub-exams in one term.
pub fn list_scores_by_class_subject_term(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    term_id: &str,
) -> Result<Vec<ScoreRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT sc.student_id, sc.sub_exam_id, sc.term_id, sc.score, sc.notes
             FROM scores sc
             JOIN students st ON st.id = sc.student_id
             JOIN sub_exams se ON se.id = sc.sub_exam_id
             WHERE st.class_id = ? AND se.subject_id = ? AND sc.term_id = ?",
        )
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    stmt.query_map((class_id, subject_id, term_id), |r| {
        Ok(ScoreRow {
            student_id: r.get(0)?,
            sub_exam_id: r.get(1)?,
            term_id: r.get(2)?,
            score: r.get(3)?,
            notes: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

pub fn list_sub_exams(
    conn: &Connection,
    grade_id: &str,
    subject_id: &str,
) -> Result<Vec<SubExamRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, grade_id, subject_id, exam_type, title, max_score, weight
             FROM sub_exams
             WHERE grade_id = ? AND subject_id = ?
             ORDER BY rowid",
        )
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    stmt.query_map((grade_id, subject_id), |r| {
        Ok(SubExamRow {
            id: r.get(0)?,
            grade_id: r.get(1)?,
            subject_id: r.get(2)?,
            exam_type: r.get(3)?,
            title: r.get(4)?,
            max_score: r.get(5)?,
            weight: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}
