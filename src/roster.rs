use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::calc::{self, round_off_1_decimal, Grade, ScoreEntry, SubExamDef};
use crate::rank::{competition_rank, ordinal, RankEntry};
use crate::weights::ExamType;

#[derive(Debug, Clone, Serialize)]
pub struct RosterError {
    pub code: String,
    pub message: String,
}

impl RosterError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        RosterError {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RosterSubject {
    pub id: String,
    pub name: String,
}

/// In-memory snapshot a roster is assembled from. Aggregation is a pure
/// function of this value; the SQL loading lives in `RosterContext`.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    pub students: Vec<RosterStudent>,
    pub subjects: Vec<RosterSubject>,
    pub sub_exams_by_subject: HashMap<String, Vec<SubExamDef>>,
    /// (student_id, term_id) -> that student's recorded scores in the term,
    /// across all subjects. Subject filtering happens via the sub-exam list.
    pub scores: HashMap<(String, String), Vec<ScoreEntry>>,
}

impl RosterSnapshot {
    fn term_scores(&self, student_id: &str, term_id: &str) -> &[ScoreEntry] {
        self.scores
            .get(&(student_id.to_string(), term_id.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject_id: String,
    pub subject_name: String,
    pub total: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub grade: &'static str,
    pub contributing_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRosterRow {
    pub student_id: String,
    pub student_name: String,
    pub subjects: Vec<SubjectScore>,
    pub average: f64,
    pub grade: &'static str,
    pub rank: usize,
    pub rank_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRosterModel {
    pub class_id: String,
    pub term_id: String,
    pub rows: Vec<TermRosterRow>,
}

/// Single-term roster: per student x subject totals and bands, overall
/// average over subjects with at least one contributing score, ranked by
/// that average.
///
/// A subject with no contributing scores still reports total 0 so roster
/// rows stay rectangular; it is excluded from the student's overall average.
pub fn build_term_roster(
    snapshot: &RosterSnapshot,
    class_id: &str,
    term_id: &str,
) -> TermRosterModel {
    let mut raw_averages: HashMap<String, f64> = HashMap::new();
    let mut rows: Vec<TermRosterRow> = Vec::new();

    for student in &snapshot.students {
        let term_scores = snapshot.term_scores(&student.id, term_id);
        let mut subjects = Vec::with_capacity(snapshot.subjects.len());
        let mut pct_sum = 0.0;
        let mut pct_count = 0usize;

        for subject in &snapshot.subjects {
            let sub_exams = snapshot
                .sub_exams_by_subject
                .get(&subject.id)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            let t = calc::subject_term_total(term_scores, sub_exams);
            if t.contributing_count > 0 {
                pct_sum += t.percentage;
                pct_count += 1;
            }
            subjects.push(SubjectScore {
                subject_id: subject.id.clone(),
                subject_name: subject.name.clone(),
                total: round_off_1_decimal(t.total),
                max_total: t.max_total,
                percentage: round_off_1_decimal(t.percentage),
                grade: Grade::band(t.percentage).letter(),
                contributing_count: t.contributing_count,
            });
        }

        let average = if pct_count > 0 {
            pct_sum / pct_count as f64
        } else {
            0.0
        };
        raw_averages.insert(student.id.clone(), average);

        rows.push(TermRosterRow {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            subjects,
            average: round_off_1_decimal(average),
            grade: Grade::band(average).letter(),
            rank: 0,
            rank_label: String::new(),
        });
    }

    // Rank on the raw averages, not the rounded display values.
    let entries: Vec<RankEntry> = snapshot
        .students
        .iter()
        .map(|s| RankEntry {
            student_id: s.id.clone(),
            name: s.name.clone(),
            score: raw_averages[&s.id],
        })
        .collect();
    let ranks = competition_rank(&entries);
    for row in &mut rows {
        row.rank = ranks[&row.student_id];
        row.rank_label = ordinal(row.rank);
    }

    TermRosterModel {
        class_id: class_id.to_string(),
        term_id: term_id.to_string(),
        rows,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSubjectScore {
    pub subject_id: String,
    pub subject_name: String,
    pub term1_total: f64,
    pub term2_total: f64,
    pub average_total: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSummary {
    pub score: f64,
    pub grade: &'static str,
    pub rank: usize,
    pub rank_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRosterRow {
    pub student_id: String,
    pub student_name: String,
    pub subjects: Vec<SemesterSubjectScore>,
    pub term1: DimensionSummary,
    pub term2: DimensionSummary,
    pub average: DimensionSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRosterModel {
    pub class_id: String,
    pub term1_id: String,
    pub term2_id: String,
    pub rows: Vec<SemesterRosterRow>,
}

/// Cross-term roster: per-subject totals for each term plus their mean
/// (totals, not percentages: sub-exam weights put every subject on the same
/// 0-100 scale). Ranks are computed independently for the Term 1, Term 2 and
/// Average dimensions; they are not assumed to correlate.
pub fn build_semester_roster(
    snapshot: &RosterSnapshot,
    class_id: &str,
    term1_id: &str,
    term2_id: &str,
) -> SemesterRosterModel {
    struct RawRow {
        t1: f64,
        t2: f64,
        avg: f64,
    }
    let mut raw: HashMap<String, RawRow> = HashMap::new();
    let mut rows: Vec<SemesterRosterRow> = Vec::new();

    for student in &snapshot.students {
        let t1_scores = snapshot.term_scores(&student.id, term1_id);
        let t2_scores = snapshot.term_scores(&student.id, term2_id);

        let mut subjects = Vec::with_capacity(snapshot.subjects.len());
        let mut t1_sum = 0.0;
        let mut t2_sum = 0.0;
        let mut avg_sum = 0.0;

        for subject in &snapshot.subjects {
            let sub_exams = snapshot
                .sub_exams_by_subject
                .get(&subject.id)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            let t1 = calc::subject_term_total(t1_scores, sub_exams).total;
            let t2 = calc::subject_term_total(t2_scores, sub_exams).total;
            let avg = (t1 + t2) / 2.0;
            t1_sum += t1;
            t2_sum += t2;
            avg_sum += avg;
            subjects.push(SemesterSubjectScore {
                subject_id: subject.id.clone(),
                subject_name: subject.name.clone(),
                term1_total: round_off_1_decimal(t1),
                term2_total: round_off_1_decimal(t2),
                average_total: round_off_1_decimal(avg),
            });
        }

        let n = snapshot.subjects.len().max(1) as f64;
        raw.insert(
            student.id.clone(),
            RawRow {
                t1: t1_sum / n,
                t2: t2_sum / n,
                avg: avg_sum / n,
            },
        );

        rows.push(SemesterRosterRow {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            subjects,
            term1: placeholder_dimension(),
            term2: placeholder_dimension(),
            average: placeholder_dimension(),
        });
    }

    let rank_dimension = |pick: &dyn Fn(&RawRow) -> f64| -> HashMap<String, usize> {
        let entries: Vec<RankEntry> = snapshot
            .students
            .iter()
            .map(|s| RankEntry {
                student_id: s.id.clone(),
                name: s.name.clone(),
                score: pick(&raw[&s.id]),
            })
            .collect();
        competition_rank(&entries)
    };
    let t1_ranks = rank_dimension(&|r| r.t1);
    let t2_ranks = rank_dimension(&|r| r.t2);
    let avg_ranks = rank_dimension(&|r| r.avg);

    for row in &mut rows {
        let r = &raw[&row.student_id];
        row.term1 = dimension(r.t1, t1_ranks[&row.student_id]);
        row.term2 = dimension(r.t2, t2_ranks[&row.student_id]);
        row.average = dimension(r.avg, avg_ranks[&row.student_id]);
    }

    SemesterRosterModel {
        class_id: class_id.to_string(),
        term1_id: term1_id.to_string(),
        term2_id: term2_id.to_string(),
        rows,
    }
}

fn placeholder_dimension() -> DimensionSummary {
    DimensionSummary {
        score: 0.0,
        grade: "F",
        rank: 0,
        rank_label: String::new(),
    }
}

fn dimension(score: f64, rank: usize) -> DimensionSummary {
    DimensionSummary {
        score: round_off_1_decimal(score),
        grade: Grade::band(score).letter(),
        rank,
        rank_label: ordinal(rank),
    }
}

#[derive(Debug, Clone)]
pub struct RosterContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
}

/// Loads the snapshot a roster needs: the class's students, the subjects of
/// its grade, each subject's sub-exams, and every requested term's scores.
pub fn load_snapshot(
    ctx: &RosterContext<'_>,
    term_ids: &[&str],
) -> Result<RosterSnapshot, RosterError> {
    let conn = ctx.conn;

    let grade_id: Option<String> = conn
        .query_row(
            "SELECT grade_id FROM classes WHERE id = ?",
            [ctx.class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
    let Some(grade_id) = grade_id else {
        return Err(RosterError::new("not_found", "class not found"));
    };

    let mut students_stmt = conn
        .prepare("SELECT id, name FROM students WHERE class_id = ? ORDER BY sort_order, name")
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
    let students: Vec<RosterStudent> = students_stmt
        .query_map([ctx.class_id], |r| {
            Ok(RosterStudent {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;

    let mut subjects_stmt = conn
        .prepare("SELECT id, name FROM subjects WHERE grade_id = ? ORDER BY name")
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
    let subjects: Vec<RosterSubject> = subjects_stmt
        .query_map([&grade_id], |r| {
            Ok(RosterSubject {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;

    let mut sub_exams_by_subject: HashMap<String, Vec<SubExamDef>> = HashMap::new();
    let mut se_stmt = conn
        .prepare(
            "SELECT id, subject_id, exam_type, title, max_score
             FROM sub_exams WHERE grade_id = ? ORDER BY rowid",
        )
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
    let se_rows = se_stmt
        .query_map([&grade_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
    for (id, subject_id, exam_type, title, max_score) in se_rows {
        // Rows with an unknown type are excluded rather than failing the
        // roster, same policy as orphaned scores.
        let Some(exam_type) = ExamType::parse(&exam_type) else {
            continue;
        };
        sub_exams_by_subject
            .entry(subject_id)
            .or_default()
            .push(SubExamDef {
                id,
                exam_type,
                title,
                max_score,
            });
    }

    let mut scores: HashMap<(String, String), Vec<ScoreEntry>> = HashMap::new();
    let mut sc_stmt = conn
        .prepare(
            "SELECT sc.student_id, sc.sub_exam_id, sc.score
             FROM scores sc
             JOIN students st ON st.id = sc.student_id
             WHERE st.class_id = ? AND sc.term_id = ?",
        )
        .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
    for term_id in term_ids {
        let rows = sc_stmt
            .query_map((ctx.class_id, term_id), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| RosterError::new("db_query_failed", e.to_string()))?;
        for (student_id, sub_exam_id, score) in rows {
            scores
                .entry((student_id, term_id.to_string()))
                .or_default()
                .push(ScoreEntry { sub_exam_id, score });
        }
    }

    Ok(RosterSnapshot {
        students,
        subjects,
        sub_exams_by_subject,
        scores,
    })
}
