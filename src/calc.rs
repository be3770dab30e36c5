use std::collections::HashMap;

use serde::Serialize;

use crate::weights::ExamType;

/// Sub-exam definition as the aggregator sees it: identity plus the
/// authoritative scoring bound.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubExamDef {
    pub id: String,
    pub exam_type: ExamType,
    pub title: String,
    pub max_score: f64,
}

/// One recorded score for a single (student, term), keyed by sub-exam.
#[derive(Debug, Clone)]
pub struct ScoreEntry {
    pub sub_exam_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTermTotal {
    pub total: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub contributing_count: usize,
}

/// Aggregates one student's recorded scores for one subject and term.
///
/// Only sub-exams with a recorded score contribute, to numerator and
/// denominator both: an assessment not yet given never counts as zero.
/// Scores referencing a sub-exam that no longer exists are skipped.
pub fn subject_term_total(scores: &[ScoreEntry], sub_exams: &[SubExamDef]) -> SubjectTermTotal {
    let max_by_id: HashMap<&str, f64> = sub_exams
        .iter()
        .map(|se| (se.id.as_str(), se.max_score))
        .collect();

    // Upsert semantics upstream mean at most one score per sub-exam; if a
    // caller hands us duplicates anyway, the last one wins.
    let mut by_sub_exam: HashMap<&str, f64> = HashMap::new();
    for s in scores {
        if max_by_id.contains_key(s.sub_exam_id.as_str()) {
            by_sub_exam.insert(s.sub_exam_id.as_str(), s.score);
        }
    }

    // Sum in sub-exam definition order: float addition order must not depend
    // on map iteration, or equal inputs could disagree in the last ulp.
    let mut total = 0.0;
    let mut max_total = 0.0;
    for se in sub_exams {
        if let Some(score) = by_sub_exam.get(se.id.as_str()) {
            total += score;
            max_total += se.max_score;
        }
    }

    let contributing_count = by_sub_exam.len();
    let percentage = if max_total > 0.0 {
        100.0 * total / max_total
    } else {
        0.0
    };

    SubjectTermTotal {
        total,
        max_total,
        percentage,
        contributing_count,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    /// Letter band for a raw percentage. Lower bounds are inclusive and the
    /// comparison uses the unrounded value: 89.95 is a B even if it displays
    /// as 90.0.
    pub fn band(percentage: f64) -> Grade {
        if percentage >= 90.0 {
            Grade::A
        } else if percentage >= 80.0 {
            Grade::B
        } else if percentage >= 70.0 {
            Grade::C
        } else if percentage >= 60.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

/// 1-decimal display rounding: `Int(10*x + 0.5) / 10`. Applied only at the
/// roster/report layer, never before banding or ranking.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn se(id: &str, exam_type: ExamType, max_score: f64) -> SubExamDef {
        SubExamDef {
            id: id.to_string(),
            exam_type,
            title: id.to_string(),
            max_score,
        }
    }

    fn sc(sub_exam_id: &str, score: f64) -> ScoreEntry {
        ScoreEntry {
            sub_exam_id: sub_exam_id.to_string(),
            score,
        }
    }

    #[test]
    fn ungraded_sub_exams_do_not_count_against_the_student() {
        // Quiz1(10), Mid(20), General(40), Quiz2(10): weights sum to 80 on
        // purpose. Scores 8, 15, -, 9 with the general test ungraded.
        let sub_exams = vec![
            se("q1", ExamType::Quiz, 10.0),
            se("mid", ExamType::MidExam, 20.0),
            se("gen", ExamType::GeneralTest, 40.0),
            se("q2", ExamType::Quiz, 10.0),
        ];
        let scores = vec![sc("q1", 8.0), sc("mid", 15.0), sc("q2", 9.0)];

        let t = subject_term_total(&scores, &sub_exams);
        assert_eq!(t.total, 32.0);
        assert_eq!(t.max_total, 40.0);
        assert_eq!(t.percentage, 80.0);
        assert_eq!(t.contributing_count, 3);
        assert_eq!(Grade::band(t.percentage), Grade::B);
    }

    #[test]
    fn empty_scores_yield_zero_percentage_without_dividing() {
        let sub_exams = vec![se("q1", ExamType::Quiz, 10.0)];
        let t = subject_term_total(&[], &sub_exams);
        assert_eq!(t.total, 0.0);
        assert_eq!(t.max_total, 0.0);
        assert_eq!(t.percentage, 0.0);
        assert_eq!(t.contributing_count, 0);
    }

    #[test]
    fn orphan_scores_are_skipped_not_fatal() {
        let sub_exams = vec![se("q1", ExamType::Quiz, 10.0)];
        let scores = vec![sc("q1", 7.0), sc("deleted-sub-exam", 9.0)];
        let t = subject_term_total(&scores, &sub_exams);
        assert_eq!(t.total, 7.0);
        assert_eq!(t.max_total, 10.0);
        assert_eq!(t.contributing_count, 1);
    }

    #[test]
    fn aggregation_is_pure_and_idempotent() {
        let sub_exams = vec![se("q1", ExamType::Quiz, 10.0), se("mid", ExamType::MidExam, 20.0)];
        let scores = vec![sc("q1", 8.0), sc("mid", 12.0)];
        let a = subject_term_total(&scores, &sub_exams);
        let b = subject_term_total(&scores, &sub_exams);
        assert_eq!(a, b);
    }

    #[test]
    fn aggregation_is_bit_identical_across_calls() {
        // Values whose sum depends on addition order in the last ulp. The
        // summation must follow sub-exam definition order, not map iteration
        // order, so repeated calls agree bit-for-bit.
        let values = [0.1, 0.2, 0.3, 0.7, 0.9, 1.1];
        let sub_exams: Vec<SubExamDef> = (0..values.len())
            .map(|i| se(&format!("q{}", i), ExamType::Quiz, 10.0))
            .collect();
        let scores: Vec<ScoreEntry> = values
            .iter()
            .enumerate()
            .map(|(i, v)| sc(&format!("q{}", i), *v))
            .collect();

        let first = subject_term_total(&scores, &sub_exams);
        for _ in 0..200 {
            let t = subject_term_total(&scores, &sub_exams);
            assert_eq!(t.total.to_bits(), first.total.to_bits());
            assert_eq!(t.percentage.to_bits(), first.percentage.to_bits());
        }
    }

    #[test]
    fn grade_bands_are_inclusive_on_the_lower_bound() {
        assert_eq!(Grade::band(90.0), Grade::A);
        assert_eq!(Grade::band(89.9999), Grade::B);
        assert_eq!(Grade::band(80.0), Grade::B);
        assert_eq!(Grade::band(70.0), Grade::C);
        assert_eq!(Grade::band(60.0), Grade::D);
        assert_eq!(Grade::band(59.9999), Grade::F);
        assert_eq!(Grade::band(0.0), Grade::F);
    }

    #[test]
    fn display_rounding_matches_entry_semantics() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(79.96), 80.0);
        assert_eq!(round_off_1_decimal(33.333), 33.3);
        // Banding happens on the raw value, not the rounded display.
        assert_eq!(Grade::band(89.96), Grade::B);
        assert_eq!(round_off_1_decimal(89.96), 90.0);
    }
}
