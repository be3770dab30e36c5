use serde::{Deserialize, Serialize};
use serde_json::json;

/// The four assessment kinds a (grade, subject) pair can carry.
///
/// `MidExam` and `GeneralTest` are singletons per pair; quizzes and
/// assignments may repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    Quiz,
    Assignment,
    MidExam,
    GeneralTest,
}

impl ExamType {
    /// UI default max score, which doubles as the per-type ceiling.
    pub fn preset_max_score(self) -> f64 {
        match self {
            ExamType::Quiz => 10.0,
            ExamType::Assignment => 10.0,
            ExamType::MidExam => 20.0,
            ExamType::GeneralTest => 40.0,
        }
    }

    pub fn is_singleton(self) -> bool {
        matches!(self, ExamType::MidExam | ExamType::GeneralTest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExamType::Quiz => "quiz",
            ExamType::Assignment => "assignment",
            ExamType::MidExam => "mid_exam",
            ExamType::GeneralTest => "general_test",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "quiz" => Some(ExamType::Quiz),
            "assignment" => Some(ExamType::Assignment),
            "mid_exam" => Some(ExamType::MidExam),
            "general_test" => Some(ExamType::GeneralTest),
            _ => None,
        }
    }
}

/// Target for the sum of max scores across a (grade, subject) pair.
/// Soft rule: reported as a warning at entry time, never re-checked later.
pub const WEIGHT_TOTAL_TARGET: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub enum WeightError {
    MissingMaxScore,
    ExceedsTypeCeiling {
        exam_type: ExamType,
        max_score: f64,
        ceiling: f64,
    },
    DuplicateSingleton {
        exam_type: ExamType,
    },
}

impl WeightError {
    pub fn code(&self) -> &'static str {
        match self {
            WeightError::MissingMaxScore => "missing_max_score",
            WeightError::ExceedsTypeCeiling { .. } => "exceeds_type_ceiling",
            WeightError::DuplicateSingleton { .. } => "duplicate_singleton",
        }
    }

    pub fn message(&self) -> String {
        match self {
            WeightError::MissingMaxScore => "maxScore is required and must be > 0".to_string(),
            WeightError::ExceedsTypeCeiling {
                exam_type,
                max_score,
                ceiling,
            } => format!(
                "{} max score {} exceeds the type ceiling of {}",
                exam_type.as_str(),
                max_score,
                ceiling
            ),
            WeightError::DuplicateSingleton { exam_type } => format!(
                "a {} already exists for this grade and subject",
                exam_type.as_str()
            ),
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            WeightError::MissingMaxScore => json!({}),
            WeightError::ExceedsTypeCeiling {
                exam_type,
                max_score,
                ceiling,
            } => json!({
                "examType": exam_type.as_str(),
                "maxScore": max_score,
                "ceiling": ceiling,
            }),
            WeightError::DuplicateSingleton { exam_type } => json!({
                "examType": exam_type.as_str(),
            }),
        }
    }
}

/// Validates a proposed (examType, maxScore) pair against the per-type
/// ceiling and the singleton rule. `existing_types` are the exam types
/// already present for the (grade, subject) pair, excluding the sub-exam
/// being edited.
pub fn validate_sub_exam(
    exam_type: ExamType,
    max_score: Option<f64>,
    existing_types: &[ExamType],
) -> Result<(), WeightError> {
    let Some(max_score) = max_score else {
        return Err(WeightError::MissingMaxScore);
    };
    if !(max_score > 0.0) {
        return Err(WeightError::MissingMaxScore);
    }

    let ceiling = exam_type.preset_max_score();
    if max_score > ceiling {
        return Err(WeightError::ExceedsTypeCeiling {
            exam_type,
            max_score,
            ceiling,
        });
    }

    if exam_type.is_singleton() && existing_types.contains(&exam_type) {
        return Err(WeightError::DuplicateSingleton { exam_type });
    }

    Ok(())
}

/// Resulting max-score total for the pair if the proposal is accepted.
/// Callers attach a warning when this is not `WEIGHT_TOTAL_TARGET`.
pub fn projected_weight_total(existing_max_scores: &[f64], proposed: f64) -> f64 {
    existing_max_scores.iter().sum::<f64>() + proposed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_type_ceilings() {
        assert_eq!(ExamType::Quiz.preset_max_score(), 10.0);
        assert_eq!(ExamType::Assignment.preset_max_score(), 10.0);
        assert_eq!(ExamType::MidExam.preset_max_score(), 20.0);
        assert_eq!(ExamType::GeneralTest.preset_max_score(), 40.0);
    }

    #[test]
    fn missing_or_nonpositive_max_score_rejected() {
        assert_eq!(
            validate_sub_exam(ExamType::Quiz, None, &[]),
            Err(WeightError::MissingMaxScore)
        );
        assert_eq!(
            validate_sub_exam(ExamType::Quiz, Some(0.0), &[]),
            Err(WeightError::MissingMaxScore)
        );
        assert_eq!(
            validate_sub_exam(ExamType::Quiz, Some(-3.0), &[]),
            Err(WeightError::MissingMaxScore)
        );
    }

    #[test]
    fn ceiling_enforced_per_type() {
        assert!(validate_sub_exam(ExamType::Quiz, Some(10.0), &[]).is_ok());
        assert!(matches!(
            validate_sub_exam(ExamType::Quiz, Some(11.0), &[]),
            Err(WeightError::ExceedsTypeCeiling { ceiling, .. }) if ceiling == 10.0
        ));
        assert!(validate_sub_exam(ExamType::MidExam, Some(20.0), &[]).is_ok());
        assert!(matches!(
            validate_sub_exam(ExamType::MidExam, Some(20.5), &[]),
            Err(WeightError::ExceedsTypeCeiling { .. })
        ));
        assert!(validate_sub_exam(ExamType::GeneralTest, Some(40.0), &[]).is_ok());
        assert!(matches!(
            validate_sub_exam(ExamType::GeneralTest, Some(41.0), &[]),
            Err(WeightError::ExceedsTypeCeiling { .. })
        ));
    }

    #[test]
    fn singletons_rejected_on_second_create() {
        let existing = [ExamType::Quiz, ExamType::MidExam];
        assert_eq!(
            validate_sub_exam(ExamType::MidExam, Some(20.0), &existing),
            Err(WeightError::DuplicateSingleton {
                exam_type: ExamType::MidExam
            })
        );
        // Repeatable types are fine.
        assert!(validate_sub_exam(ExamType::Quiz, Some(10.0), &existing).is_ok());
        assert!(validate_sub_exam(ExamType::GeneralTest, Some(40.0), &existing).is_ok());
    }

    #[test]
    fn projected_total_sums_existing_and_proposed() {
        assert_eq!(projected_weight_total(&[10.0, 20.0, 40.0], 10.0), 80.0);
        assert_eq!(projected_weight_total(&[], 40.0), 40.0);
    }

    #[test]
    fn exam_type_round_trips_through_strings() {
        for t in [
            ExamType::Quiz,
            ExamType::Assignment,
            ExamType::MidExam,
            ExamType::GeneralTest,
        ] {
            assert_eq!(ExamType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ExamType::parse("final_exam"), None);
    }
}
