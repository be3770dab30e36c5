use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RankEntry {
    pub student_id: String,
    pub name: String,
    pub score: f64,
}

/// Competition ranking over one dimension.
///
/// Sorts descending by score with a deterministic case-insensitive name
/// tie-break; tied scores share a rank and the sequence skips after a tie:
/// scores `[95, 95, 90]` rank `[1, 1, 3]`.
pub fn competition_rank(entries: &[RankEntry]) -> HashMap<String, usize> {
    let mut sorted: Vec<&RankEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    let mut ranks = HashMap::with_capacity(sorted.len());
    let mut current_rank = 0usize;
    let mut prev_score: Option<f64> = None;
    for (i, e) in sorted.iter().enumerate() {
        if prev_score != Some(e.score) {
            current_rank = i + 1;
            prev_score = Some(e.score);
        }
        ranks.insert(e.student_id.clone(), current_rank);
    }
    ranks
}

/// "1st", "2nd", "3rd", "4th", ... with the 11-13 irregular case decided on
/// the last two digits: 111th, 112th, 113th.
pub fn ordinal(rank: usize) -> String {
    let suffix = match rank % 100 {
        11..=13 => "th",
        _ => match rank % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{}{}", rank, suffix)
}
