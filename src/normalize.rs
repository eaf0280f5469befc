//! Scale detection and canonical rescaling.
//!
//! The canonical scale runs from 1.0 (best) to 5.0 (worst). Batches whose largest score
//! exceeds [`PERCENTAGE_THRESHOLD`] are treated as percentage grades, where higher is better,
//! and every score is inverted onto the canonical range. Detection happens once per batch.

use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::models::{GradeRecord, RawScore};

pub const CANONICAL_BEST: f64 = 1.0;
pub const CANONICAL_WORST: f64 = 5.0;
pub const PERCENTAGE_THRESHOLD: f64 = 10.0;
/// Neither scale has grades below zero.
pub const LOWEST_SCORE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Canonical,
    Percentage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGrade {
    pub record: GradeRecord,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub scale: Scale,
    pub observed_min: f64,
    pub observed_max: f64,
    pub dropped: usize,
    pub grades: Vec<NormalizedGrade>,
}

pub fn coerce_score(score: &RawScore) -> Option<f64> {
    let value = match score {
        RawScore::Number(value) => *value,
        RawScore::Text(text) => text.trim().parse::<f64>().ok()?,
        RawScore::Null => return None,
    };
    value.is_finite().then_some(value)
}

pub fn percentage_to_canonical(raw: f64) -> f64 {
    (CANONICAL_BEST + 4.0 * (100.0 - raw) / 100.0).clamp(CANONICAL_BEST, CANONICAL_WORST)
}

pub fn normalize(records: Vec<GradeRecord>) -> Result<NormalizedBatch, ValidationError> {
    let mut dropped = 0usize;
    let mut valid = Vec::with_capacity(records.len());

    for record in records {
        match coerce_score(&record.score) {
            Some(score) if score >= LOWEST_SCORE => valid.push((record, score)),
            Some(score) => {
                warn!(
                    student_number = %record.student_number,
                    subject_code = %record.subject_code,
                    score,
                    "dropping grade with a score below zero"
                );
                dropped += 1;
            }
            None => {
                warn!(
                    student_number = %record.student_number,
                    subject_code = %record.subject_code,
                    score = ?record.score,
                    "dropping grade with unparsable score"
                );
                dropped += 1;
            }
        }
    }

    if valid.is_empty() {
        return Err(ValidationError::NoValidScores { dropped });
    }

    let (observed_min, observed_max) = valid
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), (_, score)| {
            (min.min(*score), max.max(*score))
        });

    let scale = if observed_max > PERCENTAGE_THRESHOLD {
        Scale::Percentage
    } else {
        Scale::Canonical
    };
    debug!(?scale, observed_min, observed_max, dropped, "detected grading scale");

    let grades = valid
        .into_iter()
        .map(|(record, raw)| NormalizedGrade {
            record,
            score: match scale {
                Scale::Percentage => percentage_to_canonical(raw),
                Scale::Canonical => raw,
            },
        })
        .collect();

    Ok(NormalizedBatch {
        scale,
        observed_min,
        observed_max,
        dropped,
        grades,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TermKey;

    fn record(student: &str, score: RawScore) -> GradeRecord {
        GradeRecord {
            student_id: student.to_string(),
            student_number: student.to_string(),
            first_name: None,
            last_name: None,
            course: None,
            subject_code: "CS101".to_string(),
            subject_name: None,
            subject_type: None,
            score,
            term: TermKey {
                semester: "1".to_string(),
                year: "1".to_string(),
                school_year: None,
            },
        }
    }

    fn scores(batch: &NormalizedBatch) -> Vec<f64> {
        batch.grades.iter().map(|grade| grade.score).collect()
    }

    #[test]
    fn canonical_batch_is_left_unchanged() {
        let batch = normalize(vec![
            record("1", RawScore::Number(1.25)),
            record("2", RawScore::Number(3.0)),
            record("3", RawScore::Number(5.0)),
        ])
        .unwrap();

        assert_eq!(batch.scale, Scale::Canonical);
        assert_eq!(scores(&batch), vec![1.25, 3.0, 5.0]);
    }

    #[test]
    fn ten_is_still_canonical() {
        let batch = normalize(vec![record("1", RawScore::Number(10.0))]).unwrap();
        assert_eq!(batch.scale, Scale::Canonical);
        assert_eq!(scores(&batch), vec![10.0]);
    }

    #[test]
    fn percentage_scores_convert_to_canonical() {
        let batch = normalize(vec![
            record("1", RawScore::Number(95.0)),
            record("2", RawScore::Number(75.0)),
            record("3", RawScore::Number(50.0)),
        ])
        .unwrap();

        assert_eq!(batch.scale, Scale::Percentage);
        let converted = scores(&batch);
        assert!((converted[0] - 1.2).abs() < 1e-9);
        assert!((converted[1] - 2.0).abs() < 1e-9);
        assert!((converted[2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn percentage_conversion_is_clamped() {
        assert_eq!(percentage_to_canonical(120.0), CANONICAL_BEST);
        assert_eq!(percentage_to_canonical(-40.0), CANONICAL_WORST);
        assert_eq!(percentage_to_canonical(0.0), CANONICAL_WORST);
    }

    #[test]
    fn scale_detection_applies_to_the_whole_batch() {
        // 3.0 sits beside a percentage score, so it is read as 3% rather than a canonical 3.0.
        let batch = normalize(vec![
            record("1", RawScore::Number(3.0)),
            record("2", RawScore::Number(88.0)),
        ])
        .unwrap();
        assert_eq!(batch.scale, Scale::Percentage);
        assert!((batch.grades[0].score - 4.88).abs() < 1e-9);
    }

    #[test]
    fn unparsable_scores_are_dropped() {
        let batch = normalize(vec![
            record("1", RawScore::Text(" 2.5 ".to_string())),
            record("2", RawScore::Text("INC".to_string())),
            record("3", RawScore::Null),
            record("4", RawScore::Number(f64::NAN)),
        ])
        .unwrap();

        assert_eq!(batch.dropped, 3);
        assert_eq!(scores(&batch), vec![2.5]);
        assert_eq!(batch.grades[0].record.student_number, "1");
    }

    #[test]
    fn negative_scores_are_dropped_before_scale_detection() {
        let batch = normalize(vec![
            record("1", RawScore::Number(-1e308)),
            record("1", RawScore::Number(-1e308)),
            record("2", RawScore::Number(1.5)),
            record("3", RawScore::Text("-2".to_string())),
            record("4", RawScore::Number(0.0)),
        ])
        .unwrap();

        assert_eq!(batch.scale, Scale::Canonical);
        assert_eq!(batch.dropped, 3);
        assert_eq!(batch.observed_min, 0.0);
        assert_eq!(scores(&batch), vec![1.5, 0.0]);
    }

    #[test]
    fn batch_without_any_valid_score_is_rejected() {
        let err = normalize(vec![
            record("1", RawScore::Text("dropped".to_string())),
            record("2", RawScore::Null),
        ])
        .unwrap_err();
        assert_eq!(err, ValidationError::NoValidScores { dropped: 2 });
    }
}
