use crate::error::ValidationError;
use crate::models::{BatchRequest, GradeRecord, RawGrade, RawScore, Scalar, TermKey};

pub fn parse_batch(body: &[u8]) -> Result<BatchRequest, ValidationError> {
    serde_json::from_slice(body).map_err(|err| ValidationError::MalformedBody(err.to_string()))
}

/// Checks batch shape and required fields. A single missing field rejects the whole batch.
pub fn validate_batch(request: BatchRequest) -> Result<Vec<GradeRecord>, ValidationError> {
    let grades = request.grades.ok_or(ValidationError::MissingGrades)?;
    if grades.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }

    grades
        .into_iter()
        .enumerate()
        .map(|(index, grade)| validate_grade(index, grade))
        .collect()
}

fn validate_grade(index: usize, grade: RawGrade) -> Result<GradeRecord, ValidationError> {
    let student_number = required(index, "student_number", grade.student_number)?;
    let subject_code = required(index, "subject_code", grade.subject_code)?;
    let score = grade.score.ok_or(ValidationError::MissingField {
        index,
        field: "score",
    })?;
    let semester = required(index, "semester", grade.semester)?;
    let year = required(index, "year", grade.year)?;

    let student_id = optional(grade.student_id).unwrap_or_else(|| student_number.clone());

    Ok(GradeRecord {
        student_id,
        student_number,
        first_name: non_blank(grade.first_name),
        last_name: non_blank(grade.last_name),
        course: non_blank(grade.course),
        subject_code,
        subject_name: non_blank(grade.subject_name),
        subject_type: non_blank(grade.subject_type),
        score: RawScore::from(score),
        term: TermKey {
            semester,
            year,
            school_year: optional(grade.school_year),
        },
    })
}

fn required(
    index: usize,
    field: &'static str,
    value: Option<Scalar>,
) -> Result<String, ValidationError> {
    optional(value).ok_or(ValidationError::MissingField { index, field })
}

fn optional(value: Option<Scalar>) -> Option<String> {
    value.map(Scalar::into_text).filter(|text| !text.is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(json: &str) -> BatchRequest {
        parse_batch(json.as_bytes()).unwrap()
    }

    #[test]
    fn accepts_complete_rows_and_defaults_student_id() {
        let records = validate_batch(batch(
            r#"{"grades": [{
                "student_number": "2024-001",
                "first_name": " Avery ",
                "subject_code": "CS101",
                "subject_type": "Major",
                "score": "1.75",
                "semester": "1st",
                "year_level": 1,
                "school_year": "2024-2025"
            }]}"#,
        ))
        .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.student_id, "2024-001");
        assert_eq!(record.first_name.as_deref(), Some("Avery"));
        assert_eq!(record.last_name, None);
        assert_eq!(record.score, RawScore::Text("1.75".to_string()));
        assert_eq!(record.term.year, "1");
        assert_eq!(record.term.school_year.as_deref(), Some("2024-2025"));
    }

    #[test]
    fn missing_field_names_index_and_field() {
        let err = validate_batch(batch(
            r#"{"grades": [
                {"student_number": "1", "subject_code": "A", "score": 2, "semester": "1", "year": 1},
                {"student_number": "2", "subject_code": "A", "score": 2, "year": 1}
            ]}"#,
        ))
        .unwrap_err();

        assert_eq!(
            err,
            ValidationError::MissingField {
                index: 1,
                field: "semester"
            }
        );
        assert_eq!(err.to_string(), "grades[1] is missing required field `semester`");
    }

    #[test]
    fn blank_required_field_counts_as_missing() {
        let err = validate_batch(batch(
            r#"{"grades": [{"student_number": "  ", "subject_code": "A", "score": 2, "semester": "1", "year": 1}]}"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingField {
                field: "student_number",
                ..
            }
        ));
    }

    #[test]
    fn absent_score_is_rejected_but_null_score_is_kept_for_coercion() {
        let err = validate_batch(batch(
            r#"{"grades": [{"student_number": "1", "subject_code": "A", "semester": "1", "year": 1}]}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { field: "score", .. }));

        let records = validate_batch(batch(
            r#"{"grades": [{"student_number": "1", "subject_code": "A", "score": null, "semester": "1", "year": 1}]}"#,
        ))
        .unwrap();
        assert_eq!(records[0].score, RawScore::Null);
    }

    #[test]
    fn empty_and_missing_batches_are_rejected() {
        assert_eq!(
            validate_batch(batch(r#"{"grades": []}"#)).unwrap_err(),
            ValidationError::EmptyBatch
        );
        assert_eq!(
            validate_batch(batch(r#"{}"#)).unwrap_err(),
            ValidationError::MissingGrades
        );
        assert!(matches!(
            parse_batch(b"not json").unwrap_err(),
            ValidationError::MalformedBody(_)
        ));
    }
}
