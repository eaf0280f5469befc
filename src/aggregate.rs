use std::collections::BTreeMap;

use crate::models::{Category, StudentAggregate, SubjectScore, TermGroup, TermKey};
use crate::normalize::NormalizedGrade;

/// Groups normalized grades into term groups of per-student aggregates.
///
/// Groups come back ordered by term key and students by student number, so downstream
/// clustering sees the same input order for the same batch.
pub fn group_by_term(grades: Vec<NormalizedGrade>) -> Vec<TermGroup> {
    let mut terms: BTreeMap<TermKey, BTreeMap<String, StudentAggregate>> = BTreeMap::new();

    for grade in grades {
        let record = grade.record;
        let students = terms.entry(record.term.clone()).or_default();
        let entry = students
            .entry(record.student_number.clone())
            .or_insert_with(|| StudentAggregate {
                student_id: record.student_id.clone(),
                student_number: record.student_number.clone(),
                first_name: record.first_name.clone(),
                last_name: record.last_name.clone(),
                course: record.course.clone(),
                term: record.term.clone(),
                average_score: 0.0,
                major_average: None,
                minor_average: None,
                subjects: Vec::new(),
            });

        // Later rows fill identity fields the first row left blank.
        if entry.first_name.is_none() {
            entry.first_name = record.first_name;
        }
        if entry.last_name.is_none() {
            entry.last_name = record.last_name;
        }
        if entry.course.is_none() {
            entry.course = record.course;
        }

        entry.subjects.push(SubjectScore {
            code: record.subject_code,
            name: record.subject_name,
            category: record.subject_type.as_deref().and_then(Category::from_label),
            score: grade.score,
        });
    }

    terms
        .into_iter()
        .map(|(term, students)| TermGroup {
            term,
            students: students
                .into_values()
                .map(|mut student| {
                    student.average_score = mean(student.subjects.iter().map(|s| s.score))
                        .unwrap_or_default();
                    student.major_average = category_mean(&student.subjects, Category::Major);
                    student.minor_average = category_mean(&student.subjects, Category::Minor);
                    student
                })
                .collect(),
        })
        .collect()
}

fn category_mean(subjects: &[SubjectScore], category: Category) -> Option<f64> {
    mean(
        subjects
            .iter()
            .filter(|subject| subject.category == Some(category))
            .map(|subject| subject.score),
    )
}

pub fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
