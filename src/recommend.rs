use std::cmp::Ordering;

use thiserror::Error;
use tracing::warn;

use crate::models::{
    Action, Category, FailedSubject, FocusSubject, ProgramAdvisory, ProgramMapping,
    Recommendation, StudentAggregate, SubjectScore,
};
use crate::risk::{category_threshold, RiskAssessment, AT_RISK_AVERAGE};

pub const IMMEDIATE_INTERVENTION_AVERAGE: f64 = 4.0;
pub const REGULAR_TUTORING_AVERAGE: f64 = 3.5;

pub const BEST_MATCH_SCORE: f64 = 5.0;
const MATCH_PENALTY: f64 = 0.5;
const MAX_PENALIZED_SUBJECTS: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum RecommendationError {
    #[error("{category} average is unknown for a student flagged on {category} subjects")]
    MissingCategoryAverage { category: &'static str },

    #[error("no {category} subject scored above {threshold:.2}")]
    NoFailingSubjects {
        category: &'static str,
        threshold: f64,
    },
}

pub fn action_for(average: f64) -> Action {
    if average > IMMEDIATE_INTERVENTION_AVERAGE {
        Action::ImmediateIntervention
    } else if average > REGULAR_TUTORING_AVERAGE {
        Action::RegularTutoring
    } else {
        Action::AdditionalStudy
    }
}

/// Builds recommendations for an at-risk student: one entry per flagged category, or a
/// single entry on the worst subject when no category is flagged.
pub fn recommend(
    student: &StudentAggregate,
    assessment: &RiskAssessment,
) -> Result<Vec<Recommendation>, RecommendationError> {
    if !assessment.is_at_risk() {
        return Ok(Vec::new());
    }
    if student.subjects.is_empty() {
        return Ok(vec![counseling(student)]);
    }

    let mut recommendations = Vec::new();
    for category in [Category::Major, Category::Minor] {
        if assessment.category_risk(category) {
            recommendations.push(category_recommendation(student, category)?);
        }
    }
    if recommendations.is_empty() {
        recommendations.push(worst_subject_recommendation(student));
    }
    Ok(recommendations)
}

/// Same as [`recommend`], but a failure for this student degrades to counseling.
pub fn recommend_or_fallback(
    student: &StudentAggregate,
    assessment: &RiskAssessment,
) -> Vec<Recommendation> {
    match recommend(student, assessment) {
        Ok(recommendations) => recommendations,
        Err(err) => {
            warn!(
                student_number = %student.student_number,
                term = %student.term,
                error = %err,
                "recommendation failed; using counseling fallback"
            );
            vec![counseling(student)]
        }
    }
}

pub fn counseling(student: &StudentAggregate) -> Recommendation {
    Recommendation {
        subject_type: None,
        recommended_action: Action::Counseling,
        focus_area: "General academic performance".to_string(),
        reason: format!(
            "Average score of {:.2} warrants academic counseling; no subject-level detail is available.",
            student.average_score
        ),
        subjects: Vec::new(),
    }
}

fn worst_first(a: &&SubjectScore, b: &&SubjectScore) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.code.cmp(&b.code))
}

fn focus(subject: &SubjectScore) -> FocusSubject {
    FocusSubject {
        subject_code: subject.code.clone(),
        subject_name: subject.name.clone(),
        score: subject.score,
    }
}

fn category_recommendation(
    student: &StudentAggregate,
    category: Category,
) -> Result<Recommendation, RecommendationError> {
    let average = student.category_average(category).ok_or(
        RecommendationError::MissingCategoryAverage {
            category: category.as_str(),
        },
    )?;
    let threshold = category_threshold(category);

    let mut failing: Vec<&SubjectScore> = student
        .subjects
        .iter()
        .filter(|s| s.category == Some(category) && s.score > threshold)
        .collect();
    if failing.is_empty() {
        return Err(RecommendationError::NoFailingSubjects {
            category: category.as_str(),
            threshold,
        });
    }
    failing.sort_by(worst_first);

    let listed = failing
        .iter()
        .map(|s| format!("{} ({:.2})", s.label(), s.score))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(Recommendation {
        subject_type: Some(category),
        recommended_action: action_for(average),
        focus_area: format!(
            "{} subjects: {}",
            category.as_str(),
            failing
                .iter()
                .map(|s| s.code.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        reason: format!(
            "{} subject average of {:.2} is above the {:.2} threshold. Weakest results: {}.",
            category.as_str(),
            average,
            threshold,
            listed
        ),
        subjects: failing.into_iter().map(focus).collect(),
    })
}

fn worst_subject_recommendation(student: &StudentAggregate) -> Recommendation {
    let mut subjects: Vec<&SubjectScore> = student.subjects.iter().collect();
    subjects.sort_by(worst_first);
    let worst = subjects[0];

    Recommendation {
        subject_type: worst.category,
        recommended_action: action_for(student.average_score),
        focus_area: worst.label(),
        reason: format!(
            "Weakest result is {} with a score of {:.2}; overall average is {:.2}.",
            worst.label(),
            worst.score,
            student.average_score
        ),
        subjects: vec![focus(worst)],
    }
}

/// A subject is failed once it scores above its category threshold, or above the at-risk
/// average when it has no category.
pub fn failing_line(category: Option<Category>) -> f64 {
    category.map(category_threshold).unwrap_or(AT_RISK_AVERAGE)
}

pub fn match_score(failed_subjects: usize) -> f64 {
    BEST_MATCH_SCORE - failed_subjects.min(MAX_PENALIZED_SUBJECTS) as f64 * MATCH_PENALTY
}

/// Groups the student's failed subjects by the programs they map to. Programs reached
/// through fewer failed subjects rank first; ties go by program name.
pub fn program_advisories(
    student: &StudentAggregate,
    mappings: &[ProgramMapping],
) -> Vec<ProgramAdvisory> {
    if mappings.is_empty() {
        return Vec::new();
    }

    let mut failed: Vec<&SubjectScore> = student
        .subjects
        .iter()
        .filter(|s| s.score > failing_line(s.category))
        .collect();
    failed.sort_by(worst_first);

    let mut advisories: Vec<ProgramAdvisory> = Vec::new();
    for subject in failed {
        for mapping in mappings
            .iter()
            .filter(|m| m.subject_code.trim() == subject.code)
        {
            let program = mapping.alternative_program.trim();
            let index = match advisories.iter().position(|a| a.program == program) {
                Some(index) => index,
                None => {
                    advisories.push(ProgramAdvisory {
                        program: program.to_string(),
                        failed_subjects: Vec::new(),
                        reasons: Vec::new(),
                        match_score: BEST_MATCH_SCORE,
                    });
                    advisories.len() - 1
                }
            };
            let advisory = &mut advisories[index];

            if !advisory.failed_subjects.iter().any(|f| f.code == subject.code) {
                advisory.failed_subjects.push(FailedSubject {
                    code: subject.code.clone(),
                    name: subject.name.clone(),
                    grade: subject.score,
                });
            }
            if let Some(reason) = mapping.reason.as_deref().map(str::trim) {
                if !reason.is_empty() && !advisory.reasons.iter().any(|r| r == reason) {
                    advisory.reasons.push(reason.to_string());
                }
            }
        }
    }

    for advisory in &mut advisories {
        advisory.match_score = match_score(advisory.failed_subjects.len());
    }
    advisories.sort_by(|a, b| {
        b.match_score
            .total_cmp(&a.match_score)
            .then_with(|| a.program.cmp(&b.program))
    });
    advisories
}
