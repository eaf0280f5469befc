//! The grading pipeline: validate, normalize, group, cluster, assess and recommend.
//!
//! Every stage is a pure function of its input. Term groups are clustered independently,
//! so one group's records never influence another group's tiers or recommendations.

use tracing::{debug, info, trace};

use crate::aggregate;
use crate::cluster::KMeansConfig;
use crate::error::PipelineError;
use crate::models::{BatchRequest, Category, ProgramMapping, StudentResult, TermGroup, Tier};
use crate::normalize;
use crate::recommend;
use crate::risk;
use crate::tier;
use crate::validate;

pub const DEFAULT_COURSE: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub kmeans: KMeansConfig,
}

pub fn run(mut request: BatchRequest, config: &PipelineConfig) -> Result<Vec<StudentResult>, PipelineError> {
    let mappings = std::mem::take(&mut request.program_mappings);
    let records = validate::validate_batch(request)?;
    let submitted = records.len();
    let batch = normalize::normalize(records)?;
    info!(
        submitted,
        dropped = batch.dropped,
        scale = ?batch.scale,
        observed_min = batch.observed_min,
        observed_max = batch.observed_max,
        "normalized grade batch"
    );

    let groups = aggregate::group_by_term(batch.grades);
    assemble(&groups, &mappings, config)
}

pub fn assemble(
    groups: &[TermGroup],
    mappings: &[ProgramMapping],
    config: &PipelineConfig,
) -> Result<Vec<StudentResult>, PipelineError> {
    let mut results = Vec::new();
    for group in groups {
        results.extend(assemble_group(group, mappings, config)?);
    }
    Ok(results)
}

fn assemble_group(
    group: &TermGroup,
    mappings: &[ProgramMapping],
    config: &PipelineConfig,
) -> Result<Vec<StudentResult>, PipelineError> {
    let clustering_failed = |source| PipelineError::Clustering {
        term: group.term.to_string(),
        source,
    };

    let averages: Vec<f64> = group.students.iter().map(|s| s.average_score).collect();
    let overall = tier::assign_tiers(&averages, &config.kmeans).map_err(clustering_failed)?;
    let major = category_tiers(group, Category::Major, &config.kmeans).map_err(clustering_failed)?;
    let minor = category_tiers(group, Category::Minor, &config.kmeans).map_err(clustering_failed)?;

    debug!(
        term = %group.term,
        students = group.students.len(),
        clustered = overall.is_some(),
        "assembling term group"
    );

    Ok(group
        .students
        .iter()
        .enumerate()
        .map(|(i, student)| {
            let assignment = overall.as_ref().map(|assignments| assignments[i]);
            if let Some(assignment) = assignment {
                trace!(
                    student_number = %student.student_number,
                    cluster = assignment.cluster,
                    tier = assignment.tier.as_str(),
                    "tier assigned"
                );
            }
            let cluster = assignment.map(|assignment| assignment.tier);
            let assessment = risk::assess(student, cluster);
            let recommendations = recommend::recommend_or_fallback(student, &assessment);
            let program_advisories = recommend::program_advisories(student, mappings);

            StudentResult {
                student_id: student.student_id.clone(),
                student_number: student.student_number.clone(),
                first_name: student.first_name.clone(),
                last_name: student.last_name.clone(),
                course: student
                    .course
                    .clone()
                    .unwrap_or_else(|| DEFAULT_COURSE.to_string()),
                semester: student.term.semester.clone(),
                year_level: student.term.year.clone(),
                school_year: student.term.school_year.clone(),
                average_score: round_score(student.average_score),
                major_grade: student.major_average.map(round_score),
                minor_grade: student.minor_average.map(round_score),
                cluster,
                major_cluster: major[i],
                minor_cluster: minor[i],
                is_at_risk: assessment.is_at_risk(),
                major_risk: assessment.major_risk,
                minor_risk: assessment.minor_risk,
                risk_level: assessment.level,
                recommendation: recommendations.first().cloned(),
                recommendations,
                recommended_program: program_advisories.first().map(|a| a.program.clone()),
                program_advisories,
            }
        })
        .collect())
}

/// Tiers students on one category average. Students without that category stay untiered.
fn category_tiers(
    group: &TermGroup,
    category: Category,
    config: &KMeansConfig,
) -> Result<Vec<Option<Tier>>, crate::cluster::ClusterError> {
    let members: Vec<(usize, f64)> = group
        .students
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.category_average(category).map(|avg| (i, avg)))
        .collect();
    let averages: Vec<f64> = members.iter().map(|(_, avg)| *avg).collect();

    let mut tiers = vec![None; group.students.len()];
    if let Some(assignments) = tier::assign_tiers(&averages, config)? {
        for ((i, _), assignment) in members.iter().zip(assignments) {
            tiers[*i] = Some(assignment.tier);
        }
    }
    Ok(tiers)
}

pub fn round_score(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
