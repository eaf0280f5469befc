use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{StudentResult, TermKey, Tier};

#[derive(Debug, Clone, PartialEq)]
pub struct TierSummary {
    pub tier: Option<Tier>,
    pub count: usize,
    pub avg_score: f64,
    pub at_risk: usize,
}

pub fn summarize_by_tier(results: &[&StudentResult]) -> Vec<TierSummary> {
    let mut map: BTreeMap<Option<Tier>, (usize, f64, usize)> = BTreeMap::new();

    for result in results {
        let entry = map.entry(result.cluster).or_insert((0, 0.0, 0));
        entry.0 += 1;
        entry.1 += result.average_score;
        if result.is_at_risk {
            entry.2 += 1;
        }
    }

    // Untiered students sort first in the map; list them after the lettered tiers.
    let mut summaries: Vec<TierSummary> = map
        .into_iter()
        .map(|(tier, (count, total, at_risk))| TierSummary {
            tier,
            count,
            avg_score: if count == 0 { 0.0 } else { total / count as f64 },
            at_risk,
        })
        .collect();
    summaries.sort_by_key(|summary| summary.tier.is_none());
    summaries
}

fn group_by_term(results: &[StudentResult]) -> BTreeMap<TermKey, Vec<&StudentResult>> {
    let mut terms: BTreeMap<TermKey, Vec<&StudentResult>> = BTreeMap::new();
    for result in results {
        terms.entry(result.term()).or_default().push(result);
    }
    terms
}

pub fn build_report(scope: Option<&str>, generated_on: NaiveDate, results: &[StudentResult]) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all terms");

    let _ = writeln!(output, "# Grade Early Warning Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, generated_on);

    if results.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "No grades recorded for this scope.");
        return output;
    }

    let at_risk_total = results.iter().filter(|r| r.is_at_risk).count();
    let _ = writeln!(
        output,
        "{} students assessed, {} at risk",
        results.len(),
        at_risk_total
    );

    for (term, students) in group_by_term(results) {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", term);
        let _ = writeln!(output);
        let _ = writeln!(output, "### Tier Mix");

        for summary in summarize_by_tier(&students) {
            let label = summary.tier.map(|t| t.as_str()).unwrap_or("untiered");
            let _ = writeln!(
                output,
                "- {}: {} students (avg score {:.2}, {} at risk)",
                label, summary.count, summary.avg_score, summary.at_risk
            );
        }

        let mut at_risk: Vec<&StudentResult> =
            students.iter().copied().filter(|r| r.is_at_risk).collect();
        at_risk.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));

        let _ = writeln!(output);
        let _ = writeln!(output, "### At-Risk Students");

        if at_risk.is_empty() {
            let _ = writeln!(output, "No students flagged in this term.");
            continue;
        }

        for result in at_risk {
            let _ = writeln!(
                output,
                "- {} ({}, {}) avg {:.2}, tier {}, {} risk",
                result.display_name(),
                result.student_number,
                result.course,
                result.average_score,
                result.cluster.map(|t| t.as_str()).unwrap_or("-"),
                result.risk_level.as_str()
            );
            for recommendation in &result.recommendations {
                let _ = writeln!(
                    output,
                    "  - {}: {}. {}",
                    recommendation.recommended_action.as_str(),
                    recommendation.focus_area,
                    recommendation.reason
                );
            }
            for advisory in &result.program_advisories {
                let subjects = advisory
                    .failed_subjects
                    .iter()
                    .map(|subject| subject.code.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(
                    output,
                    "  - Program shift: {} (match {:.1}, failed {})",
                    advisory.program, advisory.match_score, subjects
                );
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, FailedSubject, ProgramAdvisory, Recommendation, RiskLevel};

    fn result(student: &str, semester: &str, avg: f64, tier: Option<Tier>, at_risk: bool) -> StudentResult {
        let recommendations = if at_risk {
            vec![Recommendation {
                subject_type: None,
                recommended_action: Action::RegularTutoring,
                focus_area: "CS101".to_string(),
                reason: "Weakest result is CS101".to_string(),
                subjects: vec![],
            }]
        } else {
            vec![]
        };
        StudentResult {
            student_id: student.to_string(),
            student_number: student.to_string(),
            first_name: Some("Avery".to_string()),
            last_name: Some(student.to_string()),
            course: "BSCS".to_string(),
            semester: semester.to_string(),
            year_level: "1".to_string(),
            school_year: None,
            average_score: avg,
            major_grade: None,
            minor_grade: None,
            cluster: tier,
            major_cluster: None,
            minor_cluster: None,
            is_at_risk: at_risk,
            major_risk: false,
            minor_risk: false,
            risk_level: RiskLevel::Low,
            recommendation: recommendations.first().cloned(),
            recommendations,
            recommended_program: None,
            program_advisories: vec![],
        }
    }

    #[test]
    fn summaries_list_lettered_tiers_before_untiered() {
        let results = vec![
            result("1", "1st", 1.5, Some(Tier::A), false),
            result("2", "1st", 2.5, Some(Tier::C), true),
            result("3", "1st", 3.5, Some(Tier::C), true),
            result("4", "1st", 2.0, None, false),
        ];
        let refs: Vec<&StudentResult> = results.iter().collect();
        let summaries = summarize_by_tier(&refs);

        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].tier, Some(Tier::A));
        assert_eq!(summaries[1].tier, Some(Tier::C));
        assert_eq!(summaries[1].count, 2);
        assert_eq!(summaries[1].at_risk, 2);
        assert!((summaries[1].avg_score - 3.0).abs() < 1e-9);
        assert_eq!(summaries[2].tier, None);
    }

    #[test]
    fn report_lists_terms_and_at_risk_students() {
        let results = vec![
            result("1", "1st", 1.5, Some(Tier::A), false),
            result("2", "1st", 3.5, Some(Tier::C), true),
            result("3", "2nd", 2.0, Some(Tier::A), false),
            result("4", "2nd", 2.2, Some(Tier::C), false),
        ];
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(Some("semester 1st"), date, &results);

        assert!(report.starts_with("# Grade Early Warning Report"));
        assert!(report.contains("Generated for semester 1st on 2026-02-02"));
        assert!(report.contains("4 students assessed, 1 at risk"));
        assert!(report.contains("## semester 1st, year 1"));
        assert!(report.contains("- Avery 2 (2, BSCS) avg 3.50, tier C, low risk"));
        assert!(report.contains("  - Regular tutoring: CS101. Weakest result is CS101"));
        assert!(report.contains("No students flagged in this term."));
    }

    #[test]
    fn report_lists_program_shifts_for_at_risk_students() {
        let mut flagged = result("2", "1st", 3.5, Some(Tier::C), true);
        flagged.recommended_program = Some("BSIT".to_string());
        flagged.program_advisories = vec![ProgramAdvisory {
            program: "BSIT".to_string(),
            failed_subjects: vec![
                FailedSubject {
                    code: "CS101".to_string(),
                    name: None,
                    grade: 4.0,
                },
                FailedSubject {
                    code: "CS102".to_string(),
                    name: None,
                    grade: 3.75,
                },
            ],
            reasons: vec![],
            match_score: 4.0,
        }];
        let results = vec![result("1", "1st", 1.5, Some(Tier::A), false), flagged];

        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(None, date, &results);
        assert!(report.contains("  - Program shift: BSIT (match 4.0, failed CS101, CS102)"));
    }

    #[test]
    fn empty_results_produce_a_short_report() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(None, date, &[]);
        assert!(report.contains("Generated for all terms"));
        assert!(report.contains("No grades recorded for this scope."));
    }
}
