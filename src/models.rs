use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Identity fields arrive as either strings or numbers (`"2"` and `2` are the same year).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    pub fn into_text(self) -> String {
        match self {
            Scalar::Text(text) => text.trim().to_string(),
            Scalar::Number(number) => match number.as_f64() {
                // `1.0` and `1` name the same year.
                Some(value) if number.is_f64() && value.fract() == 0.0 && value.abs() < 1e15 => {
                    format!("{}", value as i64)
                }
                _ => number.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub grades: Option<Vec<RawGrade>>,
    #[serde(default, alias = "course_recommendations")]
    pub program_mappings: Vec<ProgramMapping>,
}

/// Points students who fail a subject toward a program that does not depend on it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgramMapping {
    pub subject_code: String,
    #[serde(alias = "alternative_course")]
    pub alternative_program: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One grade row as submitted, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGrade {
    #[serde(default)]
    pub student_id: Option<Scalar>,
    #[serde(default)]
    pub student_number: Option<Scalar>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub subject_code: Option<Scalar>,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub subject_type: Option<String>,
    /// `None` when the key is absent, `Some(Value::Null)` when it is present but null.
    #[serde(default, deserialize_with = "keep_null")]
    pub score: Option<Value>,
    #[serde(default)]
    pub semester: Option<Scalar>,
    #[serde(default, alias = "year_level")]
    pub year: Option<Scalar>,
    #[serde(default)]
    pub school_year: Option<Scalar>,
}

fn keep_null<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawScore {
    Number(f64),
    Text(String),
    Null,
}

impl From<Value> for RawScore {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(number) => number
                .as_f64()
                .map(RawScore::Number)
                .unwrap_or(RawScore::Null),
            Value::String(text) => RawScore::Text(text),
            Value::Null => RawScore::Null,
            other => RawScore::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermKey {
    pub semester: String,
    pub year: String,
    pub school_year: Option<String>,
}

impl fmt::Display for TermKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "semester {}, year {}", self.semester, self.year)?;
        if let Some(school_year) = &self.school_year {
            write!(f, " ({school_year})")?;
        }
        Ok(())
    }
}

/// A validated grade row.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub student_id: String,
    pub student_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub course: Option<String>,
    pub subject_code: String,
    pub subject_name: Option<String>,
    pub subject_type: Option<String>,
    pub score: RawScore,
    pub term: TermKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Major,
    Minor,
}

impl Category {
    /// Case-insensitive marker match: anything containing "maj" is major, then "min" is minor.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("maj") {
            Some(Category::Major)
        } else if label.contains("min") {
            Some(Category::Minor)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Major => "Major",
            Category::Minor => "Minor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectScore {
    pub code: String,
    pub name: Option<String>,
    pub category: Option<Category>,
    pub score: f64,
}

impl SubjectScore {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", self.code, name),
            None => self.code.clone(),
        }
    }
}

/// One student's scores within one term group, on the canonical scale.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAggregate {
    pub student_id: String,
    pub student_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub course: Option<String>,
    pub term: TermKey,
    pub average_score: f64,
    pub major_average: Option<f64>,
    pub minor_average: Option<f64>,
    pub subjects: Vec<SubjectScore>,
}

impl StudentAggregate {
    pub fn category_average(&self, category: Category) -> Option<f64> {
        match category {
            Category::Major => self.major_average,
            Category::Minor => self.minor_average,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TermGroup {
    pub term: TermKey,
    pub students: Vec<StudentAggregate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Tier {
    A,
    B,
    C,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    #[serde(rename = "Immediate intervention")]
    ImmediateIntervention,
    #[serde(rename = "Regular tutoring")]
    RegularTutoring,
    #[serde(rename = "Additional study time")]
    AdditionalStudy,
    #[serde(rename = "Academic counseling")]
    Counseling,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ImmediateIntervention => "Immediate intervention",
            Action::RegularTutoring => "Regular tutoring",
            Action::AdditionalStudy => "Additional study time",
            Action::Counseling => "Academic counseling",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocusSubject {
    pub subject_code: String,
    pub subject_name: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub subject_type: Option<Category>,
    pub recommended_action: Action,
    pub focus_area: String,
    pub reason: String,
    pub subjects: Vec<FocusSubject>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedSubject {
    pub code: String,
    pub name: Option<String>,
    pub grade: f64,
}

/// A suggested program shift, ranked by how few failed subjects led to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramAdvisory {
    pub program: String,
    pub failed_subjects: Vec<FailedSubject>,
    pub reasons: Vec<String>,
    pub match_score: f64,
}

/// One output record per student per term group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResult {
    pub student_id: String,
    pub student_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub course: String,
    pub semester: String,
    pub year_level: String,
    pub school_year: Option<String>,
    pub average_score: f64,
    pub major_grade: Option<f64>,
    pub minor_grade: Option<f64>,
    pub cluster: Option<Tier>,
    pub major_cluster: Option<Tier>,
    pub minor_cluster: Option<Tier>,
    pub is_at_risk: bool,
    pub major_risk: bool,
    pub minor_risk: bool,
    pub risk_level: RiskLevel,
    pub recommendation: Option<Recommendation>,
    pub recommendations: Vec<Recommendation>,
    pub recommended_program: Option<String>,
    pub program_advisories: Vec<ProgramAdvisory>,
}

impl StudentResult {
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.student_number.clone()
        } else {
            name
        }
    }

    pub fn term(&self) -> TermKey {
        TermKey {
            semester: self.semester.clone(),
            year: self.year_level.clone(),
            school_year: self.school_year.clone(),
        }
    }
}
