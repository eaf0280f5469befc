use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::Value;

use crate::models::{BatchRequest, ProgramMapping, RawGrade, Scalar};

/// A grade row as laid out in import CSV files. Scores stay text so the pipeline decides
/// what is parsable.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvGradeRow {
    pub student_number: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    pub subject_code: Option<String>,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub subject_type: Option<String>,
    pub score: Option<String>,
    pub semester: Option<String>,
    #[serde(alias = "year_level")]
    pub year: Option<String>,
    #[serde(default)]
    pub school_year: Option<String>,
    #[serde(default)]
    pub source_key: Option<String>,
}

impl From<CsvGradeRow> for RawGrade {
    fn from(row: CsvGradeRow) -> Self {
        let text = |value: Option<String>| value.map(Scalar::Text);
        RawGrade {
            student_id: text(row.student_id),
            student_number: text(row.student_number),
            first_name: row.first_name,
            last_name: row.last_name,
            course: row.course,
            subject_code: text(row.subject_code),
            subject_name: row.subject_name,
            subject_type: row.subject_type,
            // An empty score cell is still a present score, just not a parsable one.
            score: Some(row.score.map(Value::String).unwrap_or(Value::Null)),
            semester: text(row.semester),
            year: text(row.year),
            school_year: text(row.school_year),
        }
    }
}

pub fn read_csv_rows<R: Read>(reader: R) -> anyhow::Result<Vec<CsvGradeRow>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<CsvGradeRow>().enumerate() {
        rows.push(result.with_context(|| format!("invalid CSV grade row {}", line + 1))?);
    }
    Ok(rows)
}

/// Reads `subject_code,alternative_program,reason` rows. `alternative_course` is accepted
/// as the program column.
pub fn parse_program_mappings<R: Read>(reader: R) -> anyhow::Result<Vec<ProgramMapping>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut mappings = Vec::new();
    for (line, result) in reader.deserialize::<ProgramMapping>().enumerate() {
        let mut mapping =
            result.with_context(|| format!("invalid program mapping row {}", line + 1))?;
        mapping.reason = mapping.reason.filter(|reason| !reason.is_empty());
        mappings.push(mapping);
    }
    Ok(mappings)
}

pub fn read_program_mappings(path: &Path) -> anyhow::Result<Vec<ProgramMapping>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_program_mappings(file)
}

/// Loads a grade batch from a `.json` request body or a `.csv` grade sheet.
pub fn read_batch(path: &Path) -> anyhow::Result<BatchRequest> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => {
            let body = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(serde_json::from_slice(&body)
                .with_context(|| format!("{} is not a grade batch", path.display()))?)
        }
        Some("csv") => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let rows = read_csv_rows(file)?;
            Ok(BatchRequest {
                grades: Some(rows.into_iter().map(RawGrade::from).collect()),
                ..BatchRequest::default()
            })
        }
        _ => bail!(
            "unsupported input {}: expected a .json or .csv file",
            path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawScore;
    use crate::validate::validate_batch;

    const SHEET: &str = "\
student_number,first_name,last_name,subject_code,subject_type,score,semester,year_level,school_year
2024-001,Avery,Lee,CS101,Major,1.75,1st,1,2024-2025
2024-001,Avery,Lee,PE1,Minor,,1st,1,2024-2025
";

    #[test]
    fn csv_rows_become_raw_grades() {
        let rows = read_csv_rows(SHEET.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        let records = validate_batch(BatchRequest {
            grades: Some(rows.into_iter().map(RawGrade::from).collect()),
            ..BatchRequest::default()
        })
        .unwrap();

        assert_eq!(records[0].score, RawScore::Text("1.75".to_string()));
        assert_eq!(records[0].term.year, "1");
        assert_eq!(records[0].last_name.as_deref(), Some("Lee"));
        assert_eq!(records[1].score, RawScore::Null);
    }

    #[test]
    fn rejects_unknown_extensions() {
        let err = read_batch(Path::new("grades.xlsx")).unwrap_err();
        assert!(err.to_string().contains("expected a .json or .csv file"));
    }

    #[test]
    fn program_mapping_sheet_accepts_course_column() {
        let sheet = "\
subject_code,alternative_course,reason
CS101,BSIT,Less programming
MATH1,BSEd,
";
        let mappings = parse_program_mappings(sheet.as_bytes()).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].alternative_program, "BSIT");
        assert_eq!(mappings[0].reason.as_deref(), Some("Less programming"));
        assert_eq!(mappings[1].reason, None);
    }
}
