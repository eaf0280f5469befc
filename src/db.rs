use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ingest;
use crate::models::{BatchRequest, ProgramMapping, RawGrade, Scalar, StudentResult};

/// Optional term filters applied when loading stored grades.
#[derive(Debug, Clone, Default)]
pub struct TermFilter {
    pub semester: Option<String>,
    pub year: Option<String>,
    pub school_year: Option<String>,
}

impl TermFilter {
    fn clauses(&self) -> Vec<(&'static str, &str)> {
        [
            ("semester", self.semester.as_deref()),
            ("year_level", self.year.as_deref()),
            ("school_year", self.school_year.as_deref()),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.map(|value| (column, value)))
        .collect()
    }

    pub fn label(&self) -> Option<String> {
        let parts: Vec<String> = self
            .clauses()
            .into_iter()
            .map(|(column, value)| format!("{column} {value}"))
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = ingest::read_csv_rows(file)?;
    let mut inserted = 0usize;

    for (line, row) in rows.into_iter().enumerate() {
        let student_number = row
            .student_number
            .clone()
            .with_context(|| format!("row {} has no student_number", line + 1))?;
        let subject_code = row
            .subject_code
            .clone()
            .with_context(|| format!("row {} has no subject_code", line + 1))?;
        let semester = row
            .semester
            .clone()
            .with_context(|| format!("row {} has no semester", line + 1))?;
        let year = row
            .year
            .clone()
            .with_context(|| format!("row {} has no year", line + 1))?;
        let school_year = row.school_year.clone().unwrap_or_default();

        let source_key = row.source_key.clone().unwrap_or_else(|| {
            format!("{student_number}:{subject_code}:{semester}:{year}:{school_year}")
        });

        let result = sqlx::query(
            r#"
            INSERT INTO grade_early_warning.grades
            (id, source_key, student_id, student_number, first_name, last_name, course,
             subject_code, subject_name, subject_type, score, semester, year_level, school_year)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_key)
        .bind(&row.student_id)
        .bind(&student_number)
        .bind(&row.first_name)
        .bind(&row.last_name)
        .bind(&row.course)
        .bind(&subject_code)
        .bind(&row.subject_name)
        .bind(&row.subject_type)
        .bind(&row.score)
        .bind(&semester)
        .bind(&year)
        .bind(&school_year)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

fn grades_query(filter: &TermFilter) -> (String, Vec<&str>) {
    let mut query = String::from(
        "SELECT student_id, student_number, first_name, last_name, course, \
         subject_code, subject_name, subject_type, score, semester, year_level, school_year \
         FROM grade_early_warning.grades",
    );
    let mut binds = Vec::new();

    for (position, (column, value)) in filter.clauses().into_iter().enumerate() {
        query.push_str(if position == 0 { " WHERE " } else { " AND " });
        query.push_str(&format!("{column} = ${}", position + 1));
        binds.push(value);
    }
    query.push_str(" ORDER BY student_number, subject_code");

    (query, binds)
}

pub async fn fetch_grades(pool: &PgPool, filter: &TermFilter) -> anyhow::Result<BatchRequest> {
    let (query, binds) = grades_query(filter);
    let mut rows = sqlx::query(&query);
    for value in binds {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut grades = Vec::with_capacity(records.len());

    for row in records {
        let text = |column: &str| -> Option<Scalar> {
            row.get::<Option<String>, _>(column).map(Scalar::Text)
        };
        let school_year: String = row.get("school_year");
        grades.push(RawGrade {
            student_id: text("student_id"),
            student_number: text("student_number"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            course: row.get("course"),
            subject_code: text("subject_code"),
            subject_name: row.get("subject_name"),
            subject_type: row.get("subject_type"),
            score: Some(
                row.get::<Option<String>, _>("score")
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            semester: text("semester"),
            year: text("year_level"),
            school_year: (!school_year.is_empty()).then(|| Scalar::Text(school_year)),
        });
    }

    Ok(BatchRequest {
        grades: Some(grades),
        ..BatchRequest::default()
    })
}

pub async fn import_program_mappings(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let mappings = ingest::read_program_mappings(csv_path)?;
    let mut tx = pool.begin().await?;

    for mapping in &mappings {
        sqlx::query(
            r#"
            INSERT INTO grade_early_warning.course_recommendations
            (subject_code, alternative_program, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (subject_code, alternative_program) DO UPDATE
            SET reason = EXCLUDED.reason,
                updated_at = NOW()
            "#,
        )
        .bind(&mapping.subject_code)
        .bind(&mapping.alternative_program)
        .bind(&mapping.reason)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(mappings.len())
}

pub async fn fetch_program_mappings(pool: &PgPool) -> anyhow::Result<Vec<ProgramMapping>> {
    let rows = sqlx::query(
        "SELECT subject_code, alternative_program, reason \
         FROM grade_early_warning.course_recommendations \
         ORDER BY subject_code, alternative_program",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ProgramMapping {
            subject_code: row.get("subject_code"),
            alternative_program: row.get("alternative_program"),
            reason: row.get("reason"),
        })
        .collect())
}

pub async fn store_results(pool: &PgPool, results: &[StudentResult]) -> anyhow::Result<usize> {
    let generated_at = Utc::now();
    let mut tx = pool.begin().await?;

    for result in results {
        let recommendations = serde_json::to_string(&result.recommendations)?;
        let program_advisories = serde_json::to_string(&result.program_advisories)?;
        sqlx::query(
            r#"
            INSERT INTO grade_early_warning.cluster_results
            (id, student_number, semester, year_level, school_year, average_score,
             major_grade, minor_grade, cluster, major_cluster, minor_cluster,
             is_at_risk, risk_level, recommendations, recommended_program, program_advisories,
             generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (student_number, semester, year_level, school_year) DO UPDATE
            SET average_score = EXCLUDED.average_score,
                major_grade = EXCLUDED.major_grade,
                minor_grade = EXCLUDED.minor_grade,
                cluster = EXCLUDED.cluster,
                major_cluster = EXCLUDED.major_cluster,
                minor_cluster = EXCLUDED.minor_cluster,
                is_at_risk = EXCLUDED.is_at_risk,
                risk_level = EXCLUDED.risk_level,
                recommendations = EXCLUDED.recommendations,
                recommended_program = EXCLUDED.recommended_program,
                program_advisories = EXCLUDED.program_advisories,
                generated_at = EXCLUDED.generated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&result.student_number)
        .bind(&result.semester)
        .bind(&result.year_level)
        .bind(result.school_year.as_deref().unwrap_or_default())
        .bind(result.average_score)
        .bind(result.major_grade)
        .bind(result.minor_grade)
        .bind(result.cluster.map(|tier| tier.as_str()))
        .bind(result.major_cluster.map(|tier| tier.as_str()))
        .bind(result.minor_cluster.map(|tier| tier.as_str()))
        .bind(result.is_at_risk)
        .bind(result.risk_level.as_str())
        .bind(recommendations)
        .bind(&result.recommended_program)
        .bind(program_advisories)
        .bind(generated_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(results.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfiltered_query_has_no_where_clause() {
        let filter = TermFilter::default();
        let (query, binds) = grades_query(&filter);
        assert!(!query.contains("WHERE"));
        assert!(query.ends_with("ORDER BY student_number, subject_code"));
        assert!(binds.is_empty());
    }

    #[test]
    fn filters_bind_in_order() {
        let filter = TermFilter {
            semester: Some("1st".to_string()),
            year: None,
            school_year: Some("2024-2025".to_string()),
        };
        let (query, binds) = grades_query(&filter);
        assert!(query.contains(" WHERE semester = $1 AND school_year = $2 ORDER BY"));
        assert_eq!(binds, vec!["1st", "2024-2025"]);
        assert_eq!(
            filter.label().as_deref(),
            Some("semester 1st, school_year 2024-2025")
        );
    }
}
