use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod aggregate;
mod cluster;
mod db;
mod error;
mod ingest;
mod models;
mod normalize;
mod pipeline;
mod recommend;
mod report;
mod risk;
mod server;
mod tier;
mod validate;

use cluster::KMeansConfig;
use models::{BatchRequest, StudentResult};
use pipeline::PipelineConfig;

#[derive(Parser)]
#[command(name = "grade-early-warning")]
#[command(about = "Grade tiering and academic early warning for Group Scholar", long_about = None)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Tuning {
    /// Differently seeded k-means runs per term group
    #[arg(long, global = true, env = "GRADE_EARLY_WARNING_N_INIT", default_value_t = 10)]
    n_init: usize,

    /// Iteration cap for each k-means run
    #[arg(
        long,
        global = true,
        env = "GRADE_EARLY_WARNING_MAX_ITERATIONS",
        default_value_t = 300
    )]
    max_iterations: usize,
}

/// Where a grade batch comes from: a file, or grades stored in Postgres.
#[derive(Args)]
struct Source {
    /// Grade batch as a JSON request body or a CSV sheet
    #[arg(long, conflicts_with_all = ["semester", "year", "school_year"])]
    input: Option<PathBuf>,
    /// Program shift mappings CSV to use with --input
    #[arg(long, requires = "input")]
    mappings: Option<PathBuf>,
    #[arg(long)]
    semester: Option<String>,
    #[arg(long)]
    year: Option<String>,
    #[arg(long)]
    school_year: Option<String>,
}

impl Source {
    fn filter(&self) -> db::TermFilter {
        db::TermFilter {
            semester: self.semester.clone(),
            year: self.year.clone(),
            school_year: self.school_year.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import subject to program shift mappings from a CSV file
    ImportMappings {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Tier students and flag those at risk
    Cluster {
        #[command(flatten)]
        source: Source,
        /// Write the JSON results here
        #[arg(long)]
        out: Option<PathBuf>,
        /// Persist results to the cluster_results table
        #[arg(long)]
        store: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: Source,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the clustering API over HTTP
    Serve {
        #[arg(long, env = "GRADE_EARLY_WARNING_BIND", default_value = "127.0.0.1:5001")]
        bind: String,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_batch(source: &Source) -> anyhow::Result<BatchRequest> {
    match &source.input {
        Some(path) => {
            let mut batch = ingest::read_batch(path)?;
            if let Some(mappings) = &source.mappings {
                batch
                    .program_mappings
                    .extend(ingest::read_program_mappings(mappings)?);
            }
            Ok(batch)
        }
        None => {
            let pool = connect().await?;
            let mut batch = db::fetch_grades(&pool, &source.filter()).await?;
            batch.program_mappings = db::fetch_program_mappings(&pool).await?;
            Ok(batch)
        }
    }
}

fn run_pipeline(batch: BatchRequest, config: &PipelineConfig) -> anyhow::Result<Vec<StudentResult>> {
    pipeline::run(batch, config).context("grade batch could not be clustered")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig {
        kmeans: KMeansConfig::new(cli.tuning.n_init, cli.tuning.max_iterations)
            .context("invalid k-means settings")?,
    };

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} grades from {}.", csv.display());
        }
        Commands::ImportMappings { csv } => {
            let pool = connect().await?;
            let stored = db::import_program_mappings(&pool, &csv).await?;
            println!("Stored {stored} program mappings from {}.", csv.display());
        }
        Commands::Cluster {
            source,
            out,
            store,
            limit,
        } => {
            let batch = load_batch(&source).await?;
            let results = run_pipeline(batch, &config)?;

            if let Some(out) = &out {
                std::fs::write(out, serde_json::to_vec_pretty(&results)?)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                info!("results written to {}", out.display());
            }
            if store {
                let pool = connect().await?;
                let stored = db::store_results(&pool, &results).await?;
                println!("Stored {stored} cluster results.");
            }

            let mut at_risk: Vec<&StudentResult> =
                results.iter().filter(|r| r.is_at_risk).collect();
            at_risk.sort_by(|a, b| b.average_score.total_cmp(&a.average_score));

            println!(
                "{} students assessed, {} at risk.",
                results.len(),
                at_risk.len()
            );
            for result in at_risk.iter().take(limit) {
                println!(
                    "- {} ({}, semester {}, year {}) avg {:.2}, tier {}",
                    result.display_name(),
                    result.student_number,
                    result.semester,
                    result.year_level,
                    result.average_score,
                    result.cluster.map(|t| t.as_str()).unwrap_or("-")
                );
                if let Some(program) = &result.recommended_program {
                    println!("  consider shifting to {program}");
                }
            }
        }
        Commands::Report { source, out } => {
            let batch = load_batch(&source).await?;
            let results = run_pipeline(batch, &config)?;
            let scope = match &source.input {
                Some(path) => Some(path.display().to_string()),
                None => source.filter().label(),
            };
            let report = report::build_report(
                scope.as_deref(),
                chrono::Utc::now().date_naive(),
                &results,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind } => {
            info!(
                "Starting grade-early-warning v{} (n_init={}, max_iterations={})",
                env!("CARGO_PKG_VERSION"),
                config.kmeans.n_init,
                config.kmeans.max_iterations
            );
            server::serve(&bind, server::AppState::new(config)).await?;
        }
    }

    Ok(())
}
