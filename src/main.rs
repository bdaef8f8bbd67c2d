//! Grade Insight - Student Test-Result Cleaning & Reporting
//!
//! Loads CSV test exports, stores cleaned tables in SQLite and reports on them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grade_insight::charts::{BarChart, BarChartRenderer, DEFAULT_SIZE};
use grade_insight::config::AppConfig;
use grade_insight::data::TableLoader;
use grade_insight::pipeline::{Pipeline, Session, TableRef};
use grade_insight::report;
use grade_insight::stats::GradeStandardizer;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "grade-insight")]
#[command(about = "Clean, store and report on student test results")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "GRADE_INSIGHT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, clean and store every CSV export
    Ingest,
    /// Print a stored table, or the raw CSV export with --original
    Show {
        name: String,
        #[arg(long)]
        original: bool,
        /// Rescale Grade to 0-100 before printing
        #[arg(long)]
        standardized: bool,
    },
    /// A student's grade in every test
    Results {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        chart: bool,
        /// Open the chart after writing it
        #[arg(long, requires = "chart")]
        open: bool,
        #[arg(long)]
        json: bool,
    },
    /// A student's per-question performance in one test
    Performance {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        table: String,
        #[arg(long)]
        chart: bool,
        #[arg(long, requires = "chart")]
        open: bool,
        #[arg(long)]
        json: bool,
    },
    /// Students with several low standardized grades
    Underperforming {
        #[arg(long)]
        json: bool,
    },
    /// Self-rated beginners with a high summative grade
    Hardworking {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let mut session = Session::open(&config)
        .with_context(|| format!("opening database {}", config.database.display()))?;
    let ok = run(&config, &mut session, cli.command)?;
    session.close().context("closing database")?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns false when any table could not be processed or stored.
fn ingest(config: &AppConfig, session: &mut Session) -> Result<bool> {
    let pipeline = Pipeline::from_config(config);
    let ingested = pipeline
        .ingest(&config.data_dir, &config.excluded())
        .with_context(|| format!("loading exports from {}", config.data_dir.display()))?;

    for failure in &ingested.failures {
        println!("{:<24} FAILED  {}", failure.source, failure.error);
    }

    let transfer = Pipeline::transfer(session.store_mut(), &ingested.tables);

    for (name, rows) in &transfer.stored {
        println!("{name:<24} stored  {rows} rows");
    }
    for (name, error) in &transfer.failed {
        println!("{name:<24} FAILED  {error}");
    }

    info!(
        stored = transfer.stored.len(),
        failed = transfer.failed.len() + ingested.failures.len(),
        "ingest finished"
    );
    Ok(ingested.is_clean() && transfer.is_clean())
}

/// Returns false when the command should exit with a failure status.
fn run(config: &AppConfig, session: &mut Session, command: Commands) -> Result<bool> {
    match command {
        Commands::Ingest => return ingest(config, session),
        Commands::Show {
            name,
            original,
            standardized,
        } => {
            let table = if original {
                TableRef::Original(name.clone())
            } else {
                TableRef::Processed(name.clone())
            };
            let df = session.table(&table)?;
            if standardized {
                for (clean_name, clean) in GradeStandardizer::standardize_all([(name.as_str(), &df)])? {
                    println!("{clean_name}\n{clean}");
                }
            } else {
                println!("{df}");
            }
        }
        Commands::Results { id, chart, open, json } => {
            let results = report::student_results(session.store(), id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if !results.has_results() {
                println!("No results for ResearchId {id}");
            } else {
                for r in &results.results {
                    println!("{:<16} {}", r.table, format_grade(r.grade));
                }
            }

            if chart && results.has_results() {
                let grades: Vec<(String, Option<f64>)> =
                    results.results.iter().map(|r| (r.table.clone(), r.grade)).collect();
                let path = config.chart_dir.join(format!("results_{id}.png"));
                write_chart(&BarChart::test_results(id, &grades), &path, open)?;
            }
        }
        Commands::Performance {
            id,
            table,
            chart,
            open,
            json,
        } => {
            let performance = report::question_performance(session.store(), &table, id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&performance)?);
            } else if !performance.found {
                println!("ResearchId {id} not found in {table}");
            } else {
                println!("{:<8} {:>10} {:>10} {:>10}", "Question", "Grade", "Average", "Relative");
                for q in &performance.questions {
                    println!(
                        "{:<8} {:>10} {:>10} {:>10}",
                        q.question,
                        format_grade(q.score.value),
                        format_grade(q.score.average),
                        format_grade(q.relative)
                    );
                }
            }

            if chart && performance.found {
                for q in &performance.questions {
                    let (Some(grade), Some(relative)) = (q.score.value, q.relative) else {
                        continue;
                    };
                    let bars = BarChart::question_performance(id, &table, &q.question, grade, relative);
                    let path = config
                        .chart_dir
                        .join(format!("performance_{table}_{id}_{}.png", q.question));
                    write_chart(&bars, &path, open)?;
                }
            }
        }
        Commands::Underperforming { json } => {
            let flagged = report::underperforming(session.store(), &config.underperforming)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&flagged)?);
                return Ok(true);
            }

            println!("There are {} underperforming students.", flagged.students.len());
            println!(
                "These students have at least {} grades between {} and {}",
                flagged.min_count, flagged.low, flagged.high
            );
            for student in &flagged.students {
                let cells: Vec<String> = flagged
                    .columns
                    .iter()
                    .map(|column| {
                        let grade = student.grades.get(column).copied().flatten();
                        match student.bands.get(column).copied().flatten() {
                            Some(band) => format!("{column}={} ({})", format_grade(grade), band.label()),
                            None => format!("{column}={}", format_grade(grade)),
                        }
                    })
                    .collect();
                println!("{:<8} {}", student.research_id, cells.join("  "));
            }
        }
        Commands::Hardworking { json } => {
            let path = config.ratings_path();
            let ratings = TableLoader::load_csv(&path)?;
            let students = report::hardworking(session.store(), &ratings, &config.hardworking)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&students)?);
            } else {
                println!("{:<12} {:>14}  Ratings", "ResearchId", "Grade_SumTest");
                for s in &students {
                    println!("{:<12} {:>14.1}  {}", s.research_id, s.grade, s.rating);
                }
            }
        }
    }
    Ok(true)
}

fn format_grade(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

fn write_chart(chart: &BarChart, path: &Path, open_after: bool) -> Result<()> {
    BarChartRenderer::render(chart, path, DEFAULT_SIZE)
        .with_context(|| format!("writing chart {}", path.display()))?;
    println!("Chart saved to {}", path.display());
    if open_after {
        open::that(path).with_context(|| format!("opening {}", path.display()))?;
    }
    Ok(())
}
