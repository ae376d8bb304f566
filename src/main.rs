use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use nl2sql::chart::ChartPreference;
use nl2sql::schema::condenser::DEFAULT_TOP_K_TABLES;
use nl2sql::{AskRequest, Assistant, Row, Settings};
use serde_json::Value;
use std::io::Write;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Ask questions of a Databricks SQL warehouse in plain language")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, validate and run a question, then print the rows
    Ask {
        question: String,

        /// Chart preference: auto, line, bar, pie, scatter or kpi
        #[arg(long, default_value = "auto")]
        chart: ChartPreference,

        /// Number of tables offered to the model
        #[arg(long, default_value_t = DEFAULT_TOP_K_TABLES)]
        top_k: usize,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Draft SQL for a question without running it
    Plan {
        question: String,

        #[arg(long, default_value_t = DEFAULT_TOP_K_TABLES)]
        top_k: usize,
    },
    /// Print the tables visible to the assistant
    Schema {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let settings = Settings::from_env().context("Failed to load settings")?;
    let assistant = Assistant::from_settings(&settings)?;

    match args.command {
        Command::Ask {
            question,
            chart,
            top_k,
            format,
        } => {
            let request = AskRequest::new(question)
                .with_chart_preference(chart)
                .with_top_k(top_k);
            let response = assistant.ask(&request).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Csv => write_csv(&response.sampled_rows)?,
                OutputFormat::Table => {
                    println!("{}\n", response.answer_text);
                    println!("SQL:\n{}\n", response.sql);
                    print_rows(&response.sampled_rows);
                    if let Some(chart) = &response.chart {
                        println!("\nChart: {} {}", chart.chart_type, serde_json::to_string(&chart.spec)?);
                    }
                }
            }
        }
        Command::Plan { question, top_k } => {
            let plan = assistant.plan(&question, top_k).await?;
            info!("Tables considered: {}", plan.tables_considered.join(", "));
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Schema { format } => {
            let schema = assistant.describe_schema().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&schema)?),
                OutputFormat::Table | OutputFormat::Csv => {
                    for table in &schema.tables {
                        println!("{}", table.full_name);
                        for column in &table.columns {
                            println!("  {} {}", column.name, column.data_type);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_csv(rows: &[Row]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    if let Some(first) = rows.first() {
        writer.write_record(first.keys())?;
    }
    for row in rows {
        writer.write_record(row.values().map(cell_text))?;
    }
    writer.flush()?;
    Ok(())
}

fn print_rows(rows: &[Row]) {
    let Some(first) = rows.first() else {
        return;
    };
    let headers: Vec<&String> = first.keys().collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.values().map(cell_text).collect())
        .collect();
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            body.iter()
                .filter_map(|cells| cells.get(idx))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .join(" | ")
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{}", line(headers.iter().map(|h| h.to_string()).collect()));
    let _ = writeln!(out, "{}", widths.iter().map(|w| "-".repeat(*w)).join("-+-"));
    for cells in body {
        let _ = writeln!(out, "{}", line(cells));
    }
}
