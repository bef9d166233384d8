#![cfg(not(tarpaulin_include))]

use clap::Parser;
use env_logger::Env;
use sheet_analyst::config::Config;
use sheet_analyst::pipeline::AnalysisPipeline;
use sheet_analyst::reader::extension_of;
use std::path::PathBuf;

/// One-shot spreadsheet analysis from the command line
#[derive(Parser)]
#[command(name = "cli")]
#[command(about = "Analyze a spreadsheet with the LLM and save an HTML report")]
#[command(version)]
struct Cli {
    /// Spreadsheet to analyze (.xlsx or .xls, .csv when ALLOW_CSV is set)
    file: PathBuf,

    /// Question appended to the analysis prompt
    #[arg(long, short)]
    question: Option<String>,

    /// Draw charts locally and ask the model only for their explanation
    #[arg(long)]
    charts: bool,

    /// Directory the report is written to (overrides REPORT_DIR)
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Conversation id forwarded to the model
    #[arg(long)]
    uid: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.report_dir {
        config.report_dir = dir;
    }

    let file_name = cli.file.to_string_lossy();
    let extension = extension_of(&file_name).unwrap_or_default();
    let pipeline = AnalysisPipeline::new(&config)?;

    let name = if cli.charts {
        pipeline
            .analyze_with_charts(&cli.file, &extension, cli.uid.as_deref(), cli.question.as_deref())
            .await?
    } else {
        pipeline
            .analyze_file(&cli.file, &extension, cli.uid.as_deref(), cli.question.as_deref())
            .await?
    };

    println!("{}", pipeline.store().dir().join(name).display());
    Ok(())
}
