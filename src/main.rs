use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod aggregate;
mod anonymize;
mod api;
mod config;
mod courses;
mod error;
mod grading;
mod models;
mod report;
mod risk;
mod run;

use api::{ApiClient, HttpFetcher};
use config::{ReportType, ReportingPeriod, RiskThresholds, RunConfig, SearchMode};
use run::{CancelFlag, LogProgress};

#[derive(Parser)]
#[command(name = "lms-engagement-reports")]
#[command(about = "Course engagement CSV reports drawn from an LMS REST API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flag students at risk of falling behind
    AtRisk(ReportArgs),
    /// List every course resource each user has touched
    Access {
        #[command(flatten)]
        common: ReportArgs,
        /// Keep roster profile views in the output
        #[arg(long)]
        include_profile_views: bool,
    },
    /// Summarize instructor grading turnaround and discussion presence
    Instructor(ReportArgs),
    /// Find students who have submitted nothing at all
    Participation(ReportArgs),
}

#[derive(Args)]
struct ReportArgs {
    /// Account whose courses are scanned
    #[arg(long, default_value_t = 1)]
    account: i64,
    /// Enrollment term to filter on; 0 leaves the term open
    #[arg(long, default_value_t = 0)]
    term: i64,
    /// Narrow the course listing by name
    #[arg(long, default_value = "")]
    search: String,
    /// What the search text matches against
    #[arg(long, value_enum, default_value = "course-name")]
    search_by: SearchMode,
    /// Write one file per course instead of one combined report
    #[arg(long)]
    per_course: bool,
    /// Keep only online sections
    #[arg(long)]
    online_only: bool,
    /// Replace student names with pseudonyms
    #[arg(long)]
    anonymize: bool,
    /// First day of the reporting period (YYYY-MM-DD)
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,
    /// Last day of the reporting period (YYYY-MM-DD)
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
    /// Strip spaces from CSV headers
    #[arg(long)]
    plain_headers: bool,
    /// Directory the report files land in
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// LMS root URL; LMS_BASE_URL is used when omitted
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let (report_type, common, include_profile_views) = match cli.command {
        Commands::AtRisk(common) => (ReportType::AtRisk, common, false),
        Commands::Access {
            common,
            include_profile_views,
        } => (ReportType::Access, common, include_profile_views),
        Commands::Instructor(common) => (ReportType::Instructor, common, false),
        Commands::Participation(common) => (ReportType::Participation, common, false),
    };

    let period = match (common.start, common.end) {
        (Some(start), Some(end)) => Some(ReportingPeriod::from_dates(start, end)?),
        _ => None,
    };
    let config = RunConfig {
        report_type,
        account_id: common.account,
        term_id: common.term,
        search_mode: common.search_by,
        search_text: common.search,
        combined: !common.per_course,
        online_only: common.online_only,
        anonymize: common.anonymize,
        period,
        include_profile_views,
        headers_without_spaces: common.plain_headers,
        thresholds: RiskThresholds::default(),
    };
    config.validate()?;

    let base_url = match common.base_url {
        Some(url) => url,
        None => std::env::var("LMS_BASE_URL")
            .context("pass --base-url or set LMS_BASE_URL to the LMS root")?,
    };
    let token = std::env::var("LMS_API_TOKEN")
        .context("LMS_API_TOKEN must hold an API token with reporting access")?;
    let client = ApiClient::new(HttpFetcher::new(&base_url, &token)?);

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler_flag.set();
        }
    });

    let summary =
        run::execute(&client, &config, &common.out_dir, &cancel, &mut LogProgress).await?;

    if summary.cancelled {
        println!("Run cancelled; no further output written.");
        return Ok(());
    }
    if summary.courses_selected == 0 {
        println!("No courses matched the search criteria. Refine the search and try again.");
        return Ok(());
    }
    for file in &summary.files {
        println!("Wrote {}.", file.display());
    }
    if summary.skipped_courses > 0 || summary.empty_courses > 0 {
        println!(
            "Omitted {} cancelled or sandbox courses and {} courses with no students enrolled.",
            summary.skipped_courses, summary.empty_courses
        );
    }
    if summary.failed_courses > 0 {
        println!(
            "{} courses were skipped after fetch failures; see the log for details.",
            summary.failed_courses
        );
    }

    Ok(())
}
