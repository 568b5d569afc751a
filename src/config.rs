use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Utc};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    Access,
    AtRisk,
    Instructor,
    Participation,
}

impl ReportType {
    pub fn label(&self) -> &'static str {
        match self {
            ReportType::Access => "Course Resource Access",
            ReportType::AtRisk => "At-risk Students",
            ReportType::Instructor => "Instructor Presence",
            ReportType::Participation => "Zero Participation",
        }
    }

    // Participation is derived from submissions alone, so its runs skip the
    // slow per-user usage crawl entirely.
    pub fn uses_accesses(&self) -> bool {
        !matches!(self, ReportType::Participation)
    }

    pub fn uses_submissions(&self) -> bool {
        !matches!(self, ReportType::Access)
    }

    pub fn is_student_report(&self) -> bool {
        matches!(self, ReportType::AtRisk | ReportType::Participation)
    }

    pub fn teachers_only(&self) -> bool {
        matches!(self, ReportType::Instructor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    CourseName,
    InstructorName,
}

// Closed date range, stored as half-open UTC instants. Day boundaries are
// taken in the local timezone, matching how report consumers read the dates.
#[derive(Debug, Clone, Copy)]
pub struct ReportingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl ReportingPeriod {
    pub fn from_dates(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self> {
        if end_date < start_date {
            bail!("reporting period ends ({end_date}) before it starts ({start_date})");
        }
        let upper = end_date
            .succ_opt()
            .context("reporting period end date is out of range")?;
        Ok(Self {
            start: local_midnight(start_date)?,
            end: local_midnight(upper)?,
            start_date,
            end_date,
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    // "01-15-24 - 03-20-24", the form embedded in report file names.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            short_date(self.start_date),
            short_date(self.end_date)
        )
    }
}

fn local_midnight(date: NaiveDate) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .context("invalid time of day")?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .with_context(|| format!("{date} has no local midnight"))?;
    Ok(local.with_timezone(&Utc))
}

fn short_date(date: NaiveDate) -> String {
    format!("{:02}-{:02}-{:02}", date.month(), date.day(), date.year() % 100)
}

// Trip levels for the at-risk tests. The zero counters use exact equality,
// so a student trips "no posts" only at exactly zero posts.
#[derive(Debug, Clone, Copy)]
pub struct RiskThresholds {
    pub late: i64,
    pub missing: i64,
    pub activity_seconds: i64,
    pub posts: i64,
    pub score: f64,
    pub submissions: i64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            late: 0,
            missing: 0,
            activity_seconds: 0,
            posts: 0,
            score: 70.0,
            submissions: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub report_type: ReportType,
    pub account_id: i64,
    pub term_id: i64,
    pub search_mode: SearchMode,
    pub search_text: String,
    pub combined: bool,
    pub online_only: bool,
    pub anonymize: bool,
    pub period: Option<ReportingPeriod>,
    pub include_profile_views: bool,
    pub headers_without_spaces: bool,
    pub thresholds: RiskThresholds,
}

impl RunConfig {
    // An unscoped listing would walk every course in the account.
    pub fn validate(&self) -> Result<()> {
        if self.term_id == 0 && self.search_text.is_empty() {
            bail!("provide --term and/or --search to narrow the course listing");
        }
        Ok(())
    }
}
