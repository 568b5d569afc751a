use std::collections::HashMap;
use std::io;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{Terminator, WriterBuilder};

use crate::config::RunConfig;
use crate::models::{AccessRow, InstructorRow, StudentRow, User};

// A typed cell plus its presentation rule. Zero hours, days, and means render
// empty: those columns read as "no signal", not "signal of zero". Raw counts
// keep their zeroes.
pub enum Cell {
    Text(String),
    Int(i64),
    OptInt(Option<i64>),
    Date(Option<DateTime<Utc>>),
    Hours(Option<i64>),
    Days(f64),
    Integer(f64),
    Empty,
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Int(value) => value.to_string(),
            Cell::OptInt(value) => value.map(|v| v.to_string()).unwrap_or_default(),
            Cell::Date(at) => at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            Cell::Hours(seconds) => match seconds {
                None | Some(0) => String::new(),
                Some(seconds) => format!("{:.2}", *seconds as f64 / 3600.0),
            },
            Cell::Days(seconds) => {
                if *seconds == 0.0 {
                    String::new()
                } else {
                    format!("{:.2}", seconds / 86400.0)
                }
            }
            Cell::Integer(value) => {
                if *value == 0.0 {
                    String::new()
                } else {
                    (value.round() as i64).to_string()
                }
            }
            Cell::Empty => String::new(),
        }
    }
}

pub struct FieldSpec<R> {
    pub header: &'static str,
    pub sis: bool,
    pub value: fn(&R, &User) -> Cell,
}

impl<R> FieldSpec<R> {
    fn new(header: &'static str, value: fn(&R, &User) -> Cell) -> Self {
        Self {
            header,
            sis: false,
            value,
        }
    }

    // Institution-id columns only appear when some user in the run has one.
    fn sis(header: &'static str, value: fn(&R, &User) -> Cell) -> Self {
        Self {
            header,
            sis: true,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub anonymize: bool,
    pub with_sis: bool,
    pub headers_without_spaces: bool,
    pub include_profile_views: bool,
}

// One row shape per report type. Each declares its full column table; the
// identity columns at the front are adjusted at render time.
pub trait ReportRow {
    fn user_id(&self) -> i64;
    fn is_student(&self) -> bool;
    fn excluded(&self, _options: &RenderOptions) -> bool {
        false
    }
    fn fields() -> Vec<FieldSpec<Self>>
    where
        Self: Sized;
}

fn name_cell<R: ReportRow>(row: &R, user: &User) -> Cell {
    if row.is_student() {
        Cell::Text(user.pseudonym.clone().unwrap_or_else(|| user.name.clone()))
    } else {
        Cell::Text(user.name.clone())
    }
}

fn sortable_cell<R: ReportRow>(_row: &R, user: &User) -> Cell {
    Cell::Text(user.sortable_name.clone().unwrap_or_default())
}

// Anonymized output replaces the two identifying lead columns with a single
// pseudonymous Name and drops institution ids entirely.
fn assemble<R: ReportRow>(options: &RenderOptions) -> Vec<FieldSpec<R>> {
    let mut fields = R::fields();
    if options.anonymize {
        fields.splice(0..2, [FieldSpec::new("Name", name_cell::<R>)]);
        fields.retain(|field| !field.sis);
    } else {
        fields.insert(2, FieldSpec::new("Sortable Name", sortable_cell::<R>));
        if !options.with_sis {
            fields.retain(|field| !field.sis);
        }
    }
    fields
}

pub fn write_report<R: ReportRow, W: io::Write>(
    out: W,
    rows: &[R],
    users: &HashMap<i64, User>,
    options: &RenderOptions,
) -> Result<()> {
    let fields = assemble::<R>(options);
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(out);

    writer
        .write_record(fields.iter().map(|field| {
            if options.headers_without_spaces {
                field.header.replace(' ', "")
            } else {
                field.header.to_string()
            }
        }))
        .context("failed to write the report header")?;

    for row in rows {
        if row.excluded(options) {
            continue;
        }
        // Rows whose user vanished from the roster are dropped, not errors.
        let Some(user) = users.get(&row.user_id()) else {
            continue;
        };
        writer
            .write_record(fields.iter().map(|field| (field.value)(row, user).render()))
            .context("failed to write a report row")?;
    }

    writer.flush().context("failed to flush the report")?;
    Ok(())
}

impl ReportRow for StudentRow {
    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn is_student(&self) -> bool {
        true
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            FieldSpec::new("User ID", |_, u| Cell::Int(u.id)),
            FieldSpec::new("Login ID", |_, u| {
                Cell::Text(u.login_id.clone().unwrap_or_default())
            }),
            FieldSpec::sis("SIS User ID", |_, u| {
                Cell::Text(u.sis_user_id.clone().unwrap_or_default())
            }),
            FieldSpec::new("Email", |_, u| {
                Cell::Text(u.email.clone().unwrap_or_default())
            }),
            FieldSpec::new("Total Hours Active", |r, _| {
                Cell::Hours(r.total_activity_time)
            }),
            FieldSpec::new("Last Activity", |r, _| Cell::Date(r.last_activity_at)),
            FieldSpec::new("Home Page Views", |r, _| Cell::Int(r.home_page_views)),
            FieldSpec::new("Total Page Views", |r, _| Cell::Int(r.page_views)),
            FieldSpec::new("Submitted / Due", |r, _| Cell::Text(r.submitted.clone())),
            FieldSpec::new("Late Assignments", |r, _| Cell::Int(r.assignments_late)),
            FieldSpec::new("Max. Days Late", |r, _| Cell::Days(r.max_late_seconds)),
            FieldSpec::new("Missing Assignments", |r, _| {
                Cell::Int(r.assignments_missing)
            }),
            FieldSpec::new("Max. Days Missing", |r, _| {
                Cell::Days(r.max_missing_seconds)
            }),
            FieldSpec::new("Current Score", |r, _| Cell::Text(r.current_score.clone())),
            FieldSpec::new("Discussion Posts / Due", |r, _| {
                Cell::Text(r.discussion_posts.clone())
            }),
            FieldSpec::new("Quarter", |r, _| {
                Cell::Text(r.course.quarter_name.clone().unwrap_or_default())
            }),
            FieldSpec::new("Section", |r, _| {
                Cell::Text(r.course.section.clone().unwrap_or_default())
            }),
            FieldSpec::new("Short Course Code", |r, _| {
                Cell::Text(r.course.short_course_code.clone().unwrap_or_default())
            }),
            FieldSpec::new("Course Name", |r, _| Cell::Text(r.course.course_name.clone())),
            FieldSpec::new("Full Course Code", |r, _| {
                Cell::Text(r.course.course_code.clone())
            }),
            FieldSpec::new("Instructor Name", |r, _| {
                Cell::Text(r.course.teacher_name.clone())
            }),
            FieldSpec::new("Instructor Email", |r, _| {
                Cell::Text(r.course.teacher_email.clone())
            }),
            FieldSpec::new("Student Course Enrollment Page", |r, _| {
                Cell::Text(r.enrollment_url.clone().unwrap_or_default())
            }),
        ]
    }
}

impl ReportRow for InstructorRow {
    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn is_student(&self) -> bool {
        self.user_role == "Student"
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            FieldSpec::new("User ID", |_, u| Cell::Int(u.id)),
            FieldSpec::new("Login ID", |_, u| {
                Cell::Text(u.login_id.clone().unwrap_or_default())
            }),
            FieldSpec::sis("SIS User ID", |_, u| {
                Cell::Text(u.sis_user_id.clone().unwrap_or_default())
            }),
            FieldSpec::new("Email", |_, u| {
                Cell::Text(u.email.clone().unwrap_or_default())
            }),
            FieldSpec::new("Total Hours Active", |r, _| {
                Cell::Hours(r.total_activity_time)
            }),
            FieldSpec::new("Last Activity", |r, _| Cell::Date(r.last_activity_at)),
            FieldSpec::new("Home Page Views", |r, _| Cell::Int(r.home_page_views)),
            FieldSpec::new("Total Page Views", |r, _| Cell::Int(r.page_views)),
            FieldSpec::new("Discussion Posts", |r, _| Cell::Int(r.discussion_posts)),
            FieldSpec::new("Last Post Date", |r, _| Cell::Date(r.last_post_at)),
            FieldSpec::new("Mean Post Chars", |r, _| Cell::Integer(r.post_mean_length)),
            FieldSpec::new("Graded On-time %", |r, _| {
                Cell::Int(r.course.graded_ontime_pcnt)
            }),
            FieldSpec::new("Graded Late %", |r, _| Cell::Int(r.course.graded_late_pcnt)),
            FieldSpec::new("Grades Overdue %", |r, _| {
                Cell::Int(r.course.graded_none_pcnt)
            }),
            FieldSpec::new("Assignment Feedback", |r, _| {
                Cell::Int(r.course.feedback_count)
            }),
            FieldSpec::new("Mean Feedback Chars", |r, _| {
                Cell::Integer(r.course.feedback_mean_length as f64)
            }),
            FieldSpec::new("Quarter", |r, _| {
                Cell::Text(r.course.quarter_name.clone().unwrap_or_default())
            }),
            FieldSpec::new("Enrollment", |r, _| Cell::OptInt(r.course.total_students)),
            FieldSpec::new("Section", |r, _| {
                Cell::Text(r.course.section.clone().unwrap_or_default())
            }),
            FieldSpec::new("Short Course Code", |r, _| {
                Cell::Text(r.course.short_course_code.clone().unwrap_or_default())
            }),
            FieldSpec::new("Course Name", |r, _| Cell::Text(r.course.course_name.clone())),
            FieldSpec::new("Full Course Code", |r, _| {
                Cell::Text(r.course.course_code.clone())
            }),
            FieldSpec::new("Instructor Course Enrollment Page", |r, _| {
                Cell::Text(r.enrollment_url.clone().unwrap_or_default())
            }),
        ]
    }
}

impl ReportRow for AccessRow {
    fn user_id(&self) -> i64 {
        self.user_id
    }

    fn is_student(&self) -> bool {
        self.user_role == "Student"
    }

    // Roster self-views are navigation noise, not course activity.
    fn excluded(&self, options: &RenderOptions) -> bool {
        !options.include_profile_views
            && self.access.asset_category.as_deref() == Some("roster")
            && self.access.asset_class_name.as_deref() == Some("student_enrollment")
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            FieldSpec::new("User ID", |_, u| Cell::Int(u.id)),
            FieldSpec::new("Login ID", |_, u| {
                Cell::Text(u.login_id.clone().unwrap_or_default())
            }),
            FieldSpec::sis("SIS User ID", |_, u| {
                Cell::Text(u.sis_user_id.clone().unwrap_or_default())
            }),
            FieldSpec::new("Role", |r, _| Cell::Text(r.user_role.clone())),
            // Activity time is an enrollment figure; it rides only on the
            // Course Home row instead of repeating on every asset.
            FieldSpec::new("Total Hours Active", |r, _| {
                if r.access.readable_name == "Course Home" {
                    Cell::Hours(r.total_activity_time)
                } else {
                    Cell::Empty
                }
            }),
            FieldSpec::new("Asset Title", |r, _| {
                Cell::Text(r.access.readable_name.clone())
            }),
            FieldSpec::new("Views", |r, _| Cell::OptInt(r.access.view_score)),
            FieldSpec::new("Participations", |r, _| {
                Cell::OptInt(r.access.participate_score)
            }),
            FieldSpec::new("First Access", |r, _| Cell::Date(r.access.created_at)),
            FieldSpec::new("Last Access", |r, _| Cell::Date(r.access.last_access)),
            FieldSpec::new("Action", |r, _| {
                Cell::Text(r.access.action_level.clone().unwrap_or_default())
            }),
            FieldSpec::new("Asset Code", |r, _| {
                Cell::Text(r.access.asset_code.clone().unwrap_or_default())
            }),
            FieldSpec::new("Asset Group Code", |r, _| {
                Cell::Text(r.access.asset_group_code.clone().unwrap_or_default())
            }),
            FieldSpec::new("Quarter", |r, _| {
                Cell::Text(r.course.quarter_name.clone().unwrap_or_default())
            }),
            FieldSpec::new("Section", |r, _| {
                Cell::Text(r.course.section.clone().unwrap_or_default())
            }),
            FieldSpec::new("Short Course Code", |r, _| {
                Cell::Text(r.course.short_course_code.clone().unwrap_or_default())
            }),
            FieldSpec::new("Course Name", |r, _| Cell::Text(r.course.course_name.clone())),
            FieldSpec::new("Full Course Code", |r, _| {
                Cell::Text(r.course.course_code.clone())
            }),
            FieldSpec::new("Course ID", |r, _| Cell::Int(r.course.course_id)),
            FieldSpec::new("SIS Course ID", |r, _| {
                Cell::Text(r.course.sis_course_id.clone().unwrap_or_default())
            }),
            FieldSpec::new("Term ID", |r, _| {
                Cell::OptInt(r.course.enrollment_term_id)
            }),
            FieldSpec::new("Asset Category", |r, _| {
                Cell::Text(r.access.asset_category.clone().unwrap_or_default())
            }),
            FieldSpec::new("Asset Class", |r, _| {
                Cell::Text(r.access.asset_class_name.clone().unwrap_or_default())
            }),
        ]
    }
}

// Per-course files lead with the course code; combined files with the term
// and the upper-cased search text, whichever are set.
pub fn report_file_name(config: &RunConfig, course_code: Option<&str>) -> String {
    let mut name = String::new();
    match course_code {
        Some(code) => {
            name.push_str(code);
            name.push(' ');
        }
        None => {
            if config.term_id != 0 {
                name.push_str(&format!("Term {} ", config.term_id));
            }
            if !config.search_text.is_empty() {
                name.push_str(&config.search_text.to_uppercase());
                name.push(' ');
            }
        }
    }
    name.push_str(config.report_type.label());
    if let Some(period) = &config.period {
        name.push(' ');
        name.push_str(&period.label());
    }
    name.push_str(" Report.csv");
    name
}
