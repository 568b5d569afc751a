use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::aggregate::{self, CourseOutcome};
use crate::api::{ApiClient, PageFetcher};
use crate::config::{ReportType, RunConfig};
use crate::courses;
use crate::models::{AccessRow, InstructorRow, StudentRow, User};
use crate::report::{report_file_name, write_report, RenderOptions};

// Set from the Ctrl-C handler, checked at every stage entry.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Progress {
    fn step(&mut self, step: u32, label: &str);
}

pub struct LogProgress;

impl Progress for LogProgress {
    fn step(&mut self, step: u32, label: &str) {
        info!(step, "{label}");
    }
}

// Rows and users accumulated across courses. Combined runs keep accumulating
// until the end; per-course runs flush and reset after every course.
#[derive(Default)]
pub struct RunState {
    pub users: HashMap<i64, User>,
    pub access_rows: Vec<AccessRow>,
    pub student_rows: Vec<StudentRow>,
    pub instructor_rows: Vec<InstructorRow>,
}

impl RunState {
    pub fn reset(&mut self) {
        self.users.clear();
        self.access_rows.clear();
        self.student_rows.clear();
        self.instructor_rows.clear();
    }

    pub fn any_sis(&self) -> bool {
        self.users
            .values()
            .any(|user| user.sis_user_id.as_deref().is_some_and(|sis| !sis.is_empty()))
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub files: Vec<PathBuf>,
    pub courses_selected: usize,
    pub courses_processed: usize,
    pub empty_courses: usize,
    pub failed_courses: usize,
    pub skipped_courses: usize,
    pub cancelled: bool,
}

// Drives the whole run: course selection, then each course through the
// aggregation pipeline, flushing CSV output per the combined flag. A course
// failure ends a combined run but only costs one course otherwise.
pub async fn execute<F: PageFetcher>(
    client: &ApiClient<F>,
    config: &RunConfig,
    out_dir: &Path,
    cancel: &CancelFlag,
    progress: &mut dyn Progress,
) -> Result<RunSummary> {
    let selection = courses::select_courses(client, config)
        .await
        .context("could not list courses for the account")?;

    let mut summary = RunSummary {
        courses_selected: selection.course_ids.len(),
        skipped_courses: selection.skipped,
        ..Default::default()
    };
    if selection.course_ids.is_empty() {
        return Ok(summary);
    }

    let mut state = RunState::default();
    for &course_id in &selection.course_ids {
        if cancel.is_set() {
            summary.cancelled = true;
            return Ok(summary);
        }

        let outcome = match aggregate::run_course(
            client,
            config,
            course_id,
            &mut state,
            cancel,
            progress,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => {
                summary.cancelled = true;
                return Ok(summary);
            }
            Err(err) if config.combined => {
                return Err(err).with_context(|| {
                    format!("course {course_id} failed; a combined report would be incomplete")
                });
            }
            Err(err) => {
                error!(course_id, error = %err, "skipping course after fetch failure");
                summary.failed_courses += 1;
                state.reset();
                continue;
            }
        };

        match &outcome {
            CourseOutcome::Processed { .. } => summary.courses_processed += 1,
            CourseOutcome::Empty { .. } => summary.empty_courses += 1,
        }

        if !config.combined {
            let code = outcome.context().course_code.as_str();
            summary
                .files
                .push(flush_report(&state, config, out_dir, Some(code))?);
            state.reset();
        }
    }

    if config.combined {
        summary
            .files
            .push(flush_report(&state, config, out_dir, None)?);
    }
    Ok(summary)
}

pub fn flush_report(
    state: &RunState,
    config: &RunConfig,
    out_dir: &Path,
    course_code: Option<&str>,
) -> Result<PathBuf> {
    let path = out_dir.join(report_file_name(config, course_code));
    let file =
        File::create(&path).with_context(|| format!("could not create {}", path.display()))?;

    let options = RenderOptions {
        anonymize: config.anonymize,
        with_sis: state.any_sis(),
        headers_without_spaces: config.headers_without_spaces,
        include_profile_views: config.include_profile_views,
    };
    match config.report_type {
        ReportType::Access => write_report(file, &state.access_rows, &state.users, &options),
        ReportType::AtRisk | ReportType::Participation => {
            write_report(file, &state.student_rows, &state.users, &options)
        }
        ReportType::Instructor => {
            write_report(file, &state.instructor_rows, &state.users, &options)
        }
    }
    .with_context(|| format!("could not write {}", path.display()))?;

    info!(path = %path.display(), "report written");
    Ok(path)
}
