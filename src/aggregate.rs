use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rand::thread_rng;
use regex::Regex;
use tracing::{info, warn};

use crate::anonymize::assign_pseudonyms;
use crate::api::{ApiClient, PageFetcher};
use crate::config::{ReportType, ReportingPeriod, RunConfig};
use crate::error::ApiError;
use crate::grading;
use crate::models::{
    normalize_role, AccessRecord, AccessRow, Assignment, CourseContext, Enrollment, Submission,
    User,
};
use crate::risk;
use crate::run::{CancelFlag, Progress, RunState};

// Media files inflate view counts without telling us anything about
// engagement with the course material.
static MEDIA_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(jpg|png|svg|mp3|mp4|mpg)$").expect("media file regex should compile")
});

// Administrators enrolled as teachers use a prefixed secondary account and
// are not the course's teacher of record.
const ADMIN_ACCOUNT_PREFIX: &str = "NU-";

// Everything scoped to the course currently being processed. Dropped and
// rebuilt between courses so nothing leaks into the next one.
pub struct CourseState {
    pub context: CourseContext,
    pub enrollments: HashMap<i64, Enrollment>,
    by_user: HashMap<i64, i64>,
    pub assignments: HashMap<i64, Assignment>,
    pub assignments_due: i64,
    pub discussions_due: i64,
}

impl CourseState {
    pub fn new(context: CourseContext) -> Self {
        Self {
            context,
            enrollments: HashMap::new(),
            by_user: HashMap::new(),
            assignments: HashMap::new(),
            assignments_due: 0,
            discussions_due: 0,
        }
    }

    // Normalizes roles, indexes enrollments by user, and collects the
    // teacher-of-record names and emails onto the course context.
    pub fn record_enrollments(
        &mut self,
        wire: Vec<Enrollment>,
        users: &HashMap<i64, User>,
        report_type: ReportType,
    ) {
        let mut teacher_names: Vec<String> = Vec::new();
        let mut teacher_emails: Vec<String> = Vec::new();

        for mut enrollment in wire {
            enrollment.role = normalize_role(&enrollment.role);
            if enrollment.role == "Teacher" && report_type.is_student_report() {
                if let Some(user) = users.get(&enrollment.user_id) {
                    if !user.name.starts_with(ADMIN_ACCOUNT_PREFIX) {
                        teacher_names.push(user.name.clone());
                        teacher_emails.push(user.email.clone().unwrap_or_default());
                    }
                }
            }
            // A user enrolled in several sections resolves to the lowest
            // enrollment id, keeping lookups deterministic.
            self.by_user
                .entry(enrollment.user_id)
                .and_modify(|existing| {
                    if enrollment.id < *existing {
                        *existing = enrollment.id;
                    }
                })
                .or_insert(enrollment.id);
            self.enrollments.insert(enrollment.id, enrollment);
        }

        self.context.teacher_name = teacher_names.join(", ");
        self.context.teacher_email = teacher_emails.join(";");
    }

    pub fn enrollment_for_user(&self, user_id: i64) -> Option<&Enrollment> {
        let id = self.by_user.get(&user_id)?;
        self.enrollments.get(id)
    }

    pub fn enrollment_for_user_mut(&mut self, user_id: i64) -> Option<&mut Enrollment> {
        let id = *self.by_user.get(&user_id)?;
        self.enrollments.get_mut(&id)
    }

    // Keeps assignments due before now, or due inside the reporting period
    // when one is set, and tallies the ratio denominators.
    pub fn retain_assignments(
        &mut self,
        assignments: Vec<Assignment>,
        period: Option<&ReportingPeriod>,
        now: DateTime<Utc>,
    ) {
        for assignment in assignments {
            let Some(due) = assignment.due_at else {
                continue;
            };
            let retained = match period {
                Some(period) => period.contains(due),
                None => due < now,
            };
            if !retained {
                continue;
            }
            self.assignments_due += 1;
            if assignment.is_discussion() {
                self.discussions_due += 1;
            }
            self.assignments.insert(assignment.id, assignment);
        }
    }
}

#[derive(Debug)]
pub enum CourseOutcome {
    Processed { context: CourseContext },
    Empty { context: CourseContext },
}

impl CourseOutcome {
    pub fn context(&self) -> &CourseContext {
        match self {
            CourseOutcome::Processed { context } | CourseOutcome::Empty { context } => context,
        }
    }
}

// Runs the fetch-and-fold pipeline for one course, appending output rows to
// the run state. Stage order is fixed; report type only decides which stages
// run and which derivation closes the course.
pub async fn run_course<F: PageFetcher>(
    client: &ApiClient<F>,
    config: &RunConfig,
    course_id: i64,
    state: &mut RunState,
    cancel: &CancelFlag,
    progress: &mut dyn Progress,
) -> Result<CourseOutcome, ApiError> {
    check_cancelled(cancel)?;
    progress.step(1, "course info");
    let course = client.course(course_id).await?;
    let context = CourseContext::from_course(&course);
    if course.total_students == Some(0) {
        info!(code = %context.course_code, "no students enrolled");
        return Ok(CourseOutcome::Empty { context });
    }

    check_cancelled(cancel)?;
    progress.step(2, "course roster");
    let teachers_only = config.report_type.teachers_only();
    let roster = client.course_users(course_id, teachers_only).await?;
    let roster_ids: Vec<i64> = roster.iter().map(|user| user.id).collect();
    for user in roster {
        // Keep the first copy seen so pseudonyms survive combined runs.
        state.users.entry(user.id).or_insert(user);
    }

    check_cancelled(cancel)?;
    progress.step(3, "enrollments");
    let enrollments = client.course_enrollments(course_id, teachers_only).await?;
    progress.step(4, "processing enrollments");
    let mut course_state = CourseState::new(context);
    course_state.record_enrollments(enrollments, &state.users, config.report_type);
    if config.anonymize {
        assign_pseudonyms(
            &mut thread_rng(),
            &mut state.users,
            course_state.enrollments.values(),
        );
    }

    if config.report_type.uses_accesses() {
        progress.step(5, "user access logs");
        fetch_accesses(
            client,
            config,
            &mut course_state,
            &mut state.access_rows,
            &roster_ids,
            cancel,
        )
        .await?;
    }

    let now = Utc::now();
    let mut submissions: Vec<Submission> = Vec::new();
    if config.report_type.uses_submissions() {
        check_cancelled(cancel)?;
        progress.step(6, "submissions");
        submissions = client
            .course_submissions(course_id, config.report_type == ReportType::Instructor)
            .await?;

        check_cancelled(cancel)?;
        progress.step(7, "assignments");
        let assignments = client.course_assignments(course_id).await?;
        course_state.retain_assignments(assignments, config.period.as_ref(), now);
    }

    match config.report_type {
        ReportType::Access => {}
        ReportType::AtRisk | ReportType::Participation => {
            progress.step(8, "joining submissions");
            fold_student_submissions(&mut course_state, &submissions);
            progress.step(9, "selecting rows");
            state.student_rows.extend(risk::student_rows(
                &course_state,
                config.report_type,
                &config.thresholds,
            ));
        }
        ReportType::Instructor => {
            progress.step(8, "grading turnaround");
            grading::apply_grading(
                &mut course_state.context,
                &submissions,
                &course_state.assignments,
                &state.users,
                now,
            );
            progress.step(9, "discussion activity");
            fetch_topics(client, config, &mut course_state, cancel).await?;
            state
                .instructor_rows
                .extend(grading::instructor_rows(&course_state));
        }
    }

    progress.step(10, "course complete");
    Ok(CourseOutcome::Processed {
        context: course_state.context,
    })
}

// Usage logs are fetched one user at a time, strictly in roster order. A
// failure for one user's log drops that user and moves on; the rest of the
// course is still worth reporting.
async fn fetch_accesses<F: PageFetcher>(
    client: &ApiClient<F>,
    config: &RunConfig,
    course: &mut CourseState,
    rows: &mut Vec<AccessRow>,
    roster: &[i64],
    cancel: &CancelFlag,
) -> Result<(), ApiError> {
    let period = config.period.as_ref();
    for &user_id in roster {
        check_cancelled(cancel)?;
        let envelopes = match client.user_usage(course.context.course_id, user_id).await {
            Ok(envelopes) => envelopes,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                warn!(
                    user_id,
                    course_id = course.context.course_id,
                    error = %err,
                    "skipping user after usage fetch failure"
                );
                continue;
            }
        };

        let mut records: Vec<AccessRecord> = envelopes
            .into_iter()
            .map(|envelope| envelope.asset_user_access)
            .collect();
        if records.is_empty() {
            records.push(AccessRecord::no_accesses(user_id));
        }
        records.retain(|record| !period_drops_access(period, record));

        for record in records {
            match config.report_type {
                ReportType::Access => {
                    let (user_role, total_activity_time) =
                        match course.enrollment_for_user(record.user_id) {
                            Some(enrollment) => {
                                (enrollment.role.clone(), enrollment.total_activity_time)
                            }
                            None => ("Unenrolled".to_string(), None),
                        };
                    rows.push(AccessRow {
                        user_id: record.user_id,
                        user_role,
                        total_activity_time,
                        access: record,
                        course: course.context.clone(),
                    });
                }
                _ => {
                    if let Some(enrollment) = course.enrollment_for_user_mut(record.user_id) {
                        apply_access(enrollment, &record, period.is_some());
                    }
                }
            }
        }
    }
    Ok(())
}

async fn fetch_topics<F: PageFetcher>(
    client: &ApiClient<F>,
    config: &RunConfig,
    course: &mut CourseState,
    cancel: &CancelFlag,
) -> Result<(), ApiError> {
    let topics = client.discussion_topics(course.context.course_id).await?;
    for topic in topics {
        check_cancelled(cancel)?;
        let view = client.topic_view(course.context.course_id, topic.id).await?;
        let entries = grading::flatten_entries(view, config.period.as_ref());
        grading::fold_topic_entries(course, &entries);
    }
    Ok(())
}

// The period filter drops records wholly inside the window; records with a
// missing bound always survive it.
pub fn period_drops_access(period: Option<&ReportingPeriod>, record: &AccessRecord) -> bool {
    let Some(period) = period else {
        return false;
    };
    let first_inside = record
        .created_at
        .is_some_and(|created| created >= period.start);
    let last_inside = record.last_access.is_some_and(|last| last <= period.end);
    first_inside && last_inside
}

pub fn apply_access(enrollment: &mut Enrollment, record: &AccessRecord, period_set: bool) {
    let metrics = &mut enrollment.metrics;
    if !MEDIA_FILE.is_match(&record.readable_name) {
        metrics.page_views += record.view_score.unwrap_or(0);
    }
    if record.readable_name == "Course Home" {
        metrics.home_page_views = record.view_score.unwrap_or(0);
    }
    // The wire last_activity_at spans the whole course; inside a reporting
    // period the newest surviving access replaces it.
    if period_set {
        if let Some(last) = record.last_access {
            if metrics.last_access_seen.map_or(true, |seen| last > seen) {
                metrics.last_access_seen = Some(last);
                enrollment.last_activity_at = Some(last);
            }
        }
    }
}

// Joins each submission to its enrollment (by user) and retained assignment
// (by id); a failed join skips the submission without complaint.
pub fn fold_student_submissions(course: &mut CourseState, submissions: &[Submission]) {
    for submission in submissions {
        if !course.assignments.contains_key(&submission.assignment_id) {
            continue;
        }
        let Some(enrollment) = course.enrollment_for_user_mut(submission.user_id) else {
            continue;
        };
        let metrics = &mut enrollment.metrics;
        let unsubmitted = submission.workflow_state == "unsubmitted";
        if !unsubmitted {
            metrics.submitted += 1;
        }
        if submission.submission_type.as_deref() == Some("discussion_topic") && !unsubmitted {
            metrics.discussion_posts += 1;
        }
        if submission.late {
            metrics.assignments_late += 1;
            if submission.seconds_late > metrics.max_late_seconds {
                metrics.max_late_seconds = submission.seconds_late;
            }
        }
        if submission.missing && unsubmitted {
            metrics.assignments_missing += 1;
            if submission.seconds_late > metrics.max_missing_seconds {
                metrics.max_missing_seconds = submission.seconds_late;
            }
        }
    }
}

fn check_cancelled(cancel: &CancelFlag) -> Result<(), ApiError> {
    if cancel.is_set() {
        Err(ApiError::Cancelled)
    } else {
        Ok(())
    }
}
