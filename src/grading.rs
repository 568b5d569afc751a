use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::aggregate::CourseState;
use crate::config::ReportingPeriod;
use crate::models::{
    Assignment, CourseContext, InstructorRow, Submission, TopicEntry, TopicView, User,
};

// Grades posted within a week of the reference date count as on-time.
pub const GRADING_INTERVAL_SECS: i64 = 604_800;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("html tag regex should compile"));

// Discussion entries arrive as HTML fragments; post lengths are measured on
// the text alone.
pub fn strip_html(message: &str) -> String {
    HTML_TAG.replace_all(message, "").into_owned()
}

pub fn percent(count: i64, total: i64) -> i64 {
    if total == 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as i64
}

// Classifies each gradable submission as graded on-time, graded late, or
// overdue for grading, and tallies instructor feedback comments. Results
// land on the course context since they describe the course, not a user.
pub fn apply_grading(
    context: &mut CourseContext,
    submissions: &[Submission],
    assignments: &HashMap<i64, Assignment>,
    users: &HashMap<i64, User>,
    now: DateTime<Utc>,
) {
    let window = Duration::seconds(GRADING_INTERVAL_SECS);
    let mut total = 0_i64;
    let mut ontime = 0_i64;
    let mut late = 0_i64;
    let mut overdue = 0_i64;
    let mut feedback_count = 0_i64;
    let mut feedback_chars = 0_i64;

    for submission in submissions {
        let Some(assignment) = assignments.get(&submission.assignment_id) else {
            continue;
        };
        let Some(due) = assignment.due_at else {
            continue;
        };
        if due > now || submission.workflow_state == "unsubmitted" {
            continue;
        }
        total += 1;

        // Late work is judged from when it arrived, on-time work from the
        // due date. A missing reference or grade date tallies nothing.
        let reference = if submission.late {
            submission.submitted_at
        } else {
            Some(due)
        };

        match submission.workflow_state.as_str() {
            "graded" => {
                if let (Some(graded), Some(reference)) = (submission.graded_at, reference) {
                    if graded - reference <= window {
                        ontime += 1;
                    } else {
                        late += 1;
                    }
                }
            }
            "submitted" => {
                if reference.is_some_and(|reference| now - reference > window) {
                    overdue += 1;
                }
            }
            _ => {}
        }

        // Only comment authors in the roster count; instructor runs load
        // teachers alone, so student comments fall out here.
        for comment in &submission.submission_comments {
            if users.contains_key(&comment.author_id) {
                feedback_count += 1;
                feedback_chars += comment.comment.chars().count() as i64;
            }
        }
    }

    context.graded_ontime_pcnt = percent(ontime, total);
    context.graded_late_pcnt = percent(late, total);
    context.graded_none_pcnt = percent(overdue, total);
    context.feedback_count = feedback_count;
    context.feedback_mean_length = if feedback_count > 0 {
        (feedback_chars as f64 / feedback_count as f64).round() as i64
    } else {
        0
    };
}

// Flattens a topic view into a single list of entries and direct replies.
// Replies only nest one level deep; a dropped entry takes its replies with it.
pub fn flatten_entries(view: TopicView, period: Option<&ReportingPeriod>) -> Vec<TopicEntry> {
    let mut entries = Vec::new();
    for mut entry in view.view {
        if !keep_entry(&entry, period) {
            continue;
        }
        let replies = std::mem::take(&mut entry.replies);
        entries.push(entry);
        entries.extend(replies.into_iter().filter(|reply| keep_entry(reply, period)));
    }
    entries
}

fn keep_entry(entry: &TopicEntry, period: Option<&ReportingPeriod>) -> bool {
    if entry.deleted || entry.message.is_none() {
        return false;
    }
    period.map_or(true, |period| {
        entry.updated_at.is_some_and(|at| period.contains(at))
    })
}

// Folds flattened entries into per-enrollment posting metrics. Entries from
// users outside the loaded enrollments are ignored.
pub fn fold_topic_entries(course: &mut CourseState, entries: &[TopicEntry]) {
    for entry in entries {
        let Some(user_id) = entry.user_id else {
            continue;
        };
        let Some(message) = entry.message.as_deref() else {
            continue;
        };
        let Some(enrollment) = course.enrollment_for_user_mut(user_id) else {
            continue;
        };
        let metrics = &mut enrollment.metrics;
        metrics.discussion_posts += 1;
        metrics.post_chars += strip_html(message).chars().count() as i64;
        metrics.post_mean_length = metrics.post_chars as f64 / metrics.discussion_posts as f64;
        if let Some(at) = entry.updated_at {
            if metrics.last_post_at.map_or(true, |prev| at > prev) {
                metrics.last_post_at = Some(at);
            }
        }
    }
}

pub fn instructor_rows(course: &CourseState) -> Vec<InstructorRow> {
    let mut ids: Vec<i64> = course.enrollments.keys().copied().collect();
    ids.sort_unstable();
    ids.into_iter()
        .map(|id| {
            let enrollment = &course.enrollments[&id];
            let metrics = &enrollment.metrics;
            InstructorRow {
                user_id: enrollment.user_id,
                user_role: enrollment.role.clone(),
                total_activity_time: enrollment.total_activity_time,
                last_activity_at: enrollment.last_activity_at,
                home_page_views: metrics.home_page_views,
                page_views: metrics.page_views,
                discussion_posts: metrics.discussion_posts,
                last_post_at: metrics.last_post_at,
                post_mean_length: metrics.post_mean_length,
                enrollment_url: enrollment.html_url.clone(),
                course: course.context.clone(),
            }
        })
        .collect()
}
