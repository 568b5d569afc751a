use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

// Course codes look like "2024SP_MKTG_201-20_SEC21 - Marketing Research".
static QUARTER_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}\D{2}").expect("quarter regex should compile"));
static SECTION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SEC(\d+)").expect("section regex should compile"));
static SHORT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d\D\D_(\D+_\d+)-").expect("short code regex should compile"));
static NAME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+\s").expect("name prefix regex should compile"));
static ROLE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)enrollment").expect("role suffix regex should compile"));

#[derive(Debug, Clone, Deserialize)]
pub struct Course {
    pub id: i64,
    #[serde(default)]
    pub sis_course_id: Option<String>,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enrollment_term_id: Option<i64>,
    #[serde(default)]
    pub total_students: Option<i64>,
    #[serde(default)]
    pub workflow_state: Option<String>,
}

// Per-course descriptive columns, cloned into every output row.
#[derive(Debug, Clone, Default)]
pub struct CourseContext {
    pub course_id: i64,
    pub sis_course_id: Option<String>,
    pub course_code: String,
    pub course_name: String,
    pub enrollment_term_id: Option<i64>,
    pub quarter_name: Option<String>,
    pub section: Option<String>,
    pub short_course_code: Option<String>,
    pub total_students: Option<i64>,
    pub teacher_name: String,
    pub teacher_email: String,
    pub graded_ontime_pcnt: i64,
    pub graded_late_pcnt: i64,
    pub graded_none_pcnt: i64,
    pub feedback_count: i64,
    pub feedback_mean_length: i64,
}

impl CourseContext {
    pub fn from_course(course: &Course) -> Self {
        Self {
            course_id: course.id,
            sis_course_id: course.sis_course_id.clone(),
            course_code: course.course_code.clone(),
            course_name: course_display_name(&course.name),
            enrollment_term_id: course.enrollment_term_id,
            quarter_name: QUARTER_CODE
                .find(&course.course_code)
                .map(|m| m.as_str().to_string()),
            section: SECTION_CODE
                .captures(&course.course_code)
                .map(|c| c[1].to_string()),
            short_course_code: SHORT_CODE
                .captures(&course.course_code)
                .map(|c| c[1].to_string()),
            total_students: course.total_students,
            ..Default::default()
        }
    }
}

// Course names repeat the course code before the human-readable title.
pub fn course_display_name(name: &str) -> String {
    NAME_PREFIX.replace(name, "").into_owned()
}

// "TeacherEnrollment" -> "Teacher", "TaEnrollment" -> "TA".
pub fn normalize_role(raw: &str) -> String {
    let role = ROLE_SUFFIX.replace(raw, "");
    if role == "Ta" {
        "TA".to_string()
    } else {
        role.into_owned()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sortable_name: Option<String>,
    #[serde(default)]
    pub login_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sis_user_id: Option<String>,
    #[serde(skip)]
    pub pseudonym: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Grades {
    #[serde(default)]
    pub current_score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub total_activity_time: Option<i64>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub grades: Grades,
    #[serde(skip)]
    pub metrics: EnrollmentMetrics,
}

// Counters accumulated while a course is being processed. Zeroed when the
// enrollment is first recorded, so combined runs never mix courses.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentMetrics {
    pub submitted: i64,
    pub assignments_late: i64,
    pub max_late_seconds: f64,
    pub assignments_missing: i64,
    pub max_missing_seconds: f64,
    pub discussion_posts: i64,
    pub post_chars: i64,
    pub post_mean_length: f64,
    pub last_post_at: Option<DateTime<Utc>>,
    pub page_views: i64,
    pub home_page_views: i64,
    pub last_access_seen: Option<DateTime<Utc>>,
}

// The usage endpoint wraps each record in a one-key envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessEnvelope {
    pub asset_user_access: AccessRecord,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessRecord {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub readable_name: String,
    #[serde(default)]
    pub view_score: Option<i64>,
    #[serde(default)]
    pub participate_score: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action_level: Option<String>,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default)]
    pub asset_group_code: Option<String>,
    #[serde(default)]
    pub asset_category: Option<String>,
    #[serde(default)]
    pub asset_class_name: Option<String>,
}

impl AccessRecord {
    // Placeholder row for enrolled users the usage endpoint knows nothing about.
    pub fn no_accesses(user_id: i64) -> Self {
        Self {
            user_id,
            readable_name: "No accesses".to_string(),
            view_score: Some(0),
            participate_score: Some(0),
            action_level: Some("none".to_string()),
            asset_category: Some("N/A".to_string()),
            asset_class_name: Some("N/A".to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assignment {
    pub id: i64,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submission_types: Vec<String>,
}

impl Assignment {
    pub fn is_discussion(&self) -> bool {
        self.submission_types.first().map(String::as_str) == Some("discussion_topic")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub assignment_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub workflow_state: String,
    #[serde(default)]
    pub late: bool,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub seconds_late: f64,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub graded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub submission_type: Option<String>,
    #[serde(default)]
    pub submission_comments: Vec<SubmissionComment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionComment {
    pub author_id: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscussionTopic {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicView {
    #[serde(default)]
    pub view: Vec<TopicEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicEntry {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub replies: Vec<TopicEntry>,
}

// Flattened rows handed to the CSV projector. Each row carries its own copy
// of the course context so combined reports stay correct course to course.
#[derive(Debug, Clone)]
pub struct AccessRow {
    pub user_id: i64,
    pub user_role: String,
    pub total_activity_time: Option<i64>,
    pub access: AccessRecord,
    pub course: CourseContext,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub user_id: i64,
    pub total_activity_time: Option<i64>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub home_page_views: i64,
    pub page_views: i64,
    pub submitted: String,
    pub assignments_late: i64,
    pub max_late_seconds: f64,
    pub assignments_missing: i64,
    pub max_missing_seconds: f64,
    pub current_score: String,
    pub discussion_posts: String,
    pub enrollment_url: Option<String>,
    pub course: CourseContext,
}

#[derive(Debug, Clone)]
pub struct InstructorRow {
    pub user_id: i64,
    pub user_role: String,
    pub total_activity_time: Option<i64>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub home_page_views: i64,
    pub page_views: i64,
    pub discussion_posts: i64,
    pub last_post_at: Option<DateTime<Utc>>,
    pub post_mean_length: f64,
    pub enrollment_url: Option<String>,
    pub course: CourseContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_course(code: &str, name: &str) -> Course {
        Course {
            id: 4410,
            sis_course_id: Some("SIS-4410".to_string()),
            course_code: code.to_string(),
            name: name.to_string(),
            enrollment_term_id: Some(166),
            total_students: Some(24),
            workflow_state: Some("available".to_string()),
        }
    }

    #[test]
    fn course_code_parses_into_parts() {
        let course = sample_course(
            "2024SP_MKTG_201-20_SEC21",
            "2024SP_MKTG_201-20_SEC21 Marketing Research",
        );
        let ctx = CourseContext::from_course(&course);
        assert_eq!(ctx.quarter_name.as_deref(), Some("2024SP"));
        assert_eq!(ctx.section.as_deref(), Some("21"));
        assert_eq!(ctx.short_course_code.as_deref(), Some("MKTG_201"));
        assert_eq!(ctx.course_name, "Marketing Research");
    }

    #[test]
    fn unparseable_course_code_leaves_parts_empty() {
        let course = sample_course("SANDBOX-jdoe", "SANDBOX-jdoe jdoe's sandbox");
        let ctx = CourseContext::from_course(&course);
        assert_eq!(ctx.quarter_name, None);
        assert_eq!(ctx.section, None);
        assert_eq!(ctx.short_course_code, None);
    }

    #[test]
    fn online_section_code_still_parses() {
        let course = sample_course(
            "2024WI_ACCT_101-DL_SEC17",
            "2024WI_ACCT_101-DL_SEC17 Intro to Accounting",
        );
        let ctx = CourseContext::from_course(&course);
        assert_eq!(ctx.quarter_name.as_deref(), Some("2024WI"));
        assert_eq!(ctx.section.as_deref(), Some("17"));
        assert_eq!(ctx.short_course_code.as_deref(), Some("ACCT_101"));
    }

    #[test]
    fn roles_drop_enrollment_suffix() {
        assert_eq!(normalize_role("TeacherEnrollment"), "Teacher");
        assert_eq!(normalize_role("StudentEnrollment"), "Student");
        assert_eq!(normalize_role("TaEnrollment"), "TA");
        assert_eq!(normalize_role("ObserverEnrollment"), "Observer");
        assert_eq!(normalize_role("Teacher"), "Teacher");
    }

    #[test]
    fn no_accesses_placeholder_has_expected_shape() {
        let record = AccessRecord::no_accesses(77);
        assert_eq!(record.user_id, 77);
        assert_eq!(record.readable_name, "No accesses");
        assert_eq!(record.view_score, Some(0));
        assert_eq!(record.participate_score, Some(0));
        assert_eq!(record.action_level.as_deref(), Some("none"));
        assert_eq!(record.asset_category.as_deref(), Some("N/A"));
        assert_eq!(record.asset_class_name.as_deref(), Some("N/A"));
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn discussion_assignments_detected_by_first_type() {
        let assignment = Assignment {
            id: 1,
            due_at: None,
            submission_types: vec!["discussion_topic".to_string()],
        };
        assert!(assignment.is_discussion());

        let assignment = Assignment {
            id: 2,
            due_at: None,
            submission_types: vec!["online_upload".to_string(), "discussion_topic".to_string()],
        };
        assert!(!assignment.is_discussion());
    }

    #[test]
    fn usage_envelope_unwraps() {
        let body = r#"{"asset_user_access":{"user_id":9,"readable_name":"Course Home",
            "view_score":12,"participate_score":3,"asset_category":"home"}}"#;
        let envelope: AccessEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.asset_user_access.user_id, 9);
        assert_eq!(envelope.asset_user_access.view_score, Some(12));
    }

    #[test]
    fn enrollment_defaults_cover_missing_fields() {
        let body = r#"{"id":501,"user_id":9,"course_id":4410,"role":"StudentEnrollment"}"#;
        let enrollment: Enrollment = serde_json::from_str(body).unwrap();
        assert_eq!(enrollment.total_activity_time, None);
        assert_eq!(enrollment.grades.current_score, None);
        assert_eq!(enrollment.metrics.submitted, 0);
    }
}
