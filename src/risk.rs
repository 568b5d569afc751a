use crate::aggregate::CourseState;
use crate::config::{ReportType, RiskThresholds};
use crate::models::{Enrollment, StudentRow};

// A student is at risk when any single trigger fires. Count thresholds fire
// on strictly-more-than, the zero-valued ones on exact equality, and a
// missing activity time or score never fires its trigger.
pub fn is_at_risk(enrollment: &Enrollment, thresholds: &RiskThresholds) -> bool {
    let metrics = &enrollment.metrics;
    metrics.assignments_late > thresholds.late
        || metrics.assignments_missing > thresholds.missing
        || enrollment.total_activity_time == Some(thresholds.activity_seconds)
        || metrics.discussion_posts == thresholds.posts
        || enrollment.grades.current_score == Some(thresholds.score)
        || metrics.submitted == thresholds.submissions
}

pub fn qualifies(
    report_type: ReportType,
    enrollment: &Enrollment,
    thresholds: &RiskThresholds,
) -> bool {
    match report_type {
        ReportType::AtRisk => is_at_risk(enrollment, thresholds),
        ReportType::Participation => enrollment.metrics.submitted == 0,
        _ => false,
    }
}

// A missing score counts as zero.
pub fn score_label(enrollment: &Enrollment, thresholds: &RiskThresholds) -> &'static str {
    if enrollment.grades.current_score.unwrap_or(0.0) < thresholds.score {
        "Low"
    } else {
        "OK"
    }
}

// The leading space keeps spreadsheet apps from reading the cell as a date.
pub fn ratio_display(count: i64, due: i64) -> String {
    format!(" {count} / {due}")
}

// Builds output rows for the qualifying students, ordered by enrollment id.
// At-risk rows relabel the score and show posts as a ratio; participation
// rows keep the raw posting count and leave the score column empty.
pub fn student_rows(
    course: &CourseState,
    report_type: ReportType,
    thresholds: &RiskThresholds,
) -> Vec<StudentRow> {
    let mut ids: Vec<i64> = course
        .enrollments
        .iter()
        .filter(|(_, enrollment)| {
            enrollment.role == "Student" && qualifies(report_type, enrollment, thresholds)
        })
        .map(|(id, _)| *id)
        .collect();
    ids.sort_unstable();

    ids.into_iter()
        .map(|id| {
            let enrollment = &course.enrollments[&id];
            let metrics = &enrollment.metrics;
            let (current_score, discussion_posts) = match report_type {
                ReportType::AtRisk => (
                    score_label(enrollment, thresholds).to_string(),
                    ratio_display(metrics.discussion_posts, course.discussions_due),
                ),
                _ => (String::new(), metrics.discussion_posts.to_string()),
            };
            StudentRow {
                user_id: enrollment.user_id,
                total_activity_time: enrollment.total_activity_time,
                last_activity_at: enrollment.last_activity_at,
                home_page_views: metrics.home_page_views,
                page_views: metrics.page_views,
                submitted: ratio_display(metrics.submitted, course.assignments_due),
                assignments_late: metrics.assignments_late,
                max_late_seconds: metrics.max_late_seconds,
                assignments_missing: metrics.assignments_missing,
                max_missing_seconds: metrics.max_missing_seconds,
                current_score,
                discussion_posts,
                enrollment_url: enrollment.html_url.clone(),
                course: course.context.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseContext, EnrollmentMetrics, Grades, User};
    use std::collections::HashMap;

    fn enrollment(id: i64, user_id: i64, role: &str) -> Enrollment {
        Enrollment {
            id,
            user_id,
            role: role.to_string(),
            total_activity_time: None,
            last_activity_at: None,
            html_url: Some(format!("https://lms.test/courses/4410/users/{user_id}")),
            grades: Grades::default(),
            metrics: EnrollmentMetrics::default(),
        }
    }

    // Trips none of the default triggers.
    fn engaged_student(id: i64, user_id: i64) -> Enrollment {
        let mut e = enrollment(id, user_id, "Student");
        e.total_activity_time = Some(7200);
        e.grades.current_score = Some(88.5);
        e.metrics.submitted = 4;
        e.metrics.discussion_posts = 3;
        e
    }

    fn course_with(enrollments: Vec<Enrollment>) -> CourseState {
        let users: HashMap<i64, User> = HashMap::new();
        let mut course = CourseState::new(CourseContext::default());
        course.record_enrollments(enrollments, &users, ReportType::AtRisk);
        course.assignments_due = 5;
        course.discussions_due = 2;
        course
    }

    #[test]
    fn engaged_students_trip_nothing() {
        let thresholds = RiskThresholds::default();
        assert!(!is_at_risk(&engaged_student(501, 9), &thresholds));
    }

    #[test]
    fn each_trigger_fires_on_its_own() {
        let thresholds = RiskThresholds::default();

        let mut late = engaged_student(501, 9);
        late.metrics.assignments_late = 1;
        assert!(is_at_risk(&late, &thresholds));

        let mut missing = engaged_student(501, 9);
        missing.metrics.assignments_missing = 1;
        assert!(is_at_risk(&missing, &thresholds));

        let mut idle = engaged_student(501, 9);
        idle.total_activity_time = Some(0);
        assert!(is_at_risk(&idle, &thresholds));

        let mut silent = engaged_student(501, 9);
        silent.metrics.discussion_posts = 0;
        assert!(is_at_risk(&silent, &thresholds));

        let mut borderline = engaged_student(501, 9);
        borderline.grades.current_score = Some(70.0);
        assert!(is_at_risk(&borderline, &thresholds));

        let mut absent = engaged_student(501, 9);
        absent.metrics.submitted = 0;
        assert!(is_at_risk(&absent, &thresholds));
    }

    #[test]
    fn missing_values_do_not_trigger() {
        let thresholds = RiskThresholds::default();

        let mut no_activity = engaged_student(501, 9);
        no_activity.total_activity_time = None;
        assert!(!is_at_risk(&no_activity, &thresholds));

        let mut no_score = engaged_student(501, 9);
        no_score.grades.current_score = None;
        assert!(!is_at_risk(&no_score, &thresholds));
    }

    #[test]
    fn score_trigger_is_exact_equality_not_below() {
        let thresholds = RiskThresholds::default();
        let mut failing = engaged_student(501, 9);
        failing.grades.current_score = Some(69.0);
        assert!(!is_at_risk(&failing, &thresholds));
    }

    #[test]
    fn qualification_is_deterministic() {
        let thresholds = RiskThresholds::default();
        let mut student = engaged_student(501, 9);
        student.metrics.submitted = 0;
        let first = is_at_risk(&student, &thresholds);
        let second = is_at_risk(&student, &thresholds);
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn participation_cares_only_about_submissions() {
        let thresholds = RiskThresholds::default();

        let mut silent = engaged_student(501, 9);
        silent.metrics.submitted = 0;
        silent.metrics.discussion_posts = 0;
        assert!(qualifies(ReportType::Participation, &silent, &thresholds));

        let mut submitted_once = engaged_student(502, 10);
        submitted_once.metrics.submitted = 1;
        submitted_once.metrics.discussion_posts = 0;
        assert!(!qualifies(
            ReportType::Participation,
            &submitted_once,
            &thresholds
        ));
    }

    #[test]
    fn score_labels_treat_missing_as_low() {
        let thresholds = RiskThresholds::default();

        let mut e = engaged_student(501, 9);
        e.grades.current_score = None;
        assert_eq!(score_label(&e, &thresholds), "Low");

        e.grades.current_score = Some(69.9);
        assert_eq!(score_label(&e, &thresholds), "Low");

        e.grades.current_score = Some(70.0);
        assert_eq!(score_label(&e, &thresholds), "OK");

        e.grades.current_score = Some(88.5);
        assert_eq!(score_label(&e, &thresholds), "OK");
    }

    #[test]
    fn ratios_carry_a_leading_space() {
        assert_eq!(ratio_display(0, 5), " 0 / 5");
        assert_eq!(ratio_display(12, 12), " 12 / 12");
    }

    #[test]
    fn at_risk_rows_relabel_score_and_ratios() {
        let mut flagged = engaged_student(501, 9);
        flagged.metrics.submitted = 0;
        flagged.metrics.discussion_posts = 1;
        flagged.grades.current_score = Some(85.0);
        let teacher = enrollment(502, 20, "TeacherEnrollment");

        let course = course_with(vec![flagged, teacher]);
        let rows = student_rows(&course, ReportType::AtRisk, &RiskThresholds::default());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, 9);
        assert_eq!(rows[0].submitted, " 0 / 5");
        assert_eq!(rows[0].discussion_posts, " 1 / 2");
        assert_eq!(rows[0].current_score, "OK");
    }

    #[test]
    fn participation_rows_keep_raw_counts() {
        let mut silent = engaged_student(501, 9);
        silent.metrics.submitted = 0;
        silent.metrics.discussion_posts = 0;
        silent.grades.current_score = Some(42.5);
        let mut active = engaged_student(502, 10);
        active.metrics.submitted = 2;

        let course = course_with(vec![silent, active]);
        let rows = student_rows(&course, ReportType::Participation, &RiskThresholds::default());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, 9);
        assert_eq!(rows[0].submitted, " 0 / 5");
        assert_eq!(rows[0].discussion_posts, "0");
        assert_eq!(rows[0].current_score, "");
    }

    #[test]
    fn rows_come_out_in_enrollment_order() {
        let mut second = engaged_student(502, 10);
        second.metrics.submitted = 0;
        let mut first = engaged_student(501, 9);
        first.metrics.submitted = 0;

        let course = course_with(vec![second, first]);
        let rows = student_rows(&course, ReportType::AtRisk, &RiskThresholds::default());

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, 9);
        assert_eq!(rows[1].user_id, 10);
    }
}
