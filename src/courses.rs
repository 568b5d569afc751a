use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::api::{ApiClient, PageFetcher};
use crate::config::RunConfig;
use crate::error::ApiError;
use crate::models::Course;

// Cancelled sections keep their listing but get an X stamped into the
// section marker, e.g. "2024SP_MKTG_201-20_SECX21 Marketing Research".
static CANCELLED_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_SECX\d{2}").expect("cancelled section regex should compile"));

const ONLINE_MARKER: &str = "-DL_";

pub struct CourseSelection {
    pub course_ids: Vec<i64>,
    pub skipped: usize,
}

pub async fn select_courses<F: PageFetcher>(
    client: &ApiClient<F>,
    config: &RunConfig,
) -> Result<CourseSelection, ApiError> {
    let courses = client
        .account_courses(
            config.account_id,
            config.term_id,
            &config.search_text,
            config.search_mode,
        )
        .await?;
    Ok(filter_courses(courses, config))
}

// Filters the account listing down to reportable courses. Cancelled and
// sandbox courses count toward the end-of-run notice; unpublished and
// campus-delivery courses are silently out of scope.
pub fn filter_courses(courses: Vec<Course>, config: &RunConfig) -> CourseSelection {
    let mut course_ids = Vec::new();
    let mut skipped = 0;

    for course in courses {
        if course.workflow_state.as_deref() != Some("available") {
            debug!(course.id, code = %course.course_code, "skipping unpublished course");
            continue;
        }
        if is_cancelled(&course) {
            info!(code = %course.course_code, "skipping cancelled course");
            skipped += 1;
            continue;
        }
        if is_sandbox(&course) {
            info!(code = %course.course_code, "skipping sandbox course");
            skipped += 1;
            continue;
        }
        if config.online_only && !is_online(&course) {
            debug!(code = %course.course_code, "skipping campus course");
            continue;
        }
        course_ids.push(course.id);
    }

    CourseSelection {
        course_ids,
        skipped,
    }
}

pub fn is_cancelled(course: &Course) -> bool {
    CANCELLED_SECTION.is_match(&course.name)
}

pub fn is_sandbox(course: &Course) -> bool {
    course.name.to_lowercase().contains("sandbox")
}

pub fn is_online(course: &Course) -> bool {
    course.course_code.contains(ONLINE_MARKER)
}
