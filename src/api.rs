use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::SearchMode;
use crate::error::ApiError;
use crate::models::{
    AccessEnvelope, Assignment, Course, DiscussionTopic, Enrollment, Submission, TopicView, User,
};

static NEXT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^<(.*)>; rel="next"$"#).expect("link regex should compile"));

#[derive(Debug, Clone)]
pub struct Page {
    pub body: String,
    pub next: Option<String>,
}

// Seam between the aggregation pipeline and the network. Tests drive the
// pipeline with canned pages instead of a live server.
pub trait PageFetcher {
    async fn get_page(&self, url: &str) -> Result<Page, ApiError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    // Pagination links come back absolute; first requests are path-relative.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }
}

impl PageFetcher for HttpFetcher {
    async fn get_page(&self, url: &str) -> Result<Page, ApiError> {
        let url = self.absolute(url);
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let next = response
            .headers()
            .get("Link")
            .and_then(|value| value.to_str().ok())
            .and_then(next_page_url);

        let body = response.text().await.map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;

        Ok(Page { body, next })
    }
}

pub fn next_page_url(link_header: &str) -> Option<String> {
    link_header
        .split(',')
        .filter_map(|part| NEXT_LINK.captures(part.trim()))
        .map(|captures| captures[1].to_string())
        .next()
}

// Walks rel="next" links until the server stops handing them out, decoding
// every page into one vector.
pub async fn fetch_all<T, F>(fetcher: &F, url: &str) -> Result<Vec<T>, ApiError>
where
    T: DeserializeOwned,
    F: PageFetcher,
{
    let mut items: Vec<T> = Vec::new();
    let mut next = Some(url.to_string());
    while let Some(url) = next {
        let page = fetcher.get_page(&url).await?;
        let mut batch: Vec<T> = serde_json::from_str(&page.body).map_err(|source| {
            ApiError::Decode {
                url: url.clone(),
                source,
            }
        })?;
        items.append(&mut batch);
        next = page.next;
    }
    Ok(items)
}

pub async fn fetch_one<T, F>(fetcher: &F, url: &str) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    F: PageFetcher,
{
    let page = fetcher.get_page(url).await?;
    serde_json::from_str(&page.body).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

pub struct ApiClient<F> {
    fetcher: F,
}

impl<F: PageFetcher> ApiClient<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub async fn account_courses(
        &self,
        account_id: i64,
        term_id: i64,
        search_text: &str,
        search_mode: SearchMode,
    ) -> Result<Vec<Course>, ApiError> {
        let mut url =
            format!("/api/v1/accounts/{account_id}/courses?with_enrollments=true&per_page=100");
        if term_id != 0 {
            url.push_str(&format!("&enrollment_term_id={term_id}"));
        }
        if !search_text.is_empty() {
            url.push_str(&format!("&search_term={}", encode_query(search_text)));
            if search_mode == SearchMode::InstructorName {
                url.push_str("&search_by=teacher");
            }
        }
        fetch_all(&self.fetcher, &url).await
    }

    pub async fn course(&self, course_id: i64) -> Result<Course, ApiError> {
        let url = format!("/api/v1/courses/{course_id}?include[]=total_students");
        fetch_one(&self.fetcher, &url).await
    }

    pub async fn course_users(
        &self,
        course_id: i64,
        teachers_only: bool,
    ) -> Result<Vec<User>, ApiError> {
        let mut url = format!("/api/v1/courses/{course_id}/users?include[]=email&per_page=100");
        if teachers_only {
            url.push_str("&enrollment_type[]=teacher");
        }
        fetch_all(&self.fetcher, &url).await
    }

    pub async fn course_enrollments(
        &self,
        course_id: i64,
        teachers_only: bool,
    ) -> Result<Vec<Enrollment>, ApiError> {
        let mut url = format!("/api/v1/courses/{course_id}/enrollments?per_page=100");
        if teachers_only {
            url.push_str("&role[]=TeacherEnrollment");
        }
        fetch_all(&self.fetcher, &url).await
    }

    // Access records come from the legacy usage page, not the REST API, so
    // the path has no /api/v1 prefix and each record arrives in an envelope.
    pub async fn user_usage(
        &self,
        course_id: i64,
        user_id: i64,
    ) -> Result<Vec<AccessEnvelope>, ApiError> {
        let url = format!("/courses/{course_id}/users/{user_id}/usage.json?per_page=100");
        fetch_all(&self.fetcher, &url).await
    }

    pub async fn course_assignments(&self, course_id: i64) -> Result<Vec<Assignment>, ApiError> {
        let url = format!("/api/v1/courses/{course_id}/assignments?per_page=100");
        fetch_all(&self.fetcher, &url).await
    }

    pub async fn course_submissions(
        &self,
        course_id: i64,
        with_comments: bool,
    ) -> Result<Vec<Submission>, ApiError> {
        let mut url = format!(
            "/api/v1/courses/{course_id}/students/submissions?student_ids[]=all&per_page=100"
        );
        if with_comments {
            url.push_str("&include[]=submission_comments");
        }
        fetch_all(&self.fetcher, &url).await
    }

    pub async fn discussion_topics(
        &self,
        course_id: i64,
    ) -> Result<Vec<DiscussionTopic>, ApiError> {
        let url = format!("/api/v1/courses/{course_id}/discussion_topics?per_page=100");
        fetch_all(&self.fetcher, &url).await
    }

    pub async fn topic_view(&self, course_id: i64, topic_id: i64) -> Result<TopicView, ApiError> {
        let url =
            format!("/api/v1/courses/{course_id}/discussion_topics/{topic_id}/view?per_page=100");
        fetch_one(&self.fetcher, &url).await
    }
}

// Just enough escaping for a query component; search terms are the only
// user-supplied text that lands in a URL.
fn encode_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedPages {
        pages: HashMap<String, (String, Option<String>)>,
    }

    impl FixedPages {
        fn new(pages: &[(&str, &str, Option<&str>)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, body, next)| {
                        (
                            url.to_string(),
                            (body.to_string(), next.map(|n| n.to_string())),
                        )
                    })
                    .collect(),
            }
        }
    }

    impl PageFetcher for FixedPages {
        async fn get_page(&self, url: &str) -> Result<Page, ApiError> {
            match self.pages.get(url) {
                Some((body, next)) => Ok(Page {
                    body: body.clone(),
                    next: next.clone(),
                }),
                None => Err(ApiError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    #[test]
    fn next_link_found_among_other_rels() {
        let header = "<https://lms.test/api/v1/x?page=1>; rel=\"current\",\
            <https://lms.test/api/v1/x?page=2>; rel=\"next\",\
            <https://lms.test/api/v1/x?page=1>; rel=\"first\",\
            <https://lms.test/api/v1/x?page=9>; rel=\"last\"";
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://lms.test/api/v1/x?page=2")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = "<https://lms.test/api/v1/x?page=9>; rel=\"current\",\
            <https://lms.test/api/v1/x?page=1>; rel=\"first\"";
        assert_eq!(next_page_url(header), None);
    }

    #[tokio::test]
    async fn fetch_all_follows_pagination() {
        let fetcher = FixedPages::new(&[
            ("/items", r#"[1,2,3]"#, Some("/items?page=2")),
            ("/items?page=2", r#"[4,5]"#, None),
        ]);
        let items: Vec<i64> = fetch_all(&fetcher, "/items").await.unwrap();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn fetch_all_reports_decode_failures() {
        let fetcher = FixedPages::new(&[("/items", "<html>maintenance</html>", None)]);
        let err = fetch_all::<i64, _>(&fetcher, "/items").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn course_listing_url_carries_term_and_search() {
        let fetcher = FixedPages::new(&[(
            "/api/v1/accounts/21/courses?with_enrollments=true&per_page=100\
             &enrollment_term_id=166&search_term=marketing%20research",
            "[]",
            None,
        )]);
        let client = ApiClient::new(fetcher);
        let courses = client
            .account_courses(21, 166, "marketing research", SearchMode::CourseName)
            .await
            .unwrap();
        assert!(courses.is_empty());
    }

    #[tokio::test]
    async fn instructor_search_uses_teacher_lookup() {
        let fetcher = FixedPages::new(&[(
            "/api/v1/accounts/21/courses?with_enrollments=true&per_page=100\
             &search_term=smith&search_by=teacher",
            "[]",
            None,
        )]);
        let client = ApiClient::new(fetcher);
        let courses = client
            .account_courses(21, 0, "smith", SearchMode::InstructorName)
            .await
            .unwrap();
        assert!(courses.is_empty());
    }

    #[tokio::test]
    async fn missing_page_surfaces_http_status() {
        let fetcher = FixedPages::new(&[]);
        let client = ApiClient::new(fetcher);
        let err = client.course(4410).await.unwrap_err();
        match err {
            ApiError::Status { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn query_encoding_escapes_reserved_bytes() {
        assert_eq!(encode_query("MKTG_201"), "MKTG_201");
        assert_eq!(encode_query("a b&c"), "a%20b%26c");
    }
}
