//! Reddit JSON API client
//!
//! Fetches `{post_url}.json` (a pair of listings: the post, then its comment
//! tree) and reduces it to a [`ScrapedPost`]. Requests are spaced by a
//! minimum interval to stay under Reddit's anonymous rate limit.

use super::error::{ScrapeError, StageError};
use super::PostScraper;
use crate::config::RedditConfig;
use crate::models::ScrapedPost;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const CANONICAL_ORIGIN: &str = "https://www.reddit.com";

/// Spaces consecutive requests by a minimum interval
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct RedditClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
    base_url: String,
    bearer_token: Option<String>,
    max_comments: usize,
}

impl RedditClient {
    pub fn new(config: &RedditConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(config.min_request_interval_ms),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            max_comments: config.max_comments,
        })
    }

    /// JSON endpoint for a normalized post URL, rebased onto the configured origin
    fn json_url(&self, post_url: &str) -> String {
        let path = post_url.strip_prefix(CANONICAL_ORIGIN).unwrap_or(post_url);
        format!("{}{}.json?raw_json=1", self.base_url, path)
    }
}

#[async_trait]
impl PostScraper for RedditClient {
    async fn scrape(&self, post_url: &str) -> Result<ScrapedPost, StageError> {
        self.rate_limiter.wait().await;

        let url = self.json_url(post_url);
        debug!(url = %url, "Fetching Reddit post");

        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| StageError::Malformed(format!("Reddit response: {}", e)))?;
        let post = parse_listing(&body, self.max_comments)?;

        debug!(
            subreddit = %post.subreddit,
            comments = post.top_comments.len(),
            "Reddit post scraped"
        );
        Ok(post)
    }
}

/// Map a non-success HTTP status onto the error taxonomy
pub fn classify_status(status: StatusCode) -> Option<StageError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ScrapeError::NotFound.into(),
        StatusCode::TOO_MANY_REQUESTS => ScrapeError::RateLimited.into(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScrapeError::AuthFailed.into(),
        s if s.is_server_error() => StageError::Network(format!("Reddit returned {}", s)),
        s => StageError::InvalidInput(format!("Reddit returned {}", s)),
    })
}

/// Reduce the `[post listing, comment listing]` pair to a post
///
/// Comments with a positive score are kept, best first, up to `max_comments`.
pub fn parse_listing(body: &Value, max_comments: usize) -> Result<ScrapedPost, StageError> {
    let post = body
        .get(0)
        .and_then(|l| l.pointer("/data/children/0/data"))
        .ok_or_else(|| StageError::Malformed("Reddit listing has no post".to_string()))?;

    let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).unwrap_or("").to_string();

    let mut comments: Vec<(i64, String)> = body
        .get(1)
        .and_then(|l| l.pointer("/data/children"))
        .and_then(Value::as_array)
        .map(|children| {
            children
                .iter()
                .filter(|c| c.get("kind").and_then(Value::as_str) == Some("t1"))
                .filter_map(|c| c.get("data"))
                .map(|d| (d.get("score").and_then(Value::as_i64).unwrap_or(0), text(d, "body")))
                .filter(|(score, body)| *score > 0 && !is_removed(body))
                .collect()
        })
        .unwrap_or_default();
    comments.sort_by(|a, b| b.0.cmp(&a.0));
    comments.truncate(max_comments);

    let body_text = text(post, "selftext");
    if is_removed(&body_text) && comments.is_empty() {
        return Err(ScrapeError::NotFound.into());
    }

    Ok(ScrapedPost {
        title: text(post, "title"),
        body: if is_removed(&body_text) { String::new() } else { body_text },
        author: text(post, "author"),
        subreddit: text(post, "subreddit"),
        score: post.get("score").and_then(Value::as_i64).unwrap_or(0),
        top_comments: comments.into_iter().map(|(_, body)| body).collect(),
    })
}

fn is_removed(text: &str) -> bool {
    matches!(text.trim(), "[removed]" | "[deleted]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing(selftext: &str, comments: Value) -> Value {
        json!([
            {"kind": "Listing", "data": {"children": [
                {"kind": "t3", "data": {
                    "title": "My new setup",
                    "selftext": selftext,
                    "author": "test_user",
                    "subreddit": "battlestations",
                    "score": 120
                }}
            ]}},
            {"kind": "Listing", "data": {"children": comments}}
        ])
    }

    #[test]
    fn test_comments_filtered_and_sorted() {
        let body = listing(
            "Took me a year",
            json!([
                {"kind": "t1", "data": {"body": "ok", "score": 3}},
                {"kind": "t1", "data": {"body": "downvoted", "score": -5}},
                {"kind": "t1", "data": {"body": "best", "score": 40}},
                {"kind": "t1", "data": {"body": "[deleted]", "score": 9}},
                {"kind": "more", "data": {"count": 12}}
            ]),
        );
        let post = parse_listing(&body, 10).unwrap();
        assert_eq!(post.top_comments, vec!["best", "ok"]);
        assert_eq!(post.author, "test_user");
        assert_eq!(post.score, 120);

        assert_eq!(parse_listing(&body, 1).unwrap().top_comments, vec!["best"]);
    }

    #[test]
    fn test_removed_post_is_not_found() {
        let err = parse_listing(&listing("[removed]", json!([])), 10).unwrap_err();
        assert_eq!(err.code(), "NotFound");
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(parse_listing(&json!({"error": 1}), 10).unwrap_err().code(), "Malformed");
    }

    #[test]
    fn test_status_mapping() {
        assert!(classify_status(StatusCode::OK).is_none());
        let code = |s| classify_status(s).map(|e| e.code());
        assert_eq!(code(StatusCode::NOT_FOUND), Some("NotFound"));
        assert_eq!(code(StatusCode::TOO_MANY_REQUESTS), Some("RateLimited"));
        assert_eq!(code(StatusCode::FORBIDDEN), Some("AuthFailed"));
        assert_eq!(code(StatusCode::BAD_GATEWAY), Some("Network"));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).unwrap().is_transient());
    }

    #[test]
    fn test_json_url_rebases() {
        let client = RedditClient::new(&RedditConfig {
            base_url: "http://127.0.0.1:9000/".to_string(),
            ..RedditConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.json_url("https://www.reddit.com/r/rust/comments/abc/x"),
            "http://127.0.0.1:9000/r/rust/comments/abc/x.json?raw_json=1"
        );
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(50);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
