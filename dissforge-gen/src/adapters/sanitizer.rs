//! Reddit text cleanup ahead of theme analysis

use crate::models::ScrapedPost;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Cleaned text handed to the theme analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCorpus {
    pub title: String,
    pub body: String,
    pub comments: Vec<String>,
    /// Post author, the diss target
    pub target: String,
    /// Subreddit the post came from
    pub context: String,
}

impl AnalysisCorpus {
    /// Clean every text field of a scraped post; comments that clean to nothing are dropped
    pub fn from_post(post: &ScrapedPost) -> Self {
        Self {
            title: clean_text(&post.title),
            body: clean_text(&post.body),
            comments: post
                .top_comments
                .iter()
                .map(|c| clean_text(c))
                .filter(|c| !c.is_empty())
                .collect(),
            target: post.author.clone(),
            context: post.subreddit.clone(),
        }
    }

    /// Everything as one block, title first
    pub fn text(&self) -> String {
        let mut parts = vec![self.title.as_str(), self.body.as_str()];
        parts.extend(self.comments.iter().map(String::as_str));
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.body.is_empty() && self.comments.is_empty()
    }
}

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]*)\]\([^)]*\)").expect("valid regex"));
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:http|www)\S*").expect("valid regex"));
static SQUARE_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\[\]]").expect("valid regex"));
static PAREN_ASIDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));
static HTML_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(?:#\d+|[a-z]+);").expect("valid regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^a-z0-9\s.,!?'"-]"#).expect("valid regex"));
static REPEATED_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.{2,}|,{2,}|!{2,}|\?{2,}").expect("valid regex"));

/// Normalize Reddit markup into plain lowercase prose
///
/// Link text survives, link targets and bare URLs do not. Words made only of
/// punctuation are dropped.
pub fn clean_text(input: &str) -> String {
    let text = input.to_lowercase();
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = URL.replace_all(&text, "");
    let text = SQUARE_BRACKET.replace_all(&text, "");
    let text = PAREN_ASIDE.replace_all(&text, "");
    let text = HTML_ENTITY.replace_all(&text, " ");
    let text = DISALLOWED.replace_all(&text, "");
    let text = REPEATED_PUNCT.replace_all(&text, |caps: &Captures| caps[0][..1].to_string());

    text.split_whitespace()
        .filter(|word| word.chars().any(|c| c.is_ascii_alphanumeric()))
        .collect::<Vec<_>>()
        .join(" ")
}
