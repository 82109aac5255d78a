//! TapTap game reviews.
//!
//! TapTap reshuffles its class names often, so every field is looked up
//! through a list of fallback selectors.

use std::sync::LazyLock;

use regex::Regex;

use super::{fallback_key, fix_doubled_scheme, strip_invisible, SiteAdapter};
use crate::error::ExtractError;
use crate::models::{RawRecord, SourceKind};
use crate::renderer::{collapse_whitespace, DomNode};

static APP_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)taptap\.(?:com|cn|io)/app/(\d+)").expect("app id pattern should compile")
});

static BARE_APP_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)app/(\d+)").expect("app id pattern should compile"));

static DATE_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}[-/年]\d{1,2}[-/月]|\d{1,2}[-/月]\d{1,2}|分钟前|小时前|天前")
        .expect("date pattern should compile")
});

static NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\d{4}[-/年]\d{1,2}[-/月]\d{1,2}日?",
        r"\d{1,2}[-/月]\d{1,2}日?",
        r"\d+\s*分钟前",
        r"\d+\s*小时前",
        r"\d+\s*天前",
        r"\d+\s*赞",
        r"赞\s*\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("noise pattern should compile"))
    .collect()
});

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digits pattern should compile"));

const USERNAME_SELECTORS: &[&str] = &[
    ".name",
    ".username",
    ".user-name",
    ".nickname",
    "[class*='user'] [class*='name']",
    "[class*='author']",
    ".user",
    ".author",
];

const CONTENT_SELECTORS: &[&str] = &[
    ".review-content",
    ".comment-content",
    ".desc",
    ".content",
    ".text",
    ".body",
    "[class*='content']:not([class*='author']):not([class*='time']):not([class*='user'])",
];

const TIME_SELECTORS: &[&str] = &[
    ".time",
    ".date",
    ".timestamp",
    ".publish-time",
    "[class*='time']",
    "[class*='date']",
    ".meta time",
];

const LIKE_SELECTORS: &[&str] = &[
    ".like-count",
    ".thumbs-up",
    ".like-num",
    ".like",
    "[class*='like']",
    "[class*='vote']",
    ".vote-count",
];

pub struct TapTapAdapter;

impl TapTapAdapter {
    fn body(&self, node: &DomNode, author: &str) -> Result<String, ExtractError> {
        if let Some(text) = node.select_first_text(CONTENT_SELECTORS)? {
            return Ok(text);
        }

        let paragraphs = node.select_all_text("p")?;
        if !paragraphs.is_empty() {
            return Ok(paragraphs.join(" "));
        }

        // Last resort: the whole card minus author, dates and like counts.
        let mut text = node.text();
        if !author.is_empty() {
            text = text.replacen(author, "", 1);
            for pattern in NOISE.iter() {
                text = pattern.replace_all(&text, "").into_owned();
            }
        }
        Ok(collapse_whitespace(&text))
    }

    fn posted_at(&self, node: &DomNode) -> Result<String, ExtractError> {
        if let Some(text) = node.select_first_text(TIME_SELECTORS)? {
            return Ok(text);
        }
        for attr in ["datetime", "data-time", "title"] {
            if let Some(value) = node.select_attr(&format!("[{}]", attr), attr)? {
                if DATE_LIKE.is_match(&value) {
                    return Ok(value);
                }
            }
        }
        Ok(String::new())
    }

    fn like_count(&self, node: &DomNode) -> Result<String, ExtractError> {
        for selector in LIKE_SELECTORS {
            if let Some(text) = node.select_text(selector)? {
                if let Some(m) = DIGITS.find(&text) {
                    return Ok(m.as_str().to_string());
                }
            }
        }
        for attr in ["data-like-count", "data-votes", "data-count"] {
            if let Some(value) = node.select_attr(&format!("[{}]", attr), attr)? {
                if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
                    return Ok(value);
                }
            }
        }
        Ok("0".to_string())
    }
}

impl SiteAdapter for TapTapAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::TapTap
    }

    fn unit_selectors(&self) -> &[&str] {
        &[
            ".comment-item",
            ".review-item",
            ".comment-list .item",
            "[class*='comment-item']",
            "[class*='review-item']",
            ".review-item-wrap",
        ]
    }

    fn container_selectors(&self) -> &[&str] {
        &[
            ".review-feed-wrap",
            ".app-comments-wrap",
            "#reviews",
            ".comment-container",
        ]
    }

    fn fields(&self) -> &[&str] {
        &["author", "body", "postedAt", "likeCount"]
    }

    fn normalize_url(&self, raw: &str) -> String {
        let url = strip_invisible(raw);
        let url = if url.starts_with("http") {
            url
        } else if url.starts_with("www.") {
            format!("https://{}", url)
        } else if url.starts_with("taptap") {
            format!("https://www.{}", url)
        } else if url.contains("taptap.cn") || url.contains("taptap.com") {
            format!("https://{}", url)
        } else {
            format!("https://www.taptap.cn/{}", url.trim_start_matches('/'))
        };
        fix_doubled_scheme(&url)
    }

    fn target_key(&self, url: &str) -> String {
        APP_ID
            .captures(url)
            .or_else(|| BARE_APP_ID.captures(url))
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| fallback_key(url))
    }

    fn clean_title(&self, title: &str) -> String {
        let mut cleaned = title.trim();
        for suffix in [" - TapTap", " | TapTap", "- TapTap", "| TapTap"] {
            if let Some(rest) = cleaned.strip_suffix(suffix) {
                cleaned = rest.trim_end();
            }
        }
        cleaned.to_string()
    }

    fn extract(&self, node: &DomNode) -> Result<RawRecord, ExtractError> {
        let author = node
            .select_first_text(USERNAME_SELECTORS)?
            .unwrap_or_default();

        let body = self.body(node, &author)?;
        if body.is_empty() || body == author {
            return Err(ExtractError::MissingField("body"));
        }

        Ok(RawRecord::new()
            .with("postedAt", self.posted_at(node)?)
            .with("likeCount", self.like_count(node)?)
            .with("author", author)
            .with("body", body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_review_item() {
        let html = r#"<div class="review-item">
            <span class="user-name">玩家小明</span>
            <div class="review-content">画面  很棒
                剧情一般</div>
            <span class="publish-time">2024/05/01</span>
            <button class="like-btn"><span class="like-count">赞 36</span></button>
        </div>"#;
        let record = TapTapAdapter.extract(&DomNode::new(html)).unwrap();
        assert_eq!(record.value("author"), "玩家小明");
        assert_eq!(record.value("body"), "画面 很棒 剧情一般");
        assert_eq!(record.value("postedAt"), "2024/05/01");
        assert_eq!(record.value("likeCount"), "36");
    }

    #[test]
    fn test_falls_back_to_paragraphs_and_attributes() {
        let html = r#"<div class="comment-item" data-like-count="7">
            <span class="nickname">路人</span>
            <p>第一段</p><p></p><p>第二段</p>
            <span title="2023-12-31 10:00"></span>
        </div>"#;
        let record = TapTapAdapter.extract(&DomNode::new(html)).unwrap();
        assert_eq!(record.value("body"), "第一段 第二段");
        assert_eq!(record.value("postedAt"), "2023-12-31 10:00");
        assert_eq!(record.value("likeCount"), "7");
    }

    #[test]
    fn test_item_with_only_a_name_fails() {
        let html = r#"<div class="comment-item"><span class="name">路人</span></div>"#;
        assert!(TapTapAdapter.extract(&DomNode::new(html)).is_err());
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            TapTapAdapter.normalize_url("\u{200b}app/168332/review\u{feff}"),
            "https://www.taptap.cn/app/168332/review"
        );
        assert_eq!(
            TapTapAdapter.normalize_url("taptap.cn/app/168332"),
            "https://www.taptap.cn/app/168332"
        );
        assert_eq!(
            TapTapAdapter.normalize_url("https://https://www.taptap.cn/app/1"),
            "https://www.taptap.cn/app/1"
        );
        assert_eq!(TapTapAdapter.target_key("https://www.taptap.cn/app/168332/review"), "168332");
    }
}
