//! Steam community reviews.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{fallback_key, fix_doubled_scheme, SiteAdapter};
use crate::error::ExtractError;
use crate::models::{RawRecord, SourceKind};
use crate::renderer::DomNode;

static APP_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/app/(\d+)").expect("app id pattern should compile"));

static HELPFUL_ZH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d,]+) 人中有 ([\d,]+) 人.+有用").expect("helpful pattern should compile")
});

static HELPFUL_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([\d,]+) (?:people|person) found this review helpful")
        .expect("helpful pattern should compile")
});

static FUNNY_ZH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d,]+) 人觉得这篇评测很欢乐").expect("funny pattern should compile")
});

static FUNNY_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([\d,]+) (?:people|person) found this review funny")
        .expect("funny pattern should compile")
});

const POSTED_PREFIXES: &[&str] = &["发布于：", "发布于:", "Posted:"];

/// Review listing options appended to every Steam reviews URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteamOptions {
    /// Review language filter (`filterLanguage`).
    #[serde(default = "default_language")]
    pub language: String,
    /// Sort order (`browsefilter`).
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for SteamOptions {
    fn default() -> Self {
        Self {
            language: default_language(),
            filter: default_filter(),
        }
    }
}

fn default_language() -> String {
    "schinese".to_string()
}

fn default_filter() -> String {
    "toprated".to_string()
}

pub struct SteamAdapter {
    options: SteamOptions,
}

impl SteamAdapter {
    pub fn new(options: SteamOptions) -> Self {
        Self { options }
    }
}

fn vote_count(text: &str, zh: &Regex, zh_group: usize, en: &Regex) -> String {
    zh.captures(text)
        .and_then(|c| c.get(zh_group))
        .or_else(|| en.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str().replace(',', ""))
        .unwrap_or_else(|| "0".to_string())
}

fn strip_posted_prefix(text: &str) -> String {
    let mut date = text.trim();
    for prefix in POSTED_PREFIXES {
        if let Some(rest) = date.strip_prefix(prefix) {
            date = rest.trim();
        }
    }
    date.to_string()
}

impl SiteAdapter for SteamAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Steam
    }

    fn unit_selectors(&self) -> &[&str] {
        &[".apphub_Card"]
    }

    fn container_selectors(&self) -> &[&str] {
        &["#AppHubCards", ".apphub_CardsColumn"]
    }

    fn fields(&self) -> &[&str] {
        &[
            "author",
            "userId",
            "recommendation",
            "body",
            "postedAt",
            "hours",
            "helpfulCount",
            "funnyCount",
        ]
    }

    fn normalize_url(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match APP_ID.captures(trimmed) {
            Some(caps) => format!(
                "https://steamcommunity.com/app/{}/reviews/?browsefilter={}&filterLanguage={}",
                &caps[1], self.options.filter, self.options.language
            ),
            None if trimmed.starts_with("http") => fix_doubled_scheme(trimmed),
            None => format!("https://{}", trimmed),
        }
    }

    fn target_key(&self, url: &str) -> String {
        APP_ID
            .captures(url)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| fallback_key(url))
    }

    fn clean_title(&self, title: &str) -> String {
        // "Steam Community :: <game> :: Reviews"
        let parts: Vec<&str> = title.split("::").map(str::trim).collect();
        match parts.as_slice() {
            [_, game, ..] if !game.is_empty() => game.to_string(),
            _ => title.trim().to_string(),
        }
    }

    fn extract(&self, node: &DomNode) -> Result<RawRecord, ExtractError> {
        let posted_raw = node.select_text(".date_posted")?.unwrap_or_default();

        let mut body = node
            .select_text(".apphub_CardTextContent")?
            .ok_or(ExtractError::MissingField("body"))?;
        // The posted date is rendered inside the text block.
        if !posted_raw.is_empty() {
            if let Some(rest) = body.strip_prefix(posted_raw.as_str()) {
                body = rest.trim().to_string();
            }
        }
        if body.is_empty() {
            return Err(ExtractError::MissingField("body"));
        }

        let author = node
            .select_text(".apphub_CardContentAuthorName a")?
            .unwrap_or_default();
        let user_id = node
            .select_attr(".apphub_CardContentAuthorName a", "href")?
            .and_then(|href| {
                href.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .map(|s| s.to_string())
            })
            .unwrap_or_default();

        let votes = node.select_text(".found_helpful")?.unwrap_or_default();

        Ok(RawRecord::new()
            .with("author", author)
            .with("userId", user_id)
            .with(
                "recommendation",
                node.select_text(".title")?.unwrap_or_default(),
            )
            .with("body", body)
            .with("postedAt", strip_posted_prefix(&posted_raw))
            .with("hours", node.select_text(".hours")?.unwrap_or_default())
            .with("helpfulCount", vote_count(&votes, &HELPFUL_ZH, 2, &HELPFUL_EN))
            .with("funnyCount", vote_count(&votes, &FUNNY_ZH, 1, &FUNNY_EN)))
    }
}
