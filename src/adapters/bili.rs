//! Bilibili video comments and their replies.

use std::sync::LazyLock;

use regex::Regex;

use super::{count_or_zero, fix_doubled_scheme, SiteAdapter};
use crate::error::ExtractError;
use crate::models::{RawRecord, SourceKind};
use crate::renderer::DomNode;

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:bilibili\.com/video|b23\.tv)/(\w+)").expect("video id pattern should compile")
});

static SPACE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"space\.bilibili\.com/(\d+)").expect("space id pattern should compile")
});

static TITLE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_哔哩哔哩.*$|_bilibili.*$|\s*-\s*bilibili$").expect("title suffix pattern should compile")
});

/// Hides the floating mini-player, which covers the comment list once the
/// video scrolls out of view.
const HIDE_MINI_PLAYER_SCRIPT: &str = r#"
    (() => {
        const players = document.querySelectorAll('div[class*="mini-player"]');
        for (let i = 0; i < players.length; i++) {
            players[i].style.display = 'none';
        }
        return players.length;
    })()
"#;

pub struct BiliAdapter;

fn user_id(node: &DomNode, selector: &str) -> Result<String, ExtractError> {
    if let Some(href) = node.select_attr(selector, "href")? {
        if let Some(caps) = SPACE_ID.captures(&href) {
            return Ok(caps[1].to_string());
        }
    }
    Ok(node
        .select_attr(selector, "data-user-id")?
        .unwrap_or_default())
}

impl SiteAdapter for BiliAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Bili
    }

    fn unit_selectors(&self) -> &[&str] {
        &[".reply-item"]
    }

    fn container_selectors(&self) -> &[&str] {
        &["#comment", ".comment-container", ".reply-list"]
    }

    fn reply_selector(&self) -> Option<&str> {
        Some(".sub-reply-item")
    }

    fn fields(&self) -> &[&str] {
        &[
            "author",
            "userId",
            "body",
            "postedAt",
            "likeCount",
            "parentAuthor",
            "parentUserId",
        ]
    }

    fn normalize_url(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        let url = if trimmed.starts_with("http") {
            fix_doubled_scheme(trimmed)
        } else {
            format!("https://{}", trimmed)
        };

        let has_t = url
            .split_once('?')
            .map(|(_, query)| query.split('&').any(|p| p.starts_with("t=")))
            .unwrap_or(false);
        if has_t {
            url
        } else if url.contains('?') {
            format!("{}&t=0", url)
        } else {
            format!("{}?t=0", url)
        }
    }

    fn target_key(&self, url: &str) -> String {
        if let Some(caps) = VIDEO_ID.captures(url) {
            return caps[1].to_string();
        }
        url.split(['?', '#'])
            .next()
            .unwrap_or(url)
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| super::fallback_key(url))
    }

    fn prepare_script(&self) -> Option<&str> {
        Some(HIDE_MINI_PLAYER_SCRIPT)
    }

    fn clean_title(&self, title: &str) -> String {
        TITLE_SUFFIX.replace(title, "").trim().to_string()
    }

    fn extract(&self, node: &DomNode) -> Result<RawRecord, ExtractError> {
        let author = node
            .select_text(".user-name")?
            .ok_or(ExtractError::MissingField("author"))?;
        let body = node
            .select_text(".reply-content")?
            .ok_or(ExtractError::MissingField("body"))?;

        Ok(RawRecord::new()
            .with("author", author)
            .with("userId", user_id(node, ".user-name")?)
            .with("body", body)
            .with("postedAt", node.select_text(".reply-time")?.unwrap_or_default())
            .with(
                "likeCount",
                count_or_zero(node.select_text(".like-count")?.as_deref()),
            )
            .with("parentAuthor", "")
            .with("parentUserId", ""))
    }

    fn extract_reply(&self, parent: &RawRecord, node: &DomNode) -> Result<RawRecord, ExtractError> {
        let author = node
            .select_first_text(&[".sub-user-name", ".user-name"])?
            .ok_or(ExtractError::MissingField("author"))?;
        let body = node
            .select_first_text(&[".reply-content", ".sub-reply-content"])?
            .ok_or(ExtractError::MissingField("body"))?;

        let id_selector = if node.select_text(".sub-user-name")?.is_some() {
            ".sub-user-name"
        } else {
            ".user-name"
        };

        Ok(RawRecord::new()
            .with("author", author)
            .with("userId", user_id(node, id_selector)?)
            .with("body", body)
            .with(
                "postedAt",
                node.select_first_text(&[".sub-reply-time", ".reply-time"])?
                    .unwrap_or_default(),
            )
            .with(
                "likeCount",
                count_or_zero(
                    node.select_first_text(&[".sub-reply-like", ".like-count"])?
                        .as_deref(),
                ),
            )
            .with("parentAuthor", parent.value("author"))
            .with("parentUserId", parent.value("userId")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY_ITEM: &str = r#"<div class="reply-item">
        <div class="root-reply-container">
            <a class="user-name" href="//space.bilibili.com/12345">UP主粉丝</a>
            <span class="reply-content">前排   支持</span>
            <span class="reply-time">2024-06-01 12:00</span>
            <span class="like-count">1.2万</span>
        </div>
        <div class="sub-reply-container">
            <div class="sub-reply-item">
                <a class="sub-user-name" data-user-id="678">路人甲</a>
                <span class="reply-content">同感</span>
                <span class="sub-reply-time">2024-06-01 12:05</span>
                <span class="sub-reply-like">3</span>
            </div>
            <div class="sub-reply-item">
                <span class="reply-content">没有名字</span>
            </div>
        </div>
    </div>"#;

    #[test]
    fn test_extract_comment_and_replies() {
        let node = DomNode::new(REPLY_ITEM);
        let parent = BiliAdapter.extract(&node).unwrap();
        assert_eq!(parent.value("author"), "UP主粉丝");
        assert_eq!(parent.value("userId"), "12345");
        assert_eq!(parent.value("body"), "前排 支持");
        assert_eq!(parent.value("postedAt"), "2024-06-01 12:00");
        assert_eq!(parent.value("likeCount"), "0");

        let replies = node.select_nodes(BiliAdapter.reply_selector().unwrap()).unwrap();
        assert_eq!(replies.len(), 2);

        let reply = BiliAdapter.extract_reply(&parent, &replies[0]).unwrap();
        assert_eq!(reply.value("author"), "路人甲");
        assert_eq!(reply.value("userId"), "678");
        assert_eq!(reply.value("body"), "同感");
        assert_eq!(reply.value("likeCount"), "3");
        assert_eq!(reply.value("parentAuthor"), "UP主粉丝");
        assert_eq!(reply.value("parentUserId"), "12345");

        assert!(matches!(
            BiliAdapter.extract_reply(&parent, &replies[1]),
            Err(ExtractError::MissingField("author"))
        ));
    }

    #[test]
    fn test_normalize_and_key() {
        assert_eq!(
            BiliAdapter.normalize_url("www.bilibili.com/video/BV1GJ411x7h7"),
            "https://www.bilibili.com/video/BV1GJ411x7h7?t=0"
        );
        assert_eq!(
            BiliAdapter.normalize_url("https://www.bilibili.com/video/BV1GJ411x7h7?p=2"),
            "https://www.bilibili.com/video/BV1GJ411x7h7?p=2&t=0"
        );
        assert_eq!(
            BiliAdapter.normalize_url("https://www.bilibili.com/video/BV1GJ411x7h7?t=30"),
            "https://www.bilibili.com/video/BV1GJ411x7h7?t=30"
        );
        assert_eq!(
            BiliAdapter.target_key("https://www.bilibili.com/video/BV1GJ411x7h7/?t=0"),
            "BV1GJ411x7h7"
        );
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(
            BiliAdapter.clean_title("【4K】某某视频_哔哩哔哩_bilibili"),
            "【4K】某某视频"
        );
    }
}
