//! Harvest targets and the sites they belong to.

use serde::{Deserialize, Serialize};

/// Site a target page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Steam community reviews.
    Steam,
    /// TapTap game reviews.
    #[value(name = "taptap")]
    TapTap,
    /// Bilibili video comments.
    Bili,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steam => "steam",
            Self::TapTap => "taptap",
            Self::Bili => "bili",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "steam" => Some(Self::Steam),
            "taptap" | "tap" => Some(Self::TapTap),
            "bili" | "bilibili" => Some(Self::Bili),
            _ => None,
        }
    }

    /// Guess the source from a URL's host.
    ///
    /// Accepts bare hosts without a scheme (`www.bilibili.com/video/...`).
    pub fn infer(raw_url: &str) -> Option<Self> {
        let trimmed = raw_url.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        let host = url::Url::parse(&with_scheme)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))?;

        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if matches("steampowered.com") || matches("steamcommunity.com") {
            Some(Self::Steam)
        } else if matches("taptap.cn") || matches("taptap.com") || matches("taptap.io") {
            Some(Self::TapTap)
        } else if matches("bilibili.com") || matches("b23.tv") {
            Some(Self::Bili)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page to harvest. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub source: SourceKind,
}

impl Target {
    pub fn new(url: impl Into<String>, source: SourceKind) -> Self {
        Self {
            url: url.into(),
            source,
        }
    }
}
