//! Site adapters: per-site knowledge of where comments live on a page.
//!
//! An adapter supplies selectors and a per-unit extractor. The harvest
//! engine only talks to the [`SiteAdapter`] trait and never branches on
//! which site it is harvesting.

mod bili;
mod steam;
mod taptap;

pub use bili::BiliAdapter;
pub use steam::{SteamAdapter, SteamOptions};
pub use taptap::TapTapAdapter;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::ExtractError;
use crate::models::{RawRecord, SourceKind};
use crate::renderer::DomNode;

/// Per-site selectors and extraction.
pub trait SiteAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Selectors identifying one comment unit, most specific first.
    /// The first selector that matches anything on the page wins.
    fn unit_selectors(&self) -> &[&str];

    /// Selectors for the element wrapping the comment list. The first match
    /// is scrolled into view before the stability loop starts.
    fn container_selectors(&self) -> &[&str] {
        &[]
    }

    /// Selector for reply units nested inside a comment unit.
    fn reply_selector(&self) -> Option<&str> {
        None
    }

    /// Output columns produced by [`SiteAdapter::extract`], in order.
    fn fields(&self) -> &[&str];

    /// Canonical URL to navigate to for a raw target-list entry.
    fn normalize_url(&self, raw: &str) -> String;

    /// Stable identifier for a target, used in checkpoints and file names.
    fn target_key(&self, url: &str) -> String;

    /// Script to run once after navigation, before scrolling.
    fn prepare_script(&self) -> Option<&str> {
        None
    }

    /// Clean a page title for use in an output file name.
    fn clean_title(&self, title: &str) -> String {
        title.trim().to_string()
    }

    fn extract(&self, node: &DomNode) -> Result<RawRecord, ExtractError>;

    fn extract_reply(&self, _parent: &RawRecord, _node: &DomNode) -> Result<RawRecord, ExtractError> {
        Err(ExtractError::RepliesUnsupported(self.kind().as_str()))
    }
}

/// The adapter registered for each source kind.
#[derive(Clone)]
pub struct AdapterSet {
    adapters: HashMap<SourceKind, Arc<dyn SiteAdapter>>,
}

impl AdapterSet {
    /// Built-in adapters for every supported site.
    pub fn new(steam: SteamOptions) -> Self {
        Self::empty()
            .with_adapter(Arc::new(SteamAdapter::new(steam)))
            .with_adapter(Arc::new(TapTapAdapter))
            .with_adapter(Arc::new(BiliAdapter))
    }

    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register `adapter` for its own kind, replacing any previous one.
    pub fn with_adapter(mut self, adapter: Arc<dyn SiteAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        Self::new(SteamOptions::default())
    }
}

static DOUBLED_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)(?:https?://)+(.+)$").expect("doubled scheme pattern should compile")
});

/// Collapse `https://https://host` into `https://host`.
pub(crate) fn fix_doubled_scheme(url: &str) -> String {
    match DOUBLED_SCHEME.captures(url) {
        Some(caps) => format!("{}{}", &caps[1], &caps[2]),
        None => url.to_string(),
    }
}

/// Strip zero-width and byte-order characters pasted along with URLs.
pub(crate) fn strip_invisible(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\u{200b}'..='\u{200f}' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Last purely numeric path segment, if any.
pub(crate) fn last_numeric_segment(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .find(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.to_string())
}

/// Key derived from the URL text itself when no id can be found.
pub(crate) fn fallback_key(url: &str) -> String {
    if let Some(id) = last_numeric_segment(url) {
        return id;
    }
    let stripped = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let mut key: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    key = key.trim_matches('_').to_string();
    key.chars().take(60).collect()
}

/// Digits only, or `"0"`.
pub(crate) fn count_or_zero(text: Option<&str>) -> String {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()) => t.to_string(),
        _ => "0".to_string(),
    }
}
