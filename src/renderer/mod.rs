//! Page rendering: the live, scrollable DOM a harvest is driven against.
//!
//! The [`PageRenderer`] trait is the only way the harvest loop touches a
//! browser. Queries return [`DomNode`] snapshots (outer HTML) so extraction
//! runs on plain data and never holds a handle into the live page.

mod config;

#[cfg(feature = "browser")]
mod chrome;

pub use config::BrowserEngineConfig;

#[cfg(feature = "browser")]
pub use chrome::ChromeRenderer;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use crate::error::{ExtractError, RendererError};

/// A live page that can be navigated, scrolled and queried.
///
/// One renderer drives one page at a time; methods take `&mut self` because
/// every call acts on shared browser state.
#[async_trait]
pub trait PageRenderer: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), RendererError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), RendererError>;

    async fn query(&mut self, selector: &str) -> Result<Vec<DomNode>, RendererError>;

    /// Number of nodes matching `selector`.
    async fn count(&mut self, selector: &str) -> Result<usize, RendererError> {
        Ok(self.query(selector).await?.len())
    }

    async fn current_height(&mut self) -> Result<u64, RendererError>;

    /// Run a script in the page, discarding its result.
    async fn execute(&mut self, script: &str) -> Result<(), RendererError>;

    /// Scroll the first node matching `selector` into view.
    /// Returns false when nothing matched.
    async fn scroll_into_view(&mut self, selector: &str) -> Result<bool, RendererError>;

    async fn title(&mut self) -> Result<Option<String>, RendererError>;

    async fn close(&mut self) -> Result<(), RendererError> {
        Ok(())
    }
}

/// Snapshot of one DOM element, taken as its outer HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomNode {
    html: String,
}

impl DomNode {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    fn fragment(&self) -> Html {
        Html::parse_fragment(&self.html)
    }

    /// Visible text of the whole node, whitespace collapsed.
    pub fn text(&self) -> String {
        let fragment = self.fragment();
        let text: String = fragment.root_element().text().collect();
        collapse_whitespace(&text)
    }

    /// Text of the first match of `selector` that has any text.
    pub fn select_text(&self, selector: &str) -> Result<Option<String>, ExtractError> {
        let selector = parse_selector(selector)?;
        let fragment = self.fragment();
        let found = fragment
            .select(&selector)
            .map(element_text)
            .find(|text| !text.is_empty());
        Ok(found)
    }

    /// Try each selector in turn and return the first non-empty text.
    pub fn select_first_text(&self, selectors: &[&str]) -> Result<Option<String>, ExtractError> {
        for selector in selectors {
            if let Some(text) = self.select_text(selector)? {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    /// Non-empty texts of every match of `selector`, in document order.
    pub fn select_all_text(&self, selector: &str) -> Result<Vec<String>, ExtractError> {
        let selector = parse_selector(selector)?;
        let fragment = self.fragment();
        Ok(fragment
            .select(&selector)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect())
    }

    /// Attribute `attr` of the first match of `selector` that carries it.
    pub fn select_attr(&self, selector: &str, attr: &str) -> Result<Option<String>, ExtractError> {
        let selector = parse_selector(selector)?;
        let fragment = self.fragment();
        let found = fragment
            .select(&selector)
            .find_map(|el| el.value().attr(attr).map(|v| v.trim().to_string()));
        Ok(found)
    }

    /// Snapshots of every descendant matching `selector`.
    pub fn select_nodes(&self, selector: &str) -> Result<Vec<DomNode>, ExtractError> {
        let selector = parse_selector(selector)?;
        let fragment = self.fragment();
        Ok(fragment
            .select(&selector)
            .map(|el| DomNode::new(el.html()))
            .collect())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|_| ExtractError::Selector(selector.to_string()))
}

fn element_text(el: ElementRef<'_>) -> String {
    let text: String = el.text().collect();
    collapse_whitespace(&text)
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
