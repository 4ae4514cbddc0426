use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Candidate;

/// Titles shorter than this (in chars) are stray matches from broken markup.
const MIN_TITLE_CHARS: usize = 4;

/// Configured scraping rule for one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRule {
    pub name: String,
    pub seed_urls: Vec<String>,
    /// CSS selector for the headline anchors.
    pub item_selector: String,
    /// CSS selector for the date text, looked up inside the anchor first and
    /// then inside the anchor's parent element when that parent holds no
    /// other item.
    #[serde(default = "default_date_selector")]
    pub date_selector: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_date_selector() -> String {
    "span.date".to_string()
}

fn default_enabled() -> bool {
    true
}

impl SourceRule {
    fn new(name: &str, seed_urls: &[&str], item_selector: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            seed_urls: seed_urls.iter().map(|s| s.to_string()).collect(),
            item_selector: item_selector.to_string(),
            date_selector: default_date_selector(),
            enabled,
        }
    }

    /// Rules used when the configuration file lists no sources. Only
    /// vnexpress is active; the blog and forum rules are kept switched off.
    pub fn defaults() -> Vec<SourceRule> {
        vec![
            SourceRule::new(
                "vnexpress",
                &[
                    "https://vnexpress.net/",
                    "https://vnexpress.net/suc-khoe",
                    "https://vnexpress.net/du-lich",
                    "https://vnexpress.net/oto-xe-may",
                    "https://vnexpress.net/cong-nghe",
                    "https://vnexpress.net/doi-song",
                    "https://vnexpress.net/bat-dong-san",
                    "https://vnexpress.net/khoa-hoc",
                ],
                "h3.title-news a",
                true,
            ),
            SourceRule::new(
                "codeaholicguy",
                &["https://codeaholicguy.com/"],
                "h1.entry-title a",
                false,
            ),
            SourceRule::new(
                "toidicodedao",
                &["https://toidicodedao.com/"],
                "h1.entry-title a",
                false,
            ),
            SourceRule::new(
                "voz",
                &["https://voz.vn/f/chuyen-tro-linh-tinh%E2%84%A2.17/"],
                "div.structItem-title a",
                false,
            ),
        ]
    }
}

/// A [`SourceRule`] with its selectors compiled and seed urls parsed.
#[derive(Debug)]
pub struct SourceExtractor {
    name: String,
    seed_urls: Vec<Url>,
    item_selector: Selector,
    date_selector: Selector,
}

impl SourceExtractor {
    pub fn from_rule(rule: &SourceRule) -> Result<Self> {
        let compile = |css: &str| {
            Selector::parse(css).map_err(|e| AppError::Selector {
                source_name: rule.name.clone(),
                message: format!("{css:?}: {e}"),
            })
        };

        let seed_urls = rule
            .seed_urls
            .iter()
            .map(|s| Url::parse(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                AppError::Config(format!("source {}: invalid seed url: {}", rule.name, e))
            })?;

        Ok(Self {
            name: rule.name.clone(),
            seed_urls,
            item_selector: compile(&rule.item_selector)?,
            date_selector: compile(&rule.date_selector)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seed_urls(&self) -> &[Url] {
        &self.seed_urls
    }

    /// Walk the anchors of an already parsed page.
    ///
    /// Links are resolved against `page_url`. Anchors with no usable link or
    /// a degenerate title are skipped.
    pub fn extract<'a>(
        &'a self,
        document: &'a Html,
        page_url: &'a Url,
    ) -> impl Iterator<Item = Candidate> + 'a {
        document
            .select(&self.item_selector)
            .filter_map(move |anchor| self.candidate(anchor, page_url))
    }

    /// Parse `html` and collect every candidate on it.
    pub fn extract_page(&self, html: &str, page_url: &Url) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        self.extract(&document, page_url).collect()
    }

    fn candidate(&self, anchor: ElementRef<'_>, page_url: &Url) -> Option<Candidate> {
        let title = collapse_whitespace(anchor.text());
        if title.chars().count() < MIN_TITLE_CHARS {
            tracing::trace!(source = %self.name, %title, "Skipping degenerate title");
            return None;
        }

        let href = anchor.value().attr("href")?;
        let url = page_url.join(href.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        Some(Candidate {
            title,
            url: url.to_string(),
            raw_date: self.date_text(anchor),
        })
    }

    fn date_text(&self, anchor: ElementRef<'_>) -> String {
        if let Some(date) = anchor.select(&self.date_selector).next() {
            return collapse_whitespace(date.text());
        }

        // The parent only speaks for this anchor when it holds no other item.
        anchor
            .parent()
            .and_then(ElementRef::wrap)
            .filter(|parent| self.item_count(*parent) == 1)
            .and_then(|parent| parent.select(&self.date_selector).next())
            .map(|date| collapse_whitespace(date.text()))
            .unwrap_or_default()
    }

    fn item_count(&self, parent: ElementRef<'_>) -> usize {
        parent
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| self.item_selector.matches(el))
            .count()
    }
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
