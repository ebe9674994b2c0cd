//! Searching the lyrics site through DuckDuckGo's lite interface.

use lazy_static::lazy_static;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use super::{first_max_by_key, text_of, Fetcher};
use crate::error::ScrapeError;

pub const SEARCH_ENDPOINT: &str = "https://lite.duckduckgo.com/lite/";

/// title row, description row, display url row, spacer row
const ROWS_PER_RESULT: usize = 4;

lazy_static! {
    static ref TABLE: Selector = Selector::parse("table").expect("valid selector");
    static ref ANCHOR: Selector = Selector::parse("a").expect("valid selector");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    url: String,
    items: Vec<SearchItem>,
}

impl SearchResults {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn items(&self) -> &[SearchItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<SearchItem> {
        self.items
    }

    pub fn first(&self) -> Result<&SearchItem, ScrapeError> {
        self.items.first().ok_or(ScrapeError::NoResults)
    }
}

pub fn search_url(query: &str) -> Result<String, ScrapeError> {
    Url::parse_with_params(SEARCH_ENDPOINT, &[("q", query.trim())])
        .map(|url| url.to_string())
        .map_err(|e| ScrapeError::SearchUnavailable(e.to_string()))
}

pub async fn search(fetcher: &dyn Fetcher, query: &str) -> Result<SearchResults, ScrapeError> {
    let url = search_url(query)?;
    let html = fetcher
        .fetch(&url)
        .await
        .map_err(|e| ScrapeError::SearchUnavailable(e.to_string()))?;
    let items = parse_results(&html)?;
    tracing::debug!("search {:?} returned {} results", query, items.len());
    Ok(SearchResults { url, items })
}

pub fn parse_results(html: &str) -> Result<Vec<SearchItem>, ScrapeError> {
    let document = Html::parse_document(html);

    // the page is laid out with several tables, results are in the biggest one
    let table = first_max_by_key(document.select(&TABLE), |table| table_rows(table).len())
        .ok_or_else(|| ScrapeError::SearchUnavailable("no results table".to_string()))?;
    let rows = table_rows(table);
    let Some((_pager, rows)) = rows.split_last() else {
        return Err(ScrapeError::SearchUnavailable(
            "results table is empty".to_string(),
        ));
    };

    let mut items = Vec::new();
    for group in rows.chunks_exact(ROWS_PER_RESULT) {
        let Some(link) = group[0].select(&ANCHOR).next() else {
            continue;
        };
        let title = text_of(link).trim().to_string();
        let url = link
            .value()
            .attr("href")
            .and_then(decode_redirect)
            .unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            continue;
        }
        items.push(SearchItem {
            title,
            url,
            description: text_of(group[1]).trim().to_string(),
        });
    }

    Ok(items)
}

/// Result links go through `/l/?uddg=<destination>`; anything else is taken as is.
fn decode_redirect(href: &str) -> Option<String> {
    let url = Url::parse(SEARCH_ENDPOINT).ok()?.join(href.trim()).ok()?;
    if let Some((_, target)) = url.query_pairs().find(|(key, _)| key == "uddg") {
        return Some(target.into_owned());
    }
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Rows that belong to `table` itself, not to tables nested inside it.
fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|row| row.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}
