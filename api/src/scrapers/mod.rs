//! Fetching and parsing pages from the lyrics site and the search engine.

use async_trait::async_trait;
use reqwest::Client;
use scraper::ElementRef;
use std::sync::Arc;

use crate::error::ScrapeError;
use crate::ident;
use crate::models::{ArtistData, SongData};

pub mod azlyrics;
pub mod duckduckgo;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const SNIPPET_CHARS: usize = 500;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body. One attempt, no retries.
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError>;
}

pub struct HttpFetcher {
    client: Client,
    proxied: bool,
}

impl HttpFetcher {
    pub fn direct() -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            proxied: false,
        })
    }

    /// Routes every request through `proxy_url`; the lyrics site blocks
    /// most datacenter addresses.
    pub fn proxied(proxy_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .proxy(reqwest::Proxy::all(proxy_url)?)
            .build()?;
        Ok(Self {
            client,
            proxied: true,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        tracing::debug!("fetching {} (proxied: {})", url, self.proxied);
        let failure = |e: reqwest::Error| ScrapeError::FetchFailure {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(failure)?;
        let response = response.error_for_status().map_err(failure)?;
        response.text().await.map_err(failure)
    }
}

/// Validates lyrics-site URLs, scrapes them and hands the HTML to the parsers.
#[derive(Clone)]
pub struct Scraper {
    fetcher: Arc<dyn Fetcher>,
}

impl Scraper {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn fetch_song_data(&self, url: &str) -> Result<SongData, ScrapeError> {
        ident::song_url_to_path(url)?;
        let html = self.fetcher.fetch(url).await?;
        azlyrics::parse_lyrics_page(&html).map_err(|e| unable_to_fetch(url, &html, e))
    }

    pub async fn fetch_artist_data(&self, url: &str) -> Result<ArtistData, ScrapeError> {
        ident::artist_url_to_key(url)?;
        let html = self.fetcher.fetch(url).await?;
        azlyrics::parse_artist_page(&html).map_err(|e| unable_to_fetch(url, &html, e))
    }
}

fn unable_to_fetch(url: &str, html: &str, error: ScrapeError) -> ScrapeError {
    tracing::error!(
        "failed to parse {}, the page may not exist or its markup changed: {}\n{}",
        url,
        error,
        snippet(html)
    );
    ScrapeError::UnableToFetch(url.to_string())
}

fn snippet(html: &str) -> &str {
    html.char_indices()
        .nth(SNIPPET_CHARS)
        .map(|(i, _)| &html[..i])
        .unwrap_or(html)
}

pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// The element with the most text. Earlier elements win ties.
pub(crate) fn longest_by_text<'a>(
    elements: impl IntoIterator<Item = ElementRef<'a>>,
) -> Option<ElementRef<'a>> {
    first_max_by_key(elements, |element| text_of(element).chars().count())
}

/// Like `Iterator::max_by_key`, except the first maximum wins. The page
/// heuristics rely on a left-to-right scan.
pub(crate) fn first_max_by_key<'a>(
    elements: impl IntoIterator<Item = ElementRef<'a>>,
    key: impl Fn(ElementRef<'a>) -> usize,
) -> Option<ElementRef<'a>> {
    let mut best: Option<(ElementRef<'a>, usize)> = None;
    for element in elements {
        let len = key(element);
        match best {
            Some((_, best_len)) if len <= best_len => {}
            _ => best = Some((element, len)),
        }
    }
    best.map(|(element, _)| element)
}
