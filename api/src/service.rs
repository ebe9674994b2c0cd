use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::SongStore;
use crate::error::{ApiError, ScrapeError};
use crate::ident;
use crate::models::{Album, ArtistData, ArtistSongRow, SearchResult, SongData, SongListing};
use crate::ratelimit::{Bucket, RateLimiter};
use crate::scrapers::duckduckgo::{self, SearchItem};
use crate::scrapers::{Fetcher, Scraper};

pub const DEFAULT_TOP_N: usize = 5;
pub const MAX_TOP_N: usize = 20;

const SONG_URL_PREFIX: &str = "https://www.azlyrics.com/lyrics/";

lazy_static! {
    static ref SONG_TITLE_BOILERPLATE: Regex = Regex::new(
        r"(?i)(\| Lyrics at AZLyrics.*)|(Lyrics \| AZLyrics.*)|(lyrics - AZLyrics.*)|(- AZLyrics.*)$"
    )
    .expect("valid boilerplate pattern");
    static ref SITE_NAME: Regex = Regex::new(r"(?i)azlyrics.*").expect("valid site name pattern");
    static ref ARTIST_TITLE_BOILERPLATE: Regex =
        Regex::new(r"[lL]yrics(\s*[-|]\s*AZLyrics)?.*$").expect("valid boilerplate pattern");
    static ref ARTIST_PAGE_URL: Regex =
        Regex::new(r"https://www\.azlyrics\.com/([a-z]|19)/[a-z0-9\-]+\.html")
            .expect("valid artist url pattern");
}

/// Song and artist lookups backed by the database, falling back to scraping.
pub struct LyricsService {
    store: Arc<dyn SongStore>,
    limiter: Arc<dyn RateLimiter>,
    scraper: Scraper,
    search_fetcher: Arc<dyn Fetcher>,
    artist_cache_ttl: chrono::Duration,
}

impl LyricsService {
    pub fn new(
        store: Arc<dyn SongStore>,
        limiter: Arc<dyn RateLimiter>,
        scraper: Scraper,
        search_fetcher: Arc<dyn Fetcher>,
        artist_cache_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            limiter,
            scraper,
            search_fetcher,
            artist_cache_ttl,
        }
    }

    pub async fn search_songs(
        &self,
        query: &str,
        top_n: Option<usize>,
    ) -> Result<Vec<SearchResult>, ApiError> {
        let items = self.search(&song_search_query(query), query, top_n).await?;
        Ok(song_results(items, top_n.unwrap_or(DEFAULT_TOP_N)))
    }

    pub async fn search_artists(
        &self,
        query: &str,
        top_n: Option<usize>,
    ) -> Result<Vec<SearchResult>, ApiError> {
        let items = self.search(&artist_search_query(query), query, top_n).await?;
        Ok(artist_results(items, top_n.unwrap_or(DEFAULT_TOP_N)))
    }

    async fn search(
        &self,
        search_query: &str,
        query: &str,
        top_n: Option<usize>,
    ) -> Result<Vec<SearchItem>, ApiError> {
        if top_n.is_some_and(|n| n > MAX_TOP_N) {
            return Err(ApiError::bad_request(format!(
                "top_n must be at most {}",
                MAX_TOP_N
            )));
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.limit(Bucket::Search)?;

        let results = duckduckgo::search(self.search_fetcher.as_ref(), search_query)
            .await
            .map_err(|e| {
                tracing::error!("search for {:?} failed: {}", search_query, e);
                ApiError::internal("Search is unavailable, try again later")
            })?;
        Ok(results.into_items())
    }

    pub async fn fetch_song(&self, path: &str) -> Result<SongData, ApiError> {
        let url = ident::path_to_song_url(path).map_err(|_| ApiError::bad_request("Invalid path"))?;
        self.limit(Bucket::Other)?;

        match self.store.find_song(path).await {
            Ok(Some(row)) => {
                if let Some(song) = row.into_song_data() {
                    tracing::debug!("returning cached song {}", path);
                    return Ok(song);
                }
                tracing::debug!("cached song {} has no lyrics, scraping", path);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to read cached song {}: {}", path, e),
        }

        self.limit(Bucket::Scrape)?;
        let song = self.scraper.fetch_song_data(&url).await.map_err(|e| {
            log_scrape_failure(&url, &e);
            ApiError::internal("Unable to fetch song data")
        })?;

        let store = self.store.clone();
        let path = path.to_string();
        let cached = song.clone();
        detach("cache song", async move {
            store.upsert_song(&path, &cached).await
        });

        Ok(song)
    }

    pub async fn fetch_artist(&self, key: &str) -> Result<ArtistData, ApiError> {
        let url = ident::key_to_artist_url(key).map_err(|_| ApiError::bad_request("Invalid key"))?;
        self.limit(Bucket::Other)?;

        match self.store.find_artist(key).await {
            Ok(Some(cached)) if cached.songs.is_empty() => {
                tracing::debug!("artist {} has no cached songs", key);
            }
            Ok(Some(cached)) if cached.is_fresh(chrono::Utc::now(), self.artist_cache_ttl) => {
                tracing::debug!("returning {} cached songs for {}", cached.songs.len(), key);
                return Ok(artist_data_from_rows(cached.songs));
            }
            Ok(Some(_)) => tracing::info!("cached song list for {} is stale", key),
            Ok(None) => {}
            Err(e) => tracing::warn!("failed to read cached artist {}: {}", key, e),
        }

        self.limit(Bucket::Scrape)?;
        let artist = self.scraper.fetch_artist_data(&url).await.map_err(|e| {
            log_scrape_failure(&url, &e);
            ApiError::internal("Unable to fetch artist data")
        })?;

        let store = self.store.clone();
        let key = key.to_string();
        let cached = artist.clone();
        detach("cache artist", async move {
            store.store_artist(&key, &cached).await
        });

        Ok(artist)
    }

    fn limit(&self, bucket: Bucket) -> Result<(), ApiError> {
        if self.limiter.allow(bucket) {
            Ok(())
        } else {
            Err(ApiError::TooManyRequests)
        }
    }
}

fn log_scrape_failure(url: &str, error: &ScrapeError) {
    tracing::error!("failed to scrape {}: {}", url, error);
}

/// Run `work` without making the request wait for it. Failures are logged
/// and go nowhere else.
pub fn detach<F>(what: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = work.await {
            tracing::warn!("{} failed: {:#}", what, e);
        }
    })
}

pub fn song_search_query(query: &str) -> String {
    format!("site:azlyrics.com {}", query.trim())
}

pub fn artist_search_query(query: &str) -> String {
    format!("site:azlyrics.com artist {} lyrics", query.trim())
}

/// Keep the song pages among `items`, at most `top_n` of them, with the
/// site boilerplate stripped from their titles.
pub fn song_results(items: Vec<SearchItem>, top_n: usize) -> Vec<SearchResult> {
    items
        .into_iter()
        .filter(|item| item.url.starts_with(SONG_URL_PREFIX))
        .take(top_n)
        .map(|item| SearchResult {
            title: clean_song_title(&item.title),
            url: item.url,
        })
        .collect()
}

pub fn artist_results(items: Vec<SearchItem>, top_n: usize) -> Vec<SearchResult> {
    items
        .into_iter()
        .filter(|item| ARTIST_PAGE_URL.is_match(&item.url))
        .take(top_n)
        .map(|item| SearchResult {
            title: clean_artist_title(&item.title),
            url: item.url,
        })
        .collect()
}

pub fn clean_song_title(title: &str) -> String {
    // order matters, the second pattern only catches what the first left behind
    let title = SONG_TITLE_BOILERPLATE.replace(title, "");
    let title = SITE_NAME.replace_all(&title, "");
    title.trim().to_string()
}

pub fn clean_artist_title(title: &str) -> String {
    ARTIST_TITLE_BOILERPLATE
        .replace(title, "")
        .trim()
        .to_string()
}

/// Rebuild artist data from cached song rows, which come in page order.
pub fn artist_data_from_rows(rows: Vec<ArtistSongRow>) -> ArtistData {
    // the most common artist name, first seen wins ties
    let mut name_counts: Vec<(String, usize)> = Vec::new();
    for artist in rows.iter().filter_map(|row| row.artist.as_deref()) {
        match name_counts.iter_mut().find(|(name, _)| name == artist) {
            Some((_, count)) => *count += 1,
            None => name_counts.push((artist.to_string(), 1)),
        }
    }
    let mut name = String::new();
    let mut best = 0;
    for (candidate, count) in name_counts {
        if count > best {
            name = candidate;
            best = count;
        }
    }

    let mut albums: Vec<Album> = Vec::new();
    let mut album_index: HashMap<String, usize> = HashMap::new();
    let mut other_songs = Vec::new();
    for row in rows {
        let listing = SongListing {
            title: row.title.unwrap_or_default(),
            path: row.path,
        };
        let Some(album) = row.album else {
            other_songs.push(listing);
            continue;
        };
        match album_index.get(&album) {
            Some(&i) => albums[i].songs.push(listing),
            None => {
                album_index.insert(album.clone(), albums.len());
                albums.push(Album {
                    name: album,
                    cover_photo_url: row.cover_photo_url,
                    songs: vec![listing],
                });
            }
        }
    }

    ArtistData {
        name,
        albums,
        other_songs: (!other_songs.is_empty()).then_some(other_songs),
    }
}
