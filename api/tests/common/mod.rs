#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use guess_lyrics_api::db::SongStore;
use guess_lyrics_api::error::ScrapeError;
use guess_lyrics_api::ephemeral::MemoryStore;
use guess_lyrics_api::game::GameService;
use guess_lyrics_api::models::{
    ArtistData, ArtistSongRow, CachedArtist, RandomSongFilter, SongData, SongRow,
};
use guess_lyrics_api::ratelimit::{Bucket, RateLimiter};
use guess_lyrics_api::scrapers::{duckduckgo, Fetcher, Scraper};
use guess_lyrics_api::service::LyricsService;
use guess_lyrics_api::session::SessionSigner;

pub const HELLO_URL: &str = "https://www.azlyrics.com/lyrics/adele/hello.html";
pub const ADELE_URL: &str = "https://www.azlyrics.com/a/adele.html";

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {}", path, e))
}

pub fn hello() -> SongData {
    SongData {
        title: "Hello".to_string(),
        artist: "Adele".to_string(),
        album: Some("25".to_string()),
        cover_photo_url: None,
        lyrics: "Hello, it's me".to_string(),
    }
}

/// A write the service handed to the store, sent as soon as it is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Song(String),
    Artist(String),
}

struct StoredArtist {
    last_song_list_update: Option<DateTime<Utc>>,
}

/// In-memory `SongStore` that reports every write over a channel, so tests
/// can wait for the detached cache fill.
pub struct FakeStore {
    songs: Mutex<Vec<SongRow>>,
    artists: Mutex<HashMap<String, StoredArtist>>,
    writes: mpsc::UnboundedSender<Write>,
    fail_writes: bool,
    fail_reads: bool,
    upserts: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Write>) {
        let (writes, rx) = mpsc::unbounded_channel();
        let store = Self {
            songs: Mutex::new(Vec::new()),
            artists: Mutex::new(HashMap::new()),
            writes,
            fail_writes: false,
            fail_reads: false,
            upserts: AtomicUsize::new(0),
        };
        (store, rx)
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn with_song(self, path: &str, song: Option<SongData>) -> Self {
        let row = match song {
            Some(song) => SongRow {
                path: path.to_string(),
                title: Some(song.title),
                artist: Some(song.artist),
                album: song.album,
                lyrics: Some(song.lyrics),
                cover_photo_url: song.cover_photo_url,
                times_played: 0,
            },
            None => SongRow {
                path: path.to_string(),
                title: Some("Listed only".to_string()),
                artist: None,
                album: None,
                lyrics: None,
                cover_photo_url: None,
                times_played: 0,
            },
        };
        self.songs.lock().unwrap().push(row);
        self
    }

    pub fn with_artist(self, key: &str, last_song_list_update: Option<DateTime<Utc>>) -> Self {
        self.artists.lock().unwrap().insert(
            key.to_string(),
            StoredArtist {
                last_song_list_update,
            },
        );
        self
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn song(&self, path: &str) -> Option<SongRow> {
        self.songs
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.path == path)
            .cloned()
    }

    pub fn times_played(&self, path: &str) -> Option<i32> {
        self.song(path).map(|row| row.times_played)
    }

    fn insert_listing(&self, path: &str, title: &str, artist: &str, album: Option<&str>, cover: Option<&str>) {
        let mut songs = self.songs.lock().unwrap();
        if songs.iter().any(|row| row.path == path) {
            return;
        }
        songs.push(SongRow {
            path: path.to_string(),
            title: Some(title.to_string()),
            artist: Some(artist.to_string()),
            album: album.map(str::to_string),
            lyrics: None,
            cover_photo_url: cover.map(str::to_string),
            times_played: 0,
        });
    }
}

/// Reports a write when dropped, after the store has applied it.
struct Written<'a>(&'a mpsc::UnboundedSender<Write>, Write);

impl Drop for Written<'_> {
    fn drop(&mut self) {
        let _ = self.0.send(self.1.clone());
    }
}

fn artist_key(path: &str) -> &str {
    path.split('/').next().unwrap_or_default()
}

#[async_trait]
impl SongStore for FakeStore {
    async fn find_song(&self, path: &str) -> Result<Option<SongRow>> {
        if self.fail_reads {
            return Err(anyhow!("connection reset"));
        }
        Ok(self.song(path))
    }

    async fn upsert_song(&self, path: &str, song: &SongData) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let _written = Written(&self.writes, Write::Song(path.to_string()));
        if self.fail_writes {
            return Err(anyhow!("disk full"));
        }

        let mut songs = self.songs.lock().unwrap();
        let times_played = songs
            .iter()
            .find(|row| row.path == path)
            .map(|row| row.times_played)
            .unwrap_or(0);
        songs.retain(|row| row.path != path);
        songs.push(SongRow {
            path: path.to_string(),
            title: Some(song.title.clone()),
            artist: Some(song.artist.clone()),
            album: song.album.clone(),
            lyrics: Some(song.lyrics.clone()),
            cover_photo_url: song.cover_photo_url.clone(),
            times_played,
        });
        Ok(())
    }

    async fn find_artist(&self, key: &str) -> Result<Option<CachedArtist>> {
        if self.fail_reads {
            return Err(anyhow!("connection reset"));
        }
        let artists = self.artists.lock().unwrap();
        let Some(artist) = artists.get(key) else {
            return Ok(None);
        };
        let songs = self
            .songs
            .lock()
            .unwrap()
            .iter()
            .filter(|row| artist_key(&row.path) == key)
            .map(|row| ArtistSongRow {
                path: row.path.clone(),
                title: row.title.clone(),
                artist: row.artist.clone(),
                album: row.album.clone(),
                cover_photo_url: row.cover_photo_url.clone(),
            })
            .collect();
        Ok(Some(CachedArtist {
            key: key.to_string(),
            last_song_list_update: artist.last_song_list_update,
            songs,
        }))
    }

    async fn store_artist(&self, key: &str, artist: &ArtistData) -> Result<()> {
        let _written = Written(&self.writes, Write::Artist(key.to_string()));
        if self.fail_writes {
            return Err(anyhow!("disk full"));
        }

        for album in &artist.albums {
            for song in &album.songs {
                self.insert_listing(
                    &song.path,
                    &song.title,
                    &artist.name,
                    Some(&album.name),
                    album.cover_photo_url.as_deref(),
                );
            }
        }
        for song in artist.other_songs.iter().flatten() {
            self.insert_listing(&song.path, &song.title, &artist.name, None, None);
        }
        self.artists.lock().unwrap().insert(
            key.to_string(),
            StoredArtist {
                last_song_list_update: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn random_song_path(&self, filter: &RandomSongFilter) -> Result<Option<String>> {
        Ok(self
            .songs
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                filter
                    .artist_key
                    .as_deref()
                    .map_or(true, |key| artist_key(&row.path) == key)
            })
            .filter(|row| {
                filter
                    .album
                    .as_deref()
                    .map_or(true, |album| row.album.as_deref() == Some(album))
            })
            .map(|row| row.path.clone())
            .next())
    }

    async fn increment_times_played(&self, path: &str) -> Result<bool> {
        let mut songs = self.songs.lock().unwrap();
        match songs.iter_mut().find(|row| row.path == path) {
            Some(row) => {
                row.times_played += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Serves canned pages by URL and counts every request.
#[derive(Default)]
pub struct FakeFetcher {
    pages: HashMap<String, String>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: String) -> Self {
        self.pages.insert(url.to_string(), html);
        self
    }

    pub fn search_page(self, query: &str, html: String) -> Self {
        let url = duckduckgo::search_url(query).expect("valid search url");
        self.page(&url, html)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ScrapeError::FetchFailure {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

/// Allows everything except the buckets it was told to deny, and records
/// what was asked for.
#[derive(Default)]
pub struct ScriptedLimiter {
    denied: Vec<Bucket>,
    asked: Mutex<Vec<Bucket>>,
}

impl ScriptedLimiter {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny(buckets: &[Bucket]) -> Self {
        Self {
            denied: buckets.to_vec(),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<Bucket> {
        self.asked.lock().unwrap().clone()
    }
}

impl RateLimiter for ScriptedLimiter {
    fn allow(&self, bucket: Bucket) -> bool {
        self.asked.lock().unwrap().push(bucket);
        !self.denied.contains(&bucket)
    }
}

pub fn lyrics_service(
    store: Arc<FakeStore>,
    limiter: Arc<ScriptedLimiter>,
    fetcher: Arc<FakeFetcher>,
) -> LyricsService {
    LyricsService::new(
        store,
        limiter,
        Scraper::new(fetcher.clone()),
        fetcher,
        chrono::Duration::days(90),
    )
}

/// Waits for the next write the store saw, failing the test if the detached
/// fill never arrives.
pub async fn next_write(rx: &mut mpsc::UnboundedReceiver<Write>) -> Write {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("cache fill timed out")
        .expect("store dropped")
}

pub fn song_paths(artist: &ArtistData) -> Vec<String> {
    artist
        .albums
        .iter()
        .flat_map(|album| album.songs.iter())
        .chain(artist.other_songs.iter().flatten())
        .map(|song| song.path.clone())
        .collect()
}

pub const SESSION_SECRET: &[u8] = b"integration-test-session-secret";

pub fn game_service(
    lyrics: Arc<LyricsService>,
    store: Arc<FakeStore>,
    limiter: Arc<ScriptedLimiter>,
    min_playtime_seconds: i64,
) -> GameService {
    GameService::new(
        lyrics,
        store,
        Arc::new(MemoryStore::new(Duration::from_secs(60 * 60))),
        limiter,
        SessionSigner::new(SESSION_SECRET, "guess-the-lyrics", 3600, min_playtime_seconds),
        Duration::from_secs(60 * 60),
    )
}
