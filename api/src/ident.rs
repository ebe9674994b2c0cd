//! Mapping between AZLyrics URLs and the identifiers we store.
//!
//! Songs are keyed by their two-segment slug (`artist/song`), artists by the
//! single-segment key. Everything coming from the outside world passes through
//! here before it is interpolated into a URL, so the grammars are strict.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

pub const SITE_ORIGIN: &str = "https://www.azlyrics.com";

lazy_static! {
    static ref SONG_URL: Regex =
        Regex::new(r"^https://www\.azlyrics\.com/lyrics/([a-z0-9\-]+/[a-z0-9\-]+)\.html$")
            .expect("valid song url pattern");
    static ref ARTIST_URL: Regex =
        Regex::new(r"^https://www\.azlyrics\.com/([a-z]|19)/([a-z0-9\-]+)\.html$")
            .expect("valid artist url pattern");
    static ref SONG_PATH: Regex =
        Regex::new(r"^[a-z0-9\-]+/[a-z0-9\-]+$").expect("valid song path pattern");
    static ref ARTIST_KEY: Regex = Regex::new(r"^[a-z0-9\-]+$").expect("valid artist key pattern");
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid artist key: {0}")]
    InvalidKey(String),
}

pub fn song_url_to_path(url: &str) -> Result<String, IdentError> {
    SONG_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| IdentError::InvalidUrl(url.to_string()))
}

pub fn path_to_song_url(path: &str) -> Result<String, IdentError> {
    validate_path(path)?;
    Ok(format!("{}/lyrics/{}.html", SITE_ORIGIN, path))
}

pub fn artist_url_to_key(url: &str) -> Result<String, IdentError> {
    let caps = ARTIST_URL
        .captures(url)
        .ok_or_else(|| IdentError::InvalidUrl(url.to_string()))?;
    let key = &caps[2];

    // the directory segment is a function of the key, so a mismatch is not a real page
    if artist_prefix(key) != Some(&caps[1]) {
        return Err(IdentError::InvalidUrl(url.to_string()));
    }

    Ok(key.to_string())
}

pub fn key_to_artist_url(key: &str) -> Result<String, IdentError> {
    validate_key(key)?;
    let prefix = artist_prefix(key).ok_or_else(|| IdentError::InvalidKey(key.to_string()))?;
    Ok(format!("{}/{}/{}.html", SITE_ORIGIN, prefix, key))
}

pub fn validate_path(path: &str) -> Result<(), IdentError> {
    if SONG_PATH.is_match(path) {
        Ok(())
    } else {
        Err(IdentError::InvalidPath(path.to_string()))
    }
}

pub fn validate_key(key: &str) -> Result<(), IdentError> {
    if ARTIST_KEY.is_match(key) {
        Ok(())
    } else {
        Err(IdentError::InvalidKey(key.to_string()))
    }
}

/// Directory segment AZLyrics files an artist page under: `19` for keys
/// starting with a digit, the first letter otherwise. Keys starting with
/// anything else have no artist page.
fn artist_prefix(key: &str) -> Option<&str> {
    let first = key.chars().next()?;
    if first.is_ascii_digit() {
        Some("19")
    } else if first.is_ascii_lowercase() {
        Some(&key[..1])
    } else {
        None
    }
}
