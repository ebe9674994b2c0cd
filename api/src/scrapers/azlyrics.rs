//! Parsers for AZLyrics song and artist pages.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};

use super::{longest_by_text, text_of};
use crate::error::ScrapeError;
use crate::ident::SITE_ORIGIN;
use crate::models::{Album, ArtistData, SongData, SongListing};

/// Album marker AZLyrics uses for tracks that belong to no album.
pub const OTHER_SONGS: &str = "other songs";

lazy_static! {
    static ref H1: Selector = Selector::parse("h1").expect("valid selector");
    static ref ARTIST_HEADING: Selector = Selector::parse("h2 b").expect("valid selector");
    static ref UNLABELLED_DIV: Selector =
        Selector::parse("div:not([class]):not([id])").expect("valid selector");
    static ref SONG_IN_ALBUM: Selector =
        Selector::parse(".songinalbum_title").expect("valid selector");
    static ref ALBUM_IMAGE: Selector = Selector::parse(".album-image").expect("valid selector");
    static ref BOLD: Selector = Selector::parse("b").expect("valid selector");
    static ref IMG: Selector = Selector::parse("img").expect("valid selector");
    static ref ANCHOR: Selector = Selector::parse("a").expect("valid selector");
    static ref ARTIST_NAME: Selector = Selector::parse("h1 > strong").expect("valid selector");
    static ref ALBUM_LIST: Selector = Selector::parse("#listAlbum").expect("valid selector");
    static ref ALBUM_OR_SONG: Selector =
        Selector::parse("div.listalbum-item, div.album").expect("valid selector");
    static ref ANNOTATION: Regex = Regex::new(r"\[.*\]").expect("valid annotation pattern");
    static ref TRAILING_LYRICS: Regex =
        Regex::new(r"(?i)\s*lyrics\s*$").expect("valid trailing lyrics pattern");
    static ref QUOTED: Regex = Regex::new(r#"^"(.+)"$"#).expect("valid quoted pattern");
    static ref SONG_HREF: Regex =
        Regex::new(r"/lyrics/([a-z0-9\-]+/[a-z0-9\-]+)\.html").expect("valid song href pattern");
}

pub fn parse_lyrics_page(html: &str) -> Result<SongData, ScrapeError> {
    let document = Html::parse_document(html);

    // a lyrics page has exactly one h1, listings and redirects have more
    let headings: Vec<_> = document.select(&H1).collect();
    if headings.len() > 1 {
        return Err(ScrapeError::parse(format!(
            "found {} h1 elements, not a lyrics page",
            headings.len()
        )));
    }
    let heading = headings
        .first()
        .ok_or_else(|| ScrapeError::parse("no h1 element found"))?;

    let title = text_of(*heading).trim().replace('"', "");
    let title = title.strip_suffix(" lyrics").unwrap_or(&title).to_string();

    let artist = document
        .select(&ARTIST_HEADING)
        .next()
        .map(text_of)
        .unwrap_or_default();
    let artist = artist.trim();
    let artist = artist.strip_suffix(" Lyrics").unwrap_or(artist).to_string();

    let lyrics_div = longest_by_text(document.select(&UNLABELLED_DIV))
        .ok_or_else(|| ScrapeError::parse("no unlabelled divs found"))?;
    let lyrics = ANNOTATION
        .replace_all(&text_of(lyrics_div), "")
        .trim()
        .to_string();

    let (album, cover_photo_url) = match document.select(&SONG_IN_ALBUM).next() {
        Some(album_element) => {
            let album = album_element
                .select(&BOLD)
                .next()
                .map(text_of)
                .unwrap_or_default()
                .replace('"', "");
            let cover = album_element
                .select(&ALBUM_IMAGE)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(absolute_url);
            (Some(album), cover)
        }
        None => (None, None),
    };

    Ok(SongData {
        title,
        artist,
        album,
        cover_photo_url,
        lyrics,
    })
}

pub fn parse_artist_page(html: &str) -> Result<ArtistData, ScrapeError> {
    let document = Html::parse_document(html);

    let name = document
        .select(&ARTIST_NAME)
        .next()
        .map(text_of)
        .unwrap_or_default();
    let name = TRAILING_LYRICS.replace(&name, "").trim().to_string();

    let album_list = document
        .select(&ALBUM_LIST)
        .next()
        .ok_or_else(|| ScrapeError::parse("failed to find album list"))?;

    let mut albums = Vec::new();
    let mut current = Album {
        name: String::new(),
        cover_photo_url: None,
        songs: Vec::new(),
    };

    for element in album_list.select(&ALBUM_OR_SONG) {
        if element.value().classes().any(|class| class == "album") {
            let next = Album {
                name: album_name(&element.select(&BOLD).next().map(text_of).unwrap_or_default()),
                cover_photo_url: element
                    .select(&IMG)
                    .next()
                    .and_then(|img| img.value().attr("src"))
                    .and_then(absolute_url),
                songs: Vec::new(),
            };
            let previous = std::mem::replace(&mut current, next);
            if !previous.name.is_empty() {
                albums.push(previous);
            }
            continue;
        }

        let Some(anchor) = element.select(&ANCHOR).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default().trim();
        // links into another artist's catalog don't carry a slug of their own
        let Some(path) = SONG_HREF.captures(href).map(|caps| caps[1].to_string()) else {
            continue;
        };
        current.songs.push(SongListing {
            title: text_of(anchor).trim().to_string(),
            path,
        });
    }

    let mut other_songs = None;
    if current.name == OTHER_SONGS {
        other_songs = Some(current.songs);
    } else if !current.name.is_empty() || !current.songs.is_empty() {
        albums.push(current);
    }

    Ok(ArtistData {
        name,
        albums,
        other_songs,
    })
}

fn album_name(raw: &str) -> String {
    let name = raw.trim();
    let name = name.strip_suffix(':').unwrap_or(name).trim();
    QUOTED.replace(name, "$1").trim().to_string()
}

fn absolute_url(src: &str) -> Option<String> {
    let origin = Url::parse(SITE_ORIGIN).ok()?;
    origin.join(src.trim()).ok().map(|url| url.to_string())
}
