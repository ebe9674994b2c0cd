use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Everything a song page gives us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongData {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub cover_photo_url: Option<String>,
    pub lyrics: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongListing {
    pub title: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_photo_url: Option<String>,
    pub songs: Vec<SongListing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistData {
    pub name: String,
    pub albums: Vec<Album>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_songs: Option<Vec<SongListing>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomGame {
    pub random_game_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomGameSong {
    #[serde(flatten)]
    pub song: SongData,
    pub path: String,
}

/// A `songs` row as read back for the song cache.
#[derive(Debug, Clone, FromRow)]
pub struct SongRow {
    pub path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub lyrics: Option<String>,
    pub cover_photo_url: Option<String>,
    pub times_played: i32,
}

impl SongRow {
    /// Rows seeded from an artist listing have no lyrics yet and don't count.
    pub fn into_song_data(self) -> Option<SongData> {
        let lyrics = self.lyrics.filter(|l| !l.is_empty())?;
        Some(SongData {
            title: self.title.unwrap_or_default(),
            artist: self.artist.unwrap_or_default(),
            album: self.album,
            cover_photo_url: self.cover_photo_url,
            lyrics,
        })
    }
}

/// A `songs` row as read back for an artist's song list.
#[derive(Debug, Clone, FromRow)]
pub struct ArtistSongRow {
    pub path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub cover_photo_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CachedArtist {
    pub key: String,
    pub last_song_list_update: Option<DateTime<Utc>>,
    pub songs: Vec<ArtistSongRow>,
}

impl CachedArtist {
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Some(updated) = self.last_song_list_update else {
            return false;
        };
        // a ttl reaching past the start of time never goes stale
        match now.checked_sub_signed(ttl) {
            Some(stale_before) => updated > stale_before,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RandomSongFilter {
    pub artist_key: Option<String>,
    pub album: Option<String>,
}
