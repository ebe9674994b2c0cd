use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::models::{
    ArtistData, ArtistSongRow, CachedArtist, RandomSongFilter, SongData, SongListing, SongRow,
};

pub async fn init_db(database_url: &str) -> Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(50)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// The persistent cache of scraped songs and artists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SongStore: Send + Sync {
    async fn find_song(&self, path: &str) -> Result<Option<SongRow>>;

    /// Insert a scraped song, overwriting every scraped field if `path` exists.
    async fn upsert_song(&self, path: &str, song: &SongData) -> Result<()>;

    async fn find_artist(&self, key: &str) -> Result<Option<CachedArtist>>;

    /// Seed the songs of a freshly scraped artist page and mark the artist's
    /// song list as updated now.
    async fn store_artist(&self, key: &str, artist: &ArtistData) -> Result<()>;

    async fn random_song_path(&self, filter: &RandomSongFilter) -> Result<Option<String>>;

    /// Returns false when no song has this path.
    async fn increment_times_played(&self, path: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Flattens an artist page into `(song, album, cover)` rows, album songs first.
/// Collected up front so no borrowing iterator is held across an `.await`.
fn seed_rows(artist: &ArtistData) -> Vec<(&SongListing, Option<&str>, Option<&str>)> {
    let album_songs = artist.albums.iter().flat_map(|album| {
        album
            .songs
            .iter()
            .map(move |song| (song, Some(album.name.as_str()), album.cover_photo_url.as_deref()))
    });
    let other_songs = artist
        .other_songs
        .iter()
        .flatten()
        .map(|song| (song, None, None));
    album_songs.chain(other_songs).collect()
}

#[async_trait]
impl SongStore for PgStore {
    async fn find_song(&self, path: &str) -> Result<Option<SongRow>> {
        let row = sqlx::query_as::<_, SongRow>(
            r#"
            SELECT path, title, artist, album, lyrics, cover_photo_url, times_played
            FROM songs
            WHERE path = $1
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert_song(&self, path: &str, song: &SongData) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO songs (path, title, artist, album, cover_photo_url, lyrics)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (path)
            DO UPDATE SET title = $2, artist = $3, album = $4, cover_photo_url = $5, lyrics = $6
            "#,
        )
        .bind(path)
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.album)
        .bind(&song.cover_photo_url)
        .bind(&song.lyrics)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_artist(&self, key: &str) -> Result<Option<CachedArtist>> {
        let artist = sqlx::query("SELECT key, last_song_list_update FROM artists WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(artist) = artist else {
            return Ok(None);
        };

        // insertion order is page order
        let songs = sqlx::query_as::<_, ArtistSongRow>(
            r#"
            SELECT path, title, artist, album, cover_photo_url
            FROM songs
            WHERE artist_key = $1
            ORDER BY id
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(CachedArtist {
            key: artist.get("key"),
            last_song_list_update: artist.get("last_song_list_update"),
            songs,
        }))
    }

    async fn store_artist(&self, key: &str, artist: &ArtistData) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            tracing::error!("Failed to begin transaction: {}", e);
            e
        })?;

        let rows = seed_rows(artist);

        // a song page scrape knows better than the listing, so existing rows stay as they are
        for (song, album, cover_photo_url) in rows {
            sqlx::query(
                r#"
                INSERT INTO songs (path, title, artist, album, cover_photo_url)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (path) DO NOTHING
                "#,
            )
            .bind(&song.path)
            .bind(&song.title)
            .bind(&artist.name)
            .bind(album)
            .bind(cover_photo_url)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert song {}: {}", song.path, e);
                e
            })?;
        }

        sqlx::query(
            r#"
            INSERT INTO artists (key, last_song_list_update)
            VALUES ($1, NOW())
            ON CONFLICT (key)
            DO UPDATE SET last_song_list_update = NOW()
            "#,
        )
        .bind(key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit transaction: {}", e);
            e
        })?;

        Ok(())
    }

    async fn random_song_path(&self, filter: &RandomSongFilter) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT path
            FROM songs
            WHERE ($1::text IS NULL OR artist_key = $1)
              AND ($2::text IS NULL OR album = $2)
            ORDER BY random()
            LIMIT 1
            "#,
        )
        .bind(&filter.artist_key)
        .bind(&filter.album)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("path")))
    }

    async fn increment_times_played(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE songs SET times_played = times_played + 1 WHERE path = $1")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
