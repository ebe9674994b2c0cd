use std::sync::Arc;
use std::time::Duration;

use crate::db::SongStore;
use crate::ephemeral::EphemeralStore;
use crate::error::ApiError;
use crate::ident;
use crate::models::{RandomGame, RandomGameSong, RandomSongFilter};
use crate::ratelimit::{Bucket, RateLimiter};
use crate::service::LyricsService;
use crate::session::{SessionError, SessionSigner, VerifiedSession};

const RANDOM_GAME_PREFIX: &str = "randomGameID";

fn random_game_key(id: &str) -> String {
    format!("{}:{}", RANDOM_GAME_PREFIX, id)
}

/// Random games and the play sessions that gate the play counter.
pub struct GameService {
    lyrics: Arc<LyricsService>,
    store: Arc<dyn SongStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    limiter: Arc<dyn RateLimiter>,
    signer: SessionSigner,
    random_game_ttl: Duration,
}

impl GameService {
    pub fn new(
        lyrics: Arc<LyricsService>,
        store: Arc<dyn SongStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        limiter: Arc<dyn RateLimiter>,
        signer: SessionSigner,
        random_game_ttl: Duration,
    ) -> Self {
        Self {
            lyrics,
            store,
            ephemeral,
            limiter,
            signer,
            random_game_ttl,
        }
    }

    pub fn session_lifetime_seconds(&self) -> i64 {
        self.signer.lifetime_seconds()
    }

    pub async fn create_random(&self, filter: RandomSongFilter) -> Result<RandomGame, ApiError> {
        if !self.limiter.allow(Bucket::Other) {
            return Err(ApiError::TooManyRequests);
        }

        match (&filter.artist_key, &filter.album) {
            (None, Some(_)) => {
                return Err(ApiError::bad_request("An album needs an artist key"));
            }
            (Some(key), _) => {
                ident::validate_key(key).map_err(|_| ApiError::bad_request("Invalid key"))?;
            }
            (None, None) => {}
        }

        let path = self
            .store
            .random_song_path(&filter)
            .await
            .map_err(|e| {
                tracing::error!("failed to pick a random song for {:?}: {}", filter, e);
                ApiError::internal("Unable to pick a random song")
            })?
            .ok_or_else(|| ApiError::bad_request("No song found"))?;

        let random_game_id = uuid::Uuid::new_v4().simple().to_string();
        self.ephemeral
            .set(&random_game_key(&random_game_id), &path, self.random_game_ttl)
            .await
            .map_err(|e| {
                tracing::error!("failed to store random game {}: {}", random_game_id, e);
                ApiError::internal("Unable to create game")
            })?;

        tracing::info!("random game {} -> {}", random_game_id, path);
        Ok(RandomGame { random_game_id })
    }

    pub async fn get_random(&self, random_game_id: &str) -> Result<RandomGameSong, ApiError> {
        let path = self
            .ephemeral
            .get(&random_game_key(random_game_id))
            .await
            .map_err(|e| {
                tracing::error!("failed to read random game {}: {}", random_game_id, e);
                ApiError::internal("Unable to read game")
            })?
            .ok_or_else(|| ApiError::bad_request("Invalid randomGameID"))?;

        let song = self.lyrics.fetch_song(&path).await?;
        Ok(RandomGameSong { song, path })
    }

    /// Mint the session token for a game of `path`.
    pub fn start_session(&self, path: &str) -> Result<String, ApiError> {
        ident::validate_path(path).map_err(|_| ApiError::bad_request("Invalid path"))?;
        self.signer.issue(path).map_err(|e| {
            tracing::error!("failed to sign game session: {}", e);
            ApiError::internal("Unable to start game session")
        })
    }

    /// Count a play of `path` if `token` proves a long enough session for it.
    pub async fn confirm_play(&self, path: &str, token: Option<&str>) -> Result<(), ApiError> {
        ident::validate_path(path).map_err(|_| ApiError::bad_request("Invalid path"))?;
        let VerifiedSession { issued_at } = self.verify(path, token)?;

        match self.store.increment_times_played(path).await {
            Ok(true) => {
                tracing::debug!("counted play of {} (session from {})", path, issued_at);
                Ok(())
            }
            Ok(false) => Err(ApiError::bad_request("Invalid path")),
            Err(e) => {
                tracing::error!("failed to count play of {}: {}", path, e);
                Err(ApiError::internal("Unable to count play"))
            }
        }
    }

    fn verify(&self, path: &str, token: Option<&str>) -> Result<VerifiedSession, ApiError> {
        let token = token.ok_or(SessionError::NoSession);
        token
            .and_then(|token| self.signer.verify(token, path))
            .map_err(|e| {
                tracing::debug!("rejected game session for {}: {}", path, e);
                ApiError::bad_request(e.to_string())
            })
    }
}
