use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod db;
pub mod ephemeral;
pub mod error;
pub mod game;
pub mod ident;
pub mod models;
pub mod ratelimit;
pub mod scrapers;
pub mod service;
pub mod session;

use config::{Config, Environment};
use db::{PgStore, SongStore};
use ephemeral::{EphemeralStore, MemoryStore};
use error::ApiError;
use game::GameService;
use models::{ArtistData, RandomGame, RandomGameSong, RandomSongFilter, SearchResult, SongData};
use ratelimit::{GovernorLimiter, RateLimiter};
use scrapers::{Fetcher, HttpFetcher, Scraper};
use service::LyricsService;
use session::{SessionSigner, SESSION_COOKIE};

const DEFAULT_LOG_FILTER: &str = "guess_lyrics_api=debug,tower_http=debug";

#[derive(Clone)]
pub struct AppState {
    lyrics: Arc<LyricsService>,
    games: Arc<GameService>,
    secure_cookies: bool,
}

impl AppState {
    pub fn new(lyrics: Arc<LyricsService>, games: Arc<GameService>) -> Self {
        Self {
            lyrics,
            games,
            secure_cookies: false,
        }
    }

    /// Mark session cookies `Secure`, for deployments served over https.
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PathBody {
    path: String,
}

async fn health_check() -> &'static str {
    "ok"
}

async fn search_songs(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let results = state
        .lyrics
        .search_songs(&params.query, params.top_n)
        .await?;
    Ok(Json(results))
}

async fn search_artists(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let results = state
        .lyrics
        .search_artists(&params.query, params.top_n)
        .await?;
    Ok(Json(results))
}

async fn get_song(
    State(state): State<AppState>,
    Path((artist, song)): Path<(String, String)>,
) -> Result<Json<SongData>, ApiError> {
    let path = format!("{}/{}", artist, song);
    Ok(Json(state.lyrics.fetch_song(&path).await?))
}

async fn get_artist(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ArtistData>, ApiError> {
    Ok(Json(state.lyrics.fetch_artist(&key).await?))
}

async fn create_random_game(
    State(state): State<AppState>,
    Json(filter): Json<RandomSongFilter>,
) -> Result<Json<RandomGame>, ApiError> {
    Ok(Json(state.games.create_random(filter).await?))
}

async fn get_random_game(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RandomGameSong>, ApiError> {
    Ok(Json(state.games.get_random(&id).await?))
}

async fn start_game_session(
    State(state): State<AppState>,
    Json(body): Json<PathBody>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.games.start_session(&body.path)?;
    let cookie = session_set_cookie(
        &token,
        state.games.session_lifetime_seconds(),
        state.secure_cookies,
    );
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]))
}

fn session_set_cookie(token: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token, max_age_seconds
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

async fn count_play(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PathBody>,
) -> Result<StatusCode, ApiError> {
    let token = session_cookie(&headers);
    state.games.confirm_play(&body.path, token.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The game session token from the request's `Cookie` headers, if any.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/songs/search", get(search_songs))
        .route("/api/artists/search", get(search_artists))
        .route("/api/songs/:artist/:song", get(get_song))
        .route("/api/artists/:key", get(get_artist))
        .route("/api/games/random", post(create_random_game))
        .route("/api/games/random/:id", get(get_random_game))
        .route("/api/games/session", post(start_game_session))
        .route("/api/games/count", post(count_play))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!("starting in {:?} mode", config.environment);

    let pool = db::init_db(&config.database_url).await?;
    tracing::info!("database initialized");
    let store: Arc<dyn SongStore> = Arc::new(PgStore::new(pool));

    let limiter: Arc<dyn RateLimiter> = Arc::new(GovernorLimiter::new());
    let ephemeral: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new(config.random_game_ttl));

    let search_fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::direct()?);
    let scrape_fetcher: Arc<dyn Fetcher> = match config.scrape_through_proxy() {
        Some(proxy_url) => {
            tracing::info!("scraping through proxy");
            Arc::new(HttpFetcher::proxied(proxy_url)?)
        }
        None => search_fetcher.clone(),
    };

    let lyrics = Arc::new(LyricsService::new(
        store.clone(),
        limiter.clone(),
        Scraper::new(scrape_fetcher),
        search_fetcher,
        config.artist_cache_ttl,
    ));
    let signer = SessionSigner::new(
        config.session_secret.as_bytes(),
        &config.session_issuer,
        config.session_expire_seconds,
        config.min_playtime_seconds,
    );
    let games = Arc::new(GameService::new(
        lyrics.clone(),
        store,
        ephemeral,
        limiter,
        signer,
        config.random_game_ttl,
    ));

    let app = build_router(
        AppState::new(lyrics, games)
            .with_secure_cookies(config.environment == Environment::Production),
    );

    tracing::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn finds_the_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; game_session=abc.def.ghi; other=1"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn no_session_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("game_session=; a=b"));
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn session_cookie_is_secure_only_when_asked() {
        let cookie = session_set_cookie("abc", 3600, false);
        assert_eq!(
            cookie,
            "game_session=abc; Max-Age=3600; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(session_set_cookie("abc", 3600, true).ends_with("; SameSite=Lax; Secure"));
    }
}
