use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

pub const ARTIST_CACHE_TTL_DAYS: i64 = 90;
pub const RANDOM_GAME_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);
pub const MIN_PLAYTIME_SECONDS: i64 = 30;
pub const SESSION_EXPIRE_SECONDS: i64 = 60 * 60;

const ARTIST_CACHE_TTL_DAYS_RANGE: RangeInclusive<i64> = 1..=3650;
const MIN_PLAYTIME_SECONDS_RANGE: RangeInclusive<i64> = 0..=60 * 60 * 24;
const SESSION_EXPIRE_SECONDS_RANGE: RangeInclusive<i64> = 1..=60 * 60 * 24 * 30;

const DEV_SESSION_SECRET: &str = "insecure-development-session-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(anyhow!("unknown APP_ENV {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub proxy_url: Option<String>,
    pub session_secret: String,
    pub session_issuer: String,
    pub artist_cache_ttl: chrono::Duration,
    pub min_playtime_seconds: i64,
    pub session_expire_seconds: i64,
    pub random_game_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let env_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let environment = Environment::parse(&env_or("APP_ENV", "development"))?;
        let production = environment == Environment::Production;

        let proxy_url = var("PROXY_URL");
        if production && proxy_url.is_none() {
            return Err(anyhow!("PROXY_URL must be set in production"));
        }

        let session_secret = match var("SESSION_SECRET") {
            Some(secret) => secret,
            None if production => return Err(anyhow!("SESSION_SECRET must be set in production")),
            None => {
                tracing::warn!("SESSION_SECRET not set, using an insecure development secret");
                DEV_SESSION_SECRET.to_string()
            }
        };

        let artist_cache_ttl_days = parse_in(
            &var,
            "ARTIST_CACHE_TTL_DAYS",
            ARTIST_CACHE_TTL_DAYS,
            ARTIST_CACHE_TTL_DAYS_RANGE,
        )?;
        let artist_cache_ttl = chrono::Duration::try_days(artist_cache_ttl_days)
            .ok_or_else(|| anyhow!("ARTIST_CACHE_TTL_DAYS out of range"))?;
        let min_playtime_seconds = parse_in(
            &var,
            "MIN_PLAYTIME_SECONDS",
            MIN_PLAYTIME_SECONDS,
            MIN_PLAYTIME_SECONDS_RANGE,
        )?;
        let session_expire_seconds = parse_in(
            &var,
            "SESSION_EXPIRE_SECONDS",
            SESSION_EXPIRE_SECONDS,
            SESSION_EXPIRE_SECONDS_RANGE,
        )?;
        if min_playtime_seconds >= session_expire_seconds {
            return Err(anyhow!(
                "MIN_PLAYTIME_SECONDS ({}) must be below SESSION_EXPIRE_SECONDS ({})",
                min_playtime_seconds,
                session_expire_seconds
            ));
        }

        Ok(Self {
            environment,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3001")
                .parse()
                .context("invalid BIND_ADDR")?,
            database_url: env_or("DATABASE_URL", "postgresql://localhost/guess_lyrics"),
            proxy_url,
            session_secret,
            session_issuer: env_or("SESSION_ISSUER", "guess-the-lyrics"),
            artist_cache_ttl,
            min_playtime_seconds,
            session_expire_seconds,
            random_game_ttl: RANDOM_GAME_TTL,
        })
    }

    /// Lyrics-site scrapes go through the proxy in production.
    pub fn scrape_through_proxy(&self) -> Option<&str> {
        match self.environment {
            Environment::Production => self.proxy_url.as_deref(),
            _ => None,
        }
    }
}

fn parse_in(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: i64,
    range: RangeInclusive<i64>,
) -> Result<i64> {
    let value = match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", key, value))?,
        None => default,
    };
    if !range.contains(&value) {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            key,
            range.start(),
            range.end(),
            value
        ));
    }
    Ok(value)
}
