use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guess_lyrics_api::scrapers::{azlyrics, duckduckgo, Fetcher, HttpFetcher, Scraper};
use guess_lyrics_api::{ident, service};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lyricsctl")]
#[command(about = "Run the lyrics scrapers and parsers without the cache", long_about = None)]
struct Cli {
    /// Route lyrics-site requests through this proxy
    #[arg(long, global = true, env = "PROXY_URL")]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for songs, or artists with --artists
    Search {
        #[arg(value_name = "QUERY")]
        query: String,

        /// Search for artist pages instead of songs
        #[arg(long)]
        artists: bool,

        /// Number of results to keep
        #[arg(short, long, default_value_t = service::DEFAULT_TOP_N)]
        top_n: usize,

        /// Print every result the search engine returned, unfiltered
        #[arg(long)]
        raw: bool,
    },

    /// Scrape a song page
    Song {
        /// Song path, e.g. adele/hello
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Scrape an artist page
    Artist {
        /// Artist key, e.g. adele
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Parse a saved song page
    ParseSong {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Parse a saved artist page
    ParseArtist {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("lyricsctl=info,guess_lyrics_api=debug")
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            query,
            artists,
            top_n,
            raw,
        } => handle_search(&query, artists, top_n, raw).await,
        Commands::Song { path } => {
            let url = ident::path_to_song_url(&path)?;
            let song = scraper(cli.proxy.as_deref())?.fetch_song_data(&url).await?;
            print_json(&song)
        }
        Commands::Artist { key } => {
            let url = ident::key_to_artist_url(&key)?;
            let artist = scraper(cli.proxy.as_deref())?
                .fetch_artist_data(&url)
                .await?;
            print_json(&artist)
        }
        Commands::ParseSong { file } => {
            let html = read_page(&file).await?;
            print_json(&azlyrics::parse_lyrics_page(&html)?)
        }
        Commands::ParseArtist { file } => {
            let html = read_page(&file).await?;
            print_json(&azlyrics::parse_artist_page(&html)?)
        }
    }
}

async fn handle_search(query: &str, artists: bool, top_n: usize, raw: bool) -> Result<()> {
    let fetcher = HttpFetcher::direct()?;
    let search_query = if artists {
        service::artist_search_query(query)
    } else {
        service::song_search_query(query)
    };

    let results = duckduckgo::search(&fetcher, &search_query).await?;
    tracing::info!("{} results from {}", results.items().len(), results.url());

    if raw {
        return print_json(results.items());
    }

    let items = results.into_items();
    let filtered = if artists {
        service::artist_results(items, top_n)
    } else {
        service::song_results(items, top_n)
    };
    if filtered.is_empty() {
        println!("no matching pages found");
        return Ok(());
    }
    print_json(&filtered)
}

fn scraper(proxy: Option<&str>) -> Result<Scraper> {
    let fetcher: Arc<dyn Fetcher> = match proxy {
        Some(proxy_url) => Arc::new(HttpFetcher::proxied(proxy_url)?),
        None => Arc::new(HttpFetcher::direct()?),
    };
    Ok(Scraper::new(fetcher))
}

async fn read_page(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
