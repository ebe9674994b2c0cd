#[tokio::main]
async fn main() -> anyhow::Result<()> {
    guess_lyrics_api::run().await
}
