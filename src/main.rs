use school_fees_api::cli::commands::serve::{self, ServeArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let memory = matches!(std::env::var("FEES_STORE").as_deref(), Ok("memory"));
    serve::handle(ServeArgs { memory, port: None }).await
}
