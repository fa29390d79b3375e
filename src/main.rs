mod engine;
mod history;
mod model;
mod runner;
mod theme;
mod tui;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = model::RunConfig::load_or_default(model::CONFIG_FILE);
    tui::run(cfg).await
}
