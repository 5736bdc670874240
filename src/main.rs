use setuhub_db_admin::config::AppConfig;
use setuhub_db_admin::run_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("mongodb", log::LevelFilter::Warn)
        .init();

    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={} backend={:?} database={}",
        config.server_address(),
        config.database.backend,
        config.database.name
    );

    run_server(config).await
}
