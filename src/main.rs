use std::sync::Arc;

use tracing::{error, info};

use stowage::account::AccountRepository;
use stowage::web::WebServer;
use stowage::{Config, Database, FileStorage};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() {
    let config = match Config::load_with_env(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Err(e) = stowage::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        stowage::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> stowage::Result<()> {
    config.validate()?;

    info!("stowage - resumable file store");

    let db = Database::open_with_pool_size(&config.database.path, config.database.max_connections)
        .await?;
    info!("Database opened at {}", config.database.path);

    let seeded = AccountRepository::new(db.pool())
        .seed(&config.accounts)
        .await?;
    info!("Seeded {} storage account(s)", seeded);

    let storage = FileStorage::new(&config.storage.path)?;
    info!("Blob storage at {}", config.storage.path);

    let server = WebServer::new(&config, Arc::new(db), Arc::new(storage))?;
    server.run().await?;
    Ok(())
}
