use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod media;
mod store;

use config::Config;
use dbus_interface::AccessService;
use media::DirMediaStore;
use store::{SqliteAccessLog, SqliteGallery};

const BUS_NAME: &str = "org.vigil.Access1";
const OBJECT_PATH: &str = "/org/vigil/Access1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = Arc::new(Config::load().context("failed to load configuration")?);

    let conn = store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "database opened");

    let gallery = Arc::new(SqliteGallery::new(Arc::clone(&conn)));
    let access_log = Arc::new(SqliteAccessLog::new(conn));
    let media = Arc::new(DirMediaStore::new(&config.media_dir));

    let pipeline = engine::load_pipeline(
        &config,
        gallery.clone(),
        access_log.clone(),
        media.clone(),
    )
    .context("failed to load detection model")?;
    let engine = engine::spawn_engine(pipeline)?;

    let service = AccessService::new(engine, gallery, access_log, media, Arc::clone(&config));
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the bus"))?;

    tracing::info!(
        bus = if config.session_bus { "session" } else { "system" },
        name = BUS_NAME,
        "vigild ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("vigild shutting down");

    Ok(())
}
