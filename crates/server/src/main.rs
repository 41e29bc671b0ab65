// crates/server/src/main.rs
//! Redraft server binary.
//!
//! Opens the database, recovers jobs interrupted by the previous run,
//! starts the stale-job watchdog, then binds the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use redraft_db::Database;
use redraft_server::jobs::{DirFileSource, HttpRefiner};
use redraft_server::{create_app, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env();

    eprintln!("\n\u{270d} redraft v{}\n", env!("CARGO_PKG_VERSION"));

    // Step 1: Open database
    let db = match &config.db_path {
        Some(path) => Database::new(path).await?,
        None => Database::open_default().await?,
    };

    // Step 2: Wire the orchestration stack
    let refiner = Arc::new(HttpRefiner::new(
        config.refiner_url.clone(),
        config.pass_timeout,
    ));
    let file_source = Arc::new(DirFileSource::new(config.content_dir.clone()));
    let state = AppState::new(db, refiner, file_source, config.clone());

    // Step 3: Resume jobs the previous process left behind
    state.orchestrator.recover().await?;

    // Step 4: Periodic sweep for orphaned processing jobs
    state.orchestrator.start_watchdog();

    // Step 5: Bind and serve
    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "redraft listening");
    eprintln!("  Ready on http://{addr}\n");

    axum::serve(listener, app).await?;
    Ok(())
}
