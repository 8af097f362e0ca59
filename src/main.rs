mod auth;
mod config;
mod db;
mod error;
mod flash;
mod forms;
mod models;
mod pagination;
mod routes;
mod state;
mod store;
mod templates;
mod uploads;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};

use crate::{config::AppConfig, state::AppState, store::SqliteStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = AppConfig::from_env()?;
    std::fs::create_dir_all(&config.media_root)?;

    let pool = db::connect(&config).await?;
    db::run_migrations(&pool).await?;

    let store = SqliteStore::new(pool);
    db::seed_defaults(&store, &config).await?;

    let state = AppState::new(Arc::new(store), config.media_root.clone());
    let address = config.bind_address();
    log::info!("Starting Agenda on http://{address}");

    let static_root = config.static_root.clone();
    let media_root = config.media_root.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", &static_root).prefer_utf8(true))
            .service(Files::new("/media", &media_root))
            .configure(routes::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
