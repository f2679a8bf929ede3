use std::{io, time::Duration};

use actix_web::{middleware, web, App, HttpServer};
use diesel::{prelude::*, r2d2};
use log::info;

mod actions;
mod admission;
mod auth;
mod catalog;
mod config;
mod error;
mod identity;
mod lottery;
mod models;
mod routes;
mod schema;
mod selection;

use auth::AdminSessions;
use catalog::Catalog;
use config::Config;
use error::ServiceError;

pub type DbPool = r2d2::Pool<r2d2::ConnectionManager<PgConnection>>;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(io::Error::other)?;
    let catalog = Catalog::load(&config.data_dir).map_err(io::Error::other)?;

    // initialize DB pool outside of `HttpServer::new` so that it is shared across all workers
    let pool = initialize_db_pool(&config)?;

    // Slot rows are what reservations lock on, so they must exist before serving
    let synced = web::block({
        let pool = pool.clone();
        let catalog = catalog.clone();
        move || {
            let mut conn = pool.get()?;
            actions::sync_event_slots(&mut conn, &catalog)
        }
    })
    .await
    .map_err(ServiceError::from)
    .and_then(|result| result)
    .map_err(io::Error::other)?;
    info!("synchronized {synced} event slots from the catalog");

    let sessions = web::Data::new(AdminSessions::new(config.admin_session_ttl));

    let purge = sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purge.purge_expired();
            if purged > 0 {
                info!("purged {purged} expired admin sessions");
            }
        }
    });

    let bind_addr = (config.host.clone(), config.port);
    let pool = web::Data::new(pool);
    let catalog = web::Data::new(catalog);
    let config = web::Data::new(config);

    info!("starting HTTP server at http://{}:{}", bind_addr.0, bind_addr.1);

    HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(catalog.clone())
            .app_data(config.clone())
            .app_data(sessions.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}

fn initialize_db_pool(config: &Config) -> io::Result<DbPool> {
    let manager = r2d2::ConnectionManager::<PgConnection>::new(&config.database_url);
    r2d2::Pool::builder()
        .max_size(config.pool_size)
        .build(manager)
        .map_err(io::Error::other)
}
