//! Cloudburst Early Warning System (CEWS)
//!
//! Backend for a distributed environmental-sensor network dashboard:
//! node registry, live status, alerting with SMS fan-out, and a
//! CSV-backed cloudburst prediction feed.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod alerts;
mod config;
mod error;
mod handlers;
mod history;
mod models;
mod prediction;
mod simulator;
mod sms;
mod status;
mod store;
mod validation;
mod websocket;

use crate::config::Settings;
use crate::simulator::SensorSimulator;
use crate::sms::SmsDispatcher;
use crate::store::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cews=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env().expect("Failed to load configuration");
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting CEWS backend");
    info!("Binding server to {}", bind_address);

    // Shared application state
    let app_state = Arc::new(RwLock::new(AppState::new()));

    // SMS provider client
    let dispatcher = SmsDispatcher::new(settings.sms.clone());

    // ---------------------------------------------------------------------
    // Sensor simulator background task
    // IMPORTANT: use actix_rt::spawn (NOT tokio::spawn)
    // ---------------------------------------------------------------------
    if settings.simulator.enabled {
        let sensor_state = app_state.clone();
        let sensor_interval_ms = settings.simulator.interval_ms;

        actix_rt::spawn(async move {
            let sim = SensorSimulator::new(sensor_interval_ms);
            sim.run(sensor_state).await;
        });
    } else {
        info!("Sensor simulator disabled; expecting external ingest");
    }

    // ---------------------------------------------------------------------
    // HTTP + WebSocket server
    // ---------------------------------------------------------------------
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::new(settings.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
