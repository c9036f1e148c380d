use actix_web::{web, App, HttpServer};
use std::time::Duration;

use execbox::config::Settings;
use execbox::executor::select_backend;
use execbox::http::{self, AppState, RequestLog};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("starting execbox server...");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // A reachable container engine is required unless fallback is explicitly
    // enabled for local development.
    let backend = match select_backend(&settings).await {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let port = settings.port;
    let state = web::Data::new(AppState::new(settings, backend));
    state.limiter.spawn_sweeper(Duration::from_secs(60));

    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("server starting on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(RequestLog)
            .configure(http::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}
