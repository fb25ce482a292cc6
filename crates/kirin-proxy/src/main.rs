use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kirin_proxy::{
    bootstrap, config::ProxyConfig, metrics::register_metrics, routes, state::AppState, tls,
};

/// How often expired challenges are swept from the settlement store
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Request body limit for proxied requests
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn fatal(context: &str, error: impl std::fmt::Display) -> ! {
    tracing::error!("{context}: {error}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ProxyConfig::from_env().unwrap_or_else(|e| fatal("Failed to load configuration", e));

    tracing::info!("Starting kirin on {}", config.listen_addr);
    for route in config.routes.routes() {
        tracing::info!(
            service = %route.name,
            prefix = %route.path_prefix,
            backend = %route.backend,
            price = route.price,
            "Route configured"
        );
    }
    if let Some(ref root) = config.static_root {
        tracing::info!("Serving static content from: {}", root.display());
    }

    if let Err(e) = register_metrics() {
        fatal("Failed to register metrics", e);
    }

    let backend = bootstrap::payment_backend(&config)
        .unwrap_or_else(|e| fatal("Failed to connect payment backend", e));
    let (challenger, authenticator) = bootstrap::authenticator(&config, backend)
        .unwrap_or_else(|e| fatal("Failed to initialise authenticator", e));

    let listener = challenger.spawn_settlement_listener();
    let purger = challenger.spawn_purge_task(PURGE_INTERVAL);

    let state = AppState::new(config.routes.clone(), authenticator, config.upstream_timeout)
        .unwrap_or_else(|e| fatal("Failed to create HTTP client", e))
        .with_static_root(config.static_root.clone())
        .with_metrics_token(config.metrics_token.clone());
    let state_data = web::Data::new(state);

    let proxy_data = state_data.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(proxy_data.clone())
            .app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
            .wrap(Logger::default())
            .default_service(web::to(routes::service::handle))
    });
    let server = match config.tls {
        Some(ref paths) => {
            let tls_config = tls::load_server_config(paths)
                .unwrap_or_else(|e| fatal("Failed to load TLS material", e));
            tracing::info!("TLS enabled");
            server.bind_rustls_0_23(config.listen_addr, tls_config)?
        }
        None => server.bind(config.listen_addr)?,
    }
    .run();

    let result = match config.metrics_addr {
        Some(addr) => {
            tracing::info!("Serving /health and /metrics on {}", addr);
            let admin_data = state_data.clone();
            let admin = HttpServer::new(move || {
                App::new()
                    .app_data(admin_data.clone())
                    .configure(routes::health::configure)
            })
            .workers(1)
            .bind(addr)?
            .run();
            tokio::try_join!(server, admin).map(|_| ())
        }
        None => server.await,
    };

    listener.abort();
    purger.abort();
    result
}
