use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use scheduling_cell::services::booking::{SchedulingService, SchedulingState};
use scheduling_cell::services::cache::{CacheBackend, InMemoryCacheBackend, RedisCacheBackend};
use scheduling_cell::services::directory::PracticeDirectory;
use scheduling_cell::services::settings::SettingsStore;
use shared_config::AppConfig;
use shared_practice::PracticeClient;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scheduling API server");

    // Load configuration
    let config = AppConfig::from_env();

    // Cache backend: Redis when configured, otherwise a process-local map.
    // Cache failures never fail requests, so a degraded backend is safe.
    let cache_backend: Arc<dyn CacheBackend> = match config.redis_url.as_deref() {
        Some(url) => match RedisCacheBackend::new(url).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                warn!("Redis unavailable, falling back to in-memory cache: {}", e);
                Arc::new(InMemoryCacheBackend::new())
            }
        },
        None => {
            warn!("REDIS_URL not set, using in-memory cache");
            Arc::new(InMemoryCacheBackend::new())
        }
    };

    let practice_client = Arc::new(PracticeClient::new(&config));
    let settings_store = SettingsStore::new(Arc::clone(&practice_client));
    let directory = Arc::new(PracticeDirectory::new(practice_client));

    let service = SchedulingService::new(settings_store, directory, cache_backend);
    let state = Arc::new(SchedulingState {
        service,
        config,
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
