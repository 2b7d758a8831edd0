use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};

use chathub::auth::TokenManager;
use chathub::config::ServerConfig;
use chathub::core::hub::{Hub, HubOptions};
use chathub::core::ingress::Ingress;
use chathub::handlers::{self, AppState};
use chathub::storage::chat_cache::ChatCacheService;
use chathub::storage::memory::MemoryChatStore;
use chathub::storage::memory_cache::MemoryChatCache;
use chathub::storage::traits::ChatStore;

#[tokio::main]
async fn main() {
    // Initialize env before logging so RUST_LOG from .env is honored
    let dotenv_result = dotenv::dotenv();
    env_logger::init();
    match dotenv_result {
        Ok(_) => info!("environment variables loaded from .env file"),
        Err(e) => warn!("no .env file loaded: {}", e),
    }

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("configuration: host={}, port={}", config.host, config.port);
    if config.store_dsn.is_none() {
        info!("no store DSN configured, using the in-memory chat store");
    }
    if config.cache_dsn.is_none() {
        info!("no cache DSN configured, using the in-memory chat cache");
    }

    // Wire the collaborators explicitly; nothing here is global
    let store = Arc::new(MemoryChatStore::new());
    let cache_service = Arc::new(ChatCacheService::new(Arc::new(MemoryChatCache::new())));
    let hub = Hub::new(HubOptions {
        max_room_size: config.max_room_size,
        cleanup_interval: config.cleanup_interval,
        idle_threshold: config.idle_threshold,
    });
    let verifier = Arc::new(TokenManager::new(&config.jwt_secret));
    let store_dyn: Arc<dyn ChatStore> = store.clone();
    let ingress = Arc::new(Ingress::new(
        store_dyn,
        Arc::clone(&cache_service),
        Arc::clone(&hub),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone(),
        identity: store,
        cache: cache_service,
        hub: Arc::clone(&hub),
        verifier,
        ingress,
    });

    let routes = handlers::routes(state);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("starting chathub server on {}", addr);
    let (bound, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });
    info!("listening on {}", bound);
    server.await;

    // drain every room; clients observe a close frame
    hub.shutdown().await;
    info!("server stopped");
}
