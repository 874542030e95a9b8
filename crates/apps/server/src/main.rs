mod routes;
mod store;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::routes::{get_geojson, healthz, AppState};
use crate::store::{MemoryStore, Pool};

#[derive(Clone, Debug)]
struct ServerConfig {
    addr: SocketAddr,
    geojson: Option<PathBuf>,
    max_connections: usize,
}

impl ServerConfig {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let addr: SocketAddr = env::var("PARCELS_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9200".to_string())
            .parse()?;
        Ok(Self {
            addr,
            geojson: env::var("PARCELS_GEOJSON").ok().map(PathBuf::from),
            max_connections: env_var_usize("PARCELS_MAX_CONNECTIONS", 8),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env()?;

    let store = match &config.geojson {
        Some(path) => {
            let store = MemoryStore::load(path).await?;
            info!(path = %path.display(), features = store.len(), "loaded parcels");
            store
        }
        None => {
            warn!("PARCELS_GEOJSON not set; serving an empty store");
            MemoryStore::default()
        }
    };

    let state = AppState {
        pool: Pool::new(Arc::new(store), config.max_connections),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/geojson", get(get_geojson))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("parcel server listening on http://{}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
