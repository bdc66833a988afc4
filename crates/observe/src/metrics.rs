use {
    prometheus::{Encoder, Registry, TextEncoder},
    prometheus_metric_storage::StorageRegistry,
    std::{net::SocketAddr, sync::Arc, sync::OnceLock},
};

static REGISTRY: OnceLock<StorageRegistry> = OnceLock::new();

/// Creates the global metrics registry. Must be called exactly once, before
/// any `Metrics::instance` lookup.
pub fn setup_registry(prefix: Option<String>) {
    let registry = Registry::new_custom(prefix, None).expect("invalid metrics prefix");
    REGISTRY
        .set(StorageRegistry::new(registry))
        .expect("metrics registry already set up");
}

pub fn get_storage_registry() -> &'static StorageRegistry {
    REGISTRY.get_or_init(StorageRegistry::default)
}

pub fn get_registry() -> &'static Registry {
    get_storage_registry().registry()
}

#[async_trait::async_trait]
pub trait LivenessChecking: Send + Sync {
    async fn is_alive(&self) -> bool;
}

/// Serves `/metrics` and `/liveness` until the process exits.
pub async fn serve_metrics(liveness: Arc<dyn LivenessChecking>, address: SocketAddr) {
    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .route(
            "/liveness",
            axum::routing::get(move || {
                let liveness = liveness.clone();
                async move {
                    if liveness.is_alive().await {
                        axum::http::StatusCode::OK
                    } else {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .expect("bind metrics server");
    axum::serve(listener, app).await.expect("serve metrics");
}

async fn metrics_handler() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&get_registry().gather(), &mut buffer) {
        tracing::error!(?err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
