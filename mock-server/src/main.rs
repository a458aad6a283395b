use std::sync::Arc;

use mock_server::Backend;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;

    let backend = Arc::new(Backend::default());
    let fixture = backend.fixture();
    info!(
        %addr,
        provider_key = %fixture.provider_key,
        service_id = %fixture.service_id,
        applications = fixture.applications.len(),
        "mock backend listening"
    );
    mock_server::run_with(listener, backend).await
}
