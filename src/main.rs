use dataforge::llm::ProviderSettings;
use dataforge::pipeline::PipelineRunner;
use dataforge::project::ProjectStore;
use dataforge::{api, config, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();

    let config = config::get_config();
    let store = ProjectStore::new(config.projects_dir.clone())
        .expect("Failed to initialize projects directory");
    let runner = PipelineRunner::new(
        store,
        ProviderSettings {
            ollama_url: config.ollama_url.clone(),
            openai_base_url: config.openai_base_url.clone(),
            openai_api_key: config.openai_api_key.clone(),
        },
        config.embedding_dimension,
    );
    let app = api::create_router(Arc::new(runner));

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4800..=4899;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4800-4899",
    ))
}
