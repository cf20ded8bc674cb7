use std::path::PathBuf;

use anyhow::Result;
use axum::Router;
use clap::{Parser, Subcommand};
use rag_campus::{api, app_state::AppState, config, ingest};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rag_campus", about = "Asistente RAG sobre los PDFs del curso")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trocea e indexa todos los PDFs de un directorio.
    Ingest { dir: PathBuf },
    /// Sirve la API de preguntas sobre el índice ya construido.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;

    match cli.command {
        Command::Ingest { dir } => {
            let summary = ingest::run(&cfg, &dir).await?;
            info!("¡Indexación completada! {}", summary);
            Ok(())
        }
        Command::Serve => serve(cfg).await,
    }
}

async fn serve(cfg: config::AppConfig) -> Result<()> {
    // 3. Cargar índice y backends una sola vez
    let (app_state, shutdown_rx) = AppState::from_config(cfg)?;

    // 4. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 5. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_rx => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
