use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

mod caption;
mod cli;
mod config;
mod embedded;
mod engine;
mod extract;
mod filters;
mod models;
mod raster;
mod server;
mod vector;
mod verify;

use cli::ExtractArgs;
use config::Settings;
use engine::{pdfium::PdfiumEngine, EngineError};
use extract::FigureExtractor;
use filters::FilterConfig;
use verify::{OllamaClassifier, VerificationGate};

#[derive(Parser)]
#[command(name = "pdf-figure-extract")]
#[command(about = "Locate figures in PDF pages and return them as cropped images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve,
    /// Extract figures from a PDF read on stdin
    Extract(ExtractArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout carries the JSON result in pipe mode, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env();

    match cli.command {
        Command::Serve => serve(&settings).await,
        Command::Extract(args) => cli::run(args, || build_extractor(&settings)).await,
    }
}

async fn serve(settings: &Settings) -> ExitCode {
    let extractor = match build_extractor(settings) {
        Ok(extractor) => extractor,
        Err(e) => {
            error!(error = %e, "Document engine unavailable");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(&settings.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %settings.bind, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!("listening on {}", addr),
        Err(_) => info!("listening on {}", settings.bind),
    }

    let app = server::router(Arc::new(extractor), settings.max_upload_bytes);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn build_extractor(settings: &Settings) -> Result<FigureExtractor, EngineError> {
    let engine = PdfiumEngine::new()?;
    Ok(FigureExtractor::new(
        Arc::new(engine),
        build_gate(settings),
        FilterConfig::default(),
        settings.request_timeout,
    ))
}

fn build_gate(settings: &Settings) -> VerificationGate {
    let Some(url) = settings.ollama_url.as_deref() else {
        return VerificationGate::disabled();
    };
    match OllamaClassifier::new(url, settings.vision_model.clone(), settings.verify_timeout) {
        Ok(classifier) => {
            info!(url, model = %settings.vision_model, "Vision verification enabled");
            VerificationGate::new(Arc::new(classifier), settings.verify_timeout)
        }
        Err(e) => {
            warn!(url, error = %e, "Vision classifier misconfigured, verification disabled");
            VerificationGate::disabled()
        }
    }
}
