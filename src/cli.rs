use std::process::ExitCode;

use clap::Args;
use tokio::io::AsyncReadExt;
use tracing::{error, warn};

use crate::engine::EngineError;
use crate::extract::{validate_request, FigureExtractor};
use crate::models::{
    ExtractionRequest, ExtractionResult, DEFAULT_MAX_FIGURES, DEFAULT_MIN_SIZE, DEFAULT_ZOOM,
};

/// Read a PDF from stdin and print the result envelope as one JSON line.
#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    /// Maximum number of figures to return
    #[arg(long, default_value_t = DEFAULT_MAX_FIGURES)]
    pub max_figures: usize,

    /// First page to scan (1-indexed)
    #[arg(long)]
    pub start_page: Option<usize>,

    /// Last page to scan (inclusive)
    #[arg(long)]
    pub end_page: Option<usize>,

    /// Rasterization scale for cropped regions
    #[arg(long, default_value_t = DEFAULT_ZOOM)]
    pub zoom: f32,

    /// Minimum figure width and height, in page units
    #[arg(long, default_value_t = DEFAULT_MIN_SIZE)]
    pub min_size: f32,

    /// Ask the vision classifier to confirm each figure
    #[arg(long)]
    pub verify: bool,
}

impl ExtractArgs {
    pub fn into_request(self, pdf: Vec<u8>) -> ExtractionRequest {
        ExtractionRequest {
            pdf,
            start_page: self.start_page,
            end_page: self.end_page,
            max_figures: self.max_figures,
            zoom: self.zoom,
            min_size: self.min_size,
            verify: self.verify,
        }
    }
}

/// Read stdin, then build the extractor only once the input looks like a PDF.
pub async fn run<F>(args: ExtractArgs, build: F) -> ExitCode
where
    F: FnOnce() -> Result<FigureExtractor, EngineError>,
{
    let mut pdf = Vec::new();
    let result = match tokio::io::stdin().read_to_end(&mut pdf).await {
        Ok(_) => respond(args.into_request(pdf), build).await,
        Err(e) => {
            error!(error = %e, "Failed to read stdin");
            ExtractionResult::failed(format!("Failed to read input: {e}"))
        }
    };
    emit(&result)
}

/// Input errors are reported before the document engine is loaded.
pub async fn respond<F>(request: ExtractionRequest, build: F) -> ExtractionResult
where
    F: FnOnce() -> Result<FigureExtractor, EngineError>,
{
    if let Err(e) = validate_request(&request) {
        warn!(error = %e, "Rejected input");
        return ExtractionResult::failed(e.to_string());
    }
    match build() {
        Ok(extractor) => extractor.extract(request).await,
        Err(e) => {
            error!(error = %e, "Document engine unavailable");
            ExtractionResult::failed(e.to_string())
        }
    }
}

pub fn emit(result: &ExtractionResult) -> ExitCode {
    match serde_json::to_string(result) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!(error = %e, "Failed to serialize result");
            return ExitCode::FAILURE;
        }
    }
    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use clap::Parser;

    use super::*;
    use crate::engine::mock::{MockEngine, MockPage};
    use crate::filters::FilterConfig;
    use crate::verify::VerificationGate;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ExtractArgs,
    }

    fn parse(argv: &[&str]) -> ExtractArgs {
        Harness::try_parse_from(std::iter::once("extract").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn defaults_match_request_defaults() {
        let request = parse(&[]).into_request(b"%PDF".to_vec());
        let expected = ExtractionRequest::new(b"%PDF".to_vec());
        assert_eq!(request.max_figures, expected.max_figures);
        assert_eq!(request.zoom, expected.zoom);
        assert_eq!(request.min_size, expected.min_size);
        assert_eq!(request.start_page, None);
        assert_eq!(request.end_page, None);
        assert!(!request.verify);
    }

    #[test]
    fn flags_flow_into_request() {
        let request = parse(&[
            "--max-figures",
            "3",
            "--start-page",
            "2",
            "--end-page",
            "4",
            "--zoom",
            "2",
            "--min-size",
            "100",
            "--verify",
        ])
        .into_request(Vec::new());
        assert_eq!(request.max_figures, 3);
        assert_eq!(request.start_page, Some(2));
        assert_eq!(request.end_page, Some(4));
        assert_eq!(request.zoom, 2.0);
        assert_eq!(request.min_size, 100.0);
        assert!(request.verify);
    }

    #[test]
    fn rejects_non_numeric_page() {
        let argv = ["extract", "--start-page", "two"];
        assert!(Harness::try_parse_from(argv).is_err());
    }

    fn missing_engine() -> Result<FigureExtractor, EngineError> {
        Err(EngineError::Load(
            "Failed to load PDFium from /nonexistent/libpdfium.so".to_string(),
        ))
    }

    #[tokio::test]
    async fn empty_input_wins_over_missing_engine() {
        let result = respond(parse(&[]).into_request(Vec::new()), missing_engine).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No PDF data received"));
    }

    #[tokio::test]
    async fn bad_header_wins_over_missing_engine() {
        let result = respond(parse(&[]).into_request(b"GIF89a".to_vec()), missing_engine).await;
        assert_eq!(result.error.as_deref(), Some("Invalid PDF: missing PDF header"));
    }

    #[tokio::test]
    async fn missing_engine_reported_for_valid_input() {
        let result = respond(parse(&[]).into_request(b"%PDF-1.7".to_vec()), missing_engine).await;
        assert!(!result.success);
        assert!(result.figures.is_empty());
        assert!(result.error.unwrap().contains("Failed to load PDFium"));
    }

    #[tokio::test]
    async fn valid_input_runs_extraction() {
        let build = || {
            Ok(FigureExtractor::new(
                Arc::new(MockEngine::new(vec![MockPage::default().with_image(400, 300, "png")])),
                VerificationGate::disabled(),
                FilterConfig::default(),
                Duration::from_secs(30),
            ))
        };
        let result = respond(parse(&[]).into_request(b"%PDF-1.7".to_vec()), build).await;
        assert!(result.success);
        assert_eq!(result.figures.len(), 1);
    }
}
