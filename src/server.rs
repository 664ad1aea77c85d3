use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::extract::{ExtractionError, FigureExtractor};
use crate::models::{ExtractionRequest, ExtractionResult};

pub fn router(extractor: Arc<FigureExtractor>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract_endpoint))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(extractor)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn extract_endpoint(
    State(extractor): State<Arc<FigureExtractor>>,
    multipart: Multipart,
) -> Response {
    let request = match read_form(multipart).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected extraction form");
            return envelope(e.status(), ExtractionResult::failed(e.to_string()));
        }
    };

    match extractor.try_extract(request).await {
        Ok(figures) => envelope(StatusCode::OK, ExtractionResult::ok(figures)),
        Err(e) => envelope(status_for(&e), ExtractionResult::failed(e.to_string())),
    }
}

fn envelope(status: StatusCode, result: ExtractionResult) -> Response {
    (status, Json(result)).into_response()
}

fn status_for(error: &ExtractionError) -> StatusCode {
    match error {
        e if e.is_input_error() => StatusCode::BAD_REQUEST,
        ExtractionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Form parsing ─────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FormError {
    #[error("Malformed upload: {}", .0.body_text())]
    Multipart(#[from] MultipartError),
    #[error("Invalid value for {field}: {value:?}")]
    Field { field: String, value: String },
}

impl FormError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Multipart(e) => e.status(),
            Self::Field { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

/// A missing `file` part yields an empty payload, which extraction rejects.
async fn read_form(mut multipart: Multipart) -> Result<ExtractionRequest, FormError> {
    let mut request = ExtractionRequest::new(Vec::new());

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            request.pdf = field.bytes().await?.to_vec();
            continue;
        }

        let value = field.text().await?;
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match name.as_str() {
            "max_figures" => request.max_figures = parse_field(&name, value)?,
            "start_page" => request.start_page = Some(parse_field(&name, value)?),
            "end_page" => request.end_page = Some(parse_field(&name, value)?),
            "zoom" => request.zoom = parse_field(&name, value)?,
            "min_size" => request.min_size = parse_field(&name, value)?,
            "verify" => request.verify = parse_flag(&name, value)?,
            _ => debug!(field = %name, "Ignoring unknown form field"),
        }
    }
    Ok(request)
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T, FormError> {
    value.parse().map_err(|_| FormError::Field {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(field: &str, value: &str) -> Result<bool, FormError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(FormError::Field {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::mock::{MockEngine, MockPage};
    use crate::filters::FilterConfig;
    use crate::verify::VerificationGate;

    const BOUNDARY: &str = "figure-extract-test-boundary";

    fn app(engine: MockEngine, max_upload_bytes: usize) -> Router {
        let extractor = FigureExtractor::new(
            Arc::new(engine),
            VerificationGate::disabled(),
            FilterConfig::default(),
            Duration::from_secs(30),
        );
        router(Arc::new(extractor), max_upload_bytes)
    }

    fn one_image_document() -> MockEngine {
        MockEngine::new(vec![
            MockPage::default().with_image(400, 300, "png"),
            MockPage::default(),
            MockPage::default(),
        ])
    }

    fn form(fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"").as_bytes(),
            );
            if *name == "file" {
                body.extend_from_slice(b"; filename=\"paper.pdf\"\r\nContent-Type: application/pdf");
            }
            body.extend_from_slice(b"\r\n\r\n");
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/extract")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(MockEngine::blank(1), 1024), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn extracts_uploaded_document() {
        let req = form(&[("file", "%PDF-1.7 test"), ("max_figures", "5"), ("verify", "false")]);
        let (status, body) = send(app(one_image_document(), 1024 * 1024), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["error"].is_null());
        let figures = body["figures"].as_array().unwrap();
        assert_eq!(figures.len(), 1);
        assert_eq!(figures[0]["page"], 1);
        assert_eq!(figures[0]["captionHint"], "embedded_png");
        assert!(figures[0]["bounds"].is_null());
        assert!(!figures[0]["imageBase64"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_window_fields_are_applied() {
        let req = form(&[("file", "%PDF-1.7"), ("start_page", "2"), ("end_page", "3")]);
        let (status, body) = send(app(one_image_document(), 1024 * 1024), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["figures"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_file_is_bad_request() {
        let req = form(&[("max_figures", "3")]);
        let (status, body) = send(app(one_image_document(), 1024 * 1024), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["figures"].as_array().unwrap().len(), 0);
        assert!(body["error"].as_str().unwrap().contains("No PDF data"));
    }

    #[tokio::test]
    async fn non_pdf_upload_is_bad_request() {
        let req = form(&[("file", "GIF89a")]);
        let (status, body) = send(app(one_image_document(), 1024 * 1024), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("header"));
    }

    #[tokio::test]
    async fn unparsable_number_is_bad_request() {
        let req = form(&[("file", "%PDF-1.7"), ("zoom", "huge")]);
        let (status, body) = send(app(one_image_document(), 1024 * 1024), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("zoom"));
    }

    #[tokio::test]
    async fn engine_failure_is_server_error() {
        let req = form(&[("file", "%PDF-1.7")]);
        let (status, body) = send(app(MockEngine::unopenable(), 1024 * 1024), req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("verify", "TRUE").unwrap());
        assert!(parse_flag("verify", "on").unwrap());
        assert!(!parse_flag("verify", "0").unwrap());
        assert!(parse_flag("verify", "sometimes").is_err());
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        assert_eq!(
            status_for(&ExtractionError::Timeout(Duration::from_secs(300))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_for(&ExtractionError::MissingData), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&ExtractionError::Internal("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
