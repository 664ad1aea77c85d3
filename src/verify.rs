//! Optional second opinion from a vision model.
//!
//! The gate is fail-open: a classifier that is missing, slow, unreachable or
//! incoherent never removes a figure. Only an explicit TEXT verdict does.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::Figure;

// ── Constants ────────────────────────────────────────────────────────────────

pub const CLASSIFICATION_PROMPT: &str = "\
You are checking regions cropped from PDF pages. Decide whether this image is \
a figure (chart, diagram, photo, illustration, table, map or screenshot) or \
mostly running text.

Answer with exactly three lines and nothing else:
TYPE: FIGURE or TEXT
CATEGORY: chart, diagram, photo, illustration, table, map, screenshot or other
CONFIDENCE: high, medium or low";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ── Lazy static regexes ──────────────────────────────────────────────────────

// Tolerates markdown bullets, bold markers and either `:` or `=`.
static TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[\s\-*>#]*TYPE\**\s*[:=]\s*\**\s*([a-z]+)").unwrap());

static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[\s\-*>#]*CATEGORY\**\s*[:=]\s*\**\s*([a-z]+)").unwrap());

static CONFIDENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^[\s\-*>#]*CONFIDENCE\**\s*[:=]\s*\**\s*([a-z]+)").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("No vision classifier configured")]
    Unavailable,
    #[error("Classifier request failed: {0}")]
    Transport(String),
    #[error("Classifier returned HTTP {status}")]
    Upstream { status: u16 },
    #[error("Malformed classifier response: {0}")]
    Response(String),
}

// ── Classifier surface ───────────────────────────────────────────────────────

/// Anything that can look at an image and answer an instruction in prose.
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    async fn classify(&self, image: &[u8], instruction: &str) -> Result<String, VerifyError>;

    fn name(&self) -> &str;
}

/// Stand-in used when no classifier is configured. Every call fails, so
/// every figure is kept unchanged.
pub struct UnavailableClassifier;

#[async_trait]
impl VisionClassifier for UnavailableClassifier {
    async fn classify(&self, _image: &[u8], _instruction: &str) -> Result<String, VerifyError> {
        Err(VerifyError::Unavailable)
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────────

/// Chat request for `/api/chat`; vision models expect images on the user message.
#[derive(Debug, Serialize)]
struct VisionChatRequest<'a> {
    model: &'a str,
    messages: Vec<VisionChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct VisionChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct VisionChatResponse {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

pub struct OllamaClassifier {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
}

impl OllamaClassifier {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self, VerifyError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| VerifyError::Transport(format!("Invalid classifier URL {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("api/chat")
            .map_err(|e| VerifyError::Transport(e.to_string()))?;

        let client = reqwest::ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl VisionClassifier for OllamaClassifier {
    async fn classify(&self, image: &[u8], instruction: &str) -> Result<String, VerifyError> {
        let body = VisionChatRequest {
            model: &self.model,
            messages: vec![VisionChatMessage {
                role: "user",
                content: instruction,
                images: vec![base64::engine::general_purpose::STANDARD.encode(image)],
            }],
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerifyError::Transport(format!("TimeoutError: {e}"))
                } else if e.is_connect() {
                    VerifyError::Transport(format!("ConnectError: {e}"))
                } else {
                    VerifyError::Transport(format!("RequestError: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Upstream {
                status: status.as_u16(),
            });
        }

        let parsed: VisionChatResponse = response
            .json()
            .await
            .map_err(|e| VerifyError::Response(e.to_string()))?;
        Ok(parsed.message.content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ── Response parsing ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Figure,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureCategory {
    Chart,
    Diagram,
    Photo,
    Illustration,
    Table,
    Map,
    Screenshot,
    Other,
}

impl FigureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Diagram => "diagram",
            Self::Photo => "photo",
            Self::Illustration => "illustration",
            Self::Table => "table",
            Self::Map => "map",
            Self::Screenshot => "screenshot",
            Self::Other => "other",
        }
    }
}

impl FromStr for FigureCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chart" => Ok(Self::Chart),
            "diagram" => Ok(Self::Diagram),
            "photo" => Ok(Self::Photo),
            "illustration" => Ok(Self::Illustration),
            "table" => Ok(Self::Table),
            "map" => Ok(Self::Map),
            "screenshot" => Ok(Self::Screenshot),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl FromStr for Confidence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    /// `None` when missing or outside the known set.
    pub category: Option<FigureCategory>,
    pub confidence: Option<Confidence>,
}

/// Parse the three-line answer. `None` unless a TYPE line names FIGURE or TEXT.
pub fn parse_classification(response: &str) -> Option<Classification> {
    let verdict = match capture(&TYPE_RE, response)?.as_str() {
        "figure" => Verdict::Figure,
        "text" => Verdict::Text,
        _ => return None,
    };

    Some(Classification {
        verdict,
        category: capture(&CATEGORY_RE, response).and_then(|c| c.parse().ok()),
        confidence: capture(&CONFIDENCE_RE, response).and_then(|c| c.parse().ok()),
    })
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

// ── Gate ─────────────────────────────────────────────────────────────────────

pub struct VerificationGate {
    classifier: Arc<dyn VisionClassifier>,
    timeout: Duration,
}

impl VerificationGate {
    pub fn new(classifier: Arc<dyn VisionClassifier>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(UnavailableClassifier), Duration::from_secs(1))
    }

    /// Classify each figure in order, dropping TEXT verdicts and prefixing
    /// the caption hint with any recognised category.
    ///
    /// Each call gets the per-call timeout, shortened to whatever is left
    /// before `deadline`. Once the deadline passes, the remaining figures are
    /// kept unchecked.
    pub async fn apply(&self, figures: Vec<Figure>, deadline: Option<Instant>) -> Vec<Figure> {
        let before = figures.len();
        let mut kept = Vec::with_capacity(before);
        let mut unchecked = 0usize;

        for mut figure in figures {
            let budget = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(self.timeout),
                None => self.timeout,
            };
            if budget.is_zero() {
                unchecked += 1;
                kept.push(figure);
                continue;
            }

            match self.classify(&figure, budget).await {
                Some(Classification {
                    verdict: Verdict::Text,
                    confidence,
                    ..
                }) => {
                    debug!(page = figure.page, ?confidence, "Classifier rejected figure as text");
                    continue;
                }
                Some(Classification {
                    category: Some(category),
                    ..
                }) => annotate(&mut figure, category),
                _ => {}
            }
            kept.push(figure);
        }

        if unchecked > 0 {
            warn!(unchecked, "Verification deadline reached, keeping remaining figures unchecked");
        }
        info!(
            classifier = self.classifier.name(),
            before,
            after = kept.len(),
            "Verification complete"
        );
        kept
    }

    async fn classify(&self, figure: &Figure, budget: Duration) -> Option<Classification> {
        let call = self.classifier.classify(&figure.image, CLASSIFICATION_PROMPT);
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(response)) => {
                let parsed = parse_classification(&response);
                if parsed.is_none() {
                    warn!(page = figure.page, "Unparsable classifier response, keeping figure");
                }
                parsed
            }
            Ok(Err(VerifyError::Unavailable)) => None,
            Ok(Err(e)) => {
                warn!(page = figure.page, error = %e, "Classifier failed, keeping figure");
                None
            }
            Err(_) => {
                warn!(
                    page = figure.page,
                    timeout_ms = budget.as_millis() as u64,
                    "Classifier timed out, keeping figure"
                );
                None
            }
        }
    }
}

fn annotate(figure: &mut Figure, category: FigureCategory) {
    figure.caption_hint = Some(match figure.caption_hint.take() {
        Some(hint) => format!("{}: {hint}", category.as_str()),
        None => category.as_str().to_string(),
    });
}
