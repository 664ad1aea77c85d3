use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FIGURES: usize = 10;
pub const DEFAULT_ZOOM: f32 = 3.0;
pub const DEFAULT_MIN_SIZE: f32 = 150.0;

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub pdf: Vec<u8>,
    /// 1-indexed, inclusive.
    pub start_page: Option<usize>,
    /// 1-indexed, inclusive.
    pub end_page: Option<usize>,
    pub max_figures: usize,
    pub zoom: f32,
    pub min_size: f32,
    pub verify: bool,
}

impl ExtractionRequest {
    pub fn new(pdf: Vec<u8>) -> Self {
        Self {
            pdf,
            start_page: None,
            end_page: None,
            max_figures: DEFAULT_MAX_FIGURES,
            zoom: DEFAULT_ZOOM,
            min_size: DEFAULT_MIN_SIZE,
            verify: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Figure {
    pub page: usize,
    #[serde(rename = "imageBase64", serialize_with = "serialize_base64")]
    pub image: Vec<u8>,
    pub dimensions: Dimensions,
    pub bounds: Option<Bounds>,
    pub caption_hint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub figures: Vec<Figure>,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn ok(figures: Vec<Figure>) -> Self {
        Self {
            success: true,
            figures,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            figures: Vec::new(),
            error: Some(message.into()),
        }
    }
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use base64::Engine as _;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}
