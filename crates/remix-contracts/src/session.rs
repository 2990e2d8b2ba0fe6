use serde::{Deserialize, Serialize};

/// Number of stylistic variations produced by one generation run.
pub const VARIATION_COUNT: usize = 8;

/// The uploaded image, immutable after intake. `data_url` is a
/// self-describing `data:<mime>;base64,<payload>` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    pub file_name: String,
    pub mime_type: String,
    pub data_url: String,
}

/// One AI-rendered reinterpretation of the source image. The index matches
/// the style description that produced it and determines display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedVariation {
    pub index: usize,
    pub description: String,
    pub mime_type: String,
    pub data_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
}

impl Progress {
    pub fn start() -> Self {
        Self {
            current: 0,
            total: VARIATION_COUNT as u64,
        }
    }
}

/// The gallery preview selection: the original upload or one variation by
/// zero-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GallerySelection {
    Original,
    Variation(usize),
}

/// The session lifecycle as a closed sum type. Exactly one variant is live
/// at a time; every transition goes through the orchestration methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionState {
    NoImage,
    ImageReady {
        image: SourceImage,
    },
    GeneratingDescriptions {
        image: SourceImage,
        context: String,
    },
    GeneratingVariations {
        image: SourceImage,
        context: String,
        styles: Vec<String>,
        variations: Vec<GeneratedVariation>,
        progress: Progress,
    },
    Complete {
        image: SourceImage,
        context: String,
        variations: Vec<GeneratedVariation>,
        selected: GallerySelection,
    },
    Failed {
        message: String,
    },
}

impl SessionState {
    pub fn phase_name(&self) -> &'static str {
        match self {
            SessionState::NoImage => "no_image",
            SessionState::ImageReady { .. } => "image_ready",
            SessionState::GeneratingDescriptions { .. } => "generating_descriptions",
            SessionState::GeneratingVariations { .. } => "generating_variations",
            SessionState::Complete { .. } => "complete",
            SessionState::Failed { .. } => "failed",
        }
    }

    /// Context text of the run in flight (or the completed run), if any.
    pub fn context(&self) -> Option<&str> {
        match self {
            SessionState::GeneratingDescriptions { context, .. }
            | SessionState::GeneratingVariations { context, .. }
            | SessionState::Complete { context, .. } => Some(context.as_str()),
            _ => None,
        }
    }

    pub fn variations(&self) -> &[GeneratedVariation] {
        match self {
            SessionState::GeneratingVariations { variations, .. }
            | SessionState::Complete { variations, .. } => variations.as_slice(),
            _ => &[],
        }
    }
}
