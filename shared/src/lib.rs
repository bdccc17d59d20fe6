use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Identifier for one submission, used for log correlation. Jobs are never
/// reused; every submit gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline stage vocabulary of the progress stream. The wire value is an
/// open-ended string; anything unrecognized counts as `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Queued,
    Uploading,
    Processing,
    Complete,
    Error,
}

impl Stage {
    pub fn classify(raw: &str) -> Self {
        raw.parse().unwrap_or(Stage::Processing)
    }
}

/// One live status update, forwarded to the UI while a job is running.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: Stage,
    /// Percentage 0-100 when the server supplied one, surfaced as-is.
    pub progress: Option<u32>,
    pub message: String,
}

/// Caller-supplied knobs for one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOptions {
    pub candidate_labels: Vec<String>,
    pub max_segments: u32,
}

pub const MAX_SEGMENTS_DEFAULT: u32 = 10;
pub const MAX_SEGMENTS_LIMIT: u32 = 100;

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            candidate_labels: Vec::new(),
            max_segments: MAX_SEGMENTS_DEFAULT,
        }
    }
}

impl UploadOptions {
    /// Multipart fields for both prediction endpoints. The file part is
    /// appended separately by the transport.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::with_capacity(2);
        if !self.candidate_labels.is_empty() {
            fields.push(("candidate_labels", self.candidate_labels.join(",")));
        }
        fields.push(("max_segments", self.max_segments.to_string()));
        fields
    }
}

/// Splits a comma-separated label input, dropping blanks and surrounding
/// whitespace.
pub fn parse_candidate_labels(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

/// Axis-aligned region, `x1 <= x2`, `y1 <= y2`, score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub score: f64,
}

/// One detected region. A missing `label`/`mapped_label` means the
/// classifier made no prediction for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "box")]
    pub bbox: SegmentBox,
    pub mask_path: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mapped_label: Option<String>,
    #[serde(default)]
    pub resnet_probs: HashMap<String, f64>,
    #[serde(default)]
    pub zeroshot_scores: HashMap<String, f64>,
}

/// Label histograms, one per classification source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Counts {
    #[serde(default)]
    pub resnet: HashMap<String, u32>,
    #[serde(default)]
    pub mapped: HashMap<String, u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub detected: u32,
    pub returned: u32,
}

/// Terminal success payload of one analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub image_path: String,
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub counts: Counts,
    #[serde(default)]
    pub candidate_labels: Vec<String>,
    #[serde(default)]
    pub totals: Option<Totals>,
}

/// One record of the streaming endpoint, as found after the `data: `
/// prefix. Only a `complete` record carries `result`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamMessage {
    pub stage: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<PredictResponse>,
}
