//! AI edge refinement backend
//!
//! Sends the cutout to a Gemini vision endpoint for an edge-quality
//! analysis, then applies the corrections the analysis calls for to the
//! alpha channel locally. The remote service never returns pixels, only the
//! JSON verdict, so a flaky answer can at worst skip a correction.

use super::{erode_alpha, smooth_alpha, EdgeRefiner};
use crate::config::ApiCredential;
use crate::error::{AiProcessingError, PipelineError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use image::RgbaImage;
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const ANALYSIS_PROMPT: &str = "Analyze the edge quality of this background-removed product image. \
     Answer with JSON only, no prose: \
     {\"edge_rough\": true/false, \"has_halo\": true/false, \"needs_smoothing\": true/false}. \
     edge_rough: the cutout edge is jagged. \
     has_halo: a bright fringe remains around the subject. \
     needs_smoothing: the whole edge needs softening.";

/// Edge-quality verdict returned by the vision service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct EdgeAnalysis {
    /// The cutout edge is jagged
    #[serde(default)]
    pub edge_rough: bool,
    /// A bright halo fringe remains around the subject
    #[serde(default)]
    pub has_halo: bool,
    /// The edge needs an overall softening pass
    #[serde(default)]
    pub needs_smoothing: bool,
}

/// [`EdgeRefiner`] backed by the Gemini `generateContent` API
pub struct GeminiRefiner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl GeminiRefiner {
    /// Create a refiner against the public Gemini endpoint
    #[must_use]
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    /// Create a refiner against a custom endpoint (used by tests and proxies)
    pub fn with_endpoint<S: Into<String>>(endpoint: S) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    fn request_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn analyze(
        &self,
        png_bytes: &[u8],
        credential: &ApiCredential,
    ) -> std::result::Result<EdgeAnalysis, AiProcessingError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": ANALYSIS_PROMPT },
                    { "inline_data": {
                        "mime_type": "image/png",
                        "data": general_purpose::STANDARD.encode(png_bytes),
                    }},
                ],
            }],
        });

        let response = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| AiProcessingError::NetworkError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AiProcessingError::NetworkError(e.to_string()))?;

        match status.as_u16() {
            401 | 403 => {
                return Err(AiProcessingError::InvalidCredential(format!(
                    "service rejected credential (HTTP {status})"
                )))
            },
            429 => {
                return Err(AiProcessingError::QuotaExceeded(format!(
                    "service reported quota exhausted (HTTP {status})"
                )))
            },
            _ if !status.is_success() => {
                return Err(AiProcessingError::InvalidResponse(format!(
                    "unexpected HTTP {status}: {}",
                    text.chars().take(200).collect::<String>()
                )))
            },
            _ => {},
        }

        let candidate_text = extract_candidate_text(&text).ok_or_else(|| {
            AiProcessingError::InvalidResponse("response carried no candidate text".to_string())
        })?;

        parse_analysis(&candidate_text).ok_or_else(|| {
            AiProcessingError::InvalidResponse(format!(
                "candidate text is not an edge analysis: {}",
                candidate_text.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Apply the corrections the analysis calls for.
    ///
    /// The base softening pass always runs; a halo additionally erodes the
    /// edge by one pixel, and a rough edge gets a second softening pass.
    fn apply_corrections(analysis: EdgeAnalysis, image: &RgbaImage) -> RgbaImage {
        let mut refined = smooth_alpha(image);
        if analysis.has_halo {
            refined = erode_alpha(&refined);
        }
        if analysis.edge_rough || analysis.needs_smoothing {
            refined = smooth_alpha(&refined);
        }
        refined
    }
}

impl Default for GeminiRefiner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EdgeRefiner for GeminiRefiner {
    async fn refine(&self, image: &RgbaImage, credential: &ApiCredential) -> Result<RgbaImage> {
        let mut png_bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| PipelineError::internal(format!("failed to encode cutout: {e}")))?;

        let analysis = self.analyze(&png_bytes, credential).await?;
        debug!(?analysis, "edge analysis received");

        Ok(Self::apply_corrections(analysis, image))
    }
}

/// Pull the concatenated candidate text out of a `generateContent` response
fn extract_candidate_text(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parse an [`EdgeAnalysis`] from model output.
///
/// Models wrap the JSON in prose or code fences more often than not, so
/// this takes whatever sits between the first `{` and the last `}`.
fn parse_analysis(text: &str) -> Option<EdgeAnalysis> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let json_str = text.get(start..=end)?;
    serde_json::from_str(json_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_parse_analysis_plain_json() {
        let analysis = parse_analysis(
            r#"{"edge_rough": true, "has_halo": false, "needs_smoothing": true}"#,
        )
        .unwrap();
        assert!(analysis.edge_rough);
        assert!(!analysis.has_halo);
        assert!(analysis.needs_smoothing);
    }

    #[test]
    fn test_parse_analysis_with_surrounding_prose() {
        let text = "Here is my assessment:\n```json\n{\"edge_rough\": false, \"has_halo\": true, \"needs_smoothing\": false}\n```\nLet me know if you need more.";
        let analysis = parse_analysis(text).unwrap();
        assert!(analysis.has_halo);
        assert!(!analysis.edge_rough);
    }

    #[test]
    fn test_parse_analysis_missing_fields_default_to_false() {
        let analysis = parse_analysis(r#"{"has_halo": true}"#).unwrap();
        assert!(analysis.has_halo);
        assert!(!analysis.edge_rough);
        assert!(!analysis.needs_smoothing);
    }

    #[test]
    fn test_parse_analysis_rejects_garbage() {
        assert!(parse_analysis("no json here at all").is_none());
        assert!(parse_analysis("{broken json}").is_none());
    }

    #[test]
    fn test_extract_candidate_text() {
        let body = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "{\"edge_rough\": true,"},
                        {"text": " \"has_halo\": false}"}
                    ]
                }
            }]
        }"#;
        let text = extract_candidate_text(body).unwrap();
        let analysis = parse_analysis(&text).unwrap();
        assert!(analysis.edge_rough);
    }

    #[test]
    fn test_extract_candidate_text_empty_response() {
        assert!(extract_candidate_text(r#"{"candidates": []}"#).is_none());
        assert!(extract_candidate_text("not json").is_none());
    }

    #[test]
    fn test_apply_corrections_halo_erodes_edge() {
        // Opaque block with a transparent pixel: erosion widens the hole
        let mut img = RgbaImage::from_pixel(5, 5, Rgba([10, 10, 10, 255]));
        img.put_pixel(2, 2, Rgba([10, 10, 10, 0]));

        let halo = EdgeAnalysis {
            has_halo: true,
            ..EdgeAnalysis::default()
        };
        let with_halo = GeminiRefiner::apply_corrections(halo, &img);
        let without = GeminiRefiner::apply_corrections(EdgeAnalysis::default(), &img);

        let opaque = |i: &RgbaImage| i.pixels().filter(|p| p.0[3] == 255).count();
        assert!(opaque(&with_halo) < opaque(&without));
    }

    #[test]
    fn test_request_url_shape() {
        let refiner = GeminiRefiner::with_endpoint("http://localhost:9999/v1beta");
        assert_eq!(
            refiner.request_url(),
            format!("http://localhost:9999/v1beta/models/{DEFAULT_MODEL}:generateContent")
        );
    }
}
