// remote.rs - Primary depth strategy: hosted vision model
//
// Sends the image inline (base64 PNG) with an instruction to answer with a
// grayscale depth map, then decodes the first image part of the reply.
// Transient failures (connect/reset, 5xx) get one immediate re-attempt.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{DepthBackend, DepthField};
use crate::config::RemoteConfig;
use crate::error::RemoteFailure;
use crate::image_asset::ImageAsset;

pub struct GeminiBackend {
    client: Client,
    url: String,
    api_key: String,
    prompt: String,
}

impl GeminiBackend {
    /// Fails with MissingCredentials when no API key is configured
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteFailure> {
        let api_key = config
            .credentials()
            .ok_or(RemoteFailure::MissingCredentials)?
            .to_string();
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RemoteFailure::Transport(e.to_string()))?;
        let url = format!(
            "{}/models/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        );
        Ok(Self {
            client,
            url,
            api_key,
            prompt: config.prompt.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &GenerateRequest) -> Result<GenerateResponse, RemoteFailure> {
        let resp = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteFailure::Auth(status.as_u16()));
        }
        if !status.is_success() {
            return Err(RemoteFailure::Status(status.as_u16()));
        }

        resp.json::<GenerateResponse>().await.map_err(|e| {
            if e.is_timeout() {
                RemoteFailure::Timeout
            } else {
                RemoteFailure::Malformed(e.to_string())
            }
        })
    }
}

impl DepthBackend for GeminiBackend {
    #[instrument(name = "remote_depth", skip_all, fields(w = image.width(), h = image.height()))]
    async fn estimate(&self, image: &ImageAsset) -> Result<DepthField, RemoteFailure> {
        let png = image
            .encode_png()
            .map_err(|e| RemoteFailure::Encode(e.to_string()))?;
        let request = GenerateRequest::new(&self.prompt, &png);

        let response = match self.send(&request).await {
            Err(failure) if failure.is_transient() => {
                warn!(%failure, "transient remote failure, retrying once");
                self.send(&request).await?
            }
            other => other?,
        };

        let bytes = extract_image(&response)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| RemoteFailure::Malformed(format!("undecodable image part: {e}")))?;
        debug!(w = decoded.width(), h = decoded.height(), "remote depth image received");

        let field = DepthField::from_image(&decoded)
            .map_err(|e| RemoteFailure::Malformed(e.to_string()))?;
        if field.width() == 0 || field.height() == 0 {
            return Err(RemoteFailure::Malformed("empty depth image".into()));
        }
        Ok(field)
    }
}

fn classify(e: reqwest::Error) -> RemoteFailure {
    if e.is_timeout() {
        RemoteFailure::Timeout
    } else {
        RemoteFailure::Transport(e.to_string())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn new(prompt: &str, png: &[u8]) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(prompt.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/png".into(),
                            data: STANDARD.encode(png),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<Content>,
}

/// First inline image across all candidates. Text-only replies are NoImage.
fn extract_image(response: &GenerateResponse) -> Result<Vec<u8>, RemoteFailure> {
    let inline = response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.inline_data.as_ref())
        .find(|d| d.mime_type.starts_with("image/"))
        .ok_or(RemoteFailure::NoImage)?;

    STANDARD
        .decode(inline.data.trim())
        .map_err(|e| RemoteFailure::Malformed(format!("bad base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = ImageAsset::from_dynamic(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            w,
            h,
            Luma([90]),
        )))
        .unwrap();
        img.encode_png().unwrap()
    }

    #[test]
    fn missing_key_is_reported_before_any_request() {
        let result = GeminiBackend::new(&RemoteConfig::default());
        assert!(matches!(result, Err(RemoteFailure::MissingCredentials)));
    }

    #[test]
    fn url_is_built_from_endpoint_and_model() {
        let config = RemoteConfig {
            api_key: Some("k".into()),
            endpoint: "http://localhost:1234/v1/".into(),
            model: "depth-model".into(),
            ..Default::default()
        };
        let backend = GeminiBackend::new(&config).unwrap();
        assert_eq!(backend.url(), "http://localhost:1234/v1/models/depth-model:generateContent");
    }

    #[test]
    fn request_carries_prompt_and_inline_png() {
        let request = GenerateRequest::new("make depth", &[1, 2, 3]);
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "make depth");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], STANDARD.encode([1u8, 2, 3]));
        assert!(parts[0].get("inlineData").is_none());
        assert_eq!(json["generationConfig"]["responseModalities"][1], "IMAGE");
    }

    #[test]
    fn extracts_first_image_part_in_either_casing() {
        let png = png_bytes(3, 2);
        let body = serde_json::json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here is your depth map" },
                    { "inline_data": { "mime_type": "image/png", "data": STANDARD.encode(&png) } }
                ]}
            }]
        });
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(extract_image(&response).unwrap(), png);

        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": STANDARD.encode(&png) } }
            ]}}]
        });
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(extract_image(&response).unwrap(), png);
    }

    #[test]
    fn text_only_reply_is_no_image() {
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "I cannot draw" }] } }]
        });
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(extract_image(&response), Err(RemoteFailure::NoImage));

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(extract_image(&empty), Err(RemoteFailure::NoImage));
    }

    #[test]
    fn broken_base64_is_malformed() {
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "***" } }
            ]}}]
        });
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert!(matches!(extract_image(&response), Err(RemoteFailure::Malformed(_))));
    }
}
