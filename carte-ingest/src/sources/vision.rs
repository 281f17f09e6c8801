//! Vision fallback adapter
//!
//! Last resort for brands whose sites defeat both structured extraction and
//! transcript scraping. Delegates to an external screenshot-transcription
//! service: the service loads the URL headlessly, screenshots it, and runs
//! the image through an OCR model. What comes back is plain text for the
//! segmentation path of the normalizer. Identity is taken on trust because
//! the URLs come from the registry's `known_urls`, not from a search.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use carte_common::config::{SourceConfig, VisionConfig};
use carte_common::model::{BrandTarget, SourceId};
use carte_common::{Error, Result};

use super::{FetchError, RawCandidate, RawPayload};
use crate::scheduler::pacing::SourcePacer;

pub struct VisionAdapter {
    client: reqwest::Client,
    pacer: Arc<SourcePacer>,
    endpoint: String,
    model: String,
    max_candidates: usize,
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    url: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    transcript: String,
}

impl VisionAdapter {
    pub fn new(
        source_config: &SourceConfig,
        vision_config: &VisionConfig,
        pacer: Arc<SourcePacer>,
    ) -> Result<Self> {
        let endpoint = vision_config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("vision.endpoint is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(vision_config.timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("vision HTTP client: {}", e)))?;
        Ok(Self {
            client,
            pacer,
            endpoint,
            model: vision_config.model.clone(),
            max_candidates: source_config.max_candidates,
        })
    }

    async fn transcribe(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&TranscribeRequest {
                url,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if status.is_server_error() {
            return Err(FetchError::ServiceUnavailable(format!(
                "transcription service returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "transcription service returned {} for {}",
                status, url
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("transcription response decode: {}", e)))?;
        Ok(body.transcript)
    }
}

#[async_trait]
impl super::SourceAdapter for VisionAdapter {
    fn id(&self) -> SourceId {
        SourceId::Vision
    }

    async fn fetch_candidates(
        &self,
        brand: &BrandTarget,
    ) -> std::result::Result<Vec<RawCandidate>, FetchError> {
        if brand.known_urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut last_error = None;
        for url in brand.known_urls.iter().take(self.max_candidates) {
            self.pacer.pace(SourceId::Vision).await;
            match self.transcribe(url).await {
                Ok(transcript) if transcript.trim().is_empty() => {
                    tracing::debug!(brand = %brand.slug, url = %url, "empty transcript");
                }
                Ok(transcript) => candidates.push(RawCandidate {
                    source: SourceId::Vision,
                    display_name: brand.canonical_name.clone(),
                    source_url: url.clone(),
                    payload: RawPayload::from_transcript(transcript),
                }),
                Err(e) => {
                    tracing::warn!(brand = %brand.slug, url = %url, error = %e, "transcription failed");
                    last_error = Some(e);
                }
            }
        }

        if candidates.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(candidates)
    }
}
