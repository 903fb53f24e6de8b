//! 视觉转写：把扫描页图片交给多模态模型逐字转录
//!
//! `VisionTranscriber` 是外部服务的接缝；`GeminiVisionClient` 按 Gemini
//! `generateContent` 接口实现。本模块不做重试，退避策略由调用方决定。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::TranscriptionError;
use crate::ingest_config::VisionConfig;
use crate::models::PageImage;

/// 默认转写指令
pub const TRANSCRIPTION_INSTRUCTION: &str = "\
Transcribe the attached scanned pages literally, in their original language. \
Do not summarize, translate or correct anything. \
Preserve tables and every numeric value exactly as printed (test scores, percentiles, dates). \
Mark institutional headers, letterheads and stamps as [HEADER: ...]. \
Start each page with a line '--- Page N ---' using the page order of the images.";

/// 追加在原生文本后的转写段落标题
pub const TRANSCRIPT_SECTION_LABEL: &str = "--- Vision transcription ---";

/// 一次转写请求：有序图片 + 指令
#[derive(Debug, Clone)]
pub struct TranscriptionRequest<'a> {
    pub images: &'a [PageImage],
    pub instruction: &'a str,
}

impl<'a> TranscriptionRequest<'a> {
    pub fn new(images: &'a [PageImage]) -> Self {
        Self {
            images,
            instruction: TRANSCRIPTION_INSTRUCTION,
        }
    }
}

#[async_trait]
pub trait VisionTranscriber: Send + Sync {
    /// 返回整段转写文本；空文本视为失败
    async fn transcribe(
        &self,
        request: TranscriptionRequest<'_>,
    ) -> Result<String, TranscriptionError>;
}

/// 把转写结果作为独立段落追加在原生文本之后，原生文本保持不变
pub fn merge_transcript(native_text: &str, transcript: &str) -> String {
    let native = native_text.trim_end();
    let mut merged = String::with_capacity(native.len() + transcript.len() + 64);
    if !native.is_empty() {
        merged.push_str(native);
        merged.push_str("\n\n");
    }
    merged.push_str(TRANSCRIPT_SECTION_LABEL);
    merged.push('\n');
    merged.push_str(transcript.trim());
    merged.push('\n');
    merged
}

pub struct GeminiVisionClient {
    client: Client,
    config: VisionConfig,
}

impl GeminiVisionClient {
    pub fn new(config: VisionConfig) -> Result<Self, TranscriptionError> {
        if config.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(TranscriptionError::NotConfigured(
                "missing API key (set NESE_INGEST__VISION__API_KEY or GEMINI_API_KEY)".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranscriptionError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request_body(&self, request: &TranscriptionRequest<'_>) -> Value {
        let mut parts: Vec<Value> = request
            .images
            .iter()
            .map(|image| {
                json!({
                    "inline_data": {
                        "mime_type": image.mime_type,
                        "data": image.to_base64(),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.instruction }));

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_output_tokens,
            }
        })
    }
}

#[async_trait]
impl VisionTranscriber for GeminiVisionClient {
    async fn transcribe(
        &self,
        request: TranscriptionRequest<'_>,
    ) -> Result<String, TranscriptionError> {
        if request.images.is_empty() {
            return Err(TranscriptionError::NoImages);
        }

        let body = self.build_request_body(&request);
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        info!(
            "[Vision] Sending {} page images to model {}",
            request.images.len(),
            self.config.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| TranscriptionError::Network(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!("[Vision] Gemini API error: {}", status);
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| TranscriptionError::InvalidResponse(e.to_string()))?;

        let transcript = extract_candidate_text(&response_json);
        if transcript.trim().is_empty() {
            let reason = response_json
                .pointer("/candidates/0/finishReason")
                .or_else(|| response_json.pointer("/promptFeedback/blockReason"))
                .and_then(Value::as_str)
                .unwrap_or("none");
            warn!("[Vision] Empty transcript (finish reason: {})", reason);
            return Err(TranscriptionError::EmptyTranscript);
        }

        debug!("[Vision] Received {} chars of transcript", transcript.len());
        Ok(transcript)
    }
}

/// 拼接首个候选的所有文本 part
fn extract_candidate_text(response: &Value) -> String {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}
