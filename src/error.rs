//! 文档导入统一错误类型
//!
//! 管线对外只暴露 `IngestError`；PDF 引擎与视觉转写两个接缝各有自己的
//! 错误类型，由管线包装成对外的错误种类。

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// 管线对外错误
///
/// 每个变体的 Display 都是一条可直接展示给用户的消息，且包含文件名。
#[derive(Debug, Error)]
pub enum IngestError {
    /// 扩展名不在支持列表中
    #[error("Unsupported file format '{extension}' for '{file}'")]
    UnsupportedFormat { file: String, extension: String },

    /// 解析器/渲染器失败（包括 PDF 引擎不可用）
    #[error("Could not extract content from '{file}': {message}")]
    ExtractionFailed { file: String, message: String },

    /// 视觉转写调用失败或未返回可用文本
    #[error("Vision transcription failed for '{file}': {message}")]
    VisionTranscriptionFailed { file: String, message: String },

    /// 文件超出大小限制
    #[error("File '{file}' is {size_mb}MB, above the {limit_mb}MB limit")]
    FileTooLarge {
        file: String,
        size_mb: usize,
        limit_mb: usize,
    },

    /// 显式初始化 PDF 引擎失败
    #[error("PDF engine unavailable: {0}")]
    DependencyUnavailable(String),

    /// 配置非法
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// 读取输入失败（路径 / base64）
    #[error("Could not read '{file}': {message}")]
    Input { file: String, message: String },
}

impl IngestError {
    pub fn extraction(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn vision(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::VisionTranscriptionFailed {
            file: file.into(),
            message: message.into(),
        }
    }

    /// 稳定的错误码，供 UI 层按类型区分处理
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            IngestError::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            IngestError::VisionTranscriptionFailed { .. } => "VISION_TRANSCRIPTION_FAILED",
            IngestError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            IngestError::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            IngestError::Configuration(_) => "CONFIGURATION_ERROR",
            IngestError::Input { .. } => "INPUT_ERROR",
        }
    }

    /// 同一文件重试是否有意义
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::VisionTranscriptionFailed { .. } | IngestError::DependencyUnavailable(_)
        )
    }
}

// 序列化为 {code, message}，便于前端按 code 差异化处理
impl Serialize for IngestError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("IngestError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// PDF 引擎接缝错误
#[derive(Debug, Error)]
pub enum PdfEngineError {
    #[error("pdfium library is not available: {0}")]
    Unavailable(String),

    #[error("failed to load PDF document: {0}")]
    Load(String),

    #[error("failed to read text of page {page}: {message}")]
    Text { page: usize, message: String },

    #[error("failed to render page {page}: {message}")]
    Render { page: usize, message: String },

    #[error("page index {0} exceeds the maximum supported by pdfium")]
    PageIndex(usize),
}

/// 视觉转写接缝错误
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("response contained no usable text")]
    EmptyTranscript,

    #[error("no images to transcribe")]
    NoImages,

    #[error("transcription service is not configured: {0}")]
    NotConfigured(String),
}
