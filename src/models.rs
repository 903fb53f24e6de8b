// 文档导入管线的数据模型

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// 支持的文档格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    WordProcessor,
    Spreadsheet,
    Pdf,
}

impl DocumentFormat {
    /// 按扩展名识别格式（大小写不敏感，不含点）
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "txt" => Some(Self::PlainText),
            "docx" => Some(Self::WordProcessor),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// 从文件名推断格式；无法识别时返回 `UnsupportedFormat`
    ///
    /// 取最后一个 `.` 之后的部分，因此 `.pdf` 这样的文件名同样可以识别。
    pub fn from_file_name(file_name: &str) -> Result<Self, IngestError> {
        let base_name = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(file_name);
        let extension = base_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("")
            .to_lowercase();

        Self::from_extension(&extension).ok_or_else(|| IngestError::UnsupportedFormat {
            file: file_name.to_string(),
            extension,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::WordProcessor => "word_processor",
            Self::Spreadsheet => "spreadsheet",
            Self::Pdf => "pdf",
        }
    }
}

/// 一次上传的文件（不可变）
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    bytes: Arc<[u8]>,
    format: DocumentFormat,
}

impl SourceFile {
    /// 由文件名和字节构造；扩展名不受支持时立即失败
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, IngestError> {
        let name = name.into();
        let format = DocumentFormat::from_file_name(&name)?;
        Ok(Self {
            name,
            bytes: bytes.into(),
            format,
        })
    }

    /// 从磁盘读取
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        // 先校验格式，避免读取不支持的大文件
        DocumentFormat::from_file_name(&name)?;

        let bytes = tokio::fs::read(path).await.map_err(|e| IngestError::Input {
            file: name.clone(),
            message: e.to_string(),
        })?;
        Self::new(name, bytes)
    }

    /// 从 base64 内容构造，支持 Data URL（`data:application/pdf;base64,...`）
    pub fn from_base64(name: impl Into<String>, content: &str) -> Result<Self, IngestError> {
        let name = name.into();
        let raw_b64 = if content.starts_with("data:") {
            content.split(',').nth(1).ok_or_else(|| IngestError::Input {
                file: name.clone(),
                message: "data URL is missing its base64 payload".to_string(),
            })?
        } else {
            content
        };

        let bytes = general_purpose::STANDARD
            .decode(raw_b64.trim())
            .map_err(|e| IngestError::Input {
                file: name.clone(),
                message: format!("invalid base64: {}", e),
            })?;
        Self::new(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// 共享字节，供阻塞线程池任务持有
    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}

/// 单页渲染图片（已编码）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1 起始页码
    pub page_number: usize,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl PageImage {
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.data)
    }
}

/// 管线唯一输出
///
/// 不变量：`images` 非空当且仅当 `is_scan` 为真。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    pub is_scan: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<PageImage>,
}

impl ExtractionResult {
    pub fn native(text: String) -> Self {
        Self {
            text,
            is_scan: false,
            images: Vec::new(),
        }
    }

    /// 扫描件结果；调用方保证 `images` 非空
    pub(crate) fn scan(text: String, images: Vec<PageImage>) -> Self {
        debug_assert!(!images.is_empty());
        Self {
            text,
            is_scan: true,
            images,
        }
    }

    /// 追加到观察记录时使用的带标签文本块
    pub fn labeled(&self, file_name: &str) -> String {
        format!("[Content of {}]:\n{}", file_name, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn recognizes_extensions_case_insensitively() {
        assert_eq!(
            DocumentFormat::from_file_name("Informe.PDF").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_file_name("notes.xls").unwrap(),
            DocumentFormat::Spreadsheet
        );
        assert_eq!(
            DocumentFormat::from_file_name("notes.xlsx").unwrap(),
            DocumentFormat::Spreadsheet
        );
        assert_eq!(
            DocumentFormat::from_file_name("a.b.docx").unwrap(),
            DocumentFormat::WordProcessor
        );
    }

    #[test]
    fn bare_extension_names_are_recognized() {
        assert_eq!(
            DocumentFormat::from_file_name(".pdf").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_file_name("uploads/.XLSX").unwrap(),
            DocumentFormat::Spreadsheet
        );
    }

    #[test]
    fn unknown_or_missing_extension_is_unsupported() {
        assert_matches!(
            DocumentFormat::from_file_name("README"),
            Err(IngestError::UnsupportedFormat { extension, .. }) if extension.is_empty()
        );
        assert_matches!(
            DocumentFormat::from_file_name("slides.pptx"),
            Err(IngestError::UnsupportedFormat { extension, .. }) if extension == "pptx"
        );
    }

    #[test]
    fn base64_accepts_data_urls() {
        let file = SourceFile::from_base64("a.txt", "data:text/plain;base64,aG9sYQ==").unwrap();
        assert_eq!(file.bytes(), b"hola");

        let file = SourceFile::from_base64("a.txt", "aG9sYQ==").unwrap();
        assert_eq!(file.bytes(), b"hola");
    }

    #[test]
    fn invalid_base64_is_an_input_error() {
        assert_matches!(
            SourceFile::from_base64("a.txt", "not base64!!"),
            Err(IngestError::Input { .. })
        );
        assert_matches!(
            SourceFile::from_base64("a.txt", "data:text/plain;base64"),
            Err(IngestError::Input { .. })
        );
    }

    #[test]
    fn labeled_block_names_the_file() {
        let result = ExtractionResult::native("Lectura: 3/5".to_string());
        assert_eq!(
            result.labeled("avaluacio.txt"),
            "[Content of avaluacio.txt]:\nLectura: 3/5"
        );
    }

    #[test]
    fn native_result_serializes_without_images() {
        let value = serde_json::to_value(ExtractionResult::native("x".into())).unwrap();
        assert_eq!(value["is_scan"], false);
        assert!(value.get("images").is_none());
    }
}
