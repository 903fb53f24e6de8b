//! 文档导入管线
//!
//! 单次调用流程：大小检查 → 按格式分发 → (PDF) 文本密度判定 → (扫描件) 栅格化。
//! 视觉转写是独立的第二步，由调用方决定是否执行以及失败后的处理方式。
//!
//! 管线本身不持有可变状态，可放在 `Arc` 中被并发调用。

use std::fmt::{self, Display};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::document_parser::{extract_docx_text, extract_plain_text, extract_sheets, render_sheets};
use crate::error::{IngestError, PdfEngineError, TranscriptionError};
use crate::ingest_config::IngestConfig;
use crate::models::{DocumentFormat, ExtractionResult, PageImage, SourceFile};
use crate::page_rasterizer::PageRasterizer;
use crate::pdfium_utils::{PdfBackend, PdfiumBackend};
use crate::scan_detector::{build_page_text, classify, PageTextSample, ScanVerdict};
use crate::vision_transcriber::{merge_transcript, TranscriptionRequest, VisionTranscriber};

/// 视觉转写失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionFailurePolicy {
    /// 整个调用失败
    #[default]
    Fail,
    /// 保留原生文本，记录错误
    KeepNativeText,
}

/// `extract_with_recovery` 的结果
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub result: ExtractionResult,
    pub vision_used: bool,
    /// `KeepNativeText` 策略下被吞掉的转写错误
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_error: Option<String>,
    /// 原生文本，或原生文本 + 转写段落
    pub merged_text: String,
}

impl IngestOutcome {
    pub fn labeled(&self, file_name: &str) -> String {
        format!("[Content of {}]:\n{}", file_name, self.merged_text)
    }
}

/// PDF 阻塞任务的中间结果
struct PdfExtraction {
    text: String,
    verdict: ScanVerdict,
    images: Vec<PageImage>,
}

pub struct IngestionPipeline {
    config: IngestConfig,
    pdf: Arc<dyn PdfBackend>,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    pub fn new(config: IngestConfig, pdf: Arc<dyn PdfBackend>) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config, pdf })
    }

    /// 初始化 pdfium 后构造管线；引擎不可用时返回 `DependencyUnavailable`
    pub async fn with_pdfium(config: IngestConfig) -> Result<Self, IngestError> {
        let backend = PdfiumBackend::initialize(
            config.pdfium_library_path.clone(),
            config.engine_init_timeout(),
        )
        .await?;
        Self::new(config, backend)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// 提取文件内容。同一文件重复调用得到相同的 `text` 与 `is_scan`。
    pub async fn extract(&self, file: &SourceFile) -> Result<ExtractionResult, IngestError> {
        self.check_size(file)?;
        info!(
            "[Ingest] Extracting '{}' as {} ({} bytes)",
            file.name(),
            file.format().as_str(),
            file.bytes().len()
        );

        let result = match file.format() {
            DocumentFormat::PlainText => ExtractionResult::native(extract_plain_text(file.bytes())),
            DocumentFormat::WordProcessor => {
                let bytes = file.shared_bytes();
                let text = run_blocking(file.name(), move || extract_docx_text(&bytes)).await?;
                ExtractionResult::native(text)
            }
            DocumentFormat::Spreadsheet => {
                let bytes = file.shared_bytes();
                let text = run_blocking(file.name(), move || {
                    extract_sheets(&bytes).map(|sheets| render_sheets(&sheets))
                })
                .await?;
                ExtractionResult::native(text)
            }
            DocumentFormat::Pdf => self.extract_pdf(file).await?,
        };

        info!(
            "[Ingest] '{}' done: {} chars, is_scan={}, images={}",
            file.name(),
            result.text.len(),
            result.is_scan,
            result.images.len()
        );
        Ok(result)
    }

    fn check_size(&self, file: &SourceFile) -> Result<(), IngestError> {
        let size = file.bytes().len();
        if size > self.config.max_file_bytes {
            let err = IngestError::FileTooLarge {
                file: file.name().to_string(),
                size_mb: size / (1024 * 1024),
                limit_mb: self.config.max_file_bytes / (1024 * 1024),
            };
            warn!("[Ingest] {}", err);
            return Err(err);
        }
        Ok(())
    }

    async fn extract_pdf(&self, file: &SourceFile) -> Result<ExtractionResult, IngestError> {
        let pdf = Arc::clone(&self.pdf);
        let bytes = file.shared_bytes();
        let heuristics = self.config.scan.clone();
        let raster = self.config.raster.clone();

        let extraction = run_blocking(file.name(), move || -> Result<_, PdfEngineError> {
            let pages = pdf.extract_pages(&bytes)?;
            let samples: Vec<PageTextSample> = pages
                .iter()
                .enumerate()
                .map(|(idx, fragments)| PageTextSample::from_fragments(idx + 1, fragments))
                .collect();

            let text = build_page_text(&samples);
            let verdict = classify(&samples, &heuristics);
            let images = if verdict.is_scan {
                PageRasterizer::new(pdf.as_ref(), &raster).rasterize(&bytes, verdict.total_pages)?
            } else {
                Vec::new()
            };

            Ok(PdfExtraction {
                text,
                verdict,
                images,
            })
        })
        .await?;

        let PdfExtraction {
            text,
            verdict,
            images,
        } = extraction;
        info!(
            "[Ingest] PDF '{}': {} pages, {} sparse, {} chars, is_scan={}",
            file.name(),
            verdict.total_pages,
            verdict.sparse_pages,
            verdict.total_chars,
            verdict.is_scan
        );

        if verdict.is_scan {
            Ok(ExtractionResult::scan(text, images))
        } else {
            Ok(ExtractionResult::native(text))
        }
    }

    /// 对扫描件执行视觉转写并合并到原生文本之后；非扫描件直接返回原文
    pub async fn transcribe_scan(
        &self,
        file_name: &str,
        result: &ExtractionResult,
        transcriber: &dyn VisionTranscriber,
    ) -> Result<String, IngestError> {
        if !result.is_scan {
            debug!("[Ingest] '{}' is text-native, skipping vision", file_name);
            return Ok(result.text.clone());
        }

        let transcript = transcriber
            .transcribe(TranscriptionRequest::new(&result.images))
            .await
            .map_err(|e| {
                error!("[Ingest] Vision transcription failed for '{}': {}", file_name, e);
                IngestError::vision(file_name, e.to_string())
            })?;

        // 任何实现返回空白文本都不算成功
        if transcript.trim().is_empty() {
            error!("[Ingest] Vision returned no usable text for '{}'", file_name);
            return Err(IngestError::vision(
                file_name,
                TranscriptionError::EmptyTranscript.to_string(),
            ));
        }

        Ok(merge_transcript(&result.text, &transcript))
    }

    /// 提取 + （扫描件）转写的一站式调用
    ///
    /// `transcriber` 为 `None` 时扫描件只返回原生文本。
    pub async fn extract_with_recovery(
        &self,
        file: &SourceFile,
        transcriber: Option<&dyn VisionTranscriber>,
        policy: VisionFailurePolicy,
    ) -> Result<IngestOutcome, IngestError> {
        let result = self.extract(file).await?;

        let transcriber = match transcriber {
            Some(t) if result.is_scan => t,
            _ => {
                let merged_text = result.text.clone();
                return Ok(IngestOutcome {
                    result,
                    vision_used: false,
                    vision_error: None,
                    merged_text,
                });
            }
        };

        match self.transcribe_scan(file.name(), &result, transcriber).await {
            Ok(merged_text) => Ok(IngestOutcome {
                result,
                vision_used: true,
                vision_error: None,
                merged_text,
            }),
            Err(err) => match policy {
                VisionFailurePolicy::Fail => Err(err),
                VisionFailurePolicy::KeepNativeText => {
                    warn!("[Ingest] Keeping native text for '{}'", file.name());
                    let merged_text = result.text.clone();
                    Ok(IngestOutcome {
                        result,
                        vision_used: false,
                        vision_error: Some(err.to_string()),
                        merged_text,
                    })
                }
            },
        }
    }
}

/// 在阻塞线程池中运行解析任务，任何失败都归为 `ExtractionFailed`
async fn run_blocking<T, E, F>(file_name: &str, task: F) -> Result<T, IngestError>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("[Ingest] Extraction failed for '{}': {}", file_name, e);
            Err(IngestError::extraction(file_name, e.to_string()))
        }
        Err(join_err) => {
            error!("[Ingest] Extraction task for '{}' aborted: {}", file_name, join_err);
            Err(IngestError::extraction(
                file_name,
                format!("extraction task aborted: {}", join_err),
            ))
        }
    }
}
