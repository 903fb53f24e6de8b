// NESE report ingestion library entry
// 文档导入管线：格式分发、PDF 扫描件判定、页面栅格化与视觉转写合并。

pub mod document_parser;
pub mod error;
pub mod ingest_config;
pub mod ingestion_pipeline;
pub mod models;
pub mod page_rasterizer;
pub mod pdfium_utils; // Pdfium 公共工具（库加载 + 文本提取 + 渲染）
pub mod scan_detector;
pub mod vision_transcriber;

pub use error::{IngestError, PdfEngineError, TranscriptionError};
pub use ingest_config::{IngestConfig, RasterConfig, ScanHeuristics, VisionConfig};
pub use ingestion_pipeline::{IngestOutcome, IngestionPipeline, VisionFailurePolicy};
pub use models::{DocumentFormat, ExtractionResult, PageImage, SourceFile};
pub use pdfium_utils::{PageSink, PdfBackend, PdfiumBackend, UnavailablePdfBackend};
pub use vision_transcriber::{GeminiVisionClient, TranscriptionRequest, VisionTranscriber};
