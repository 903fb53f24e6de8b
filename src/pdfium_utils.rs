//! Pdfium 公共工具模块
//!
//! 提供 pdfium 库加载、逐页文本片段提取和逐页渲染。
//! 统一加载策略：配置路径 → 应用捆绑库 → 系统库。
//!
//! 管线只依赖 `PdfBackend` trait，pdfium 是它的默认实现；
//! 测试使用内存中的替身实现，不需要本地 pdfium 动态库。

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, error, info};

use crate::error::{IngestError, PdfEngineError};

/// 渲染结果回调：(0 起始页索引, 渲染后的图片)
pub type PageSink<'a> = dyn FnMut(usize, DynamicImage) -> Result<(), PdfEngineError> + 'a;

/// PDF 引擎接口
///
/// 两个方法都是同步 CPU 密集操作，调用方负责放到阻塞线程池执行。
pub trait PdfBackend: Send + Sync {
    /// 按文档顺序返回每一页的文本片段（未拼接）
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<Vec<String>>, PdfEngineError>;

    /// 从第一页开始按顺序渲染前 `page_count` 页，每渲染一页立即交给 `sink`，
    /// 内存中同一时刻只保留一页位图。任何一页失败即整体失败。
    fn render_pages(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        scale: f32,
        sink: &mut PageSink<'_>,
    ) -> Result<(), PdfEngineError>;
}

/// 线程安全的 Pdfium 包装
///
/// pdfium-render 0.8.37 移除了 `PdfiumLibraryBindings` 的 `Send + Sync` trait bound，
/// 但 `thread_safe` feature 已启用，底层 pdfium 库保证线程安全。
struct SyncPdfium(Pdfium);

// SAFETY: pdfium-render 的 `thread_safe` feature 通过互斥锁保证了线程安全
unsafe impl Send for SyncPdfium {}
unsafe impl Sync for SyncPdfium {}

/// 全局 Pdfium 实例缓存
///
/// 动态库只绑定一次；失败结果同样被缓存，避免重复尝试加载。
/// 第一次初始化时传入的路径生效。
static PDFIUM_INSTANCE: OnceLock<Result<SyncPdfium, String>> = OnceLock::new();

fn load_pdfium(library_path: Option<&str>) -> Result<&'static SyncPdfium, String> {
    PDFIUM_INSTANCE
        .get_or_init(|| init_pdfium(library_path))
        .as_ref()
        .map_err(|e| e.clone())
}

fn init_pdfium(library_path: Option<&str>) -> Result<SyncPdfium, String> {
    let candidates = library_path
        .map(PathBuf::from)
        .into_iter()
        .chain(get_bundled_pdfium_path());

    for lib_path in candidates {
        if !lib_path.exists() {
            debug!("[Pdfium] Library not found at {:?}", lib_path);
            continue;
        }
        match Pdfium::bind_to_library(&lib_path) {
            Ok(bindings) => {
                info!("[Pdfium] Using library: {:?}", lib_path);
                return Ok(SyncPdfium(Pdfium::new(bindings)));
            }
            Err(e) => {
                debug!("[Pdfium] Library at {:?} failed to bind: {:?}", lib_path, e);
            }
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => {
            info!("[Pdfium] Using system library");
            Ok(SyncPdfium(Pdfium::new(bindings)))
        }
        Err(e) => {
            error!("[Pdfium] No pdfium library available: {:?}", e);
            Err(format!(
                "pdfium library not found; install libpdfium on the system path or set \
                 pdfium_library_path ({:?})",
                e
            ))
        }
    }
}

/// 获取应用捆绑的 pdfium 库路径
///
/// - macOS: App.app/Contents/Frameworks/libpdfium.dylib
/// - Windows: App/pdfium.dll
/// - Linux: App/lib/libpdfium.so
fn get_bundled_pdfium_path() -> Option<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))?;

    if cfg!(target_os = "macos") {
        Some(exe_dir.join("../Frameworks/libpdfium.dylib"))
    } else if cfg!(target_os = "windows") {
        Some(exe_dir.join("pdfium.dll"))
    } else if cfg!(target_os = "linux") {
        Some(exe_dir.join("lib/libpdfium.so"))
    } else {
        None
    }
}

/// 基于 pdfium 的 `PdfBackend`
pub struct PdfiumBackend {
    pdfium: &'static SyncPdfium,
}

impl PdfiumBackend {
    /// 显式初始化：在阻塞线程池中绑定动态库，最多等待 `timeout`。
    ///
    /// 超时或找不到库时返回 `DependencyUnavailable`，不会无限轮询。
    pub async fn initialize(
        library_path: Option<String>,
        timeout: Duration,
    ) -> Result<Arc<Self>, IngestError> {
        let pdfium = bind_within(timeout, move || load_pdfium(library_path.as_deref())).await?;
        Ok(Arc::new(PdfiumBackend { pdfium }))
    }

    fn load_document<'a>(&'a self, pdf_bytes: &'a [u8]) -> Result<PdfDocument<'a>, PdfEngineError> {
        self.pdfium
            .0
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(|e| PdfEngineError::Load(format!("{:?}", e)))
    }
}

impl PdfBackend for PdfiumBackend {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<Vec<String>>, PdfEngineError> {
        let document = self.load_document(pdf_bytes)?;
        let total_pages = document.pages().len() as usize;
        let mut pages = Vec::with_capacity(total_pages);

        for page_idx in 0..total_pages {
            let page = document
                .pages()
                .get(safe_page_index(page_idx)?)
                .map_err(|e| PdfEngineError::Text {
                    page: page_idx + 1,
                    message: format!("{:?}", e),
                })?;

            // 读取页面文本层（包含表单 XObject 内的文本），按行切成片段
            let text_page = page.text().map_err(|e| PdfEngineError::Text {
                page: page_idx + 1,
                message: format!("{:?}", e),
            })?;
            let fragments: Vec<String> = text_page
                .all()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();

            debug!(
                "[Pdfium] Page {}/{}: {} text fragments",
                page_idx + 1,
                total_pages,
                fragments.len()
            );
            pages.push(fragments);
        }

        Ok(pages)
    }

    fn render_pages(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        scale: f32,
        sink: &mut PageSink<'_>,
    ) -> Result<(), PdfEngineError> {
        let document = self.load_document(pdf_bytes)?;
        let total_pages = document.pages().len() as usize;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

        for page_idx in 0..page_count.min(total_pages) {
            let page = document
                .pages()
                .get(safe_page_index(page_idx)?)
                .map_err(|e| PdfEngineError::Render {
                    page: page_idx + 1,
                    message: format!("{:?}", e),
                })?;

            let bitmap =
                page.render_with_config(&render_config)
                    .map_err(|e| PdfEngineError::Render {
                        page: page_idx + 1,
                        message: format!("{:?}", e),
                    })?;

            sink(page_idx, bitmap.as_image())?;
        }

        Ok(())
    }
}

/// pdfium 不可用时的占位后端：非 PDF 格式照常工作，PDF 请求返回 `Unavailable`
pub struct UnavailablePdfBackend {
    reason: String,
}

impl UnavailablePdfBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PdfBackend for UnavailablePdfBackend {
    fn extract_pages(&self, _pdf_bytes: &[u8]) -> Result<Vec<Vec<String>>, PdfEngineError> {
        Err(PdfEngineError::Unavailable(self.reason.clone()))
    }

    fn render_pages(
        &self,
        _pdf_bytes: &[u8],
        _page_count: usize,
        _scale: f32,
        _sink: &mut PageSink<'_>,
    ) -> Result<(), PdfEngineError> {
        Err(PdfEngineError::Unavailable(self.reason.clone()))
    }
}

/// 在阻塞线程池中执行动态库绑定，最多等待 `timeout`
async fn bind_within<T, F>(timeout: Duration, bind: F) -> Result<T, IngestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(bind)).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(message))) => {
            error!("[Pdfium] {}", message);
            Err(IngestError::DependencyUnavailable(message))
        }
        Ok(Err(join_err)) => Err(IngestError::DependencyUnavailable(format!(
            "pdfium initialization task failed: {}",
            join_err
        ))),
        Err(_) => {
            error!("[Pdfium] Initialization timed out after {}ms", timeout.as_millis());
            Err(IngestError::DependencyUnavailable(format!(
                "pdfium did not initialize within {}ms",
                timeout.as_millis()
            )))
        }
    }
}

/// 安全的页面索引转换（避免 u16 溢出）
fn safe_page_index(idx: usize) -> Result<u16, PdfEngineError> {
    u16::try_from(idx).map_err(|_| PdfEngineError::PageIndex(idx))
}
