//! 扫描件页面栅格化
//!
//! 把判定为扫描件的 PDF 前若干页渲染为 JPEG，供视觉转写使用。
//!
//! 设计要点：
//! - 从第 1 页开始按顺序渲染，最多 `max_pages` 页，选中的页不会跳过
//! - 每页渲染后立即编码，原始位图随即释放
//! - 任意一页渲染或编码失败，整批失败，不返回部分结果

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::{debug, info};

use crate::error::PdfEngineError;
use crate::ingest_config::RasterConfig;
use crate::models::PageImage;
use crate::pdfium_utils::PdfBackend;

pub const JPEG_MIME: &str = "image/jpeg";

pub struct PageRasterizer<'a> {
    backend: &'a dyn PdfBackend,
    config: &'a RasterConfig,
}

impl<'a> PageRasterizer<'a> {
    pub fn new(backend: &'a dyn PdfBackend, config: &'a RasterConfig) -> Self {
        Self { backend, config }
    }

    /// 纯 CPU 渲染（可安全在 spawn_blocking 中调用）
    pub fn rasterize(
        &self,
        pdf_bytes: &[u8],
        total_pages: usize,
    ) -> Result<Vec<PageImage>, PdfEngineError> {
        let selected = total_pages.min(self.config.max_pages);
        info!(
            "[PageRasterizer] PDF 共 {} 页，渲染前 {} 页 (scale {}x, quality {})",
            total_pages,
            selected,
            self.config.render_scale,
            self.config.jpeg_quality_percent()
        );

        let quality = self.config.jpeg_quality_percent();
        let mut images = Vec::with_capacity(selected);

        self.backend.render_pages(
            pdf_bytes,
            selected,
            self.config.render_scale,
            &mut |page_idx, image| {
                let encoded = encode_jpeg(page_idx + 1, &image, quality)?;
                debug!(
                    "[PageRasterizer] 页面 {}/{}: {}x{}, {} bytes",
                    encoded.page_number,
                    selected,
                    encoded.width,
                    encoded.height,
                    encoded.data.len()
                );
                images.push(encoded);
                Ok(())
            },
        )?;

        // 后端少交付页面同样视为失败
        if images.len() != selected {
            return Err(PdfEngineError::Render {
                page: images.len() + 1,
                message: format!("expected {} rendered pages, got {}", selected, images.len()),
            });
        }

        Ok(images)
    }
}

/// 编码单页 JPEG
pub fn encode_jpeg(
    page_number: usize,
    image: &DynamicImage,
    quality: u8,
) -> Result<PageImage, PdfEngineError> {
    let rgb_image = image.to_rgb8();
    let (width, height) = rgb_image.dimensions();

    let mut jpeg_bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
    encoder
        .encode(rgb_image.as_raw(), width, height, image::ColorType::Rgb8)
        .map_err(|e| PdfEngineError::Render {
            page: page_number,
            message: format!("JPEG encoding failed: {}", e),
        })?;

    Ok(PageImage {
        page_number,
        mime_type: JPEG_MIME.to_string(),
        width,
        height,
        data: jpeg_bytes,
    })
}
