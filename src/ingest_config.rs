//! 导入管线配置
//!
//! 所有启发式阈值集中在这里，附带默认值。判定逻辑（两个条件取或）
//! 固定在 `scan_detector` 中，这里只调参数。
//!
//! 加载顺序：`.env` → `config/ingest.toml`（可选）→ 环境变量
//! `NESE_INGEST__*`（`__` 分隔层级）。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// 文档文件大小限制 (200MB)
pub const DEFAULT_MAX_FILE_BYTES: usize = 200 * 1024 * 1024;

/// 单次请求最多渲染的页数上限
pub const MAX_RASTER_PAGES: usize = 8;

/// 扫描件判定阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanHeuristics {
    /// 文本长度低于该值的页面视为"稀疏页"
    pub low_text_page_chars: usize,
    /// 全文平均每页最少字符数
    pub min_avg_chars_per_page: usize,
}

impl Default for ScanHeuristics {
    fn default() -> Self {
        Self {
            low_text_page_chars: 100,
            min_avg_chars_per_page: 50,
        }
    }
}

/// 页面栅格化参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub max_pages: usize,
    /// 相对页面原始尺寸的放大倍数
    pub render_scale: f32,
    /// JPEG 质量，0–1
    pub jpeg_quality: f32,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            max_pages: MAX_RASTER_PAGES,
            render_scale: 2.0,
            jpeg_quality: 0.85,
        }
    }
}

impl RasterConfig {
    /// 转换为 image crate 使用的 1–100 质量值
    pub fn jpeg_quality_percent(&self) -> u8 {
        (self.jpeg_quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// 视觉转写服务配置（Gemini generateContent 接口）
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            temperature: 0.0,
            max_output_tokens: 8192,
            timeout_secs: 300,
        }
    }
}

// 不打印 api_key
impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_file_bytes: usize,
    /// 显式指定 pdfium 动态库路径；为空时按捆绑路径 → 系统库顺序查找
    pub pdfium_library_path: Option<String>,
    /// pdfium 初始化最长等待时间
    pub engine_init_timeout_ms: u64,
    pub scan: ScanHeuristics,
    pub raster: RasterConfig,
    pub vision: VisionConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            pdfium_library_path: None,
            engine_init_timeout_ms: 10_000,
            scan: ScanHeuristics::default(),
            raster: RasterConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env_and_file() -> Result<Self, IngestError> {
        Self::load(Path::new("config/ingest.toml"))
    }

    pub fn load(file: &Path) -> Result<Self, IngestError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if file.exists() {
            builder = builder.add_source(config::File::from(file));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("NESE_INGEST")
                .prefix_separator("__")
                .separator("__"),
        );

        let loaded = builder
            .build()
            .map_err(|e| IngestError::Configuration(e.to_string()))?;
        let mut cfg: IngestConfig = loaded
            .try_deserialize()
            .map_err(|e| IngestError::Configuration(e.to_string()))?;

        // direct env fallbacks
        if cfg.vision.api_key.is_none() {
            cfg.vision.api_key = std::env::var("GEMINI_API_KEY")
                .ok()
                .or_else(|| std::env::var("API_KEY").ok())
                .filter(|key| !key.trim().is_empty());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_file_bytes == 0 {
            return Err(IngestError::Configuration(
                "max_file_bytes must be positive".to_string(),
            ));
        }
        if self.scan.low_text_page_chars == 0 || self.scan.min_avg_chars_per_page == 0 {
            return Err(IngestError::Configuration(
                "scan thresholds must be positive".to_string(),
            ));
        }
        if !(1..=MAX_RASTER_PAGES).contains(&self.raster.max_pages) {
            return Err(IngestError::Configuration(format!(
                "raster.max_pages must be between 1 and {}, got {}",
                MAX_RASTER_PAGES, self.raster.max_pages
            )));
        }
        if !(self.raster.render_scale >= 2.0 && self.raster.render_scale.is_finite()) {
            return Err(IngestError::Configuration(format!(
                "raster.render_scale must be at least 2.0, got {}",
                self.raster.render_scale
            )));
        }
        if !(0.8..=1.0).contains(&self.raster.jpeg_quality) {
            return Err(IngestError::Configuration(format!(
                "raster.jpeg_quality must be within 0.8..=1.0, got {}",
                self.raster.jpeg_quality
            )));
        }
        Ok(())
    }

    pub fn engine_init_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_init_timeout_ms)
    }
}
