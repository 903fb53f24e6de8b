//! PDF 文本密度统计与扫描件判定
//!
//! 输入是每页的文本片段，输出是带页分隔符的汇总文本和判定结果。
//! 纯计算，不涉及 pdfium。

use tracing::debug;

use crate::ingest_config::ScanHeuristics;

/// 单页采样（只在判定期间存在）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTextSample {
    /// 1 起始页码
    pub page_number: usize,
    pub text: String,
    /// 去除首尾空白后的字符数
    pub len: usize,
}

impl PageTextSample {
    /// 片段以单个空格拼接
    pub fn from_fragments(page_number: usize, fragments: &[String]) -> Self {
        let text = fragments.join(" ");
        let len = text.trim().chars().count();
        Self {
            page_number,
            text,
            len,
        }
    }
}

/// 判定结果及其依据的计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanVerdict {
    pub is_scan: bool,
    pub total_pages: usize,
    pub sparse_pages: usize,
    pub total_chars: usize,
}

/// 把每页文本拼成带 `--- Page <i> ---` 分隔的汇总文本，空页不输出
pub fn build_page_text(samples: &[PageTextSample]) -> String {
    let mut output = String::new();
    for sample in samples {
        let trimmed = sample.text.trim();
        if trimmed.is_empty() {
            continue;
        }
        output.push_str(&page_delimiter(sample.page_number));
        output.push('\n');
        output.push_str(trimmed);
        output.push_str("\n\n");
    }
    output
}

pub fn page_delimiter(page_number: usize) -> String {
    format!("--- Page {} ---", page_number)
}

/// 扫描件判定：以下任一成立即视为扫描件
/// - 稀疏页数严格超过总页数一半
/// - 总字符数低于 页数 × 每页平均下限
///
/// 零页文档不是扫描件。
pub fn classify(samples: &[PageTextSample], heuristics: &ScanHeuristics) -> ScanVerdict {
    let total_pages = samples.len();
    let sparse_pages = samples
        .iter()
        .filter(|s| s.len < heuristics.low_text_page_chars)
        .count();
    let total_chars: usize = samples.iter().map(|s| s.len).sum();

    let is_scan = total_pages > 0
        && (sparse_pages * 2 > total_pages
            || total_chars < total_pages.saturating_mul(heuristics.min_avg_chars_per_page));

    debug!(
        "[ScanDetector] pages={}, sparse={}, chars={}, is_scan={}",
        total_pages, sparse_pages, total_chars, is_scan
    );

    ScanVerdict {
        is_scan,
        total_pages,
        sparse_pages,
        total_chars,
    }
}
