//! 集成测试共用的替身与样本构造
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use nese_ingest_lib::{
    IngestConfig, IngestionPipeline, PageSink, PdfBackend, PdfEngineError, SourceFile,
    TranscriptionError, TranscriptionRequest, VisionTranscriber,
};

/// 脚本化的 PDF 后端：每页的文本片段预先给定
///
/// 渲染出的图片宽度 = 100 + 页索引，用来校验页面顺序。
pub struct FakePdfBackend {
    pages: Vec<Vec<String>>,
    fail_render_page: Option<usize>,
    rendered: Mutex<Vec<usize>>,
}

impl FakePdfBackend {
    pub fn new(pages: Vec<Vec<String>>) -> Self {
        Self {
            pages,
            fail_render_page: None,
            rendered: Mutex::new(Vec::new()),
        }
    }

    /// 每页一个片段，长度分别为 `lengths`
    pub fn with_page_lengths(lengths: &[usize]) -> Self {
        Self::new(lengths.iter().map(|len| page_fragments(*len)).collect())
    }

    /// 渲染到该页（1 起始）时失败
    pub fn failing_render_at(mut self, page_number: usize) -> Self {
        self.fail_render_page = Some(page_number);
        self
    }

    /// 已交给 sink 的页码（1 起始）
    pub fn rendered_pages(&self) -> Vec<usize> {
        self.rendered.lock().unwrap().clone()
    }
}

impl PdfBackend for FakePdfBackend {
    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<Vec<String>>, PdfEngineError> {
        if !pdf_bytes.starts_with(b"%PDF") {
            return Err(PdfEngineError::Load("missing %PDF header".to_string()));
        }
        Ok(self.pages.clone())
    }

    fn render_pages(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        _scale: f32,
        sink: &mut PageSink<'_>,
    ) -> Result<(), PdfEngineError> {
        if !pdf_bytes.starts_with(b"%PDF") {
            return Err(PdfEngineError::Load("missing %PDF header".to_string()));
        }
        for idx in 0..page_count.min(self.pages.len()) {
            if self.fail_render_page == Some(idx + 1) {
                return Err(PdfEngineError::Render {
                    page: idx + 1,
                    message: "bitmap allocation failed".to_string(),
                });
            }
            let image = RgbImage::from_pixel(100 + idx as u32, 140, Rgb([240, 240, 240]));
            self.rendered.lock().unwrap().push(idx + 1);
            sink(idx, DynamicImage::ImageRgb8(image))?;
        }
        Ok(())
    }
}

/// 一个长度为 `chars` 的片段（0 时没有片段）
pub fn page_fragments(chars: usize) -> Vec<String> {
    if chars == 0 {
        Vec::new()
    } else {
        vec!["a".repeat(chars)]
    }
}

pub fn fake_pdf(name: &str) -> SourceFile {
    SourceFile::new(name, b"%PDF-1.7\n%fake body\n".to_vec()).unwrap()
}

pub fn pipeline_with(backend: Arc<FakePdfBackend>) -> IngestionPipeline {
    IngestionPipeline::new(IngestConfig::default(), backend).unwrap()
}

/// 视觉转写替身：返回固定文本或固定错误，并记录收到的页码顺序
pub struct ScriptedTranscriber {
    reply: Option<String>,
    calls: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedTranscriber {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<usize>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionTranscriber for ScriptedTranscriber {
    async fn transcribe(
        &self,
        request: TranscriptionRequest<'_>,
    ) -> Result<String, TranscriptionError> {
        self.calls
            .lock()
            .unwrap()
            .push(request.images.iter().map(|i| i.page_number).collect());
        match &self.reply {
            Some(text) => Ok(text.clone()),
            None => Err(TranscriptionError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            }),
        }
    }
}

/// 单元格：空字符串不写入，以 `=` 开头的按数值写入，其余按内联字符串
fn cell_xml(reference: &str, value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    match value.strip_prefix('=') {
        Some(number) => format!(r#"<c r="{}"><v>{}</v></c>"#, reference, number),
        None => format!(
            r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
            reference, value
        ),
    }
}

fn column_name(idx: usize) -> char {
    (b'A' + idx as u8) as char
}

fn sheet_xml(rows: &[Vec<&str>]) -> String {
    let mut data = String::new();
    for (r, row) in rows.iter().enumerate() {
        if row.iter().all(|value| value.is_empty()) {
            continue;
        }
        data.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            data.push_str(&cell_xml(&format!("{}{}", column_name(c), r + 1), value));
        }
        data.push_str("</row>");
    }
    let sheet_data = if data.is_empty() {
        "<sheetData/>".to_string()
    } else {
        format!("<sheetData>{}</sheetData>", data)
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{}</worksheet>"#,
        sheet_data
    )
}

/// 在内存中构造最小 xlsx 工作簿，工作表按给定顺序排列
pub fn build_xlsx(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    let mut workbook_sheets = String::new();
    let mut workbook_rels = String::new();
    for (idx, (name, _)) in sheets.iter().enumerate() {
        let n = idx + 1;
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            n
        ));
        workbook_sheets.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            name, n, n
        ));
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            n, n
        ));
    }
    content_types.push_str("</Types>");

    let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
        workbook_sheets
    );
    let workbook_rels = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        workbook_rels
    );

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    let mut add = |path: &str, body: &str| {
        zip.start_file(path, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    };
    add("[Content_Types].xml", &content_types);
    add("_rels/.rels", root_rels);
    add("xl/workbook.xml", &workbook);
    add("xl/_rels/workbook.xml.rels", &workbook_rels);
    for (idx, (_, rows)) in sheets.iter().enumerate() {
        add(&format!("xl/worksheets/sheet{}.xml", idx + 1), &sheet_xml(rows));
    }
    zip.finish().unwrap().into_inner()
}

/// 在内存中构造 docx：若干段落 + 可选表格
pub fn build_docx(paragraphs: &[&str], table: Option<Vec<Vec<&str>>>) -> Vec<u8> {
    use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};

    let mut docx = Docx::new();
    for text in paragraphs {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)));
    }
    if let Some(rows) = table {
        let rows = rows
            .into_iter()
            .map(|cells| {
                TableRow::new(
                    cells
                        .into_iter()
                        .map(|c| TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text(c))))
                        .collect(),
                )
            })
            .collect();
        docx = docx.add_table(Table::new(rows));
    }

    let mut buf = Cursor::new(Vec::new());
    docx.build().pack(&mut buf).unwrap();
    buf.into_inner()
}
