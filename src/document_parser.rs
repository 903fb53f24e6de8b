use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use thiserror::Error;
use tracing::debug;

/// 非 PDF 格式的解析错误
#[derive(Debug, Error)]
pub enum ParsingError {
    #[error("DOCX parsing error: {0}")]
    Docx(String),

    #[error("spreadsheet parsing error: {0}")]
    Spreadsheet(String),

    #[error("CSV rendering error: {0}")]
    Csv(String),
}

/// 一个工作表的 CSV 渲染
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetText {
    pub name: String,
    /// 每行一条 CSV 记录；空表为空向量
    pub rows: Vec<String>,
}

pub fn sheet_delimiter(name: &str) -> String {
    format!("--- Sheet: {} ---", name)
}

/// 纯文本：按 UTF-8 解码（识别 BOM，非法字节替换），其余原样返回
pub fn extract_plain_text(bytes: &[u8]) -> String {
    let (text, encoding, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        debug!(
            "[DocumentParser] plain text had invalid {} sequences, replaced",
            encoding.name()
        );
    }
    text.into_owned()
}

/// 按工作簿顺序读取所有工作表
pub fn extract_sheets(bytes: &[u8]) -> Result<Vec<SheetText>, ParsingError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ParsingError::Spreadsheet(format!("cannot open workbook: {}", e)))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for sheet_name in sheet_names {
        let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
            ParsingError::Spreadsheet(format!("cannot read sheet '{}': {}", sheet_name, e))
        })?;

        // calamine 的区域从第一个非空单元格开始；补齐前导空行空列，使网格从 A1 起算
        let (row_offset, col_offset) = range
            .start()
            .map(|(row, col)| (row as usize, col as usize))
            .unwrap_or((0, 0));
        let width = col_offset + range.width();

        let mut rows = Vec::with_capacity(row_offset + range.height());
        for _ in 0..row_offset {
            rows.push(csv_record(&vec![String::new(); width])?);
        }
        for row in range.rows() {
            let mut cells = vec![String::new(); col_offset];
            cells.extend(row.iter().map(data_to_string));
            rows.push(csv_record(&cells)?);
        }

        debug!(
            "[DocumentParser] sheet '{}': {} rows",
            sheet_name,
            rows.len()
        );
        sheets.push(SheetText {
            name: sheet_name,
            rows,
        });
    }

    Ok(sheets)
}

/// 每个工作表输出分隔行 + CSV 行，工作表之间以空行分隔
pub fn render_sheets(sheets: &[SheetText]) -> String {
    let mut text_content = String::with_capacity(8192);
    for sheet in sheets {
        text_content.push_str(&sheet_delimiter(&sheet.name));
        text_content.push('\n');
        for row in &sheet.rows {
            text_content.push_str(row);
            text_content.push('\n');
        }
        text_content.push('\n');
    }
    text_content
}

fn csv_record(cells: &[String]) -> Result<String, ParsingError> {
    // 全空行直接输出逗号；csv 会把单个空字段写成 `""`
    if cells.iter().all(|c| c.is_empty()) {
        return Ok(",".repeat(cells.len().saturating_sub(1)));
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(cells)
        .map_err(|e| ParsingError::Csv(e.to_string()))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| ParsingError::Csv(e.to_string()))?;

    let line = String::from_utf8_lossy(&bytes);
    Ok(line.trim_end_matches('\n').to_string())
}

/// 将单元格数据转换为字符串
fn data_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // 整数值不显示小数点
            if f.fract() == 0.0 {
                format!("{:.0}", f)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{:.6}", dt),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

/// DOCX：只取段落纯文本，一段一行；表格按行展开，单元格以制表符分隔
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, ParsingError> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| ParsingError::Docx(e.to_string()))?;
    let mut text_content = String::with_capacity(8192);

    for child in &docx.document.children {
        match child {
            docx_rs::DocumentChild::Paragraph(para) => {
                let line = extract_paragraph_text(para);
                if !line.trim().is_empty() {
                    text_content.push_str(&line);
                    text_content.push('\n');
                }
            }
            docx_rs::DocumentChild::Table(table) => {
                extract_table_text(table, &mut text_content);
            }
            docx_rs::DocumentChild::TableOfContents(toc) => {
                for item in &toc.items {
                    if !item.text.is_empty() {
                        text_content.push_str(&item.text);
                        text_content.push('\n');
                    }
                }
            }
            _ => {}
        }
    }

    Ok(text_content.trim_end().to_string())
}

/// 段落纯文本（Run / Hyperlink / Insert；删除修订不计入）
fn extract_paragraph_text(para: &docx_rs::Paragraph) -> String {
    let mut line = String::new();
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => {
                extract_run_text(run, &mut line);
            }
            docx_rs::ParagraphChild::Hyperlink(hyperlink) => {
                for run in &hyperlink.children {
                    if let docx_rs::ParagraphChild::Run(r) = run {
                        extract_run_text(r, &mut line);
                    }
                }
            }
            docx_rs::ParagraphChild::Insert(ins) => {
                for ic in &ins.children {
                    if let docx_rs::InsertChild::Run(r) = ic {
                        extract_run_text(r, &mut line);
                    }
                }
            }
            _ => {}
        }
    }
    line
}

fn extract_run_text(run: &docx_rs::Run, out: &mut String) {
    for rc in &run.children {
        match rc {
            docx_rs::RunChild::Text(t) => out.push_str(&t.text),
            docx_rs::RunChild::Tab(_) => out.push('\t'),
            docx_rs::RunChild::Break(_) => out.push('\n'),
            _ => {}
        }
    }
}

fn extract_table_text(table: &docx_rs::Table, out: &mut String) {
    for tc in &table.rows {
        let mut cells: Vec<String> = Vec::new();
        if let docx_rs::TableChild::TableRow(row) = tc {
            for rc in &row.cells {
                if let docx_rs::TableRowChild::TableCell(cell) = rc {
                    let mut cell_text = String::new();
                    for cc in &cell.children {
                        if let docx_rs::TableCellContent::Paragraph(para) = cc {
                            let t = extract_paragraph_text(para);
                            if !t.trim().is_empty() {
                                if !cell_text.is_empty() {
                                    cell_text.push(' ');
                                }
                                cell_text.push_str(t.trim());
                            }
                        }
                    }
                    cells.push(cell_text);
                }
            }
        }
        if cells.iter().any(|c| !c.is_empty()) {
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_verbatim() {
        let text = extract_plain_text("  Observacions:\n- llegeix amb dificultat  \n".as_bytes());
        assert_eq!(text, "  Observacions:\n- llegeix amb dificultat  \n");
    }

    #[test]
    fn plain_text_strips_bom_and_replaces_invalid_bytes() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"Nivell ");
        bytes.push(0xFF);
        assert_eq!(extract_plain_text(&bytes), "Nivell \u{FFFD}");
    }

    #[test]
    fn csv_quotes_cells_with_commas() {
        let cells = vec!["Comprensió, lectora".to_string(), "7".to_string(), String::new()];
        assert_eq!(csv_record(&cells).unwrap(), "\"Comprensió, lectora\",7,");
    }

    #[test]
    fn blank_rows_are_bare_commas() {
        assert_eq!(csv_record(&vec![String::new(); 3]).unwrap(), ",,");
        assert_eq!(csv_record(&[String::new()]).unwrap(), "");
    }

    #[test]
    fn renders_delimiters_even_for_empty_sheets() {
        let sheets = vec![
            SheetText {
                name: "Raw".to_string(),
                rows: vec!["a,b".to_string(), "1,2".to_string()],
            },
            SheetText {
                name: "Summary".to_string(),
                rows: vec![],
            },
        ];
        assert_eq!(
            render_sheets(&sheets),
            "--- Sheet: Raw ---\na,b\n1,2\n\n--- Sheet: Summary ---\n\n"
        );
    }

    #[test]
    fn float_cells_drop_integral_fraction() {
        assert_eq!(data_to_string(&Data::Float(12.0)), "12");
        assert_eq!(data_to_string(&Data::Float(3.5)), "3.5");
        assert_eq!(data_to_string(&Data::Empty), "");
    }

    #[test]
    fn garbage_is_not_a_workbook() {
        assert!(matches!(
            extract_sheets(b"definitely not a workbook"),
            Err(ParsingError::Spreadsheet(_))
        ));
    }

    #[test]
    fn garbage_is_not_a_docx() {
        assert!(matches!(
            extract_docx_text(b"not a zip"),
            Err(ParsingError::Docx(_))
        ));
    }
}
