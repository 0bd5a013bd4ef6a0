//! Plain-text extraction from Word (`.docx`) documents.
//!
//! A `.docx` file is a ZIP archive whose `word/document.xml` part holds the
//! body. Extraction walks that part once and collects:
//!
//! - every top-level body paragraph with non-empty text, trimmed, as one line;
//! - every row of every top-level table as one line, its non-empty cells
//!   (trimmed) joined with [`CELL_DELIMITER`].
//!
//! Paragraph lines come first in document order, followed by table rows in
//! document order. All lines are joined with [`BLOCK_SEPARATOR`] so the
//! chunker sees each one as its own block.
//!
//! Nested tables and text-box content are not part of a paragraph's or a
//! cell's own text and are skipped.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

use crate::error::{Error, Result};

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Joins the cells of one table row.
pub const CELL_DELIMITER: &str = " | ";
/// Separates paragraphs and table rows in the extracted text.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Why a document could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a valid docx archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("word/document.xml exceeds size limit ({0} bytes)")]
    TooLarge(u64),
    #[error("malformed document xml: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Lower-cased extension of `path`, or an empty string.
pub fn file_type_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Read and extract a document from disk.
///
/// Any failure (missing file, wrong type, corrupt archive) is reported as
/// [`Error::Extraction`] so the caller can skip the file and move on.
pub fn extract_file(path: &Path) -> Result<String> {
    let to_error = |e: ExtractError| Error::Extraction {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let file_type = file_type_of(path);
    if file_type != "docx" {
        return Err(to_error(ExtractError::UnsupportedFileType(file_type)));
    }
    let bytes = std::fs::read(path).map_err(|e| to_error(e.into()))?;
    extract_docx(&bytes).map_err(to_error)
}

/// Extract text from the bytes of a `.docx` archive.
pub fn extract_docx(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    let entry = archive.by_name("word/document.xml")?;
    let mut doc_xml = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut doc_xml)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::TooLarge(MAX_XML_ENTRY_BYTES));
    }

    let body = walk_body(&doc_xml)?;
    Ok(body
        .paragraphs
        .into_iter()
        .chain(body.rows)
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParagraphKind {
    Body,
    Cell,
}

#[derive(Default)]
struct Body {
    paragraphs: Vec<String>,
    rows: Vec<String>,
}

fn ends_with(stack: &[Vec<u8>], tail: &[&[u8]]) -> bool {
    stack.len() >= tail.len()
        && stack[stack.len() - tail.len()..]
            .iter()
            .zip(tail)
            .all(|(a, b)| a.as_slice() == *b)
}

fn walk_body(xml: &[u8]) -> std::result::Result<Body, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut body = Body::default();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    // Depth of <w:p> nesting; only depth 1 contributes text.
    let mut p_depth = 0usize;
    let mut paragraph: Option<ParagraphKind> = None;
    let mut text = String::new();
    let mut cell_paragraphs: Vec<String> = Vec::new();
    let mut row_cells: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"p" => {
                        p_depth += 1;
                        if p_depth == 1 {
                            paragraph = if ends_with(&stack, &[b"body"]) {
                                Some(ParagraphKind::Body)
                            } else if ends_with(&stack, &[b"body", b"tbl", b"tr", b"tc"]) {
                                Some(ParagraphKind::Cell)
                            } else {
                                None
                            };
                            text.clear();
                        }
                    }
                    b"tr" if ends_with(&stack, &[b"body", b"tbl"]) => row_cells.clear(),
                    b"tc" if ends_with(&stack, &[b"body", b"tbl", b"tr"]) => {
                        cell_paragraphs.clear()
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                if p_depth == 1 && paragraph.is_some() {
                    match e.local_name().as_ref() {
                        b"tab" => text.push('\t'),
                        b"br" | b"cr" => text.push('\n'),
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                if p_depth == 1
                    && paragraph.is_some()
                    && stack.last().map(Vec::as_slice) == Some(b"t".as_slice())
                {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => {
                stack.pop();
                match e.local_name().as_ref() {
                    b"p" => {
                        if p_depth == 1 {
                            match paragraph.take() {
                                Some(ParagraphKind::Body) => {
                                    let line = text.trim();
                                    if !line.is_empty() {
                                        body.paragraphs.push(line.to_string());
                                    }
                                }
                                Some(ParagraphKind::Cell) => cell_paragraphs.push(text.clone()),
                                None => {}
                            }
                        }
                        p_depth = p_depth.saturating_sub(1);
                    }
                    b"tc" if ends_with(&stack, &[b"body", b"tbl", b"tr"]) => {
                        let cell = cell_paragraphs.join("\n");
                        let cell = cell.trim();
                        if !cell.is_empty() {
                            row_cells.push(cell.to_string());
                        }
                    }
                    b"tr" if ends_with(&stack, &[b"body", b"tbl"]) => {
                        if !row_cells.is_empty() {
                            body.rows.push(row_cells.join(CELL_DELIMITER));
                        }
                        row_cells.clear();
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", text)
    }

    fn table(rows: &[&[&str]]) -> String {
        let mut xml = String::from("<w:tbl><w:tblPr/>");
        for row in rows {
            xml.push_str("<w:tr>");
            for cell in *row {
                xml.push_str(&format!("<w:tc><w:tcPr/>{}</w:tc>", para(cell)));
            }
            xml.push_str("</w:tr>");
        }
        xml.push_str("</w:tbl>");
        xml
    }

    fn docx(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?><w:document xmlns:w=\"{}\"><w:body>{}<w:sectPr/></w:body></w:document>",
                NS, body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_paragraphs_joined_with_blank_line() {
        let bytes = docx(&format!(
            "{}{}{}",
            para("  Personal Auto Policy  "),
            para("   "),
            para("Coverage applies to listed drivers.")
        ));
        let text = extract_docx(&bytes).unwrap();
        assert_eq!(
            text,
            "Personal Auto Policy\n\nCoverage applies to listed drivers."
        );
    }

    #[test]
    fn test_table_rows_joined_with_delimiter() {
        let bytes = docx(&format!(
            "{}{}",
            para("Rating factors"),
            table(&[&["Factor", "Weight"], &["Age", ""], &["", ""]])
        ));
        let text = extract_docx(&bytes).unwrap();
        assert_eq!(text, "Rating factors\n\nFactor | Weight\n\nAge");
    }

    #[test]
    fn test_tables_follow_paragraphs() {
        let bytes = docx(&format!(
            "{}{}{}",
            para("Intro"),
            table(&[&["A", "B"]]),
            para("Outro")
        ));
        let text = extract_docx(&bytes).unwrap();
        assert_eq!(text, "Intro\n\nOutro\n\nA | B");
    }

    #[test]
    fn test_runs_are_concatenated_and_entities_unescaped() {
        let body = "<w:p><w:r><w:t>Bodily </w:t></w:r><w:r><w:t>injury &amp; property</w:t></w:r><w:r><w:tab/><w:t>damage</w:t></w:r></w:p>";
        let text = extract_docx(&docx(body)).unwrap();
        assert_eq!(text, "Bodily injury & property\tdamage");
    }

    #[test]
    fn test_multi_paragraph_cell_joined_with_newline() {
        let body = format!(
            "<w:tbl><w:tr><w:tc>{}{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
            para("Line one"),
            para("Line two"),
            para("Other")
        );
        let text = extract_docx(&docx(&body)).unwrap();
        assert_eq!(text, "Line one\nLine two | Other");
    }

    #[test]
    fn test_nested_table_text_skipped() {
        let nested = table(&[&["hidden"]]);
        let body = format!(
            "<w:tbl><w:tr><w:tc>{}{}</w:tc></w:tr></w:tbl>",
            para("Outer"),
            nested
        );
        let text = extract_docx(&docx(&body)).unwrap();
        assert_eq!(text, "Outer");
    }

    #[test]
    fn test_empty_document_yields_empty_text() {
        let text = extract_docx(&docx("")).unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn test_invalid_zip_returns_error() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }

    #[test]
    fn test_missing_document_part_returns_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/styles.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<styles/>").unwrap();
            zip.finish().unwrap();
        }
        assert!(extract_docx(&buf).is_err());
    }

    #[test]
    fn test_extract_file_rejects_other_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain").unwrap();
        let err = extract_file(&path).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
    }

    #[test]
    fn test_extract_file_reads_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Policy.DOCX");
        std::fs::write(&path, docx(&para("Hello"))).unwrap();
        assert_eq!(extract_file(&path).unwrap(), "Hello");
    }
}
