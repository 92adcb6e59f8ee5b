//! Text extraction for the two supported upload formats (PDF, DOCX).
//!
//! Extraction is a pipeline-layer capability: callers supply a filename and
//! bytes; this module returns plain UTF-8 text plus a page count (0 when the
//! format has no page concept). Anything else is rejected with
//! [`ExtractError::UnsupportedFileType`], which propagates to the caller.

use std::io::Read;

/// Maximum decompressed bytes to read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFileType(String),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFileType(name) => {
                write!(f, "unsupported file type (only PDF/DOCX): {}", name)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract plain text and a page count from an uploaded file.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<(String, usize), ExtractError> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".pdf") {
        extract_pdf(bytes)
    } else if lower.ends_with(".docx") {
        extract_docx(bytes)
    } else {
        Err(ExtractError::UnsupportedFileType(filename.to_string()))
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, usize), ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let num_pages = lopdf::Document::load_mem(bytes)
        .map(|doc| doc.get_pages().len())
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok((text.trim().to_string(), num_pages))
}

fn extract_docx(bytes: &[u8]) -> Result<(String, usize), ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let text = extract_docx_paragraphs(&doc_xml)?;
    // DOCX has no renderable page concept at this layer.
    Ok((text, 0))
}

/// Walk `word/document.xml`, collecting `w:t` runs grouped by `w:p`
/// paragraphs. Paragraphs are joined with newlines so the chunker sees the
/// document's paragraph structure.
fn extract_docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut para = String::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                para.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = para.trim();
                    if !trimmed.is_empty() {
                        paragraphs.push(trimmed.to_string());
                    }
                    para.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !para.trim().is_empty() {
        paragraphs.push(para.trim().to_string());
    }

    Ok(paragraphs.join("\n"))
}
