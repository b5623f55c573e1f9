//! Plain-text extraction from DOCX uploads.
//!
//! A DOCX file is a ZIP archive whose main body lives in
//! `word/document.xml`. Text runs (`w:t`) are concatenated per paragraph
//! (`w:p`) and paragraphs are joined with blank lines, which is exactly the
//! shape the chunker consumes.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors emitted while extracting text from DOCX documents.
#[derive(Debug, Error)]
pub enum DocxTextError {
    #[error("failed to open DOCX archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to read word/document.xml: {0}")]
    DocumentRead(#[from] std::io::Error),

    #[error("failed to parse word/document.xml: {0}")]
    DocumentParse(#[from] quick_xml::Error),
}

const DOCUMENT_ENTRY: &str = "word/document.xml";

/// Extracts UTF-8 text from a DOCX byte slice, joining paragraphs with `\n\n`.
pub fn extract_text_from_docx(bytes: &[u8]) -> Result<String, DocxTextError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut document_xml = String::new();
    archive
        .by_name(DOCUMENT_ENTRY)?
        .read_to_string(&mut document_xml)?;

    extract_paragraph_text(&document_xml)
}

fn extract_paragraph_text(document_xml: &str) -> Result<String, DocxTextError> {
    let mut reader = Reader::from_str(document_xml);
    reader.config_mut().trim_text(false);

    let mut output = String::new();
    let mut paragraph = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"t" => in_text_run = true,
                b"br" => paragraph.push('\n'),
                b"tab" => paragraph.push('\t'),
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"br" => paragraph.push('\n'),
                b"tab" => paragraph.push('\t'),
                _ => {}
            },
            Event::Text(text) => {
                if in_text_run {
                    let value = text.unescape().map_err(quick_xml::Error::from)?;
                    paragraph.push_str(&value);
                }
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    let trimmed = paragraph.trim();
                    if !trimmed.is_empty() {
                        if !output.is_empty() {
                            output.push_str("\n\n");
                        }
                        output.push_str(trimmed);
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(output)
}
