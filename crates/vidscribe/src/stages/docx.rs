use std::io::Write;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{DocumentRenderer, DocumentRow, TranscriptDocument};
use crate::error::StageError;
use crate::sanitize::redact_path;

const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const HEADERS: [&str; 4] = ["Time", "Sound", "Vision", "Compliance"];

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

/// Writes a minimal WordprocessingML package: a bold title paragraph
/// followed by a four-column table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxRenderer;

impl DocxRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentRenderer for DocxRenderer {
    fn render(&self, document: &TranscriptDocument, output: &Path) -> Result<PathBuf, StageError> {
        let _span = tracing::info_span!(
            "render",
            output = %redact_path(output),
            rows = document.rows.len()
        )
        .entered();

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let body = document_xml(document)?;

        let mut partial_name = output.file_name().unwrap_or_default().to_os_string();
        partial_name.push(".part");
        let partial = output.with_file_name(partial_name);

        let written = write_package(&partial, &body).and_then(|_| {
            std::fs::rename(&partial, output).map_err(|source| StageError::Io {
                path: output.to_path_buf(),
                source,
            })
        });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }

        Ok(output.to_path_buf())
    }
}

fn write_package(path: &Path, document_xml: &[u8]) -> Result<(), StageError> {
    let file = std::fs::File::create(path).map_err(|source| StageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, &[u8]); 3] = [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", PACKAGE_RELS.as_bytes()),
        ("word/document.xml", document_xml),
    ];
    for (name, bytes) in parts {
        zip.start_file(name, options)
            .map_err(|e| StageError::Render(format!("failed to add {name}: {e}")))?;
        zip.write_all(bytes).map_err(|source| StageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    zip.finish()
        .map_err(|e| StageError::Render(format!("failed to finish package: {e}")))?;
    Ok(())
}

/// Thin wrapper so every write maps into [`StageError`].
struct Xml {
    writer: Writer<Vec<u8>>,
}

impl Xml {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), StageError> {
        self.writer
            .write_event(event)
            .map_err(|e| StageError::Render(e.to_string()))
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), StageError> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.event(Event::Start(start))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), StageError> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.event(Event::Empty(start))
    }

    fn end(&mut self, name: &str) -> Result<(), StageError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, text: &str) -> Result<(), StageError> {
        self.event(Event::Text(BytesText::new(text)))
    }

    fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

fn document_xml(document: &TranscriptDocument) -> Result<Vec<u8>, StageError> {
    let mut xml = Xml::new();
    xml.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    xml.start("w:document", &[("xmlns:w", WORD_NS)])?;
    xml.start("w:body", &[])?;

    paragraph(&mut xml, &document.title, true)?;

    xml.start("w:tbl", &[])?;
    table_properties(&mut xml)?;
    row(&mut xml, &HEADERS, true)?;
    for DocumentRow {
        time,
        sound,
        vision,
        compliance,
    } in &document.rows
    {
        row(
            &mut xml,
            &[time.as_str(), sound.as_str(), vision.as_str(), compliance.as_str()],
            false,
        )?;
    }
    xml.end("w:tbl")?;

    // Word requires a paragraph after a trailing table.
    xml.empty("w:p", &[])?;
    xml.end("w:body")?;
    xml.end("w:document")?;
    Ok(xml.into_bytes())
}

fn table_properties(xml: &mut Xml) -> Result<(), StageError> {
    xml.start("w:tblPr", &[])?;
    xml.empty("w:tblW", &[("w:w", "5000"), ("w:type", "pct")])?;
    xml.start("w:tblBorders", &[])?;
    for side in ["w:top", "w:left", "w:bottom", "w:right", "w:insideH", "w:insideV"] {
        xml.empty(side, &[("w:val", "single"), ("w:sz", "4"), ("w:space", "0"), ("w:color", "auto")])?;
    }
    xml.end("w:tblBorders")?;
    xml.end("w:tblPr")
}

fn row(xml: &mut Xml, cells: &[&str], header: bool) -> Result<(), StageError> {
    xml.start("w:tr", &[])?;
    for cell in cells {
        xml.start("w:tc", &[])?;
        paragraph(xml, cell, header)?;
        xml.end("w:tc")?;
    }
    xml.end("w:tr")
}

/// A table cell must contain at least one paragraph, so empty text still
/// produces `<w:p/>`.
fn paragraph(xml: &mut Xml, text: &str, bold: bool) -> Result<(), StageError> {
    if text.is_empty() {
        return xml.empty("w:p", &[]);
    }
    xml.start("w:p", &[])?;
    xml.start("w:r", &[])?;
    if bold {
        xml.start("w:rPr", &[])?;
        xml.empty("w:b", &[])?;
        xml.end("w:rPr")?;
    }
    xml.start("w:t", &[("xml:space", "preserve")])?;
    xml.text(text)?;
    xml.end("w:t")?;
    xml.end("w:r")?;
    xml.end("w:p")
}
