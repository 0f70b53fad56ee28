//! Format-specific text extraction.
//!
//! Every supported format is a [`FormatKind`]; each kind has one
//! [`Extractor`] registered in a static lookup table, so adding a format
//! means adding a variant and a table row. Extractors turn raw bytes into
//! an [`Extraction`]: plain UTF-8 text, a confidence record and any binary
//! assets worth keeping next to the document.
//!
//! Images carry no recognition step here: they are kept as assets with an
//! empty text body and zero confidence, which the engine indexes through a
//! placeholder chunk.

use std::io::Read;
use std::path::Path;

use docrag_core::models::{AssetRef, ConfidenceRecord, Extraction};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Why extraction produced no text. The document is still ingested with
/// empty content.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Io(std::io::Error),
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(ext) => write!(f, "unsupported format: {}", ext),
            ExtractError::Io(e) => write!(f, "failed to read file: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<std::io::Error> for ExtractError {
    fn from(e: std::io::Error) -> Self {
        ExtractError::Io(e)
    }
}

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    PlainText,
    Markdown,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Image,
}

impl FormatKind {
    /// Detect the format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" | "csv" | "json" | "toml" | "yaml" | "yml" => {
                Some(FormatKind::PlainText)
            }
            "md" | "markdown" => Some(FormatKind::Markdown),
            "pdf" => Some(FormatKind::Pdf),
            "docx" => Some(FormatKind::Docx),
            "pptx" => Some(FormatKind::Pptx),
            "xlsx" => Some(FormatKind::Xlsx),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" => {
                Some(FormatKind::Image)
            }
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Tag written into confidence records.
    pub fn tag(self) -> &'static str {
        match self {
            FormatKind::PlainText => "text",
            FormatKind::Markdown => "markdown",
            FormatKind::Pdf => "pdf",
            FormatKind::Docx => "docx",
            FormatKind::Pptx => "pptx",
            FormatKind::Xlsx => "xlsx",
            FormatKind::Image => "image",
        }
    }
}

/// Converts raw bytes of one format into an [`Extraction`].
pub trait Extractor: Send + Sync {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError>;
}

struct TextExtractor(FormatKind);
struct PdfExtractor;
struct DocxExtractor;
struct PptxExtractor;
struct XlsxExtractor;
struct ImageExtractor;

static EXTRACTORS: &[(FormatKind, &dyn Extractor)] = &[
    (FormatKind::PlainText, &TextExtractor(FormatKind::PlainText)),
    (FormatKind::Markdown, &TextExtractor(FormatKind::Markdown)),
    (FormatKind::Pdf, &PdfExtractor),
    (FormatKind::Docx, &DocxExtractor),
    (FormatKind::Pptx, &PptxExtractor),
    (FormatKind::Xlsx, &XlsxExtractor),
    (FormatKind::Image, &ImageExtractor),
];

/// The extractor registered for `kind`.
pub fn extractor_for(kind: FormatKind) -> Option<&'static dyn Extractor> {
    EXTRACTORS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, extractor)| *extractor)
}

/// Read `path` and extract it according to its extension.
pub fn extract_file(path: &Path) -> Result<Extraction, ExtractError> {
    let kind = FormatKind::from_path(path).ok_or_else(|| {
        ExtractError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "(none)".to_string()),
        )
    })?;
    let extractor =
        extractor_for(kind).ok_or_else(|| ExtractError::UnsupportedFormat(kind.tag().to_string()))?;
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    extractor.extract(&name, &bytes)
}

/// Empty extraction for a document whose text could not be read.
pub fn empty_extraction(file_type: &str) -> Extraction {
    Extraction {
        text: String::new(),
        confidence: ConfidenceRecord {
            confidence: 0.0,
            text_length: 0,
            file_type: file_type.to_string(),
            words: Vec::new(),
        },
        assets: Vec::new(),
    }
}

fn exact(text: String, kind: FormatKind) -> Extraction {
    Extraction {
        confidence: ConfidenceRecord::exact(&text, kind.tag()),
        text,
        assets: Vec::new(),
    }
}

impl Extractor for TextExtractor {
    fn extract(&self, _name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        Ok(exact(text, self.0))
    }
}

impl Extractor for PdfExtractor {
    fn extract(&self, _name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(exact(text, FormatKind::Pdf))
    }
}

impl Extractor for ImageExtractor {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let mut extraction = empty_extraction(FormatKind::Image.tag());
        extraction.assets.push(AssetRef {
            name: name.to_string(),
            media_type: image_media_type(name).to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(extraction)
    }
}

fn image_media_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Numbered part names (`prefix{N}.xml`) in numeric order.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Collect the text of every `<*:t>` element, breaking lines at the end of
/// each `paragraph` element.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                if local.as_ref() == b"t" {
                    in_text = false;
                } else if local.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

impl Extractor for DocxExtractor {
    fn extract(&self, _name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let mut archive = open_archive(bytes)?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        Ok(exact(collect_text_runs(&xml, b"p")?, FormatKind::Docx))
    }
}

impl Extractor for PptxExtractor {
    fn extract(&self, _name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let mut archive = open_archive(bytes)?;
        let mut slides = Vec::new();
        for name in numbered_parts(&archive, "ppt/slides/slide") {
            let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            let text = collect_text_runs(&xml, b"p")?;
            if !text.is_empty() {
                slides.push(text);
            }
        }
        Ok(exact(slides.join("\n\n"), FormatKind::Pptx))
    }
}

impl Extractor for XlsxExtractor {
    fn extract(&self, _name: &str, bytes: &[u8]) -> Result<Extraction, ExtractError> {
        let mut archive = open_archive(bytes)?;
        let has_shared_strings = archive
            .file_names()
            .any(|n| n == "xl/sharedStrings.xml");
        let shared_strings = if has_shared_strings {
            read_shared_strings(&mut archive)?
        } else {
            Vec::new()
        };
        let mut sheets = Vec::new();
        for name in numbered_parts(&archive, "xl/worksheets/sheet")
            .into_iter()
            .take(XLSX_MAX_SHEETS)
        {
            let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            let cells = sheet_cells(&xml, &shared_strings)?;
            if !cells.is_empty() {
                sheets.push(cells);
            }
        }
        Ok(exact(sheets.join("\n"), FormatKind::Xlsx))
    }
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet: shared strings resolved, inline strings
/// and numbers kept as written.
fn sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let value = te.unescape().unwrap_or_default();
                let value = value.trim();
                if shared {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
                in_value = false;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn ooxml(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in parts {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FormatKind::from_extension("PDF"), Some(FormatKind::Pdf));
        assert_eq!(
            FormatKind::from_path(Path::new("notes/readme.md")),
            Some(FormatKind::Markdown)
        );
        assert_eq!(FormatKind::from_path(Path::new("photo.JPG")), Some(FormatKind::Image));
        assert_eq!(FormatKind::from_path(Path::new("archive.tar")), None);
        assert_eq!(FormatKind::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_every_format_has_an_extractor() {
        for kind in [
            FormatKind::PlainText,
            FormatKind::Markdown,
            FormatKind::Pdf,
            FormatKind::Docx,
            FormatKind::Pptx,
            FormatKind::Xlsx,
            FormatKind::Image,
        ] {
            assert!(extractor_for(kind).is_some(), "{:?}", kind);
        }
    }

    #[test]
    fn test_plain_text_is_exact() {
        let extraction = extractor_for(FormatKind::PlainText)
            .unwrap()
            .extract("a.txt", "привет мир".as_bytes())
            .unwrap();
        assert_eq!(extraction.text, "привет мир");
        assert_eq!(extraction.confidence.confidence, 1.0);
        assert_eq!(extraction.confidence.text_length, 10);
        assert_eq!(extraction.confidence.file_type, "text");
    }

    #[test]
    fn test_image_kept_as_asset() {
        let extraction = extractor_for(FormatKind::Image)
            .unwrap()
            .extract("scan.png", &[0x89, b'P', b'N', b'G'])
            .unwrap();
        assert!(extraction.text.is_empty());
        assert_eq!(extraction.confidence.confidence, 0.0);
        assert_eq!(extraction.assets.len(), 1);
        assert_eq!(extraction.assets[0].media_type, "image/png");
        assert_eq!(extraction.assets[0].bytes.len(), 4);
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extractor_for(FormatKind::Pdf)
            .unwrap()
            .extract("x.pdf", b"not a pdf")
            .unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip_returns_error_for_docx() {
        let err = extractor_for(FormatKind::Docx)
            .unwrap()
            .extract("x.docx", b"not a zip")
            .unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_docx_paragraphs() {
        let bytes = ooxml(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Quarterly </w:t></w:r><w:r><w:t>report</w:t></w:r></w:p><w:p><w:r><w:t>Revenue grew</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let extraction = extractor_for(FormatKind::Docx)
            .unwrap()
            .extract("r.docx", &bytes)
            .unwrap();
        assert_eq!(extraction.text, "Quarterly report\nRevenue grew");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |text: &str| {
            format!(r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, text)
        };
        let s2 = slide("second");
        let s10 = slide("tenth");
        let s1 = slide("first");
        let bytes = ooxml(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let extraction = extractor_for(FormatKind::Pptx)
            .unwrap()
            .extract("deck.pptx", &bytes)
            .unwrap();
        assert_eq!(extraction.text, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn test_xlsx_cells() {
        let bytes = ooxml(&[
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>Region</t></si><si><t>North</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>0</v></c><c t="s"><v>1</v></c><c><v>42</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let extraction = extractor_for(FormatKind::Xlsx)
            .unwrap()
            .extract("t.xlsx", &bytes)
            .unwrap();
        assert_eq!(extraction.text, "Region North 42");
    }

    #[test]
    fn test_extract_file_unsupported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"\x00\x01").unwrap();
        assert!(matches!(
            extract_file(&path),
            Err(ExtractError::UnsupportedFormat(_))
        ));

        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "# Title").unwrap();
        let extraction = extract_file(&path).unwrap();
        assert_eq!(extraction.text, "# Title");
        assert_eq!(extraction.confidence.file_type, "markdown");
    }
}
