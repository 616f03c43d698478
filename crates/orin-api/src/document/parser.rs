use anyhow::{anyhow, Context, Result};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use lopdf::Document as PdfDocument;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

/// Minimum length of a printable run recovered from a legacy `.doc` binary.
const MIN_DOC_RUN: usize = 4;

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
    Doc,
    Docx,
}

impl DocumentKind {
    /// Resolve from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            "doc" => Some(Self::Doc),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "txt",
            Self::Doc => "doc",
            Self::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Text => "text/plain",
            Self::Doc => "application/msword",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// Whether a client-declared content type is acceptable for this kind.
    ///
    /// Browsers and CLI tools regularly omit the type or send
    /// `application/octet-stream`; in that case the extension decides.
    pub fn accepts_declared_mime(&self, declared: Option<&str>) -> bool {
        let Some(declared) = declared else {
            return true;
        };
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence.is_empty() || essence == "application/octet-stream" {
            return true;
        }
        if essence == self.mime_type() {
            return true;
        }
        mime_guess::from_ext(self.extension())
            .iter()
            .any(|m| m.essence_str() == essence)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub file_type: String,
    pub pages: Option<usize>,
    pub char_count: usize,
    pub encoding: String,
}

pub struct DocumentParser;

impl DocumentParser {
    /// Extract plain text from an uploaded file held in memory.
    pub fn parse(kind: DocumentKind, bytes: &[u8]) -> Result<ParsedDocument> {
        debug!("Parsing {} bytes as {:?}", bytes.len(), kind);

        let (content, pages, encoding) = match kind {
            DocumentKind::Pdf => {
                let (content, pages) = Self::parse_pdf(bytes)?;
                (content, Some(pages), UTF_8)
            }
            DocumentKind::Text => {
                let (content, encoding) = Self::decode_text(bytes);
                (content, None, encoding)
            }
            DocumentKind::Docx => (Self::parse_docx(bytes)?, None, UTF_8),
            DocumentKind::Doc => (Self::parse_doc(bytes), None, WINDOWS_1252),
        };

        let content = normalize_whitespace(&content);
        debug!("Parsed {} characters", content.chars().count());

        Ok(ParsedDocument {
            metadata: DocumentMetadata {
                file_type: kind.mime_type().to_string(),
                pages,
                char_count: content.chars().count(),
                encoding: encoding.name().to_string(),
            },
            content,
        })
    }

    fn parse_pdf(bytes: &[u8]) -> Result<(String, usize)> {
        let doc = PdfDocument::load_mem(bytes).context("Failed to load PDF file")?;
        let pages = doc.get_pages();
        let page_count = pages.len();

        let mut content = String::new();
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => {
                    warn!("Failed to extract text from page {}: {}", page_num, e);
                }
            }
        }

        Ok((content, page_count))
    }

    fn parse_docx(bytes: &[u8]) -> Result<String> {
        let xml = Self::read_zip_entry(bytes, "word/document.xml")?;
        Ok(Self::docx_xml_to_text(&xml))
    }

    /// Legacy Word binaries are frequently `.docx` files with the wrong
    /// extension, so the zip container is tried first.
    fn parse_doc(bytes: &[u8]) -> String {
        match Self::parse_docx(bytes) {
            Ok(text) => text,
            Err(_) => {
                debug!("Not an OOXML container, recovering printable runs");
                Self::printable_runs(bytes)
            }
        }
    }

    fn read_zip_entry(bytes: &[u8], name: &str) -> Result<String> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).context("Not a zip container")?;
        let mut entry = archive
            .by_name(name)
            .map_err(|e| anyhow!("Missing {}: {}", name, e))?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        Ok(xml)
    }

    /// Keep the character data of `<w:t>` runs; paragraph ends and breaks
    /// become newlines, tabs become tabs. Everything else is markup.
    fn docx_xml_to_text(xml: &str) -> String {
        let mut text = String::new();
        let mut in_run_text = false;
        let mut rest = xml;

        while let Some(open) = rest.find('<') {
            if in_run_text {
                text.push_str(&decode_xml_entities(&rest[..open]));
            }
            let Some(close) = rest[open..].find('>') else {
                break;
            };
            let tag = &rest[open + 1..open + close];
            let name = tag
                .split(|c: char| c.is_whitespace() || c == '/')
                .find(|part| !part.is_empty())
                .unwrap_or_default();

            match (tag.starts_with('/'), name) {
                (false, "w:t") => in_run_text = !tag.ends_with('/'),
                (true, "w:t") => in_run_text = false,
                (true, "w:p") | (false, "w:br") => text.push('\n'),
                (false, "w:tab") => text.push('\t'),
                _ => {}
            }
            rest = &rest[open + close + 1..];
        }
        text
    }

    /// Pull runs of printable Windows-1252 text out of a binary blob.
    fn printable_runs(bytes: &[u8]) -> String {
        let (decoded, _, _) = WINDOWS_1252.decode(bytes);
        let mut out = String::new();
        let mut run = String::new();

        for c in decoded.chars() {
            if c.is_alphanumeric() || c.is_ascii_punctuation() || c == ' ' {
                run.push(c);
            } else {
                if run.trim().chars().count() >= MIN_DOC_RUN {
                    out.push_str(run.trim());
                    out.push('\n');
                }
                run.clear();
            }
        }
        if run.trim().chars().count() >= MIN_DOC_RUN {
            out.push_str(run.trim());
        }
        out
    }

    /// Decode text honouring a byte-order mark, UTF-8 otherwise, falling
    /// back to Windows-1252.
    fn decode_text(bytes: &[u8]) -> (String, &'static Encoding) {
        if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
            let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
            return (text.into_owned(), encoding);
        }

        if let Ok(text) = std::str::from_utf8(bytes) {
            return (text.to_string(), UTF_8);
        }

        let (text, _, _) = WINDOWS_1252.decode(bytes);
        (text.into_owned(), WINDOWS_1252)
    }
}

/// Named and numeric (`&#8217;`, `&#x2019;`) references in a single pass.
/// Anything unrecognised is kept as written.
fn decode_xml_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let code = match name.strip_prefix('#')? {
                hex if hex.starts_with(['x', 'X']) => u32::from_str_radix(&hex[1..], 16).ok()?,
                dec => dec.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Collapse runs of blanks inside lines and drop empty lines.
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
