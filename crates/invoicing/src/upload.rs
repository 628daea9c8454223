//! Validation of uploaded invoice documents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::zugferd;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const MAX_FILENAME_BYTES: usize = 255;
const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,

    #[error("file is {size} bytes, the limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported file type '{0}', expected .pdf or .xml")]
    UnsupportedType(String),

    #[error("file is not a PDF document")]
    NotPdf,

    #[error("XML file is not a CII (ZUGFeRD/Factur-X) invoice")]
    NotCii,

    #[error("this file was already imported")]
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Xml,
}

impl FileKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Xml => "application/xml",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Xml => "xml",
        }
    }
}

/// An upload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub filename: String,
    pub kind: FileKind,
    pub size: usize,
}

/// Keep the last path component, replace anything outside `[A-Za-z0-9._ -]`, cap at 255 bytes.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = name.trim_start_matches('.').to_string();
    name = if trimmed.is_empty() { "upload".to_string() } else { trimmed };

    if name.len() > MAX_FILENAME_BYTES {
        // Keep the extension when shortening.
        let ext = name
            .rsplit_once('.')
            .map(|(_, e)| e.to_string())
            .filter(|e| e.len() <= 10)
            .unwrap_or_default();
        let keep = MAX_FILENAME_BYTES - if ext.is_empty() { 0 } else { ext.len() + 1 };
        name.truncate(keep);
        if !ext.is_empty() {
            name.push('.');
            name.push_str(&ext);
        }
    }
    name
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn validate(&self, filename: &str, bytes: &[u8]) -> Result<ValidatedUpload, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        let filename = sanitize_filename(filename);
        let ext = filename
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        let kind = match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "xml" => FileKind::Xml,
            other => return Err(UploadError::UnsupportedType(other.to_string())),
        };

        match kind {
            FileKind::Pdf if !bytes.starts_with(PDF_MAGIC) => return Err(UploadError::NotPdf),
            FileKind::Xml => {
                let text = String::from_utf8_lossy(bytes);
                if !zugferd::is_cii(&text) {
                    return Err(UploadError::NotCii);
                }
            }
            FileKind::Pdf => {}
        }

        Ok(ValidatedUpload {
            filename,
            kind,
            size: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_lose_paths_and_unsafe_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\Rechnung März.pdf"), "Rechnung M_rz.pdf");
        assert_eq!(sanitize_filename(".hidden.pdf"), "hidden.pdf");
        assert_eq!(sanitize_filename("///"), "upload");

        let long = format!("{}.pdf", "a".repeat(400));
        let short = sanitize_filename(&long);
        assert_eq!(short.len(), 255);
        assert!(short.ends_with(".pdf"));
    }

    #[test]
    fn accepts_pdf_with_magic() {
        let ok = UploadPolicy::default().validate("invoice.PDF", b"%PDF-1.7\n...").unwrap();
        assert_eq!(ok.kind, FileKind::Pdf);
        assert_eq!(ok.filename, "invoice.PDF");
    }

    #[test]
    fn rejects_invalid_uploads() {
        let policy = UploadPolicy::new(16);
        assert_eq!(policy.validate("a.pdf", b""), Err(UploadError::Empty));
        assert!(matches!(policy.validate("a.pdf", &[b'x'; 17]), Err(UploadError::TooLarge { size: 17, max: 16 })));
        assert_eq!(policy.validate("a.docx", b"PK.."), Err(UploadError::UnsupportedType("docx".into())));
        assert_eq!(policy.validate("a.pdf", b"<html>"), Err(UploadError::NotPdf));
        assert_eq!(policy.validate("a.xml", b"<Invoice/>"), Err(UploadError::NotCii));
    }

    #[test]
    fn accepts_cii_xml() {
        let xml = br#"<?xml version="1.0"?><rsm:CrossIndustryInvoice xmlns:rsm="urn:un:unece:uncefact:data:standard:CrossIndustryInvoice:100"></rsm:CrossIndustryInvoice>"#;
        let ok = UploadPolicy::default().validate("x.xml", xml).unwrap();
        assert_eq!(ok.kind, FileKind::Xml);
    }
}
