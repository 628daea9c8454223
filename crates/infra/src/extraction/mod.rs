//! Background extraction of invoice metadata from uploaded files.
//!
//! CII XML (uploaded directly or embedded in a ZUGFeRD PDF) is read locally; any other PDF
//! goes to the external LLM API through an [`InvoiceExtractor`].

pub mod client;
pub mod worker;

use kontor_invoicing::{ExtractionError, InvoiceData};

pub use client::LlmExtractionClient;
pub use worker::{ExtractionJobError, ExtractionWorker, extraction_job};

/// Turns a PDF into invoice metadata.
pub trait InvoiceExtractor: Send + Sync {
    fn extract(&self, filename: &str, pdf: &[u8]) -> Result<InvoiceData, ExtractionError>;
}
