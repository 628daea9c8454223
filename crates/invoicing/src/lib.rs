//! Invoicing domain module.
//!
//! Outgoing invoices and their number schemes, plus imported (incoming) invoices with
//! upload validation and metadata extraction. Pure domain logic: no IO, no HTTP, no storage.

pub mod extraction;
pub mod imported;
pub mod invoice;
pub mod numbering;
pub mod upload;
pub mod zugferd;

pub use extraction::{EXTRACTION_PROMPT, ExtractionError, ExtractionSource, InvoiceData, parse_llm_response};
pub use imported::{
    ConfirmedInvoice, ImportStatus, ImportedInvoice, ImportedInvoiceCommand, ImportedInvoiceEvent,
    ImportedInvoiceId, StoredFile,
};
pub use invoice::{
    CancelInvoice, ContractBilling, Invoice, InvoiceCancelled, InvoiceCommand, InvoiceEvent, InvoiceId,
    InvoiceIssued, InvoiceLine, InvoiceStatus, IssueInvoice, PaymentRegistered, RegisterPayment,
    contract_period_lines,
};
pub use numbering::{NumberPattern, NumberScheme, NumberingError, PeriodKey, ResetPeriod, SchemeUpdate};
pub use upload::{FileKind, UploadError, UploadPolicy, ValidatedUpload, sanitize_filename};
pub use zugferd::{CiiReader, find_embedded_xml, is_cii};
