//! Imported (incoming) invoices: upload, background extraction, confirmation.

use chrono::Utc;

use kontor_auth::permissions::names;
use kontor_customers::CustomerId;
use kontor_infra::extraction::extraction_job;
use kontor_infra::file_store::content_hash;
use kontor_infra::jobs::JobStore;
use kontor_infra::projections::aggregate_types;
use kontor_infra::read_model::Scope;
use kontor_invoicing::{
    ImportStatus, ImportedInvoice, ImportedInvoiceCommand, ImportedInvoiceId, InvoiceData, StoredFile, UploadError,
};

use super::{AppServices, keys};
use crate::app::errors::ApiError;
use crate::context::Session;

impl AppServices {
    pub fn imported_invoices(&self, session: &Session, status: Option<ImportStatus>) -> Result<Vec<ImportedInvoice>, ApiError> {
        self.authorize(session, &names::IMPORTED_INVOICES_READ)?;
        let mut records: Vec<ImportedInvoice> = self
            .projections
            .imported_invoices
            .list(session.tenant_id())
            .into_iter()
            .filter(|r| r.file().is_some() && status.is_none_or(|s| r.status() == s))
            .collect();
        records.sort_by(|a, b| b.uploaded_at().cmp(&a.uploaded_at()));
        Ok(records)
    }

    pub fn imported_invoice(&self, session: &Session, id: ImportedInvoiceId) -> Result<ImportedInvoice, ApiError> {
        self.authorize(session, &names::IMPORTED_INVOICES_READ)?;
        self.imported_record(session, id)
    }

    fn imported_record(&self, session: &Session, id: ImportedInvoiceId) -> Result<ImportedInvoice, ApiError> {
        self.projections
            .imported_invoices
            .get(session.tenant_id(), id.aggregate_id())
            .filter(|r| r.file().is_some())
            .ok_or_else(|| ApiError::not_found("imported invoice"))
    }

    /// Validate and store the file, create the `PENDING` record and queue extraction.
    #[tracing::instrument(skip_all, fields(tenant_id = %session.tenant_id(), size = bytes.len()))]
    pub fn upload_invoice(&self, session: &Session, filename: &str, bytes: &[u8]) -> Result<ImportedInvoice, ApiError> {
        self.authorize(session, &names::IMPORTED_INVOICES_WRITE)?;
        let upload = self.upload_policy.validate(filename, bytes)?;

        let tenant_id = session.tenant_id();
        let id = ImportedInvoiceId::generate();
        let hash = content_hash(bytes);
        let scope = Scope::Tenant(tenant_id);
        self.unique
            .claim(scope, keys::INVOICE_FILE, &hash, id.aggregate_id())
            .map_err(|_| ApiError::from(UploadError::Duplicate))?;

        let result = self.store_upload(session, id, upload.filename, upload.kind, bytes);
        if result.is_err() {
            self.unique.release(scope, keys::INVOICE_FILE, &hash, id.aggregate_id());
        }
        let record = result?;

        self.queue_extraction(session, id);
        Ok(record)
    }

    fn store_upload(
        &self,
        session: &Session,
        id: ImportedInvoiceId,
        filename: String,
        kind: kontor_invoicing::FileKind,
        bytes: &[u8],
    ) -> Result<ImportedInvoice, ApiError> {
        let blob = self.files.put(bytes)?;
        let tenant_id = session.tenant_id();
        self.execute(
            tenant_id,
            Some(session.user_id()),
            id.aggregate_id(),
            aggregate_types::IMPORTED_INVOICE,
            ImportedInvoiceCommand::Upload {
                tenant_id,
                imported_invoice_id: id,
                file: StoredFile {
                    filename,
                    kind,
                    content_hash: blob.content_hash,
                    storage_key: blob.key,
                    size_bytes: blob.size_bytes,
                },
                occurred_at: Utc::now(),
            },
            |_, agg| ImportedInvoice::empty(ImportedInvoiceId::new(agg)),
        )
    }

    /// A record whose job could not be queued stays retryable, so this only logs.
    fn queue_extraction(&self, session: &Session, id: ImportedInvoiceId) {
        match self.jobs.enqueue(extraction_job(session.tenant_id(), id)) {
            Ok(job_id) => tracing::debug!(job_id = %job_id.0, "extraction queued"),
            Err(e) => tracing::warn!(error = %e, "failed to queue extraction"),
        }
    }

    /// The stored file and the metadata to serve it with.
    pub fn imported_invoice_file(&self, session: &Session, id: ImportedInvoiceId) -> Result<(StoredFile, Vec<u8>), ApiError> {
        let record = self.imported_invoice(session, id)?;
        let file = record
            .file()
            .cloned()
            .ok_or_else(|| ApiError::not_found("imported invoice"))?;
        let bytes = self.files.get(&file.storage_key)?;
        Ok((file, bytes))
    }

    /// Queue another extraction (retry after failure, or re-extract).
    pub fn extract_imported_invoice(&self, session: &Session, id: ImportedInvoiceId) -> Result<ImportedInvoice, ApiError> {
        self.authorize(session, &names::IMPORTED_INVOICES_WRITE)?;
        let record = self.imported_record(session, id)?;
        if !record.status().can_start_extraction() {
            return Err(ApiError::validation(format!(
                "cannot extract an invoice in status {}",
                record.status().as_str()
            )));
        }
        self.queue_extraction(session, id);
        Ok(record)
    }

    pub fn confirm_imported_invoice(
        &self,
        session: &Session,
        id: ImportedInvoiceId,
        corrections: InvoiceData,
        customer_id: Option<CustomerId>,
    ) -> Result<ImportedInvoice, ApiError> {
        self.authorize(session, &names::IMPORTED_INVOICES_WRITE)?;
        self.imported_record(session, id)?;
        if let Some(customer_id) = customer_id {
            self.customer_record(session, customer_id)?;
        }
        let tenant_id = session.tenant_id();
        self.execute(
            tenant_id,
            Some(session.user_id()),
            id.aggregate_id(),
            aggregate_types::IMPORTED_INVOICE,
            ImportedInvoiceCommand::Confirm {
                tenant_id,
                corrections,
                customer_id,
                occurred_at: Utc::now(),
            },
            |_, agg| ImportedInvoice::empty(ImportedInvoiceId::new(agg)),
        )
    }
}
