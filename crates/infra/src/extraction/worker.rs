use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;

use kontor_core::{AggregateId, TenantId};
use kontor_customers::{CustomerMatch, DEFAULT_THRESHOLD, MatchCandidate, MatchQuery, find_matches};
use kontor_events::{EventBus, EventEnvelope};
use kontor_invoicing::{
    CiiReader, ExtractionError, ExtractionSource, FileKind, ImportStatus, ImportedInvoice, ImportedInvoiceCommand,
    ImportedInvoiceId, InvoiceData, StoredFile, find_embedded_xml, is_cii,
};

use super::InvoiceExtractor;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::error::StoreError;
use crate::event_store::EventStore;
use crate::file_store::ContentAddressedStore;
use crate::jobs::{Job, JobExecutor, JobKind, JobResult, JobStore, RetryPolicy};
use crate::projections::{Projections, aggregate_types};

#[derive(Debug, Error)]
pub enum ExtractionJobError {
    #[error("imported invoice not found")]
    NotFound,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    File(#[from] StoreError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// One retry, two seconds after the first failure.
pub fn extraction_job(tenant_id: TenantId, imported_invoice_id: ImportedInvoiceId) -> Job {
    Job::new(
        tenant_id,
        JobKind::ExtractInvoice { imported_invoice_id },
    )
    .with_retry_policy(RetryPolicy::backoff(2, Duration::from_secs(2), Duration::from_secs(30)))
}

/// Drives an imported invoice through `EXTRACTING` to `EXTRACTED` or `EXTRACTION_FAILED`.
pub struct ExtractionWorker<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    projections: Arc<Projections>,
    files: ContentAddressedStore,
    extractor: Option<Arc<dyn InvoiceExtractor>>,
    cii: CiiReader,
}

impl<S, B> ExtractionWorker<S, B>
where
    S: EventStore + Send + Sync + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        projections: Arc<Projections>,
        files: ContentAddressedStore,
        extractor: Option<Arc<dyn InvoiceExtractor>>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            dispatcher,
            projections,
            files,
            extractor,
            cii: CiiReader::new()?,
        })
    }

    /// Handle `invoicing.extract` jobs on `executor`.
    pub fn register<J: JobStore + 'static>(self: Arc<Self>, executor: &mut JobExecutor<J>) {
        executor.register_handler(JobKind::EXTRACT_INVOICE, move |job: &Job| self.handle(job));
    }

    pub fn handle(&self, job: &Job) -> JobResult {
        match self.run_job(job) {
            Ok(_) => JobResult::Success,
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }

    fn run_job(&self, job: &Job) -> Result<ImportStatus, ExtractionJobError> {
        let JobKind::ExtractInvoice { imported_invoice_id } = &job.kind;
        self.run(job.tenant_id, *imported_invoice_id)
    }

    /// One extraction attempt. A failed attempt is recorded on the imported invoice before
    /// the error is returned; records that cannot be extracted (e.g. confirmed) are skipped.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, imported_invoice_id = %id.0))]
    pub fn run(&self, tenant_id: TenantId, id: ImportedInvoiceId) -> Result<ImportStatus, ExtractionJobError> {
        let record = self.dispatcher.load(tenant_id, id.0, make_imported)?;
        let Some(file) = record.file().cloned() else {
            return Err(ExtractionJobError::NotFound);
        };
        if !record.status().can_start_extraction() {
            tracing::info!(status = record.status().as_str(), "extraction skipped");
            return Ok(record.status());
        }

        self.execute(
            tenant_id,
            id,
            ImportedInvoiceCommand::StartExtraction {
                tenant_id,
                occurred_at: Utc::now(),
            },
        )?;

        match self.extract(&file) {
            Ok((source, data)) => {
                let suggested_customer = self.suggest_customer(tenant_id, &data);
                let status = self.execute(
                    tenant_id,
                    id,
                    ImportedInvoiceCommand::CompleteExtraction {
                        tenant_id,
                        source,
                        data,
                        suggested_customer,
                        occurred_at: Utc::now(),
                    },
                )?;
                tracing::info!(source = ?source, "invoice extracted");
                Ok(status)
            }
            Err(e) => {
                let reason = e.to_string();
                self.execute(
                    tenant_id,
                    id,
                    ImportedInvoiceCommand::FailExtraction {
                        tenant_id,
                        reason: reason.clone(),
                        occurred_at: Utc::now(),
                    },
                )?;
                tracing::warn!(reason = %reason, "invoice extraction failed");
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        tenant_id: TenantId,
        id: ImportedInvoiceId,
        command: ImportedInvoiceCommand,
    ) -> Result<ImportStatus, ExtractionJobError> {
        let dispatched = self.dispatcher.dispatch(
            tenant_id,
            None,
            id.0,
            aggregate_types::IMPORTED_INVOICE,
            command,
            make_imported,
        )?;
        self.projections.apply(&dispatched.events);
        Ok(dispatched.aggregate.status())
    }

    fn extract(&self, file: &StoredFile) -> Result<(ExtractionSource, InvoiceData), ExtractionJobError> {
        let bytes = self.files.get(&file.storage_key)?;
        let xml = match file.kind {
            FileKind::Xml => Some(String::from_utf8_lossy(&bytes).into_owned()),
            FileKind::Pdf => find_embedded_xml(&bytes),
        };
        if let Some(xml) = xml.filter(|x| is_cii(x)) {
            return Ok((ExtractionSource::Zugferd, self.cii.read(&xml)?));
        }
        if file.kind == FileKind::Xml {
            return Err(ExtractionError::NotCii.into());
        }

        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| ExtractionError::Service("no extraction API configured".to_string()))?;
        Ok((ExtractionSource::Llm, extractor.extract(&file.filename, &bytes)?))
    }

    fn suggest_customer(&self, tenant_id: TenantId, data: &InvoiceData) -> Option<CustomerMatch> {
        let query = MatchQuery {
            name: data.vendor_name.clone(),
            iban: data.vendor_iban.clone(),
            vat_id: data.vendor_vat_id.clone(),
        };
        let candidates: Vec<MatchCandidate> = self
            .projections
            .customers
            .list(tenant_id)
            .iter()
            .filter_map(|c| c.match_candidate())
            .collect();
        find_matches(&query, &candidates, DEFAULT_THRESHOLD).into_iter().next()
    }
}

fn make_imported(_: TenantId, id: AggregateId) -> ImportedInvoice {
    ImportedInvoice::empty(ImportedInvoiceId::new(id))
}
