//! Service wiring: event store, bus, dispatcher, projections, stores and the job executor,
//! plus the use-case methods the GraphQL and REST layers call (one file per area).
//!
//! Every use case takes the caller's [`Session`], checks the permission it needs, runs
//! the command through the dispatcher and applies the committed events to the read
//! models before returning, so a client always reads its own writes.

mod audit;
mod banking;
mod catalog;
mod contracts;
mod identity;
mod imports;
mod invoices;

use std::{
    convert::Infallible,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use kontor_auth::{Permission, RoleDefinition, TenantStatus, User, UserStatus};
use kontor_core::{Aggregate, AggregateId, Auditable, DomainError, TenantId, UserId};
use kontor_events::{EventBus, EventEnvelope, InMemoryEventBus};
use kontor_infra::audit_log::{AuditLog, AuditSink, InMemoryAuditLog, PostgresAuditLog};
use kontor_infra::banking_store::InMemoryBankingStore;
use kontor_infra::command_dispatcher::CommandDispatcher;
use kontor_infra::config::AppConfig;
use kontor_infra::event_store::InMemoryEventStore;
use kontor_infra::extraction::{ExtractionWorker, InvoiceExtractor, LlmExtractionClient};
use kontor_infra::file_store::ContentAddressedStore;
use kontor_infra::jobs::{InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle};
use kontor_infra::numbering::{InMemoryNumberSchemeStore, NumberSchemeStore, PostgresNumberSchemeStore};
use kontor_infra::projections::Projections;
use kontor_infra::read_model::{InMemoryTenantStore, TenantStore, UniqueIndex};
use kontor_invoicing::UploadPolicy;

use crate::app::errors::ApiError;
use crate::authz;
use crate::context::Session;

pub use banking::{ForecastOptions, StatementImport};
pub use identity::{AuthFailure, AuthSession, NewUser, SignupInput};
pub use invoices::{IssueRequest, RequestedLine};

type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
pub type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<Bus>>;

/// Natural-key kinds in the [`UniqueIndex`].
pub(crate) mod keys {
    pub const TENANT_SLUG: &str = "tenant_slug";
    pub const USER_EMAIL: &str = "user_email";
    pub const PRODUCT_SKU: &str = "product_sku";
    pub const BANK_IBAN: &str = "bank_iban";
    pub const INVOICE_FILE: &str = "invoice_file";
}

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to compile e-invoice patterns: {0}")]
    Patterns(String),

    #[error("failed to start job executor: {0}")]
    Executor(#[from] std::io::Error),
}

pub struct AppServices {
    config: AppConfig,
    dispatcher: Arc<Dispatcher>,
    projections: Arc<Projections>,
    unique: UniqueIndex,
    roles: InMemoryTenantStore<String, RoleDefinition>,
    numbers: Arc<dyn NumberSchemeStore>,
    audit_sink: Arc<dyn AuditSink>,
    audit_log: Arc<dyn AuditLog>,
    banking: InMemoryBankingStore,
    files: ContentAddressedStore,
    jobs: Arc<InMemoryJobStore>,
    jwt: Arc<kontor_auth::Hs256JwtValidator>,
    upload_policy: UploadPolicy,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    executor: Mutex<Option<JobExecutorHandle>>,
}

impl AppServices {
    /// Wire everything. With a pool, number schemes and the audit log live in Postgres;
    /// everything else is in memory. Must be called inside a tokio runtime.
    pub fn build(config: AppConfig, pool: Option<sqlx::PgPool>) -> Result<Arc<Self>, StartupError> {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());
        let projections = Arc::new(Projections::in_memory());

        let (numbers, audit_sink, audit_log): (Arc<dyn NumberSchemeStore>, Arc<dyn AuditSink>, Arc<dyn AuditLog>) =
            match pool {
                Some(pool) => {
                    let audit = Arc::new(PostgresAuditLog::new(pool.clone()));
                    (Arc::new(PostgresNumberSchemeStore::new(pool)), audit.clone(), audit)
                }
                None => {
                    let audit = Arc::new(InMemoryAuditLog::new());
                    (Arc::new(InMemoryNumberSchemeStore::new()), audit.clone(), audit)
                }
            };

        let dispatcher = Arc::new(CommandDispatcher::new(store, bus.clone()).with_audit_sink(audit_sink.clone()));

        // Realtime channel (SSE): lossy broadcast, tenant-filtered in handlers.
        let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);
        spawn_bus_subscriber(&bus, projections.clone(), realtime_tx.clone());

        let files = ContentAddressedStore::new(config.storage_dir.clone());
        let jobs = Arc::new(InMemoryJobStore::new());
        let extractor: Option<Arc<dyn InvoiceExtractor>> = config
            .extraction
            .clone()
            .map(|c| Arc::new(LlmExtractionClient::new(c)) as Arc<dyn InvoiceExtractor>);
        if extractor.is_none() {
            tracing::info!("EXTRACTION_API_URL not set; only e-invoice XML will be extracted");
        }
        let worker = Arc::new(
            ExtractionWorker::new(dispatcher.clone(), projections.clone(), files.clone(), extractor)
                .map_err(|e| StartupError::Patterns(e.to_string()))?,
        );
        let mut executor = JobExecutor::new(jobs.clone());
        worker.register(&mut executor);
        let handle = executor.spawn(JobExecutorConfig::default().with_name("extraction-jobs"))?;

        Ok(Arc::new(Self {
            jwt: Arc::new(kontor_auth::Hs256JwtValidator::new(config.jwt_secret.clone().into_bytes())),
            upload_policy: UploadPolicy::new(config.max_upload_bytes),
            config,
            dispatcher,
            projections,
            unique: UniqueIndex::new(),
            roles: InMemoryTenantStore::new(),
            numbers,
            audit_sink,
            audit_log,
            banking: InMemoryBankingStore::new(),
            files,
            jobs,
            realtime_tx,
            executor: Mutex::new(Some(handle)),
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn jwt(&self) -> Arc<kontor_auth::Hs256JwtValidator> {
        self.jwt.clone()
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Stop the job executor, waiting for the job in flight, then drain the audit log.
    pub async fn shutdown(&self) {
        let handle = self.executor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let stats = handle.stats();
            tracing::info!(processed = stats.processed, failed = stats.failed, dead_lettered = stats.dead_lettered, "stopping job executor");
            handle.shutdown();
        }
        let lost = self.audit_log.flush().await;
        if !lost.is_empty() {
            tracing::error!(count = lost.len(), "audit entries could not be stored");
        }
    }

    /// Run a command and fold its events into the read models.
    fn execute<A>(
        &self,
        tenant_id: TenantId,
        actor: Option<UserId>,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, ApiError>
    where
        A: Aggregate<Error = DomainError> + Auditable + Clone,
        A::Event: kontor_events::Event + Serialize + DeserializeOwned,
    {
        let dispatched = self
            .dispatcher
            .dispatch(tenant_id, actor, aggregate_id, aggregate_type, command, make_aggregate)?;
        self.projections.apply(&dispatched.events);
        Ok(dispatched.aggregate)
    }

    /// The session's user, if it still exists and both user and tenant are active.
    fn active_user(&self, session: &Session) -> Result<User, ApiError> {
        let tenant_id = session.tenant_id();
        let user = self
            .projections
            .users
            .get(tenant_id, AggregateId::from(session.user_id()))
            .filter(|u| u.created && u.tenant_id == Some(tenant_id))
            .ok_or(ApiError::Unauthenticated)?;
        if user.status == UserStatus::Suspended {
            return Err(ApiError::Unauthenticated);
        }
        let tenant_active = self
            .projections
            .tenants
            .get(tenant_id, AggregateId::from(tenant_id))
            .is_some_and(|t| t.status == TenantStatus::Active);
        if !tenant_active {
            return Err(ApiError::Forbidden("tenant is suspended".to_string()));
        }
        Ok(user)
    }

    /// Authenticate the session and check one permission.
    fn authorize(&self, session: &Session, required: &Permission) -> Result<User, ApiError> {
        let user = self.active_user(session)?;
        let definitions = self.roles.list(session.tenant_id());
        authz::require(session, &definitions, required)?;
        Ok(user)
    }
}

/// Background subscriber: bus -> projections -> realtime broadcast.
///
/// Services apply their own events right after dispatch; this catches events from the
/// job executor thread and keeps the SSE stream fed. Projections skip events they have
/// already seen.
fn spawn_bus_subscriber(bus: &Arc<Bus>, projections: Arc<Projections>, realtime_tx: broadcast::Sender<RealtimeMessage>) {
    let sub = bus.subscribe();
    tokio::task::spawn_blocking(move || {
        for env in sub.iter() {
            if let Err(e) = projections.apply_envelope(&env) {
                tracing::warn!(error = %e, aggregate_type = %env.aggregate_type(), "projection apply failed");
                continue;
            }

            // Lossy; no backpressure on the command path.
            let _ = realtime_tx.send(RealtimeMessage {
                tenant_id: env.tenant_id(),
                topic: env.topic().to_string(),
                payload: serde_json::json!({
                    "kind": "event",
                    "event_type": env.event_type(),
                    "actor_id": env.actor_id().map(|a| a.to_string()),
                    "occurred_at": env.occurred_at(),
                    "aggregate_type": env.aggregate_type(),
                    "aggregate_id": env.aggregate_id().to_string(),
                    "sequence_number": env.sequence_number(),
                }),
            });
        }
        tracing::debug!("event bus closed; subscriber stopped");
    });
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
