//! Infrastructure layer: event store, dispatcher, projections, persistence adapters,
//! background jobs and configuration.

pub mod audit_log;
pub mod banking_store;
pub mod command_dispatcher;
pub mod config;
pub mod db;
pub mod error;
pub mod event_store;
pub mod extraction;
pub mod file_store;
pub mod jobs;
pub mod numbering;
pub mod projections;
pub mod read_model;

pub use error::StoreError;
