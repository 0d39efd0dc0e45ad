//! Metershare Table - partitioned table store adapter
//!
//! Implements the [`ITableStore`](metershare_core::ports::table_store::ITableStore)
//! port against the Azure Table REST surface, plus the credential chain,
//! the canary permission probe, OData filter sanitization, and the
//! diagnostic redaction routine.

pub mod auth;
pub mod client;
pub mod entity;
pub mod filter;
pub mod probe;
pub mod redact;

pub use auth::{CredentialChain, SharedKeyStore};
pub use client::AzureTableClient;
pub use filter::FilterBuilder;
pub use probe::CredentialValidator;
pub use redact::redact;
