//! Metershare Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `UsageAggregateRow`, `SharingProfile`, `IdentityKey`
//! - **Port definitions** - Traits for adapters: `ITableStore`, `ICredentialProvider`,
//!   `ICredentialValidator`, `ISessionStatsCache`, `ISessionSource`, `IClock`
//! - **Configuration** - Typed settings with validation and YAML loading
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O dependencies.
//! Ports define trait interfaces that adapter crates implement.
//! The sync engine, query service, and facade orchestrate domain entities
//! through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
