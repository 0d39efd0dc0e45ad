//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! validation failures for aliases, identifiers, date ranges, sharing
//! profile transitions, and configuration values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Team alias failed PII-avoidance validation. The message names the
    /// violated rule; the rejected value is never echoed back.
    #[error("Alias rejected: {0}")]
    InvalidAlias(String),

    /// Identity resolution is missing a required input (e.g. tenant id)
    #[error("Missing identity input: {0}")]
    MissingIdentityInput(&'static str),

    /// Invalid identifier format or content
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Invalid query date range
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// Raising the sharing profile requires an explicit consent timestamp
    #[error("Consent required to change sharing profile from {from} to {to}")]
    ConsentRequired {
        /// The currently active profile
        from: String,
        /// The requested, more disclosive profile
        to: String,
    },

    /// Configuration value out of range or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
