//! OData filter construction with injection prevention
//!
//! Every textual filter built from user-controlled values goes through
//! [`validate_filter_value`] before use: standalone boolean keywords and
//! newlines are rejected outright, and embedded quotes are escaped by
//! doubling. Field names are code-controlled and never pass through
//! user input.

use metershare_core::ports::table_store::StoreError;

/// Boolean keywords that would splice a new predicate into the filter
const FORBIDDEN_TOKENS: &[&str] = &["and", "or", "not"];

/// Validates a user-controlled filter value.
///
/// Rejects values containing a newline, or containing `and`/`or`/`not`
/// as a standalone alphabetic word (case-insensitive). Substring matches
/// like `workspace` or `portal` pass; splice attempts like
/// `x' or RowKey ne '` fail.
pub fn validate_filter_value(value: &str) -> Result<(), StoreError> {
    if value.contains('\n') || value.contains('\r') {
        return Err(StoreError::InvalidFilter(
            "value contains a newline".to_string(),
        ));
    }

    for word in value.split(|c: char| !c.is_ascii_alphabetic()) {
        if word.is_empty() {
            continue;
        }
        let lower = word.to_ascii_lowercase();
        if FORBIDDEN_TOKENS.contains(&lower.as_str()) {
            return Err(StoreError::InvalidFilter(format!(
                "value contains the reserved token {lower:?}"
            )));
        }
    }

    Ok(())
}

/// Escapes a value for embedding in a single-quoted OData literal
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Builds one validated equality clause
pub fn eq_clause(field: &str, value: &str) -> Result<String, StoreError> {
    validate_filter_value(value)?;
    Ok(format!("{field} eq '{}'", escape_filter_value(value)))
}

/// Accumulates validated clauses joined with `and`
#[derive(Debug, Default)]
pub struct FilterBuilder {
    clauses: Vec<String>,
}

impl FilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality clause; the value is validated and escaped
    pub fn and_eq(mut self, field: &str, value: &str) -> Result<Self, StoreError> {
        self.clauses.push(eq_clause(field, value)?);
        Ok(self)
    }

    /// Adds an equality clause only when `value` is present
    pub fn and_eq_opt(self, field: &str, value: Option<&str>) -> Result<Self, StoreError> {
        match value {
            Some(value) => self.and_eq(field, value),
            None => Ok(self),
        }
    }

    /// The combined filter expression, or `None` when no clause was added
    #[must_use]
    pub fn build(self) -> Option<String> {
        if self.clauses.is_empty() {
            None
        } else {
            Some(self.clauses.join(" and "))
        }
    }
}
