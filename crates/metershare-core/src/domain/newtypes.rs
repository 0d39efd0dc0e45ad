//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the dimension identifiers that end up in
//! partition and row keys. Each newtype ensures data validity at
//! construction time; characters that are illegal in table-store keys
//! are rejected here rather than at upload time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Characters that the table service forbids in partition and row keys
const KEY_FORBIDDEN: &[char] = &['/', '\\', '#', '?'];

fn validate_key_component(kind: &str, value: &str, max_len: usize) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::InvalidId(format!("{kind} must not be empty")));
    }
    if value.len() > max_len {
        return Err(DomainError::InvalidId(format!(
            "{kind} exceeds {max_len} characters"
        )));
    }
    if value.chars().any(|c| KEY_FORBIDDEN.contains(&c) || c.is_control()) {
        return Err(DomainError::InvalidId(format!(
            "{kind} contains a character not allowed in table keys"
        )));
    }
    Ok(())
}

/// Identifier for a shared dataset.
///
/// Part of every partition key; doubles as the salt for pseudonymous and
/// anonymized dimension hashing, so changing it rotates every derived
/// identifier in the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Create a validated dataset id
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_key_component("dataset id", &value, 64)?;
        Ok(Self(value))
    }

    /// Get the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DatasetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier for a workspace (project folder) as observed locally
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Create a validated workspace id
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_key_component("workspace id", &value, 128)?;
        Ok(Self(value))
    }

    /// Get the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkspaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for the local machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    /// Create a validated machine id
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        validate_key_component("machine id", &value, 128)?;
        Ok(Self(value))
    }

    /// Get the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MachineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
