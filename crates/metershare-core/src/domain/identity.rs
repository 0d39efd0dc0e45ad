//! Identity resolution under a configured identity mode
//!
//! Derives the user identifier (or none) that rollup rows carry. The
//! pseudonymous form is a salted, truncated hash: stable for identical
//! inputs, rotated only by changing the dataset id, and not reversible
//! without the inputs. Team aliases pass a PII-avoidance policy that
//! rejects rather than rewrites; provider object ids pass through
//! verbatim.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::aggregate::UserKeyType;
use super::errors::DomainError;
use super::newtypes::DatasetId;

/// Length of the truncated pseudonymous / dimension hash, in hex characters
const SCOPED_HASH_HEX_LEN: usize = 16;

/// Maximum length of a team alias
const ALIAS_MAX_LEN: usize = 32;

/// Common personal given/family names an alias may not equal.
///
/// Deliberately conservative; the point is to stop the obvious
/// "just use my first name" case, not to be a census.
const COMMON_PERSONAL_NAMES: &[&str] = &[
    "james", "john", "robert", "michael", "david", "william", "richard", "thomas", "mary",
    "patricia", "jennifer", "linda", "elizabeth", "susan", "sarah", "karen", "emma", "anna",
    "maria", "laura", "kevin", "brian", "daniel", "paul", "mark", "peter", "anthony", "steven",
    "andrew", "joshua", "smith", "johnson", "williams", "brown", "jones", "garcia", "miller",
    "davis", "rodriguez", "martinez", "hernandez", "lopez", "gonzalez", "wilson", "anderson",
    "taylor", "moore", "jackson", "martin", "lee", "kim", "chen", "wang", "singh", "kumar",
    "ali", "khan", "sato", "tanaka", "ivanov", "mueller",
];

/// The identity mode configured for this installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityMode {
    /// Emit no user id at all
    None,
    /// Salted, truncated hash of the provider identity
    Pseudonymous,
    /// User-chosen alias, validated against the PII-avoidance policy
    TeamAlias,
    /// Provider-issued object id, verbatim
    EntraObjectId,
}

impl Default for IdentityMode {
    fn default() -> Self {
        Self::None
    }
}

/// Ambient identity inputs available to the resolver
///
/// All fields are optional; each mode names the inputs it requires and
/// fails with a structured error when one is missing.
#[derive(Debug, Clone, Default)]
pub struct IdentityContext {
    /// Directory (tenant) id of the signed-in account
    pub tenant_id: Option<String>,
    /// Object id of the signed-in account
    pub object_id: Option<String>,
    /// User-supplied team alias
    pub team_alias: Option<String>,
}

/// A resolved user identifier in its final emitted form
///
/// Computed fresh each sync from stable inputs; never persisted in any
/// earlier form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    value: String,
    key_type: UserKeyType,
}

impl IdentityKey {
    /// The identifier as it appears in rows
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// How the identifier was derived
    #[must_use]
    pub fn key_type(&self) -> UserKeyType {
        self.key_type
    }
}

/// Salted, truncated SHA-256 over the given parts.
///
/// Shared by the pseudonymous identity and by anonymized workspace /
/// machine dimensions, so every derived identifier in a dataset rotates
/// together when the dataset id changes.
#[must_use]
pub fn scoped_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..SCOPED_HASH_HEX_LEN].to_string()
}

/// Resolves the user identifier for the configured mode
///
/// Returns `Ok(None)` for [`IdentityMode::None`]; every other mode either
/// produces a key or fails with a [`DomainError`] naming what is missing
/// or invalid. Deterministic: identical inputs always yield identical
/// output.
pub fn resolve(
    mode: IdentityMode,
    ctx: &IdentityContext,
    dataset_id: &DatasetId,
) -> Result<Option<IdentityKey>, DomainError> {
    match mode {
        IdentityMode::None => Ok(None),
        IdentityMode::Pseudonymous => {
            let tenant = ctx
                .tenant_id
                .as_deref()
                .ok_or(DomainError::MissingIdentityInput("tenant id"))?;
            let object = ctx
                .object_id
                .as_deref()
                .ok_or(DomainError::MissingIdentityInput("object id"))?;
            Ok(Some(IdentityKey {
                value: scoped_hash(&[tenant, object, dataset_id.as_str()]),
                key_type: UserKeyType::Pseudonymous,
            }))
        }
        IdentityMode::TeamAlias => {
            let alias = ctx
                .team_alias
                .as_deref()
                .ok_or(DomainError::MissingIdentityInput("team alias"))?;
            validate_alias(alias)?;
            Ok(Some(IdentityKey {
                value: alias.to_string(),
                key_type: UserKeyType::TeamAlias,
            }))
        }
        IdentityMode::EntraObjectId => {
            let object = ctx
                .object_id
                .as_deref()
                .ok_or(DomainError::MissingIdentityInput("object id"))?;
            Ok(Some(IdentityKey {
                value: object.to_string(),
                key_type: UserKeyType::EntraObjectId,
            }))
        }
    }
}

/// Validates a team alias against the PII-avoidance policy
///
/// Rules, in order: no `@`, no whitespace, not a common personal name,
/// at most 32 characters, only `[a-z0-9-]`. The error names the violated
/// rule; the value is never silently "fixed".
pub fn validate_alias(alias: &str) -> Result<(), DomainError> {
    if alias.contains('@') {
        return Err(DomainError::InvalidAlias(
            "contains email marker".to_string(),
        ));
    }
    if alias.chars().any(char::is_whitespace) {
        return Err(DomainError::InvalidAlias("contains whitespace".to_string()));
    }
    if COMMON_PERSONAL_NAMES.contains(&alias) {
        return Err(DomainError::InvalidAlias(
            "looks like a personal name".to_string(),
        ));
    }
    if alias.len() > ALIAS_MAX_LEN {
        return Err(DomainError::InvalidAlias(format!(
            "exceeds {ALIAS_MAX_LEN} characters"
        )));
    }
    if alias.is_empty() || !alias.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(DomainError::InvalidAlias(
            "contains characters outside [a-z0-9-]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(name: &str) -> DatasetId {
        DatasetId::new(name).unwrap()
    }

    fn ctx() -> IdentityContext {
        IdentityContext {
            tenant_id: Some("T".to_string()),
            object_id: Some("O".to_string()),
            team_alias: None,
        }
    }

    #[test]
    fn test_none_mode_emits_nothing() {
        let key = resolve(IdentityMode::None, &ctx(), &dataset("D")).unwrap();
        assert!(key.is_none());
    }

    #[test]
    fn test_pseudonymous_is_deterministic() {
        let a = resolve(IdentityMode::Pseudonymous, &ctx(), &dataset("D"))
            .unwrap()
            .unwrap();
        let b = resolve(IdentityMode::Pseudonymous, &ctx(), &dataset("D"))
            .unwrap()
            .unwrap();
        assert_eq!(a.as_str(), b.as_str());
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.key_type(), UserKeyType::Pseudonymous);
    }

    #[test]
    fn test_pseudonymous_rotates_with_dataset() {
        let a = resolve(IdentityMode::Pseudonymous, &ctx(), &dataset("D"))
            .unwrap()
            .unwrap();
        let b = resolve(IdentityMode::Pseudonymous, &ctx(), &dataset("D2"))
            .unwrap()
            .unwrap();
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_pseudonymous_requires_inputs() {
        let empty = IdentityContext::default();
        let err = resolve(IdentityMode::Pseudonymous, &empty, &dataset("D")).unwrap_err();
        assert!(matches!(err, DomainError::MissingIdentityInput("tenant id")));
    }

    #[test]
    fn test_entra_object_id_passes_through_verbatim() {
        let key = resolve(IdentityMode::EntraObjectId, &ctx(), &dataset("D"))
            .unwrap()
            .unwrap();
        assert_eq!(key.as_str(), "O");
        assert_eq!(key.key_type(), UserKeyType::EntraObjectId);
    }

    #[test]
    fn test_alias_mode_validates() {
        let mut c = ctx();
        c.team_alias = Some("dev-01".to_string());
        let key = resolve(IdentityMode::TeamAlias, &c, &dataset("D"))
            .unwrap()
            .unwrap();
        assert_eq!(key.as_str(), "dev-01");
        assert_eq!(key.key_type(), UserKeyType::TeamAlias);

        c.team_alias = Some("john".to_string());
        assert!(resolve(IdentityMode::TeamAlias, &c, &dataset("D")).is_err());
    }

    #[test]
    fn test_validate_alias_accepts_compliant_values() {
        for ok in ["dev-01", "backend-3", "z", "a-very-long-but-legal-alias-0"] {
            validate_alias(ok).unwrap_or_else(|e| panic!("{ok} rejected: {e}"));
        }
    }

    #[test]
    fn test_validate_alias_rejects_email_marker() {
        let err = validate_alias("a@b").unwrap_err();
        assert_eq!(err.to_string(), "Alias rejected: contains email marker");
    }

    #[test]
    fn test_validate_alias_rejects_whitespace() {
        let err = validate_alias("dev 01").unwrap_err();
        assert_eq!(err.to_string(), "Alias rejected: contains whitespace");
    }

    #[test]
    fn test_validate_alias_rejects_personal_names() {
        let err = validate_alias("john").unwrap_err();
        assert_eq!(err.to_string(), "Alias rejected: looks like a personal name");
        assert!(validate_alias("garcia").is_err());
    }

    #[test]
    fn test_validate_alias_rejects_overlong() {
        let err = validate_alias(&"a".repeat(33)).unwrap_err();
        assert_eq!(err.to_string(), "Alias rejected: exceeds 32 characters");
    }

    #[test]
    fn test_validate_alias_rejects_bad_charset() {
        for bad in ["Dev-01", "dev_01", "dev.01", "dév", ""] {
            let err = validate_alias(bad).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Alias rejected: contains characters outside [a-z0-9-]",
                "for {bad:?}"
            );
        }
    }

    #[test]
    fn test_scoped_hash_separator_prevents_collisions() {
        assert_ne!(scoped_hash(&["ab", "c"]), scoped_hash(&["a", "bc"]));
    }
}
