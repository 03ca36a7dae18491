//! Tenant configuration model.
//!
//! The configuration maps each API key to the database its tenant should
//! use. YAML is the reference serialization:
//!
//! ```yaml
//! tenant-a:
//!   database: a.db
//!   driver: sqlite
//! tenant-b:
//!   database: "dbname=x user=y host=localhost password=z"
//!   driver: postgres
//! ```
//!
//! Multiple tenants may share one physical database; the registry opens one
//! connection per distinct `database` value. Entries are kept in a sorted
//! map so deduplication is deterministic.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::driver::{BackendDescriptor, DriverKind};
use crate::error::{ConfigError, ResolveResult};

/// Mapping from API key to the tenant's database entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseConfig(BTreeMap<String, TenantEntry>);

/// One tenant's database entry.
///
/// `driver` and `database` are both required for initialization to succeed;
/// they are optional here so that incomplete entries surface as validation
/// errors with precise messages rather than opaque parse failures. Any
/// additional keys are preserved but currently unused (reserved).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantEntry {
    /// The driver kind name (`sqlite`, `mysql`, or `postgres`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// The canonical database identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Reserved additional keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl DatabaseConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML-formatted string into a configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses a YAML configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Adds a tenant entry, replacing any previous entry for the same key.
    pub fn with_tenant(
        mut self,
        api_key: impl Into<String>,
        driver: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        self.0.insert(
            api_key.into(),
            TenantEntry {
                driver: Some(driver.into()),
                database: Some(database.into()),
                extra: BTreeMap::new(),
            },
        );
        self
    }

    /// Adds a raw tenant entry, replacing any previous entry for the same
    /// key. Prefer [`DatabaseConfig::with_tenant`] for complete entries.
    pub fn insert(&mut self, api_key: impl Into<String>, entry: TenantEntry) {
        self.0.insert(api_key.into(), entry);
    }

    /// Returns the entry for an API key, if any.
    pub fn get(&self, api_key: &str) -> Option<&TenantEntry> {
        self.0.get(api_key)
    }

    /// Iterates over `(api_key, entry)` pairs in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TenantEntry)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of tenant entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no tenants are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that every tenant entry carries both required keys.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tenant, entry) in &self.0 {
            if tenant.is_empty() {
                return Err(ConfigError::EmptyTenantKey);
            }
            if entry.driver.is_none() {
                return Err(ConfigError::MissingKey {
                    tenant: tenant.clone(),
                    key: "driver",
                });
            }
            if entry.database.is_none() {
                return Err(ConfigError::MissingKey {
                    tenant: tenant.clone(),
                    key: "database",
                });
            }
        }
        Ok(())
    }

    /// Derives the deduplicated backend descriptor list.
    ///
    /// Deduplication is by canonical database identifier only. When two
    /// tenants declare conflicting driver kinds for the same identifier, the
    /// first entry in sorted tenant order wins and a warning is recorded.
    pub fn descriptors(&self) -> ResolveResult<Vec<BackendDescriptor>> {
        let mut seen: HashMap<&str, DriverKind> = HashMap::new();
        let mut descriptors = Vec::new();

        for (tenant, entry) in &self.0 {
            if tenant.is_empty() {
                return Err(ConfigError::EmptyTenantKey.into());
            }
            let driver = entry.driver.as_deref().ok_or_else(|| ConfigError::MissingKey {
                tenant: tenant.clone(),
                key: "driver",
            })?;
            let database = entry.database.as_deref().ok_or_else(|| ConfigError::MissingKey {
                tenant: tenant.clone(),
                key: "database",
            })?;
            let kind: DriverKind = driver.parse()?;

            match seen.get(database) {
                Some(first) if *first != kind => {
                    warn!(
                        database,
                        tenant,
                        first = %first,
                        conflicting = %kind,
                        "conflicting driver kinds for one database; keeping the first"
                    );
                }
                Some(_) => {}
                None => {
                    seen.insert(database, kind);
                    descriptors.push(BackendDescriptor {
                        driver: kind,
                        database: database.to_string(),
                    });
                }
            }
        }

        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolverError;

    const SAMPLE: &str = r#"
tenant-a:
  database: a.db
  driver: sqlite
tenant-b:
  database: "dbname=x user=y host=localhost password=z"
  driver: postgres
"#;

    #[test]
    fn test_from_yaml_str() {
        let config = DatabaseConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.len(), 2);
        let entry = config.get("tenant-a").unwrap();
        assert_eq!(entry.driver.as_deref(), Some("sqlite"));
        assert_eq!(entry.database.as_deref(), Some("a.db"));
    }

    #[test]
    fn test_from_yaml_invalid() {
        let err = DatabaseConfig::from_yaml_str("tenant: [not, a, mapping]").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_validate_missing_driver() {
        let yaml = "tenant-a:\n  database: a.db\n";
        let config = DatabaseConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingKey { key: "driver", .. }
        ));
    }

    #[test]
    fn test_validate_missing_database() {
        let yaml = "tenant-a:\n  driver: sqlite\n";
        let config = DatabaseConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingKey { key: "database", .. }
        ));
    }

    #[test]
    fn test_descriptors_deduplicate_shared_database() {
        let config = DatabaseConfig::new()
            .with_tenant("k1", "sqlite", "shared.db")
            .with_tenant("k2", "sqlite", "shared.db")
            .with_tenant("k3", "sqlite", "other.db");
        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors.len(), 2);
    }

    #[test]
    fn test_descriptors_conflicting_driver_first_wins() {
        // BTreeMap order makes "k1" the first entry seen.
        let config = DatabaseConfig::new()
            .with_tenant("k1", "sqlite", "shared.db")
            .with_tenant("k2", "mysql", "shared.db");
        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].driver, DriverKind::Sqlite);
    }

    #[test]
    fn test_descriptors_unsupported_driver() {
        let config = DatabaseConfig::new().with_tenant("k1", "oracle", "a.db");
        let err = config.descriptors().unwrap_err();
        assert!(matches!(err, ResolverError::UnsupportedDriver { .. }));
    }

    #[test]
    fn test_extra_keys_are_preserved() {
        let yaml = "tenant-a:\n  database: a.db\n  driver: sqlite\n  pool: small\n";
        let config = DatabaseConfig::from_yaml_str(yaml).unwrap();
        let entry = config.get("tenant-a").unwrap();
        assert_eq!(entry.extra.get("pool").map(String::as_str), Some("small"));
    }

    #[test]
    fn test_empty_tenant_key_rejected() {
        let yaml = "\"\":\n  database: a.db\n  driver: sqlite\n";
        let config = DatabaseConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::EmptyTenantKey
        ));
    }
}
