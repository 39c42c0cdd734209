//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (recommended for testing and small deployments only).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer UNIVAF_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000) // 1 minute
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes (advisory only)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/univaf.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// A pair of values for one identifier system that historical data carries
/// on the same physical site. When both show up in a merge cluster, `drop`
/// is discarded instead of failing the cluster.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AmbiguousPair {
    pub system: String,
    pub keep: String,
    pub drop: String,
}

/// Entity resolution (duplicate location merging) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Identifier systems never used to group locations: values that are
    /// shared between distinct sites, or that only record provenance.
    #[serde(default = "default_excluded_systems")]
    pub excluded_systems: Vec<String>,
    /// Systems where one location may legitimately hold several values.
    /// These never produce a merge conflict.
    #[serde(default = "default_multi_valued_systems")]
    pub multi_valued_systems: Vec<String>,
    /// System used for the identifier that records a merged donor's old id.
    #[serde(default = "default_provenance_system")]
    pub provenance_system: String,
    /// Known same-system conflicts that are resolved by dropping one value.
    #[serde(default)]
    pub ambiguous_pairs: Vec<AmbiguousPair>,
}

fn default_excluded_systems() -> Vec<String> {
    ["vtrcks", "npi_usa", "univaf_v0", "univaf_v1"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_multi_valued_systems() -> Vec<String> {
    ["univaf_v0", "univaf_v1"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_provenance_system() -> String {
    "univaf_v1".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            excluded_systems: default_excluded_systems(),
            multi_valued_systems: default_multi_valued_systems(),
            provenance_system: default_provenance_system(),
            ambiguous_pairs: Vec::new(),
        }
    }
}

impl DedupConfig {
    pub fn is_excluded(&self, system: &str) -> bool {
        self.excluded_systems.iter().any(|s| s == system)
    }

    pub fn is_multi_valued(&self, system: &str) -> bool {
        self.multi_valued_systems.iter().any(|s| s == system)
    }

    /// Validate dedup configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.provenance_system.trim().is_empty() {
            return Err("dedup.provenance_system cannot be empty".to_string());
        }
        // Each donor adds its own provenance value, so the system must accept many.
        if !self.is_multi_valued(&self.provenance_system) {
            return Err(format!(
                "dedup.provenance_system '{}' must be listed in dedup.multi_valued_systems",
                self.provenance_system
            ));
        }
        let mut seen = BTreeSet::new();
        for pair in &self.ambiguous_pairs {
            if pair.keep == pair.drop {
                return Err(format!(
                    "dedup.ambiguous_pairs entry for '{}' keeps and drops the same value '{}'",
                    pair.system, pair.keep
                ));
            }
            if !seen.insert((&pair.system, &pair.keep, &pair.drop)) {
                return Err(format!(
                    "dedup.ambiguous_pairs has a duplicate entry for '{}'",
                    pair.system
                ));
            }
        }
        Ok(())
    }
}

/// Location export / streaming configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Rows fetched per keyset query.
    #[serde(default = "default_export_batch_size")]
    pub batch_size: u32,
    /// Wall-clock budget for one export call before it stops and returns a
    /// resume cursor.
    #[serde(default = "default_export_time_budget_secs")]
    pub time_budget_secs: u64,
}

fn default_export_batch_size() -> u32 {
    2000
}

fn default_export_time_budget_secs() -> u64 {
    25
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_export_batch_size(),
            time_budget_secs: default_export_time_budget_secs(),
        }
    }
}

impl ExportConfig {
    /// Get the time budget as a std::time::Duration.
    pub fn time_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.time_budget_secs)
    }

    /// Validate export configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("export.batch_size must be greater than 0".to_string());
        }
        if self.time_budget_secs == 0 {
            return Err("export.time_budget_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Duplicate location merging configuration.
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Location export configuration.
    #[serde(default)]
    pub export: ExportConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.dedup.validate()?;
        self.export.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_dedup_config_deserialize_defaults() {
        let config: DedupConfig = serde_json::from_str("{}").unwrap();
        assert!(config.is_excluded("vtrcks"));
        assert!(config.is_multi_valued("univaf_v1"));
        assert_eq!(config.provenance_system, "univaf_v1");
        assert!(config.ambiguous_pairs.is_empty());
    }

    #[test]
    fn test_dedup_provenance_must_be_multi_valued() {
        let config = DedupConfig {
            multi_valued_systems: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dedup_ambiguous_pair_same_value_rejected() {
        let config = DedupConfig {
            ambiguous_pairs: vec![AmbiguousPair {
                system: "kroger".to_string(),
                keep: "1".to_string(),
                drop: "1".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_export_config_rejects_zero_batch() {
        let config = ExportConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_config_postgres_requires_database() {
        let json = r#"{"type":"postgres","host":"localhost"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{"type":"postgres","url":"postgres://localhost/univaf"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }
}
