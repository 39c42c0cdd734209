//! Maintenance CLI for the vaccine availability store.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use univaf_core::config::AppConfig;
use univaf_core::{AvailabilityReport, ExternalId, LocationCursor};
use univaf_engine::{BatchOptions, Engine, LocationRef, MergeOptions};
use univaf_metadata::LocationFilter;
use univaf_metadata::MetadataStore;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "univafctl")]
#[command(about = "Maintenance CLI for the vaccine availability store")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "UNIVAF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug, Default)]
struct FilterArgs {
    /// Only locations from this provider
    #[arg(long)]
    provider: Option<String>,
    /// Only locations in this state
    #[arg(long)]
    state: Option<String>,
    /// Only locations holding an id in this system
    #[arg(long)]
    id_system: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> LocationFilter {
        LocationFilter {
            provider: self.provider,
            state: self.state,
            external_id_system: self.id_system,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and check the store is reachable
    Migrate,
    /// Apply one availability report
    Reconcile {
        /// Location id
        #[arg(long, conflicts_with = "external_id", required_unless_present = "external_id")]
        location_id: Option<Uuid>,
        /// External id as system:value (repeatable)
        #[arg(long = "external-id")]
        external_id: Vec<ExternalId>,
        /// JSON report file, or '-' for stdin
        #[arg(long, default_value = "-")]
        report: String,
    },
    /// Print the merged availability of a location
    Availability {
        location_id: Uuid,
        /// Include records marked private
        #[arg(long, default_value_t = false)]
        include_private: bool,
    },
    /// Write locations as NDJSON to stdout
    ExportLocations {
        #[command(flatten)]
        filter: FilterArgs,
        /// Rows per batch (default from config)
        #[arg(long)]
        batch_size: Option<u32>,
        /// Stop after this many rows (0 = no limit)
        #[arg(long, default_value_t = 0)]
        limit: u64,
        /// Resume cursor from a previous export
        #[arg(long)]
        cursor: Option<LocationCursor>,
        /// Seconds before stopping with a resume cursor (default from config)
        #[arg(long)]
        time_budget_secs: Option<u64>,
    },
    /// Find and merge duplicate locations (dry run unless --commit)
    MergeDuplicates {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only group by this id system (repeatable)
        #[arg(long = "system")]
        systems: Vec<String>,
        /// Compare numeric id values without leading zeros
        #[arg(long, default_value_t = false)]
        unpad: bool,
        /// Write the merges
        #[arg(long, default_value_t = false)]
        commit: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();
    let config = load_config(config.as_deref())?;
    let engine = Engine::from_config(config)
        .await
        .context("failed to initialize engine")?;

    let result = run(&engine, command).await;
    engine.flush().await;
    result
}

async fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate => {
            engine.metadata.migrate().await.context("migration failed")?;
            engine
                .metadata
                .health_check()
                .await
                .context("health check failed")?;
            println!("ok");
            Ok(())
        }
        Commands::Reconcile {
            location_id,
            external_id,
            report,
        } => {
            let location = match location_id {
                Some(id) => LocationRef::Id(id),
                None => LocationRef::ExternalIds(external_id),
            };
            let report = read_report(&report)?;
            let outcome = engine
                .reconcile_availability(&location, report)
                .await
                .context("reconcile failed")?;
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Commands::Availability {
            location_id,
            include_private,
        } => {
            let merged = engine
                .get_merged_availability(location_id, include_private)
                .await?;
            println!("{}", serde_json::to_string_pretty(&merged)?);
            Ok(())
        }
        Commands::ExportLocations {
            filter,
            batch_size,
            limit,
            cursor,
            time_budget_secs,
        } => {
            let options = BatchOptions {
                filter: filter.into_filter(),
                batch_size: batch_size.unwrap_or(engine.config.export.batch_size),
                limit,
                cursor,
            };
            let budget = time_budget_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| engine.config.export.time_budget());
            export_locations(engine, options, budget).await
        }
        Commands::MergeDuplicates {
            filter,
            systems,
            unpad,
            commit,
        } => {
            let options = MergeOptions {
                filter: filter.into_filter(),
                systems: (!systems.is_empty()).then_some(systems),
                unpad,
            };
            merge_duplicates(engine, &options, commit).await
        }
    }
}

/// Read and parse a report from a file, or stdin for `-`.
fn read_report(path: &str) -> Result<AvailabilityReport> {
    let contents = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read report from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
    };
    serde_json::from_str(&contents).context("invalid availability report")
}

async fn export_locations(engine: &Engine, options: BatchOptions, budget: Duration) -> Result<()> {
    let mut out = std::io::BufWriter::new(std::io::stdout().lock());
    let outcome = engine
        .export_locations(options, budget, |location| {
            serde_json::to_writer(&mut out, location).map_err(std::io::Error::from)?;
            writeln!(out)?;
            Ok(())
        })
        .await
        .context("export failed")?;
    out.flush()?;

    tracing::info!(exported = outcome.exported, "Export finished");
    if let Some(cursor) = outcome.resume_cursor {
        eprintln!("next_cursor: {cursor}");
    }
    Ok(())
}

async fn merge_duplicates(engine: &Engine, options: &MergeOptions, commit: bool) -> Result<()> {
    let report = engine.merge_duplicates(options, commit).await?;

    if !commit {
        for plan in &report.plans {
            println!("{plan}");
        }
    }
    for conflict in &report.conflicts {
        let ids: Vec<String> = conflict.location_ids.iter().map(Uuid::to_string).collect();
        println!("conflict: [{}] {}", ids.join(", "), conflict.error);
    }

    let stats = &report.stats;
    println!(
        "{} plan(s), {} conflict(s), {} committed, {} failed",
        report.plans.len(),
        report.conflicts.len(),
        report.committed,
        report.failures.len()
    );
    if commit {
        println!(
            "availability moved {}, replaced {}, discarded {}; history moved {}; external ids added {}, removed {}; locations deleted {}",
            stats.availability_moved,
            stats.availability_replaced,
            stats.availability_discarded,
            stats.log_entries_moved,
            stats.external_ids_added,
            stats.external_ids_removed,
            stats.donors_deleted
        );
    }

    if !report.failures.is_empty() {
        anyhow::bail!("{} merge(s) failed", report.failures.len());
    }
    Ok(())
}

/// Load configuration from an optional TOML file and `UNIVAF_` env vars.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("UNIVAF_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use univaf_core::config::MetadataConfig;

    #[test]
    fn load_config_reads_toml_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("univaf.toml");
        std::fs::write(
            &path,
            r#"
[metadata]
type = "sqlite"
path = "/tmp/univaf-test.db"

[dedup]
excluded_systems = ["vtrcks"]

[export]
batch_size = 500
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
        assert_eq!(config.export.batch_size, 500);
        assert_eq!(config.dedup.excluded_systems, vec!["vtrcks".to_string()]);
        assert_eq!(config.dedup.provenance_system, "univaf_v1");
    }

    #[test]
    fn load_config_rejects_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&temp.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("univaf.toml");
        std::fs::write(&path, "[export]\nbatch_size = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn reconcile_requires_a_location() {
        assert!(Cli::try_parse_from(["univafctl", "reconcile"]).is_err());
        assert!(
            Cli::try_parse_from([
                "univafctl",
                "reconcile",
                "--location-id",
                "6f1c1b1e-6a2f-4c59-9f1e-2b8f2f0d8a11",
                "--external-id",
                "kroger:1",
            ])
            .is_err()
        );

        let cli = Cli::try_parse_from([
            "univafctl",
            "reconcile",
            "--external-id",
            "kroger:1",
            "--external-id",
            "vtrcks:abc",
            "--report",
            "report.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Reconcile { external_id, .. } => {
                assert_eq!(external_id.len(), 2);
                assert_eq!(external_id[1], ExternalId::new("vtrcks", "abc"));
            }
            _ => panic!("expected reconcile"),
        }
    }

    #[test]
    fn export_accepts_encoded_cursor() {
        let cursor = LocationCursor::new(
            time::macros::datetime!(2021-05-14 06:00:00 UTC),
            Uuid::nil(),
        );
        let cli = Cli::try_parse_from([
            "univafctl",
            "export-locations",
            "--cursor",
            &cursor.to_string(),
        ])
        .unwrap();
        match cli.command {
            Commands::ExportLocations { cursor: parsed, .. } => assert_eq!(parsed, Some(cursor)),
            _ => panic!("expected export-locations"),
        }

        assert!(
            Cli::try_parse_from(["univafctl", "export-locations", "--cursor", "garbage"]).is_err()
        );
    }

    #[test]
    fn merge_duplicates_is_dry_run_by_default() {
        let cli = Cli::try_parse_from(["univafctl", "merge-duplicates", "--system", "kroger"])
            .unwrap();
        match cli.command {
            Commands::MergeDuplicates {
                commit, systems, ..
            } => {
                assert!(!commit);
                assert_eq!(systems, vec!["kroger".to_string()]);
            }
            _ => panic!("expected merge-duplicates"),
        }
    }
}
