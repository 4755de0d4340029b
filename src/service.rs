use futures::future::join_all;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::helpers::{
    credentials::{self, ConfigError},
    csv::json_to_csv,
    harvest::{HarvestClient, HarvestError, DEFAULT_TIMEOUT},
    output,
};
use crate::models::harvest::{Credentials, DateWindow, EntityType, ParentKind, Retrieval};

/// Upper bound on invoice pages, in case the server never returns an empty one.
pub const MAX_INVOICE_PAGES: u32 = 1000;

/// Process exit codes for the command-line tool.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const EXPORT_FAILED: u8 = 1;
    pub const CONFIG: u8 = 2;
    pub const AUTHENTICATION: u8 = 3;
}

/// Configuration for an export run
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    /// Replaces `https://{app}.harvestapp.com`.
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Dispatch export units concurrently instead of one after another.
    pub concurrent: bool,
    pub window: DateWindow,
    pub convert_csv: bool,
    pub max_pages: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            concurrent: true,
            window: DateWindow::current_year(),
            convert_csv: true,
            max_pages: MAX_INVOICE_PAGES,
        }
    }
}

/// Errors that stop the whole run before any file is written.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Harvest rejected the credentials for {email}. Check the email and password in ~/.harvest")]
    Authentication { email: String },

    #[error("Could not reach Harvest at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: HarvestError,
    },

    #[error(transparent)]
    Client(#[from] HarvestError),

    #[error("Cannot create output directory {}: {}", .path.display(), .source)]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ExportError::Config(_) | ExportError::Client(_) => exit_codes::CONFIG,
            ExportError::Authentication { .. } => exit_codes::AUTHENTICATION,
            ExportError::Unreachable { .. } | ExportError::OutputDir { .. } => {
                exit_codes::EXPORT_FAILED
            }
        }
    }
}

/// Why a single export unit produced no file.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error("{} could not be read for parent ids: {}", .entity.file_name(), .source)]
    MissingParent {
        entity: EntityType,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {}", .path.display(), .source)]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub enum ExportOutcome {
    Written { path: PathBuf, records: usize },
    Failed(UnitError),
}

impl ExportOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, ExportOutcome::Written { .. })
    }
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub outcomes: Vec<(EntityType, ExportOutcome)>,
    pub csv_files: Vec<PathBuf>,
    pub csv_errors: Vec<String>,
}

impl ExportReport {
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_written())
            .count()
            + self.csv_errors.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            exit_codes::SUCCESS
        } else {
            exit_codes::EXPORT_FAILED
        }
    }

    pub fn outcome(&self, entity: EntityType) -> Option<&ExportOutcome> {
        self.outcomes
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, outcome)| outcome)
    }

    pub fn written(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            ExportOutcome::Written { path, .. } => Some(path.as_path()),
            ExportOutcome::Failed(_) => None,
        })
    }
}

/// Exports every supported Harvest collection to `<output_dir>/<entity>.json`.
#[derive(Clone, Debug)]
pub struct ExportService {
    client: HarvestClient,
    config: ExportConfig,
    email: String,
}

impl ExportService {
    pub fn new(client: HarvestClient, config: ExportConfig, email: impl Into<String>) -> Self {
        info!("Creating new ExportService instance");
        Self {
            client,
            config,
            email: email.into(),
        }
    }

    pub fn from_credentials(
        credentials: &Credentials,
        config: ExportConfig,
    ) -> Result<Self, ExportError> {
        let client =
            HarvestClient::new(credentials, config.base_url.as_deref(), config.timeout)?;
        Ok(Self::new(client, config, credentials.email.clone()))
    }

    /// Loads credentials from `path` (or `~/.harvest`) and builds the service.
    pub fn from_credentials_file(
        path: Option<&Path>,
        config: ExportConfig,
    ) -> Result<Self, ExportError> {
        let credentials = match path {
            Some(path) => credentials::load_credentials_from(path)?,
            None => credentials::load_credentials()?,
        };
        Self::from_credentials(&credentials, config)
    }

    /// Runs the full export: credential check, primary collections,
    /// per-project/per-client collections, then CSV conversion.
    pub async fn run(&self) -> Result<ExportReport, ExportError> {
        self.authenticate().await?;

        let dir = &self.config.output_dir;
        if let Err(source) = tokio::fs::create_dir_all(dir).await {
            error!("Failed to create output directory {}: {}", dir.display(), source);
            return Err(ExportError::OutputDir {
                path: dir.clone(),
                source,
            });
        }

        let mut report = ExportReport {
            outcomes: self.run_units(&EntityType::PRIMARY).await,
            ..Default::default()
        };

        if report.is_success() {
            let scoped = self.run_units(&EntityType::PER_PARENT).await;
            report.outcomes.extend(scoped);
        } else {
            warn!(
                "{} primary export(s) failed, skipping per-project and per-client exports",
                report.failures()
            );
        }

        if self.config.convert_csv && report.is_success() {
            self.convert_to_csv(&mut report).await;
        }

        Ok(report)
    }

    async fn authenticate(&self) -> Result<(), ExportError> {
        info!("Checking Harvest credentials for {}", self.email);
        match self.client.who_am_i().await {
            Ok(_) => {
                info!("Authenticated against {}", self.client.base_url());
                Ok(())
            }
            Err(e) if e.is_authentication() => {
                error!("Authentication failed for {}", self.email);
                Err(ExportError::Authentication {
                    email: self.email.clone(),
                })
            }
            Err(source) => {
                error!("Harvest preflight failed: {}", source);
                Err(ExportError::Unreachable {
                    url: self.client.base_url().to_string(),
                    source,
                })
            }
        }
    }

    async fn run_units(&self, entities: &[EntityType]) -> Vec<(EntityType, ExportOutcome)> {
        if self.config.concurrent {
            join_all(
                entities
                    .iter()
                    .map(|&entity| async move { (entity, self.export_entity(entity).await) }),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(entities.len());
            for &entity in entities {
                outcomes.push((entity, self.export_entity(entity).await));
            }
            outcomes
        }
    }

    /// Fetches and writes one entity type. Failures are logged and returned
    /// in the outcome; they never affect other entity types.
    pub async fn export_entity(&self, entity: EntityType) -> ExportOutcome {
        let collection = match self.fetch(entity).await {
            Ok(collection) => collection,
            Err(e) => {
                error!("{}: export failed: {}", entity, e);
                return ExportOutcome::Failed(e);
            }
        };

        let path = self.output_path(entity);
        match output::write_json(&path, &collection).await {
            Ok(()) => {
                let records = output::record_count(&collection);
                info!("{}: exported {} record(s)", entity, records);
                ExportOutcome::Written { path, records }
            }
            Err(source) => {
                error!("{}: failed to write {}: {}", entity, path.display(), source);
                ExportOutcome::Failed(UnitError::Write { path, source })
            }
        }
    }

    pub fn output_path(&self, entity: EntityType) -> PathBuf {
        self.config.output_dir.join(entity.file_name())
    }

    async fn fetch(&self, entity: EntityType) -> Result<Value, UnitError> {
        match entity.retrieval() {
            Retrieval::Collection { path } => {
                let body = self.client.get(path).await?;
                Ok(output::reshape(entity, body))
            }
            Retrieval::Paged { path } => self.fetch_pages(entity, path).await,
            Retrieval::PerParent { parent, path } => {
                self.fetch_per_parent(entity, parent, path).await
            }
        }
    }

    async fn fetch_pages(&self, entity: EntityType, path: &str) -> Result<Value, UnitError> {
        let mut records = Vec::new();

        let max_pages = self.config.max_pages;
        for page in 1..=max_pages {
            let body = self.client.get(&format!("{path}?page={page}")).await?;
            match output::reshape(entity, body) {
                Value::Array(items) if items.is_empty() => return Ok(Value::Array(records)),
                Value::Array(items) => records.extend(items),
                other => {
                    warn!("{}: page {} is not a list, stopping", entity, page);
                    if records.is_empty() {
                        return Ok(other);
                    }
                    return Ok(Value::Array(records));
                }
            }
        }

        warn!(
            "{}: stopped after {} pages without reaching the end",
            entity, max_pages
        );
        Ok(Value::Array(records))
    }

    async fn fetch_per_parent(
        &self,
        entity: EntityType,
        parent: ParentKind,
        path: fn(u64, &DateWindow) -> String,
    ) -> Result<Value, UnitError> {
        let source = parent.source();
        let parents = output::read_json(&self.output_path(source))
            .await
            .map_err(|source_err| UnitError::MissingParent {
                entity: source,
                source: source_err,
            })?;
        let ids = output::collection_ids(&parents, parent.wrapper_key());
        info!("{}: fetching for {} {}(s)", entity, ids.len(), parent.wrapper_key());

        let mut records = Vec::new();
        for id in ids {
            let body = self.client.get(&path(id, &self.config.window)).await?;
            match output::reshape(entity, body) {
                Value::Array(items) => records.extend(items),
                other => records.push(other),
            }
        }

        Ok(Value::Array(records))
    }

    // Runs after all network work; the conversion itself is blocking file I/O.
    async fn convert_to_csv(&self, report: &mut ExportReport) {
        let written: Vec<PathBuf> = report.written().map(Path::to_path_buf).collect();
        let converted = tokio::task::spawn_blocking(move || {
            written
                .iter()
                .map(|path| json_to_csv(path))
                .collect::<Vec<_>>()
        })
        .await;

        let results = match converted {
            Ok(results) => results,
            Err(e) => {
                error!("CSV conversion task failed: {}", e);
                report.csv_errors.push(e.to_string());
                return;
            }
        };

        for result in results {
            match result {
                Ok(Some(csv_path)) => report.csv_files.push(csv_path),
                Ok(None) => {}
                Err(e) => {
                    error!("CSV conversion failed: {}", e);
                    report.csv_errors.push(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harvest_error() -> HarvestError {
        HarvestError::InvalidUrl("nope".to_string())
    }

    #[test]
    fn test_exit_codes_for_fatal_errors() {
        let missing = ExportError::Config(ConfigError::Missing {
            path: PathBuf::from("/nowhere/.harvest"),
        });
        assert_eq!(missing.exit_code(), exit_codes::CONFIG);
        assert_eq!(
            ExportError::Client(harvest_error()).exit_code(),
            exit_codes::CONFIG
        );
        assert_eq!(
            ExportError::Authentication {
                email: "a@b.com".to_string()
            }
            .exit_code(),
            exit_codes::AUTHENTICATION
        );
        assert_eq!(
            ExportError::Unreachable {
                url: "https://t.harvestapp.com".to_string(),
                source: harvest_error(),
            }
            .exit_code(),
            exit_codes::EXPORT_FAILED
        );
        assert_eq!(
            ExportError::OutputDir {
                path: PathBuf::from("/out"),
                source: std::io::Error::other("read-only"),
            }
            .exit_code(),
            exit_codes::EXPORT_FAILED
        );
    }

    #[test]
    fn test_report_exit_code() {
        let mut report = ExportReport::default();
        assert_eq!(report.exit_code(), exit_codes::SUCCESS);

        report.outcomes.push((
            EntityType::Clients,
            ExportOutcome::Written {
                path: PathBuf::from("clients.json"),
                records: 1,
            },
        ));
        assert_eq!(report.exit_code(), exit_codes::SUCCESS);

        report
            .outcomes
            .push((EntityType::Tasks, ExportOutcome::Failed(harvest_error().into())));
        assert_eq!(report.exit_code(), exit_codes::EXPORT_FAILED);
    }

    #[test]
    fn test_csv_errors_count_as_failures() {
        let report = ExportReport {
            csv_errors: vec!["bad".to_string()],
            ..Default::default()
        };
        assert_eq!(report.failures(), 1);
        assert_eq!(report.exit_code(), exit_codes::EXPORT_FAILED);
    }

    #[test]
    fn test_missing_credentials_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".harvest");
        let err = ExportService::from_credentials_file(Some(&path), ExportConfig::default())
            .unwrap_err();
        assert!(matches!(err, ExportError::Config(ConfigError::Missing { .. })));
        assert_eq!(err.exit_code(), exit_codes::CONFIG);
    }

    #[test]
    fn test_credentials_file_builds_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".harvest");
        std::fs::write(&path, r#"{"app":"t","email":"a@b.com","password":"p"}"#).unwrap();

        let service =
            ExportService::from_credentials_file(Some(&path), ExportConfig::default()).unwrap();
        assert_eq!(service.client.base_url(), "https://t.harvestapp.com");
        assert_eq!(service.email, "a@b.com");
    }
}
